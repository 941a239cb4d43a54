mod registry;

pub use registry::{EntityRegistry, RefreshGuard};
