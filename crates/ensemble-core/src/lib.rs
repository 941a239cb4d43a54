// ensemble-core: Polling dashboard layer between ensemble-api and consumers (CLI).

pub mod adapter;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use adapter::{AdapterRegistry, RefreshAdapter, RefreshContext};
pub use config::{DashboardConfig, ReconnectConfig, WidgetConfig, DEFAULT_ENDPOINT};
pub use dashboard::Dashboard;
pub use error::CoreError;
pub use model::{EntityDescriptor, State};
pub use scheduler::RefreshScheduler;
pub use store::EntityRegistry;
pub use stream::EntityStream;

// Mesh client types consumers need alongside the dashboard.
pub use ensemble_api::{Args, Command, CommandBroker, ConnectivityState, ReplyHandle};
pub use ensemble_api::Error as ApiError;
