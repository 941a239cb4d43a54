//! Command dispatch: bridges CLI args -> dashboard operations -> output formatting.

pub mod config_cmd;
pub mod send;
pub mod watch;
pub mod widgets;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a command that needs configuration to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(args, global).await,
        Command::Send(args) => send::handle(args, global).await,
        Command::Widgets => widgets::handle(global),
        Command::Config(args) => config_cmd::handle(args, global),
        // Handled before dispatch
        Command::Completions(_) => Err(CliError::Internal(
            "completions are generated without configuration".into(),
        )),
    }
}
