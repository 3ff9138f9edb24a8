//! Command dispatch: bridges CLI args -> sync engine -> output formatting.

pub mod config_cmd;
pub mod status;
pub mod sync;
pub mod util;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a house-bound command to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Sync(args) => sync::handle_sync(args, global).await,
        Command::SetMaster(args) => sync::handle_set_master(args, global).await,
        Command::Watch(args) => sync::handle_watch(args, global).await,
        Command::Status => status::handle_status(global).await,
        Command::Display => status::handle_display(global).await,
        Command::Local => status::handle_local(global).await,
        Command::Houses => status::handle_houses(global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "config and completions are not dispatched".into(),
        )),
    }
}
