//! Command dispatch: settings → command handlers.

pub mod check;
pub mod devices;
pub mod run;

use zigbridge_config::Settings;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a settings-bound command to its handler.
pub async fn dispatch(cmd: Command, settings: Settings, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Run => run::handle(settings, global.config.as_deref()).await,
        Command::Devices(args) => devices::handle(&settings, &args).await,
        Command::Check => check::handle(&settings),
        // Handled before settings are loaded
        Command::Completions(_) => Ok(()),
    }
}
