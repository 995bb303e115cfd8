#![deny(clippy::all, warnings)]

pub mod commands;
pub mod config;
pub mod effects;
mod errors;
mod fs;
mod outcome;
pub mod process;
pub mod venv;

#[cfg(test)]
mod testing;

pub use commands::{
    execute, CommandContext, InjectCommand, InstallCommand, PvxCommand, UpgradeCommand,
};
pub use config::{Config, EnvSnapshot};
pub use effects::{Effects, SharedEffects, SystemEffects};
pub use errors::{venv_issue, VenvIssue};
pub use outcome::{CommandStatus, ExecutionOutcome, InstallUserError};
pub use process::{ProcessRunner, RunOutput, SystemProcessRunner};
pub use venv::{InstallRequest, Linkage, Venv, VenvContainer, VenvOptions};
