use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::venv_issue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            details,
        }
    }

    pub fn failure(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Failure,
            message: message.into(),
            details,
        }
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
            message: message.into(),
            details,
        }
    }

    /// Turns a command error into an outcome when it is one the user can act
    /// on; anything else is handed back to the caller.
    ///
    /// # Errors
    /// Returns `err` unchanged when it carries no [`crate::VenvIssue`] or
    /// [`InstallUserError`].
    pub fn from_error(err: anyhow::Error) -> anyhow::Result<Self> {
        if let Some(issue) = venv_issue(&err) {
            let user = InstallUserError::from(issue);
            return Ok(Self::user_error(user.message, user.details));
        }
        match err.downcast::<InstallUserError>() {
            Ok(user) => Ok(Self::user_error(user.message, user.details)),
            Err(other) => Err(other),
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self.status {
            CommandStatus::Ok => 0,
            CommandStatus::UserError => 1,
            CommandStatus::Failure => 2,
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[error("{message}")]
pub struct InstallUserError {
    pub(crate) message: String,
    pub(crate) details: Value,
}

impl InstallUserError {
    pub fn new(message: impl Into<String>, details: Value) -> Self {
        Self {
            message: message.into(),
            details,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn details(&self) -> &Value {
        &self.details
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}
