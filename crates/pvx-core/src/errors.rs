use serde_json::{json, Value};

use crate::InstallUserError;

/// Fatal conditions raised while managing an environment.
///
/// Every message embeds the literal package, spec or path involved.
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum VenvIssue {
    #[error("failed to start {program}: {error}")]
    LaunchFailed { program: String, error: String },
    #[error("failed to create virtual environment at {root} (exit code {code})")]
    VenvCreationFailed {
        root: String,
        code: i32,
        stderr: String,
    },
    #[error("error installing {description}")]
    InstallFailed { description: String, code: i32 },
    #[error("error upgrading {description}")]
    UpgradeFailed { description: String, code: i32 },
    #[error("'{command}' failed (exit code {code})")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("cannot determine package name from spec '{spec}'")]
    PackageNameUndetermined { spec: String },
    #[error("shared libraries at {shared_root} are invalid and need re-installation")]
    SharedLibsInvalid {
        shared_root: String,
        venv_name: String,
    },
    #[error("unable to install {description}")]
    MissingVersion { description: String },
    #[error("unable to parse package spec '{spec}'")]
    InvalidSpec { spec: String },
    #[error("malformed {what} output: {error}")]
    MalformedOutput { what: String, error: String },
}

impl VenvIssue {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::LaunchFailed { .. } => "PVX101",
            Self::VenvCreationFailed { .. }
            | Self::InstallFailed { .. }
            | Self::UpgradeFailed { .. }
            | Self::CommandFailed { .. } => "PVX102",
            Self::PackageNameUndetermined { .. } => "PVX103",
            Self::SharedLibsInvalid { .. } => "PVX104",
            Self::MissingVersion { .. } => "PVX105",
            Self::InvalidSpec { .. } => "PVX106",
            Self::MalformedOutput { .. } => "PVX107",
        }
    }

    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::LaunchFailed { .. } => "subprocess_launch_failed",
            Self::VenvCreationFailed { .. } => "venv_creation_failed",
            Self::InstallFailed { .. } => "install_failed",
            Self::UpgradeFailed { .. } => "upgrade_failed",
            Self::CommandFailed { .. } => "subprocess_failed",
            Self::PackageNameUndetermined { .. } => "package_name_undetermined",
            Self::SharedLibsInvalid { .. } => "shared_libs_invalid",
            Self::MissingVersion { .. } => "missing_version_after_install",
            Self::InvalidSpec { .. } => "invalid_package_spec",
            Self::MalformedOutput { .. } => "malformed_subprocess_output",
        }
    }

    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::LaunchFailed { .. } => {
                Some("Check that the interpreter exists and is executable.".to_string())
            }
            Self::PackageNameUndetermined { .. } => {
                Some("Check the package spec for errors.".to_string())
            }
            Self::SharedLibsInvalid { venv_name, .. } => Some(format!(
                "Reinstall a package to rebuild them, e.g. `pvx install {venv_name} --force`"
            )),
            Self::MissingVersion { .. } => Some(
                "Check the name or spec for errors, and verify that it can be installed with pip."
                    .to_string(),
            ),
            Self::InvalidSpec { .. } => Some(
                "Pass a requirement like `black==24.1.0`, a URL, or an existing local path."
                    .to_string(),
            ),
            Self::VenvCreationFailed { .. }
            | Self::InstallFailed { .. }
            | Self::UpgradeFailed { .. }
            | Self::CommandFailed { .. }
            | Self::MalformedOutput { .. } => None,
        }
    }

    #[must_use]
    pub fn details(&self) -> Value {
        let mut details = json!({
            "code": self.code(),
            "reason": self.reason(),
        });
        if let Value::Object(map) = &mut details {
            if let Some(hint) = self.hint() {
                map.insert("hint".into(), json!(hint));
            }
            match self {
                Self::LaunchFailed { program, error } => {
                    map.insert("program".into(), json!(program));
                    map.insert("error".into(), json!(error));
                }
                Self::VenvCreationFailed { root, code, stderr } => {
                    map.insert("venv".into(), json!(root));
                    map.insert("exit_code".into(), json!(code));
                    map.insert("stderr".into(), json!(stderr));
                }
                Self::InstallFailed { description, code }
                | Self::UpgradeFailed { description, code } => {
                    map.insert("package".into(), json!(description));
                    map.insert("exit_code".into(), json!(code));
                }
                Self::CommandFailed {
                    command,
                    code,
                    stderr,
                } => {
                    map.insert("command".into(), json!(command));
                    map.insert("exit_code".into(), json!(code));
                    map.insert("stderr".into(), json!(stderr));
                }
                Self::PackageNameUndetermined { spec } | Self::InvalidSpec { spec } => {
                    map.insert("spec".into(), json!(spec));
                }
                Self::SharedLibsInvalid {
                    shared_root,
                    venv_name,
                } => {
                    map.insert("shared_libs".into(), json!(shared_root));
                    map.insert("venv".into(), json!(venv_name));
                }
                Self::MissingVersion { description } => {
                    map.insert("package".into(), json!(description));
                }
                Self::MalformedOutput { what, error } => {
                    map.insert("source".into(), json!(what));
                    map.insert("error".into(), json!(error));
                }
            }
        }
        details
    }
}

impl From<&VenvIssue> for InstallUserError {
    fn from(issue: &VenvIssue) -> Self {
        InstallUserError::new(issue.to_string(), issue.details())
    }
}

/// Finds the [`VenvIssue`] carried by `err`, if any.
#[must_use]
pub fn venv_issue(err: &anyhow::Error) -> Option<&VenvIssue> {
    err.chain().find_map(|cause| cause.downcast_ref::<VenvIssue>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn details_carry_code_reason_and_context() {
        let issue = VenvIssue::PackageNameUndetermined {
            spec: "git+https://example.invalid/repo.git".to_string(),
        };
        let details = issue.details();
        assert_eq!(details["code"], "PVX103");
        assert_eq!(details["reason"], "package_name_undetermined");
        assert_eq!(details["spec"], "git+https://example.invalid/repo.git");
        assert!(details["hint"].as_str().is_some());
        assert_eq!(
            issue.to_string(),
            "cannot determine package name from spec 'git+https://example.invalid/repo.git'"
        );
    }

    #[test]
    fn shared_libs_hint_names_the_environment() {
        let issue = VenvIssue::SharedLibsInvalid {
            shared_root: "/home/u/.local/pvx/shared".to_string(),
            venv_name: "black".to_string(),
        };
        let hint = issue.hint().unwrap_or_default();
        assert!(hint.contains("pvx install black --force"), "{hint}");
    }

    #[test]
    fn issue_is_found_beneath_context() {
        let err = anyhow::Error::new(VenvIssue::MissingVersion {
            description: "black".to_string(),
        })
        .context("installing into /venvs/black");
        let found = venv_issue(&err).cloned();
        assert!(matches!(found, Some(VenvIssue::MissingVersion { .. })));
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("plain")).context("outer");
        assert!(venv_issue(&err.unwrap_err()).is_none());
    }
}
