use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info};

use super::log_failed_output;
use crate::errors::VenvIssue;
use crate::process::{command_line, ProcessRunner};

pub(crate) const VENV_INSPECTOR: &str = include_str!("inspector.py");

/// What the inspector reports about one package inside an environment.
///
/// Every key the inspector prints is required; only the traceback may be
/// left out.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VenvInspection {
    pub apps: Vec<String>,
    pub app_paths: Vec<PathBuf>,
    pub apps_of_dependencies: Vec<String>,
    pub app_paths_of_dependencies: BTreeMap<String, Vec<PathBuf>>,
    /// `null` when the package is not installed in the environment.
    #[serde(deserialize_with = "Option::deserialize")]
    pub package_version: Option<String>,
    pub python_version: String,
    #[serde(default)]
    pub exception_traceback: Option<String>,
}

/// Runs the inspector inside `python` for `package`.
///
/// # Errors
/// Fails when the interpreter cannot be started, exits non-zero, or prints
/// anything other than a single JSON object.
pub(crate) fn inspect_package(
    runner: &dyn ProcessRunner,
    python: &Path,
    bin_dir: &Path,
    package: &str,
) -> Result<VenvInspection> {
    let program = python.display().to_string();
    let args = vec![
        "-c".to_string(),
        VENV_INSPECTOR.to_string(),
        package.to_string(),
        bin_dir.display().to_string(),
    ];
    let shown = vec![
        "-c".to_string(),
        "<contents of venv inspector>".to_string(),
        package.to_string(),
        bin_dir.display().to_string(),
    ];
    debug!(command = %command_line(&program, &shown), "inspecting package");
    let output = runner.run_command(&program, &args)?;
    if !output.success() {
        log_failed_output("venv inspector", &output);
        return Err(VenvIssue::CommandFailed {
            command: command_line(&program, &shown),
            code: output.code,
            stderr: output.stderr,
        }
        .into());
    }
    parse_inspection(&output.stdout)
}

pub(crate) fn parse_inspection(stdout: &str) -> Result<VenvInspection> {
    let malformed = |error: String| VenvIssue::MalformedOutput {
        what: "venv inspector".to_string(),
        error,
    };
    let value: Value =
        serde_json::from_str(stdout.trim()).map_err(|err| malformed(err.to_string()))?;
    if !value.is_object() {
        return Err(malformed(format!("expected a JSON object, got {value}")).into());
    }
    let mut inspection: VenvInspection =
        serde_json::from_value(value).map_err(|err| malformed(err.to_string()))?;
    if let Some(traceback) = inspection.exception_traceback.take() {
        error!("internal error while inspecting the environment");
        info!("venv inspector traceback:\n{traceback}");
    }
    Ok(inspection)
}
