//! Isolated per-package environments and the shared libraries they link to.

mod container;
mod environment;
mod inspector;
pub(crate) mod layout;
mod shared_libs;
mod spec;


use anyhow::Result;
use tracing::{debug, error};

use crate::process::{command_line, ProcessRunner, RunOutput};

pub use container::VenvContainer;
pub use environment::{InstallRequest, Linkage, Venv, VenvOptions};
pub use inspector::VenvInspection;
pub use layout::{VenvPaths, SHARED_PTH};
pub use shared_libs::{SharedLibs, SharedRuntime, SHARED_LIBS_MAX_AGE, SHARED_PACKAGES};
pub use spec::{
    fix_package_name, full_package_description, parse_specifier_for_install,
    parse_specifier_for_metadata, requirement_name,
};

/// Where a child's stdout and stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputMode {
    Capture,
    /// Captured and echoed to the terminal.
    Stream,
    Inherit,
}

impl OutputMode {
    pub(crate) fn for_verbosity(verbose: bool) -> Self {
        if verbose {
            Self::Stream
        } else {
            Self::Capture
        }
    }
}

/// Runs `program` after logging its command line at debug level.
pub(crate) fn run_logged(
    runner: &dyn ProcessRunner,
    mode: OutputMode,
    program: &str,
    args: &[String],
) -> Result<RunOutput> {
    debug!(command = %command_line(program, args), "running");
    match mode {
        OutputMode::Capture => runner.run_command(program, args),
        OutputMode::Stream => runner.run_command_streaming(program, args),
        OutputMode::Inherit => runner.run_command_passthrough(program, args),
    }
}

/// Streams child output to the terminal in verbose mode, captures it otherwise.
pub(crate) fn run_maybe_streaming(
    runner: &dyn ProcessRunner,
    verbose: bool,
    program: &str,
    args: &[String],
) -> Result<RunOutput> {
    run_logged(runner, OutputMode::for_verbosity(verbose), program, args)
}

/// Surfaces the captured stderr of a failed child.
pub(crate) fn log_failed_output(what: &str, output: &RunOutput) {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        error!(code = output.code, "{what} failed:\n{stderr}");
    }
}
