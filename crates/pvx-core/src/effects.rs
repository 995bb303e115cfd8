use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::process::{ProcessRunner, SystemProcessRunner};
use crate::venv::{SharedLibs, SharedRuntime};

/// Side-effecting collaborators an environment talks to.
pub trait Effects: Send + Sync {
    fn process(&self) -> &dyn ProcessRunner;
    fn shared_libs(&self) -> &dyn SharedRuntime;
}

pub type SharedEffects = Arc<dyn Effects>;

pub struct SystemEffects {
    process: Arc<SystemProcessRunner>,
    shared_libs: Arc<SharedLibs>,
}

impl SystemEffects {
    /// # Errors
    /// Returns an error when no base interpreter can be found.
    pub fn new(config: &Config) -> Result<Self> {
        let process = Arc::new(SystemProcessRunner::new(config.max_capture_bytes()));
        let shared_libs = Arc::new(SharedLibs::new(
            config.shared_libs_dir().to_path_buf(),
            config.default_python()?,
            process.clone(),
        ));
        Ok(Self {
            process,
            shared_libs,
        })
    }
}

impl Effects for SystemEffects {
    fn process(&self) -> &dyn ProcessRunner {
        self.process.as_ref()
    }

    fn shared_libs(&self) -> &dyn SharedRuntime {
        self.shared_libs.as_ref()
    }
}
