use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

use super::environment::{Venv, VenvOptions};
use crate::effects::SharedEffects;
use pvx_domain::canonicalize_package_name;

/// The directory holding one environment per installed package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenvContainer {
    root: PathBuf,
}

impl VenvContainer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Environment directories directly under the root.
    ///
    /// The filesystem is read anew on every call. Plain files are skipped and a
    /// missing root yields nothing.
    pub fn iter_venv_dirs(&self) -> impl Iterator<Item = PathBuf> {
        fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
    }

    #[must_use]
    pub fn venv_dir(&self, package: &str) -> PathBuf {
        self.root.join(canonicalize_package_name(package))
    }

    /// Opens every environment so that broken shared-library links surface.
    ///
    /// # Errors
    /// Returns the first construction failure.
    pub fn verify_shared_libs(&self, effects: &SharedEffects, options: &VenvOptions) -> Result<()> {
        for dir in self.iter_venv_dirs() {
            Venv::new(dir, effects.clone(), options.clone())?;
        }
        Ok(())
    }
}

impl fmt::Display for VenvContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root.display())
    }
}
