//! On-disk conventions of a virtual environment.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use walkdir::WalkDir;

/// Path configuration file that links an environment to the shared libraries.
pub const SHARED_PTH: &str = "pvx_shared.pth";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VenvPaths {
    pub bin_dir: PathBuf,
    pub python: PathBuf,
}

impl VenvPaths {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        #[cfg(windows)]
        {
            let bin_dir = root.join("Scripts");
            let python = bin_dir.join("python.exe");
            Self { bin_dir, python }
        }
        #[cfg(not(windows))]
        {
            let bin_dir = root.join("bin");
            let python = bin_dir.join("python");
            Self { bin_dir, python }
        }
    }

    /// Entry point of an executable installed into the environment.
    #[must_use]
    pub fn executable(&self, name: &str) -> PathBuf {
        if cfg!(windows) && Path::new(name).extension().is_none() {
            self.bin_dir.join(format!("{name}.exe"))
        } else {
            self.bin_dir.join(name)
        }
    }
}

/// Package-search directory of the environment rooted at `root`.
///
/// # Errors
/// Returns an error when the environment has no `site-packages` directory.
pub fn locate_site_packages(root: &Path) -> Result<PathBuf> {
    let lib_dir = root.join("lib");
    if let Ok(entries) = fs::read_dir(&lib_dir) {
        let mut candidates = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().to_lowercase())
                    .is_some_and(|name| name.starts_with("python"))
            })
            .map(|path| path.join("site-packages"))
            .filter(|path| path.is_dir())
            .collect::<Vec<_>>();
        candidates.sort();
        if let Some(site) = candidates.pop() {
            return Ok(site);
        }
    }
    let windows_site = root.join("Lib").join("site-packages");
    if windows_site.is_dir() {
        return Ok(windows_site);
    }
    Err(anyhow!(
        "no site-packages directory found under {}",
        root.display()
    ))
}

/// True iff `root` exists and already holds at least one entry.
#[must_use]
pub fn dir_has_entries(root: &Path) -> bool {
    match fs::read_dir(root) {
        Ok(mut entries) => entries.next().is_some(),
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => {
            tracing::debug!(%err, root = %root.display(), "unable to list environment root");
            false
        }
    }
}

/// Searches the whole tree below `root` for the shared-libraries marker.
#[must_use]
pub fn contains_shared_pth(root: &Path) -> bool {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .any(|entry| entry.file_type().is_file() && entry.file_name() == SHARED_PTH)
}
