use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use filetime::{set_file_mtime, FileTime};
use tracing::{debug, error, info};

use super::layout::{locate_site_packages, VenvPaths};
use super::{log_failed_output, run_maybe_streaming};
use crate::errors::VenvIssue;
use crate::process::ProcessRunner;

/// Packaging tools kept in the shared libraries.
pub const SHARED_PACKAGES: [&str; 3] = ["pip", "setuptools", "wheel"];

/// Age after which the shared libraries are refreshed.
pub const SHARED_LIBS_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// The process-wide environment holding the packaging tools that every
/// shared-linked environment imports through its `pvx_shared.pth` file.
///
/// Concurrent processes may create or upgrade the same runtime at once; no
/// cross-process lock is taken.
pub trait SharedRuntime: Send + Sync {
    fn root(&self) -> &Path;
    /// True iff both the interpreter and pip exist in the shared environment.
    fn is_valid(&self) -> bool;
    fn needs_upgrade(&self) -> bool;
    /// Creates the runtime if it is not valid yet; a no-op otherwise.
    fn create(&self, verbose: bool) -> Result<()>;
    /// Upgrades the packaging tools. A failed upgrade is logged and leaves the
    /// runtime as it was.
    fn upgrade(&self, verbose: bool) -> Result<()>;
    fn site_packages(&self) -> Result<PathBuf>;
}

pub struct SharedLibs {
    root: PathBuf,
    paths: VenvPaths,
    base_python: String,
    runner: Arc<dyn ProcessRunner>,
    max_age: Duration,
    updated_this_run: AtomicBool,
}

impl SharedLibs {
    #[must_use]
    pub fn new(root: PathBuf, base_python: String, runner: Arc<dyn ProcessRunner>) -> Self {
        let paths = VenvPaths::new(&root);
        Self {
            root,
            paths,
            base_python,
            runner,
            max_age: SHARED_LIBS_MAX_AGE,
            updated_this_run: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    fn pip_path(&self) -> PathBuf {
        self.paths.executable("pip")
    }

    fn python_path(&self) -> String {
        self.paths.python.display().to_string()
    }
}

impl SharedRuntime for SharedLibs {
    fn root(&self) -> &Path {
        &self.root
    }

    fn is_valid(&self) -> bool {
        self.paths.python.is_file() && self.pip_path().is_file()
    }

    fn needs_upgrade(&self) -> bool {
        if self.updated_this_run.load(Ordering::SeqCst) {
            return false;
        }
        let modified = match fs::metadata(self.pip_path()).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(_) => return true,
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        age > self.max_age
    }

    fn create(&self, verbose: bool) -> Result<()> {
        if self.is_valid() {
            return Ok(());
        }
        info!(root = %self.root.display(), "creating shared libraries");
        let args = vec![
            "-m".to_string(),
            "venv".to_string(),
            "--clear".to_string(),
            self.root.display().to_string(),
        ];
        let output = run_maybe_streaming(self.runner.as_ref(), verbose, &self.base_python, &args)?;
        if !output.success() {
            log_failed_output("creating shared libraries", &output);
            return Err(VenvIssue::VenvCreationFailed {
                root: self.root.display().to_string(),
                code: output.code,
                stderr: output.stderr,
            }
            .into());
        }
        self.upgrade(verbose)
    }

    fn upgrade(&self, verbose: bool) -> Result<()> {
        info!(root = %self.root.display(), "upgrading shared libraries");
        let mut args = vec![
            "-m".to_string(),
            "pip".to_string(),
            "--disable-pip-version-check".to_string(),
            "install".to_string(),
        ];
        if !verbose {
            args.push("-q".to_string());
        }
        args.push("--upgrade".to_string());
        args.extend(SHARED_PACKAGES.iter().map(ToString::to_string));
        let output =
            run_maybe_streaming(self.runner.as_ref(), verbose, &self.python_path(), &args)?;
        if !output.success() {
            error!(
                root = %self.root.display(),
                code = output.code,
                stderr = %output.stderr.trim(),
                "failed to upgrade shared libraries"
            );
            return Ok(());
        }
        let pip = self.pip_path();
        if pip.exists() {
            set_file_mtime(&pip, FileTime::now())
                .with_context(|| format!("failed to touch {}", pip.display()))?;
        }
        self.updated_this_run.store(true, Ordering::SeqCst);
        debug!(root = %self.root.display(), "shared libraries up to date");
        Ok(())
    }

    fn site_packages(&self) -> Result<PathBuf> {
        locate_site_packages(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::RunOutput;
    use crate::testing::FakeRunner;
    use tempfile::tempdir;

    fn seed_shared(root: &Path) -> Result<()> {
        let paths = VenvPaths::new(root);
        fs::create_dir_all(&paths.bin_dir)?;
        fs::write(&paths.python, "")?;
        fs::write(paths.executable("pip"), "")?;
        fs::create_dir_all(root.join("lib").join("python3.12").join("site-packages"))?;
        Ok(())
    }

    fn age_pip(root: &Path, days: u64) -> Result<()> {
        let then = SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60);
        set_file_mtime(
            VenvPaths::new(root).executable("pip"),
            FileTime::from_system_time(then),
        )?;
        Ok(())
    }

    #[test]
    fn validity_requires_python_and_pip() -> Result<()> {
        let temp = tempdir()?;
        let root = temp.path().join("shared");
        let libs = SharedLibs::new(root.clone(), "python3".into(), Arc::new(FakeRunner::ok()));
        assert!(!libs.is_valid());
        seed_shared(&root)?;
        assert!(libs.is_valid());
        fs::remove_file(VenvPaths::new(&root).executable("pip"))?;
        assert!(!libs.is_valid());
        Ok(())
    }

    #[test]
    fn staleness_follows_pip_mtime() -> Result<()> {
        let temp = tempdir()?;
        let root = temp.path().join("shared");
        let libs = SharedLibs::new(root.clone(), "python3".into(), Arc::new(FakeRunner::ok()));
        assert!(libs.needs_upgrade(), "missing pip needs an upgrade");
        seed_shared(&root)?;
        assert!(!libs.needs_upgrade());
        age_pip(&root, 31)?;
        assert!(libs.needs_upgrade());

        let lenient = SharedLibs::new(root.clone(), "python3".into(), Arc::new(FakeRunner::ok()))
            .with_max_age(Duration::from_secs(60 * 24 * 60 * 60));
        assert!(!lenient.needs_upgrade(), "31 days is within a 60 day window");
        age_pip(&root, 61)?;
        assert!(lenient.needs_upgrade());
        Ok(())
    }

    #[test]
    fn successful_upgrade_touches_pip_and_sticks_for_the_run() -> Result<()> {
        let temp = tempdir()?;
        let root = temp.path().join("shared");
        seed_shared(&root)?;
        age_pip(&root, 45)?;
        let runner = Arc::new(FakeRunner::ok());
        let libs = SharedLibs::new(root.clone(), "python3".into(), runner.clone());
        libs.upgrade(false)?;
        assert!(!libs.needs_upgrade());

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert!(call.ends_with(&[
            "-q".to_string(),
            "--upgrade".to_string(),
            "pip".to_string(),
            "setuptools".to_string(),
            "wheel".to_string(),
        ]));
        Ok(())
    }

    #[test]
    fn failed_upgrade_is_logged_not_raised() -> Result<()> {
        let temp = tempdir()?;
        let root = temp.path().join("shared");
        seed_shared(&root)?;
        age_pip(&root, 45)?;
        let runner = Arc::new(FakeRunner::new(|_, _| {
            Ok(RunOutput {
                code: 1,
                stdout: String::new(),
                stderr: "no network".into(),
            })
        }));
        let libs = SharedLibs::new(root, "python3".into(), runner);
        libs.upgrade(false)?;
        assert!(libs.needs_upgrade());
        Ok(())
    }

    #[test]
    fn create_is_a_no_op_when_valid() -> Result<()> {
        let temp = tempdir()?;
        let root = temp.path().join("shared");
        seed_shared(&root)?;
        let runner = Arc::new(FakeRunner::ok());
        let libs = SharedLibs::new(root, "python3".into(), runner.clone());
        libs.create(false)?;
        assert!(runner.calls().is_empty());
        Ok(())
    }

    #[test]
    fn create_builds_then_upgrades() -> Result<()> {
        let temp = tempdir()?;
        let root = temp.path().join("shared");
        let seeded = root.clone();
        let runner = Arc::new(FakeRunner::new(move |_, args| {
            if args.iter().any(|arg| arg == "venv") {
                seed_shared(&seeded)?;
            }
            Ok(RunOutput::default())
        }));
        let libs = SharedLibs::new(root.clone(), "python3".into(), runner.clone());
        libs.create(false)?;
        assert!(libs.is_valid());
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0][0], "python3");
        assert!(calls[0].contains(&"--clear".to_string()));
        assert!(calls[1].contains(&"--upgrade".to_string()));
        assert_eq!(
            libs.site_packages()?,
            root.join("lib").join("python3.12").join("site-packages")
        );
        Ok(())
    }

    #[test]
    fn failed_creation_is_fatal() {
        let temp = tempdir().expect("tempdir");
        let runner = Arc::new(FakeRunner::new(|_, _| {
            Ok(RunOutput {
                code: 2,
                stdout: String::new(),
                stderr: "ensurepip missing".into(),
            })
        }));
        let libs = SharedLibs::new(temp.path().join("shared"), "python3".into(), runner);
        let err = libs.create(false).expect_err("creation fails");
        assert!(matches!(
            crate::errors::venv_issue(&err),
            Some(VenvIssue::VenvCreationFailed { code: 2, .. })
        ));
    }
}
