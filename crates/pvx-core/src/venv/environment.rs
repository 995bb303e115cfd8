use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::inspector::{inspect_package, VenvInspection};
use super::layout::{
    contains_shared_pth, dir_has_entries, locate_site_packages, VenvPaths, SHARED_PTH,
};
use super::{log_failed_output, run_logged, run_maybe_streaming, OutputMode};
use super::spec::{
    fix_package_name, full_package_description, parse_specifier_for_install,
    parse_specifier_for_metadata,
};
use crate::effects::SharedEffects;
use crate::errors::VenvIssue;
use crate::fs::remove_dir_all_writable;
use crate::process::{command_line, RunOutput};
use pvx_domain::{EnvironmentMetadata, PackageRecord};

/// Whether an environment imports packaging tools from the shared libraries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    Shared,
    Isolated,
}

#[derive(Debug, Clone)]
pub struct VenvOptions {
    pub verbose: bool,
    /// Interpreter used to create the environment.
    pub python: String,
}

impl VenvOptions {
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            verbose: false,
            python: python.into(),
        }
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// One package install or upgrade, as requested by the caller.
#[derive(Debug, Clone, Copy)]
pub struct InstallRequest<'a> {
    pub package: &'a str,
    pub package_or_url: &'a str,
    pub pip_args: &'a [String],
    pub include_dependencies: bool,
    pub include_apps: bool,
    pub is_main_package: bool,
    pub suffix: &'a str,
}

impl<'a> InstallRequest<'a> {
    /// A main-package request with apps included and no extra arguments.
    #[must_use]
    pub fn main(package: &'a str, package_or_url: &'a str) -> Self {
        Self {
            package,
            package_or_url,
            pip_args: &[],
            include_dependencies: false,
            include_apps: true,
            is_main_package: true,
            suffix: "",
        }
    }

    /// A request for a package injected next to the main one.
    #[must_use]
    pub fn injected(package: &'a str, package_or_url: &'a str) -> Self {
        Self {
            is_main_package: false,
            ..Self::main(package, package_or_url)
        }
    }
}

#[derive(Deserialize)]
struct PipListEntry {
    name: String,
}

/// A virtual environment dedicated to one main package.
pub struct Venv {
    root: PathBuf,
    paths: VenvPaths,
    python: String,
    verbose: bool,
    existing: bool,
    linkage: Linkage,
    metadata: EnvironmentMetadata,
    effects: SharedEffects,
}

impl fmt::Debug for Venv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Venv")
            .field("root", &self.root)
            .field("existing", &self.existing)
            .field("linkage", &self.linkage)
            .finish_non_exhaustive()
    }
}

impl Venv {
    /// Opens the environment at `root`, which need not exist yet.
    ///
    /// An environment that already holds files and links to the shared
    /// libraries gets them repaired or refreshed here.
    ///
    /// # Errors
    /// Fails when the metadata file is unreadable, or when the shared libraries
    /// stay invalid after an attempt to create them.
    pub fn new(
        root: impl Into<PathBuf>,
        effects: SharedEffects,
        options: VenvOptions,
    ) -> Result<Self> {
        let root = root.into();
        let paths = VenvPaths::new(&root);
        let metadata = EnvironmentMetadata::load(&root)?;
        let existing = dir_has_entries(&root);
        let linkage = if !existing || contains_shared_pth(&root) {
            Linkage::Shared
        } else {
            Linkage::Isolated
        };
        let venv = Self {
            root,
            paths,
            python: options.python,
            verbose: options.verbose,
            existing,
            linkage,
            metadata,
            effects,
        };
        debug!(root = %venv.root.display(), existing, linkage = ?linkage, "opened environment");
        if venv.existing && venv.linkage == Linkage::Shared {
            venv.ensure_shared_libs()?;
        }
        Ok(venv)
    }

    fn ensure_shared_libs(&self) -> Result<()> {
        let shared = self.effects.shared_libs();
        if shared.is_valid() {
            if shared.needs_upgrade() {
                shared.upgrade(self.verbose)?;
            }
        } else {
            shared.create(self.verbose)?;
        }
        if !shared.is_valid() {
            return Err(VenvIssue::SharedLibsInvalid {
                shared_root: shared.root().display().to_string(),
                venv_name: self.dir_name(),
            }
            .into());
        }
        Ok(())
    }

    fn dir_name(&self) -> String {
        self.root.file_name().map_or_else(
            || self.root.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        )
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn bin_dir(&self) -> &Path {
        &self.paths.bin_dir
    }

    #[must_use]
    pub fn python_path(&self) -> &Path {
        &self.paths.python
    }

    /// True iff the root held files before this session opened it.
    #[must_use]
    pub fn is_existing(&self) -> bool {
        self.existing
    }

    #[must_use]
    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    #[must_use]
    pub fn uses_shared_libs(&self) -> bool {
        self.linkage == Linkage::Shared
    }

    #[must_use]
    pub fn metadata(&self) -> &EnvironmentMetadata {
        &self.metadata
    }

    /// Main package name plus suffix, or the directory name for environments
    /// created before metadata was recorded.
    #[must_use]
    pub fn name(&self) -> String {
        match &self.metadata.main_package {
            Some(main) => format!("{}{}", main.package, main.suffix),
            None => self.dir_name(),
        }
    }

    #[must_use]
    pub fn main_package_name(&self) -> String {
        match &self.metadata.main_package {
            Some(main) => main.package.clone(),
            None => self.dir_name(),
        }
    }

    /// Injected packages and the main package, keyed by package name.
    #[must_use]
    pub fn package_metadata(&self) -> BTreeMap<String, PackageRecord> {
        self.metadata.package_records()
    }

    fn python_program(&self) -> String {
        self.paths.python.display().to_string()
    }

    /// Creates the environment without pip and links it to the shared libraries.
    ///
    /// The creation arguments and interpreter version are kept in memory and
    /// written with the first package record.
    ///
    /// # Errors
    /// Fails when `python -m venv` cannot run or exits non-zero, or when the
    /// shared libraries cannot be made valid.
    pub fn create_venv(&mut self, venv_args: &[String]) -> Result<()> {
        info!(root = %self.root.display(), "creating virtual environment");
        let mut args = vec![
            "-m".to_string(),
            "venv".to_string(),
            "--without-pip".to_string(),
        ];
        args.extend(venv_args.iter().cloned());
        args.push(self.root.display().to_string());
        let output = run_maybe_streaming(
            self.effects.process(),
            self.verbose,
            &self.python,
            &args,
        )?;
        if !output.success() {
            log_failed_output("python -m venv", &output);
            return Err(VenvIssue::VenvCreationFailed {
                root: self.root.display().to_string(),
                code: output.code,
                stderr: output.stderr,
            }
            .into());
        }

        let shared = self.effects.shared_libs();
        shared.create(self.verbose)?;
        if !shared.is_valid() {
            return Err(VenvIssue::SharedLibsInvalid {
                shared_root: shared.root().display().to_string(),
                venv_name: self.dir_name(),
            }
            .into());
        }
        let shared_site = shared.site_packages()?;
        let pth = locate_site_packages(&self.root)?.join(SHARED_PTH);
        fs::write(&pth, format!("{}\n", shared_site.display()))
            .with_context(|| format!("failed to write {}", pth.display()))?;
        debug!(pth = %pth.display(), shared = %shared_site.display(), "linked shared libraries");
        self.linkage = Linkage::Shared;

        self.metadata.venv_args = venv_args.to_vec();
        self.metadata.python_version = Some(self.get_python_version()?);
        Ok(())
    }

    /// Only environments created in this session may be removed.
    #[must_use]
    pub fn safe_to_remove(&self) -> bool {
        !self.existing
    }

    /// # Errors
    /// Fails when the directory tree cannot be deleted.
    pub fn remove_venv(&self) -> Result<()> {
        if self.safe_to_remove() {
            info!(root = %self.root.display(), "removing virtual environment");
            remove_dir_all_writable(&self.root)
        } else {
            warn!(
                root = %self.root.display(),
                "not removing existing environment because it was not created in this session"
            );
            Ok(())
        }
    }

    /// Refreshes the shared libraries, or just pip for an isolated environment.
    ///
    /// # Errors
    /// Fails when pip cannot be started or the isolated upgrade exits non-zero.
    pub fn upgrade_packaging_libraries(&self, pip_args: &[String]) -> Result<()> {
        match self.linkage {
            Linkage::Shared => self.effects.shared_libs().upgrade(self.verbose),
            Linkage::Isolated => self.upgrade_package_no_metadata("pip", pip_args),
        }
    }

    /// Installs a package and records it in the metadata file.
    ///
    /// # Errors
    /// Fails on an invalid spec, a non-zero pip exit, or when the package has
    /// no version after pip reported success. Metadata is left untouched on
    /// every failure.
    pub fn install_package(&mut self, request: &InstallRequest<'_>) -> Result<()> {
        let package_or_url = fix_package_name(request.package_or_url, request.package);
        let (package_or_url, pip_args) =
            parse_specifier_for_install(&package_or_url, request.pip_args)?;
        let description = full_package_description(request.package, &package_or_url);
        info!("installing {description}");

        let mut cmd = vec!["install".to_string()];
        cmd.extend(pip_args.iter().cloned());
        cmd.push(package_or_url.clone());
        let output = self.run_pip(&cmd)?;
        if !output.success() {
            log_failed_output("pip", &output);
            return Err(VenvIssue::InstallFailed {
                description,
                code: output.code,
            }
            .into());
        }

        self.update_package_metadata(&InstallRequest {
            package_or_url: &package_or_url,
            pip_args: &pip_args,
            ..*request
        })
    }

    /// Installs a spec without its dependencies and reports which package it
    /// turned out to be, by diffing `pip list` before and after.
    ///
    /// Inference only works when pip adds exactly one distribution; anything
    /// else, including a failed or partial install, is an error.
    ///
    /// # Errors
    /// Returns [`VenvIssue::PackageNameUndetermined`] unless exactly one new
    /// distribution appeared.
    pub fn install_package_no_deps(
        &mut self,
        package_or_url: &str,
        pip_args: &[String],
    ) -> Result<String> {
        info!("determining package name from {package_or_url:?}");
        let before = self.list_installed_packages()?;
        let mut cmd = vec!["install".to_string(), "--no-dependencies".to_string()];
        cmd.extend(pip_args.iter().cloned());
        cmd.push(package_or_url.to_string());
        let output = self.run_pip(&cmd)?;
        let undetermined = || VenvIssue::PackageNameUndetermined {
            spec: package_or_url.to_string(),
        };
        if !output.success() {
            log_failed_output("pip", &output);
            return Err(undetermined().into());
        }

        let after = self.list_installed_packages()?;
        let mut added = after.difference(&before).cloned().collect::<Vec<_>>();
        if added.len() == 1 {
            let package = added.remove(0);
            info!("determined package name: {package}");
            return Ok(package);
        }
        info!(?before, ?added, "package name inference needs exactly one new distribution");
        Err(undetermined().into())
    }

    /// Runs the inspector for `package` inside this environment.
    ///
    /// # Errors
    /// Fails when the inspector cannot run or prints malformed output.
    pub fn get_venv_metadata_for_package(&self, package: &str) -> Result<VenvInspection> {
        inspect_package(
            self.effects.process(),
            &self.paths.python,
            &self.paths.bin_dir,
            package,
        )
    }

    fn update_package_metadata(&mut self, request: &InstallRequest<'_>) -> Result<()> {
        let inspection = self.get_venv_metadata_for_package(request.package)?;
        let Some(package_version) = inspection.package_version else {
            return Err(VenvIssue::MissingVersion {
                description: full_package_description(request.package, request.package_or_url),
            }
            .into());
        };
        let record = PackageRecord {
            package: request.package.to_string(),
            package_or_url: parse_specifier_for_metadata(request.package_or_url),
            pip_args: request.pip_args.to_vec(),
            include_dependencies: request.include_dependencies,
            include_apps: request.include_apps,
            apps: inspection.apps,
            app_paths: inspection.app_paths,
            apps_of_dependencies: inspection.apps_of_dependencies,
            app_paths_of_dependencies: inspection.app_paths_of_dependencies,
            package_version,
            suffix: request.suffix.to_string(),
        };

        let mut next = self.metadata.clone();
        if next.python_version.is_none() {
            next.python_version = Some(inspection.python_version);
        }
        next.set_package(record, request.is_main_package);
        next.write(&self.root)?;
        self.metadata = next;
        Ok(())
    }

    /// Interpreter version as printed by `python --version`.
    ///
    /// # Errors
    /// Fails when the interpreter cannot run or exits non-zero.
    pub fn get_python_version(&self) -> Result<String> {
        let program = self.python_program();
        let args = vec!["--version".to_string()];
        let output = run_logged(self.effects.process(), OutputMode::Capture, &program, &args)?;
        if !output.success() {
            log_failed_output("python --version", &output);
            return Err(VenvIssue::CommandFailed {
                command: command_line(&program, &args),
                code: output.code,
                stderr: output.stderr,
            }
            .into());
        }
        let version = if output.stdout.trim().is_empty() {
            output.stderr.trim()
        } else {
            output.stdout.trim()
        };
        Ok(version.to_string())
    }

    /// Distribution names reported by `pip list`.
    ///
    /// # Errors
    /// Fails when pip cannot run, exits non-zero, or prints malformed JSON.
    pub fn list_installed_packages(&self) -> Result<BTreeSet<String>> {
        let program = self.python_program();
        let args = vec![
            "-m".to_string(),
            "pip".to_string(),
            "list".to_string(),
            "--format=json".to_string(),
        ];
        let output = run_logged(self.effects.process(), OutputMode::Capture, &program, &args)?;
        if !output.success() {
            log_failed_output("pip list", &output);
            return Err(VenvIssue::CommandFailed {
                command: command_line(&program, &args),
                code: output.code,
                stderr: output.stderr,
            }
            .into());
        }
        let entries: Vec<PipListEntry> =
            serde_json::from_str(output.stdout.trim()).map_err(|err| VenvIssue::MalformedOutput {
                what: "pip list".to_string(),
                error: err.to_string(),
            })?;
        Ok(entries.into_iter().map(|entry| entry.name).collect())
    }

    /// Runs an app from the environment with inherited stdio.
    ///
    /// # Errors
    /// Fails when the app cannot be started.
    pub fn run_app(&self, app: &str, app_args: &[String]) -> Result<i32> {
        let program = self.paths.bin_dir.join(app).display().to_string();
        let output = run_logged(
            self.effects.process(),
            OutputMode::Inherit,
            &program,
            app_args,
        )?;
        Ok(output.code)
    }

    fn upgrade_package_no_metadata(&self, package: &str, pip_args: &[String]) -> Result<()> {
        info!("upgrading {}", full_package_description(package, package));
        let mut cmd = vec!["install".to_string()];
        cmd.extend(pip_args.iter().cloned());
        cmd.push("--upgrade".to_string());
        cmd.push(package.to_string());
        let output = self.run_pip(&cmd)?;
        if !output.success() {
            log_failed_output("pip", &output);
            return Err(VenvIssue::UpgradeFailed {
                description: package.to_string(),
                code: output.code,
            }
            .into());
        }
        Ok(())
    }

    /// Upgrades an installed package and rewrites its metadata record.
    ///
    /// # Errors
    /// Fails on a non-zero pip exit or when the package has no version
    /// afterwards.
    pub fn upgrade_package(&mut self, request: &InstallRequest<'_>) -> Result<()> {
        let description = full_package_description(request.package, request.package_or_url);
        info!("upgrading {description}");
        let mut cmd = vec!["install".to_string()];
        cmd.extend(request.pip_args.iter().cloned());
        cmd.push("--upgrade".to_string());
        cmd.push(request.package_or_url.to_string());
        let output = self.run_pip(&cmd)?;
        if !output.success() {
            log_failed_output("pip", &output);
            return Err(VenvIssue::UpgradeFailed {
                description,
                code: output.code,
            }
            .into());
        }
        self.update_package_metadata(request)
    }

    fn pip_command(&self, cmd: &[String]) -> Vec<String> {
        let mut args = vec!["-m".to_string(), "pip".to_string()];
        args.extend(cmd.iter().cloned());
        if !self.verbose {
            args.push("-q".to_string());
        }
        args
    }

    fn run_pip(&self, cmd: &[String]) -> Result<RunOutput> {
        let args = self.pip_command(cmd);
        run_maybe_streaming(
            self.effects.process(),
            self.verbose,
            &self.python_program(),
            &args,
        )
    }

    /// Runs pip with inherited stdio and hands back its exit code.
    ///
    /// # Errors
    /// Fails when pip cannot be started.
    pub fn run_pip_get_exit_code(&self, cmd: &[String]) -> Result<i32> {
        let program = self.python_program();
        let args = self.pip_command(cmd);
        let output = run_logged(self.effects.process(), OutputMode::Inherit, &program, &args)?;
        if !output.success() {
            error!("'{}' failed", command_line(&program, &args));
        }
        Ok(output.code)
    }
}
