//! Command handlers behind the `pvx` binary.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::effects::{SharedEffects, SystemEffects};
use crate::fs::remove_dir_all_writable;
use crate::outcome::{ExecutionOutcome, InstallUserError};
use crate::venv::layout::dir_has_entries;
use crate::venv::{requirement_name, InstallRequest, Venv, VenvContainer, VenvOptions};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PvxCommand {
    List,
    Verify,
    Install(InstallCommand),
    Inject(InjectCommand),
    Upgrade(UpgradeCommand),
    Uninstall { package: String },
}

impl PvxCommand {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Verify => "verify",
            Self::Install(_) => "install",
            Self::Inject(_) => "inject",
            Self::Upgrade(_) => "upgrade",
            Self::Uninstall { .. } => "uninstall",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallCommand {
    pub package: String,
    pub spec: Option<String>,
    pub suffix: String,
    pub pip_args: Vec<String>,
    pub venv_args: Vec<String>,
    pub include_deps: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InjectCommand {
    pub venv: String,
    pub spec: String,
    pub pip_args: Vec<String>,
    pub include_deps: bool,
    pub include_apps: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeCommand {
    pub package: String,
    pub pip_args: Vec<String>,
}

pub struct CommandContext {
    config: Config,
    effects: SharedEffects,
    options: VenvOptions,
}

impl CommandContext {
    #[must_use]
    pub fn new(config: Config, effects: SharedEffects, options: VenvOptions) -> Self {
        Self {
            config,
            effects,
            options,
        }
    }

    /// Context backed by real processes and the configured shared libraries.
    ///
    /// # Errors
    /// Fails when the configuration is incomplete or no interpreter is found.
    pub fn from_env(verbose: bool) -> Result<Self> {
        let config = Config::from_env()?;
        let python = config.default_python()?;
        let effects: SharedEffects = Arc::new(SystemEffects::new(&config)?);
        Ok(Self::new(
            config,
            effects,
            VenvOptions::new(python).verbose(verbose),
        ))
    }

    fn container(&self) -> VenvContainer {
        VenvContainer::new(self.config.venvs_dir())
    }

    fn open(&self, root: impl Into<std::path::PathBuf>) -> Result<Venv> {
        Venv::new(root, self.effects.clone(), self.options.clone())
    }
}

/// Runs `command`, turning user-facing failures into an outcome.
///
/// # Errors
/// Returns errors that carry no user-facing issue, such as I/O failures.
pub fn execute(ctx: &CommandContext, command: &PvxCommand) -> Result<ExecutionOutcome> {
    debug!(command = command.name(), "executing");
    let result = match command {
        PvxCommand::List => list(ctx),
        PvxCommand::Verify => verify(ctx),
        PvxCommand::Install(args) => install(ctx, args),
        PvxCommand::Inject(args) => inject(ctx, args),
        PvxCommand::Upgrade(args) => upgrade(ctx, args),
        PvxCommand::Uninstall { package } => uninstall(ctx, package),
    };
    result.or_else(ExecutionOutcome::from_error)
}

fn describe(venv: &Venv) -> Value {
    let main = venv.metadata().main_package.as_ref();
    json!({
        "name": venv.name(),
        "path": venv.root().display().to_string(),
        "package": venv.main_package_name(),
        "version": main.map(|record| record.package_version.clone()),
        "apps": main.map(|record| record.apps.clone()).unwrap_or_default(),
        "python": venv.metadata().python_version,
        "injected": venv.metadata().injected_packages.keys().collect::<Vec<_>>(),
        "shared_libs": venv.uses_shared_libs(),
    })
}

fn list(ctx: &CommandContext) -> Result<ExecutionOutcome> {
    let container = ctx.container();
    let mut dirs = container.iter_venv_dirs().collect::<Vec<_>>();
    dirs.sort();
    let mut environments = Vec::new();
    let mut lines = Vec::new();
    for dir in dirs {
        let venv = ctx.open(dir)?;
        let version = venv
            .metadata()
            .main_package
            .as_ref()
            .map_or("unknown version", |main| main.package_version.as_str())
            .to_string();
        lines.push(format!("   package {} {version}", venv.name()));
        environments.push(describe(&venv));
    }
    let details = json!({
        "venvs_dir": container.root().display().to_string(),
        "environments": environments,
    });
    if lines.is_empty() {
        return Ok(ExecutionOutcome::success(
            "nothing has been installed with pvx",
            details,
        ));
    }
    Ok(ExecutionOutcome::success(
        format!("venvs are in {container}\n{}", lines.join("\n")),
        details,
    ))
}

fn verify(ctx: &CommandContext) -> Result<ExecutionOutcome> {
    let container = ctx.container();
    container.verify_shared_libs(&ctx.effects, &ctx.options)?;
    let checked = container.iter_venv_dirs().count();
    Ok(ExecutionOutcome::success(
        format!("verified {checked} environment(s)"),
        json!({
            "venvs_dir": container.root().display().to_string(),
            "checked": checked,
        }),
    ))
}

fn install(ctx: &CommandContext, args: &InstallCommand) -> Result<ExecutionOutcome> {
    let container = ctx.container();
    let root = container.venv_dir(&format!("{}{}", args.package, args.suffix));
    if dir_has_entries(&root) {
        if !args.force {
            return Err(InstallUserError::new(
                format!("'{}' already seems to be installed", args.package),
                json!({
                    "venv": root.display().to_string(),
                    "hint": format!("Use `pvx install {} --force` to reinstall it.", args.package),
                }),
            )
            .into());
        }
        info!(venv = %root.display(), "removing existing environment before reinstall");
        remove_dir_all_writable(&root)?;
    }

    let mut venv = ctx.open(&root)?;
    let spec = args.spec.as_deref().unwrap_or(&args.package);
    let request = InstallRequest {
        pip_args: &args.pip_args,
        include_dependencies: args.include_deps,
        suffix: &args.suffix,
        ..InstallRequest::main(&args.package, spec)
    };
    let installed = venv
        .create_venv(&args.venv_args)
        .and_then(|()| venv.install_package(&request));
    if let Err(err) = installed {
        if let Err(cleanup) = venv.remove_venv() {
            warn!(%cleanup, "failed to remove partially created environment");
        }
        return Err(err);
    }

    let version = venv
        .metadata()
        .main_package
        .as_ref()
        .map(|main| main.package_version.clone())
        .unwrap_or_default();
    let python = venv.metadata().python_version.clone().unwrap_or_default();
    Ok(ExecutionOutcome::success(
        format!("installed package {} {version}, using {python}", venv.name()),
        describe(&venv),
    ))
}

fn existing_venv(ctx: &CommandContext, name: &str) -> Result<Venv> {
    let root = ctx.container().venv_dir(name);
    if !dir_has_entries(&root) {
        return Err(InstallUserError::new(
            format!("environment for '{name}' was not found"),
            json!({
                "venv": root.display().to_string(),
                "hint": format!("Install it first with `pvx install {name}`."),
            }),
        )
        .into());
    }
    ctx.open(root)
}

fn inject(ctx: &CommandContext, args: &InjectCommand) -> Result<ExecutionOutcome> {
    let mut venv = existing_venv(ctx, &args.venv)?;
    let package = match requirement_name(&args.spec) {
        Some(name) => name,
        None => venv.install_package_no_deps(&args.spec, &args.pip_args)?,
    };
    venv.install_package(&InstallRequest {
        pip_args: &args.pip_args,
        include_dependencies: args.include_deps,
        include_apps: args.include_apps,
        ..InstallRequest::injected(&package, &args.spec)
    })?;
    Ok(ExecutionOutcome::success(
        format!("injected package {package} into venv {}", venv.name()),
        describe(&venv),
    ))
}

fn upgrade(ctx: &CommandContext, args: &UpgradeCommand) -> Result<ExecutionOutcome> {
    let mut venv = existing_venv(ctx, &args.package)?;
    let main = venv.metadata().main_package.clone();
    let old_version = main.as_ref().map(|record| record.package_version.clone());
    let package = venv.main_package_name();
    let package_or_url = main
        .as_ref()
        .map_or_else(|| package.clone(), |record| record.package_or_url.clone());
    let pip_args = if args.pip_args.is_empty() {
        main.as_ref()
            .map(|record| record.pip_args.clone())
            .unwrap_or_default()
    } else {
        args.pip_args.clone()
    };
    let suffix = main
        .as_ref()
        .map(|record| record.suffix.clone())
        .unwrap_or_default();

    venv.upgrade_packaging_libraries(&pip_args)?;
    venv.upgrade_package(&InstallRequest {
        pip_args: &pip_args,
        include_dependencies: main.as_ref().is_some_and(|record| record.include_dependencies),
        include_apps: main
            .as_ref()
            .map(|record| record.include_apps)
            .unwrap_or(true),
        suffix: &suffix,
        ..InstallRequest::main(&package, &package_or_url)
    })?;

    let new_version = venv
        .metadata()
        .main_package
        .as_ref()
        .map(|record| record.package_version.clone())
        .unwrap_or_default();
    let message = match old_version {
        Some(old) if old == new_version => {
            format!("{} is already at latest version {new_version}", venv.name())
        }
        Some(old) => format!("upgraded package {} from {old} to {new_version}", venv.name()),
        None => format!("upgraded package {} to {new_version}", venv.name()),
    };
    Ok(ExecutionOutcome::success(message, describe(&venv)))
}

fn uninstall(ctx: &CommandContext, package: &str) -> Result<ExecutionOutcome> {
    let root = ctx.container().venv_dir(package);
    if !root.exists() {
        return Err(InstallUserError::new(
            format!("nothing to uninstall for {package}"),
            json!({ "venv": root.display().to_string() }),
        )
        .into());
    }
    remove_dir_all_writable(&root)?;
    Ok(ExecutionOutcome::success(
        format!("uninstalled {package}"),
        json!({ "venv": root.display().to_string() }),
    ))
}
