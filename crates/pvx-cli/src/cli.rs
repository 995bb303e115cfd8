use clap::{ArgAction, Args, Parser, Subcommand};

pub const PVX_HELP_TEMPLATE: &str = concat!(
    "{before-help}\nUsage:\n    {usage}\n\n",
    "Commands:\n{subcommands}\n\nGlobal options:\n{options}\n"
);

pub const PVX_BEFORE_HELP: &str = concat!(
    "pvx ",
    env!("CARGO_PKG_VERSION"),
    " - Python applications in isolated environments\n"
);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    disable_help_subcommand = true,
    before_help = PVX_BEFORE_HELP,
    help_template = PVX_HELP_TEMPLATE
)]
pub struct PvxCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Stream pip output and increase logging (-vv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(about = "List installed environments with their main package and version.")]
    List,
    #[command(about = "Open every environment and repair its shared libraries if needed.")]
    Verify,
    #[command(
        about = "Install a package into its own environment.",
        override_usage = "pvx install <PACKAGE> [--spec SPEC] [--suffix SUFFIX] [--force]"
    )]
    Install(InstallArgs),
    #[command(
        about = "Install an extra package into an existing environment.",
        override_usage = "pvx inject <VENV> <SPEC>"
    )]
    Inject(InjectArgs),
    #[command(about = "Upgrade the main package of an environment.")]
    Upgrade(UpgradeArgs),
    #[command(about = "Delete an environment and everything installed in it.")]
    Uninstall(UninstallArgs),
}

#[derive(Args, Debug)]
pub struct PipArgs {
    #[arg(
        long = "pip-args",
        value_name = "ARGS",
        allow_hyphen_values = true,
        help = "Extra arguments passed to pip install, as one quoted string"
    )]
    pub pip_args: Option<String>,
}

impl PipArgs {
    pub fn split(&self) -> Vec<String> {
        split_args(self.pip_args.as_deref())
    }
}

pub fn split_args(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| raw.split_whitespace().map(ToOwned::to_owned).collect())
        .unwrap_or_default()
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    #[arg(value_name = "PACKAGE")]
    pub package: String,
    #[arg(
        long,
        value_name = "SPEC",
        help = "Requirement, URL or local path to install (default: PACKAGE)"
    )]
    pub spec: Option<String>,
    #[arg(
        long,
        value_name = "SUFFIX",
        default_value = "",
        help = "Suffix for the environment name, for side-by-side installs"
    )]
    pub suffix: String,
    #[command(flatten)]
    pub pip: PipArgs,
    #[arg(
        long = "venv-args",
        value_name = "ARGS",
        allow_hyphen_values = true,
        help = "Extra arguments passed to `python -m venv`"
    )]
    pub venv_args: Option<String>,
    #[arg(long, help = "Record apps provided by dependencies too")]
    pub include_deps: bool,
    #[arg(short, long, help = "Replace an existing environment")]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct InjectArgs {
    #[arg(value_name = "VENV")]
    pub venv: String,
    #[arg(value_name = "SPEC")]
    pub spec: String,
    #[command(flatten)]
    pub pip: PipArgs,
    #[arg(long, help = "Record apps provided by dependencies too")]
    pub include_deps: bool,
    #[arg(long, help = "Record the injected package's own apps")]
    pub include_apps: bool,
}

#[derive(Args, Debug)]
pub struct UpgradeArgs {
    #[arg(value_name = "PACKAGE")]
    pub package: String,
    #[command(flatten)]
    pub pip: PipArgs,
}

#[derive(Args, Debug)]
pub struct UninstallArgs {
    #[arg(value_name = "PACKAGE")]
    pub package: String,
}
