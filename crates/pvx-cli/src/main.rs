use std::io::IsTerminal;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use pvx_core::{
    CommandContext, CommandStatus, ExecutionOutcome, InjectCommand, InstallCommand, PvxCommand,
    UpgradeCommand,
};
use serde::Serialize;
use serde_json::{json, Value};

mod cli;
mod style;

use cli::{split_args, CommandCli, PvxCli};
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = PvxCli::parse();
    init_tracing(cli.trace, cli.verbose, cli.quiet);

    let command = build_command(&cli.command);
    let ctx = CommandContext::from_env(cli.verbose > 0).map_err(|err| eyre!("{err:?}"))?;
    let outcome = pvx_core::execute(&ctx, &command).map_err(|err| eyre!("{err:?}"))?;
    let code = emit_output(&cli, &command, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8, quiet: bool) {
    let level = if trace {
        "trace"
    } else if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("pvx={level},pvx_core={level},pvx_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn build_command(command: &CommandCli) -> PvxCommand {
    match command {
        CommandCli::List => PvxCommand::List,
        CommandCli::Verify => PvxCommand::Verify,
        CommandCli::Install(args) => PvxCommand::Install(InstallCommand {
            package: args.package.clone(),
            spec: args.spec.clone(),
            suffix: args.suffix.clone(),
            pip_args: args.pip.split(),
            venv_args: split_args(args.venv_args.as_deref()),
            include_deps: args.include_deps,
            force: args.force,
        }),
        CommandCli::Inject(args) => PvxCommand::Inject(InjectCommand {
            venv: args.venv.clone(),
            spec: args.spec.clone(),
            pip_args: args.pip.split(),
            include_deps: args.include_deps,
            include_apps: args.include_apps,
        }),
        CommandCli::Upgrade(args) => PvxCommand::Upgrade(UpgradeCommand {
            package: args.package.clone(),
            pip_args: args.pip.split(),
        }),
        CommandCli::Uninstall(args) => PvxCommand::Uninstall {
            package: args.package.clone(),
        },
    }
}

#[derive(Serialize)]
struct JsonEnvelope<'a> {
    status: &'static str,
    command: &'static str,
    message: &'a str,
    details: Value,
}

fn to_json_response<'a>(command: &PvxCommand, outcome: &'a ExecutionOutcome) -> JsonEnvelope<'a> {
    let status = match outcome.status {
        CommandStatus::Ok => "ok",
        CommandStatus::UserError => "user-error",
        CommandStatus::Failure => "error",
    };
    let details = match &outcome.details {
        Value::Object(_) => outcome.details.clone(),
        Value::Null => json!({}),
        other => json!({ "value": other }),
    };
    JsonEnvelope {
        status,
        command: command.name(),
        message: &outcome.message,
        details,
    }
}

fn emit_output(cli: &PvxCli, command: &PvxCommand, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();
    let style = Style::new(cli.no_color, std::io::stdout().is_terminal());

    if cli.json {
        let payload = to_json_response(command, outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if !cli.quiet || outcome.status != CommandStatus::Ok {
        let line = style.status(outcome.status, &outcome.message);
        if outcome.status == CommandStatus::Ok {
            println!("{line}");
        } else {
            eprintln!("{line}");
        }
        if let Some(hint) = hint_from_details(&outcome.details) {
            let hint_line = format!("Hint: {hint}");
            eprintln!("{}", style.info(&hint_line));
        }
    }

    Ok(code)
}

fn hint_from_details(details: &Value) -> Option<&str> {
    details
        .as_object()
        .and_then(|map| map.get("hint"))
        .and_then(Value::as_str)
}
