#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

use std::time::Duration;

use atty::Stream;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use quarry_core::{CommandStatus, ExecutionOutcome, GlobalOptions, QuarryCommand};
use quarry_domain::Bag;
use serde_json::Value;

mod cli;
mod style;

use cli::{AttrArgs, CacheCommand, CommandArgs, QuarryCli};
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = QuarryCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let global = GlobalOptions {
        quiet: cli.quiet,
        verbose: cli.verbose,
        trace: cli.trace,
        json: cli.json,
    };

    let command = build_command(&cli.command);
    let outcome = quarry_core::execute(&command).map_err(|err| eyre!("{err:?}"))?;
    let code = emit_output(&global, cli.no_color, &command, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("quarry={level},quarry_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn bag_of(args: &AttrArgs) -> Bag {
    args.attrs.iter().cloned().collect()
}

fn build_command(args: &CommandArgs) -> QuarryCommand {
    match args {
        CommandArgs::Locate(attrs) => QuarryCommand::Locate(bag_of(attrs)),
        CommandArgs::Get { attrs, intent } => QuarryCommand::Get {
            attrs: bag_of(attrs),
            intent: (*intent).into(),
        },
        CommandArgs::Put(attrs) => QuarryCommand::Put(bag_of(attrs)),
        CommandArgs::Check(attrs) => QuarryCommand::Check(bag_of(attrs)),
        CommandArgs::Delete(attrs) => QuarryCommand::Delete(bag_of(attrs)),
        CommandArgs::Explain(attrs) => QuarryCommand::Explain(bag_of(attrs)),
        CommandArgs::Candidates { collector } => {
            QuarryCommand::Candidates(collector.map(Into::into))
        }
        CommandArgs::Cache(CacheCommand::Path) => QuarryCommand::CachePath,
        CommandArgs::Cache(CacheCommand::Gc { max_age_hours }) => QuarryCommand::CacheGc {
            max_age: max_age_hours.map(|hours| Duration::from_secs(hours * 60 * 60)),
        },
    }
}

fn emit_output(
    global: &GlobalOptions,
    no_color: bool,
    command: &QuarryCommand,
    outcome: &ExecutionOutcome,
) -> Result<i32> {
    let code = outcome.exit_code();
    let style = Style::new(no_color, atty::is(Stream::Stdout));

    if global.json {
        let payload = quarry_core::to_json_response(command.name(), outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if !global.quiet {
        match outcome.status {
            CommandStatus::Ok if !outcome.message.is_empty() => println!("{}", outcome.message),
            CommandStatus::Ok => {}
            _ => {
                eprintln!("{}", style.status(&outcome.status, &outcome.message));
                for line in rejection_lines(&outcome.details) {
                    eprintln!("{}", style.detail(&line));
                }
            }
        }
    } else if outcome.status != CommandStatus::Ok {
        eprintln!("{}", outcome.message);
    }

    Ok(code)
}

fn rejection_lines(details: &Value) -> Vec<String> {
    details
        .get("report")
        .and_then(|report| report.get("rejections"))
        .and_then(Value::as_array)
        .map(|rejections| {
            rejections
                .iter()
                .filter_map(|rejection| {
                    let candidate = rejection.get("candidate")?.as_str()?;
                    let detail = rejection.get("detail")?.as_str()?;
                    Some(format!("{candidate}: {detail}"))
                })
                .collect()
        })
        .unwrap_or_default()
}
