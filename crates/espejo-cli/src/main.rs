//! Espejo CLI entry point

use clap::Parser;
use espejo_cli::{
    handlers::{
        execute_approve, execute_baselines, execute_compare, execute_config, execute_run,
        execute_summarize,
    },
    Cli, CliConfig, CliResult, ColorChoice, Commands, ProgressReporter, Verbosity,
};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    init_tracing(&config);

    let use_color = config.color.should_color();
    let mut reporter = ProgressReporter::new(use_color, config.verbosity.is_quiet());

    let passed = match &cli.command {
        Commands::Compare(args) => execute_compare(&reporter, args)?,
        Commands::Approve(args) => {
            execute_approve(&reporter, args)?;
            true
        }
        Commands::Baselines(args) => {
            execute_baselines(&reporter, args)?;
            true
        }
        Commands::Summarize(args) => execute_summarize(&reporter, args)?,
        Commands::Config(args) => {
            execute_config(&reporter, args)?;
            true
        }
        Commands::Run(args) => execute_run(&mut reporter, args)?,
    };

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn build_config(cli: &Cli) -> CliConfig {
    let color: ColorChoice = cli.color.into();
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(color)
        .with_log_json(cli.log_json)
}

/// Logs go to stderr; `RUST_LOG` overrides the `-v` level
fn init_tracing(config: &CliConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.verbosity.log_directive()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = if config.log_json {
        builder.json().try_init()
    } else {
        builder.with_ansi(config.color.should_color()).try_init()
    };
    if let Err(e) = installed {
        eprintln!("Warning: logging disabled: {e}");
    }
}
