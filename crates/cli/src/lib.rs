pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "novaxa",
    about = "NOVAXA smart reply operator CLI",
    long_about = "Operate the NOVAXA smart reply engine: migrations, demo fixtures, config inspection, readiness and consistency checks.",
    after_help = "Examples:\n  novaxa migrate\n  novaxa seed\n  novaxa doctor\n  novaxa check\n\nExit codes:\n  0 ok, 2 config, 3 runtime, 4 database, 5 migration/seed, 6 verification,\n  7 engine load, 8 configuration issues, 9 readiness"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations")]
    Migrate,
    #[command(about = "Load the demo triggers, responses and CRM customers")]
    Seed {
        #[arg(long, help = "Remove the demo rows instead of loading them")]
        clean: bool,
    },
    #[command(about = "Show effective configuration values with source attribution and redaction")]
    Config,
    #[command(about = "Validate config, bot token readiness, database connectivity and schema")]
    Doctor,
    #[command(about = "Report smart reply configuration issues such as dangling mappings")]
    Check,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { clean: false } => commands::seed::run(),
        Command::Seed { clean: true } => commands::seed::clean(),
        Command::Config => commands::config::run(),
        Command::Doctor => commands::doctor::run(),
        Command::Check => commands::check::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
