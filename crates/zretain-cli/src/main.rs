//! zretain CLI
//!
//! Command-line interface for the zretain snapshot cycle

use clap::{Parser, Subcommand};

mod commands;

use commands::{GlobalArgs, RunStatus};

#[derive(Debug, Parser)]
#[command(name = "zretain")]
#[command(about = "zretain - ZFS snapshot retention and replication", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one snapshot, replicate and retain cycle
    Run(commands::run::RunArgs),
    /// Validate the configuration and VM domains
    Validate(commands::validate::ValidateArgs),
    /// Show per-dataset snapshot and replication status
    Status(commands::status::StatusArgs),
    /// Clone a snapshot into a new dataset
    Clone(commands::clone::CloneArgs),
}

fn main() {
    let cli = Cli::parse();
    commands::init_logging(cli.global.log_format);

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(&cli.global, args),
        Commands::Validate(args) => commands::validate::execute(&cli.global, args),
        Commands::Status(args) => commands::status::execute(&cli.global, args),
        Commands::Clone(args) => commands::clone::execute(&cli.global, args),
    };

    match result {
        Ok(RunStatus::Clean) => {}
        Ok(RunStatus::Degraded) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
