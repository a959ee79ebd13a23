//! Clone command
//!
//! Usage: zretain clone <DATASET@SNAPSHOT> <NEW_DATASET>

use super::{load, storage, CommandResult, GlobalArgs, RunStatus};
use clap::Args;
use zretain_engine::commands::clone::clone_snapshot;

#[derive(Debug, Args)]
pub struct CloneArgs {
    /// Source snapshot, `dataset@snapshot`
    pub source: String,

    /// Dataset to create
    pub target: String,

    /// Pool whose settings apply (optional when only one is configured)
    #[arg(long)]
    pub pool: Option<String>,
}

/// Execute clone command
pub fn execute(global: &GlobalArgs, args: CloneArgs) -> CommandResult {
    let (_pool, settings) = load(&global.config, args.pool.as_deref())?;
    let zfs = storage(global, settings.command_timeout);

    clone_snapshot(&zfs, &args.source, &args.target)?;

    println!("Cloned {} to {}", args.source, args.target);
    Ok(RunStatus::Clean)
}
