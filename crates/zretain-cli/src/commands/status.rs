//! Status command
//!
//! Usage: zretain status [--pool <NAME>] [--json]

use super::{load, CommandResult, Drivers, GlobalArgs, RunStatus};
use clap::Args;
use zretain_core::ReplicationTransport;
use zretain_engine::commands::status::{pool_status, DatasetStatus};

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Pool to inspect (optional when only one is configured)
    #[arg(long)]
    pub pool: Option<String>,

    /// Print status as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute status command
pub fn execute(global: &GlobalArgs, args: StatusArgs) -> CommandResult {
    let (pool, settings) = load(&global.config, args.pool.as_deref())?;
    let drivers = Drivers::new(global, &pool, &settings);
    let transport = drivers
        .transport
        .as_ref()
        .map(|t| t as &dyn ReplicationTransport);

    let statuses = pool_status(&pool, &drivers.storage, transport);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
    } else {
        println!("Pool {}", pool.name);
        for status in &statuses {
            println!("{}", render_line(status));
        }
    }

    Ok(if statuses.iter().all(|s| s.error.is_none()) {
        RunStatus::Clean
    } else {
        RunStatus::Degraded
    })
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn render_line(status: &DatasetStatus) -> String {
    let mut line = format!(
        "  {}  local {}  newest {}  hwm {}  pending {}",
        status.dataset,
        status.local_count,
        opt(status.newest),
        opt(status.high_water_mark),
        opt(status.pending)
    );
    if let Some(marker) = status.marker {
        line.push_str(&format!("  marker {}", marker.file_name()));
    }
    if status.foreign_count > 0 {
        line.push_str(&format!("  foreign {}", status.foreign_count));
    }
    if let Some(err) = &status.error {
        line.push_str(&format!("  error: {}", err));
    }
    line
}
