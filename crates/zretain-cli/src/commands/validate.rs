//! Validate command
//!
//! Usage: zretain validate [--pool <NAME>]
//!
//! Checks the configuration file and, for pools with VM datasets, that
//! every domain is known to the hypervisor. Nothing is mutated.

use super::{CommandResult, GlobalArgs, RunStatus};
use clap::Args;
use zretain_engine::{validate_domains, DomainSession};
use zretain_store::config::{parse_config_file, select_pool};
use zretain_store::VirshConnector;

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Only validate this pool (default: every pool in the file)
    #[arg(long)]
    pub pool: Option<String>,
}

/// Execute validate command
pub fn execute(global: &GlobalArgs, args: ValidateArgs) -> CommandResult {
    let config = parse_config_file(&global.config)?;
    let names: Vec<String> = match args.pool {
        Some(name) => vec![name],
        None => config.pools.iter().map(|p| p.name.clone()).collect(),
    };

    for name in names {
        let (pool, settings) = select_pool(&config, &name)?;
        if pool.has_vm_datasets() {
            let connector = VirshConnector::new(settings.libvirt_uri.clone(), settings.command_timeout)
                .with_binary(&global.virsh_binary);
            let session = DomainSession::open(&connector)?;
            let known = match session.query() {
                Some(query) => query.list_all_domains()?,
                None => Vec::new(),
            };
            validate_domains(&pool, &known)?;
            session.close()?;
        }
        println!(
            "Pool {}: {} datasets ({} VM-bound), replication {}",
            pool.name,
            pool.datasets.len(),
            pool.vm_datasets().count(),
            match &pool.replication {
                Some(target) => format!("to {}:{}", target.host, target.destination_pool),
                None => "off".to_string(),
            }
        );
    }

    println!("Configuration valid");
    Ok(RunStatus::Clean)
}
