//! Subcommands and the wiring they share

pub mod clone;
pub mod run;
pub mod status;
pub mod validate;

use clap::{Args, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zretain_core::logging_facility::{self, Profile};
use zretain_core::model::{PoolConfig, Settings};
use zretain_store::config::{parse_config_file, select_pool, ConfigFile};
use zretain_store::{SshTransport, VirshConnector, ZfsCli};

/// Boxed error returned by every command
pub type CommandResult = Result<RunStatus, Box<dyn std::error::Error>>;

/// How a successful command ended, mapped onto the exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Exit 0
    Clean,
    /// Exit 2: some dataset was partial or failed
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Configuration file
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "ZRETAIN_CONFIG",
        default_value = "/etc/zretain/config.yaml"
    )]
    pub config: PathBuf,

    /// Log output on stderr
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Human)]
    pub log_format: LogFormat,

    #[arg(long, global = true, hide = true, env = "ZRETAIN_ZFS", default_value = "zfs")]
    pub zfs_binary: PathBuf,

    #[arg(long, global = true, hide = true, env = "ZRETAIN_SSH", default_value = "ssh")]
    pub ssh_binary: PathBuf,

    #[arg(long, global = true, hide = true, env = "ZRETAIN_VIRSH", default_value = "virsh")]
    pub virsh_binary: PathBuf,
}

pub fn init_logging(format: LogFormat) {
    logging_facility::init(match format {
        LogFormat::Human => Profile::Development,
        LogFormat::Json => Profile::Production,
    });
}

/// Name of the pool to operate on
///
/// Optional when the file defines exactly one pool.
fn pool_name(config: &ConfigFile, requested: Option<&str>) -> Result<String, Box<dyn std::error::Error>> {
    match (requested, config.pools.as_slice()) {
        (Some(name), _) => Ok(name.to_string()),
        (None, [only]) => Ok(only.name.clone()),
        (None, _) => Err("configuration defines several pools; choose one with --pool".into()),
    }
}

/// Parse, validate and select one pool
pub fn load(
    config_path: &Path,
    pool: Option<&str>,
) -> Result<(PoolConfig, Settings), Box<dyn std::error::Error>> {
    let config = parse_config_file(config_path)?;
    let name = pool_name(&config, pool)?;
    Ok(select_pool(&config, &name)?)
}

/// The real collaborators for one pool
pub struct Drivers {
    pub storage: ZfsCli,
    pub transport: Option<SshTransport>,
    pub virtualization: VirshConnector,
}

impl Drivers {
    pub fn new(global: &GlobalArgs, pool: &PoolConfig, settings: &Settings) -> Self {
        Self {
            storage: storage(global, settings.command_timeout),
            transport: pool.replication.clone().map(|target| {
                SshTransport::new(target, settings.command_timeout, settings.send_timeout)
                    .with_binaries(&global.ssh_binary, &global.zfs_binary)
            }),
            virtualization: VirshConnector::new(settings.libvirt_uri.clone(), settings.command_timeout)
                .with_binary(&global.virsh_binary),
        }
    }
}

pub fn storage(global: &GlobalArgs, timeout: Duration) -> ZfsCli {
    ZfsCli::new(timeout).with_binary(&global.zfs_binary)
}
