use std::path::Path;
use zretain_core::errors::Result;
use zretain_core::memory::{MemoryStorage, MemoryTransport, StaticDomains};
use zretain_core::model::{DatasetSpec, PoolConfig, ReplicationTarget, RetentionPolicy, Settings};
use zretain_core::report::RunReport;
use zretain_core::CancellationFlag;
use zretain_engine::{Collaborators, FixedClock, Orchestrator, RunOptions};

pub const HOME: &str = "tank/home";
pub const HOME_REMOTE: &str = "backup/home";
pub const VM: &str = "tank/vms/win10";
pub const VM_REMOTE: &str = "backup/vms/win10";
pub const DOMAIN: &str = "win10";
pub const NOW: u64 = 1_000;

/// Pool `tank` replicating to `backup` with one regular and one VM dataset
#[allow(dead_code)]
pub fn pool(limit: u32) -> PoolConfig {
    PoolConfig::new("tank", RetentionPolicy::new(limit))
        .with_dataset(DatasetSpec::regular(HOME))
        .with_dataset(DatasetSpec::vm_bound(VM, DOMAIN))
        .with_replication(ReplicationTarget::new("backup.lan", "backup"))
}

#[allow(dead_code)]
pub fn settings() -> Settings {
    Settings {
        workers: 2,
        ..Settings::default()
    }
}

/// Storage holding both datasets, the VM one mounted at `mountpoint`
#[allow(dead_code)]
pub fn storage(home: &[u64], vm: &[u64], mountpoint: &Path) -> MemoryStorage {
    MemoryStorage::new()
        .with_dataset(HOME, home)
        .with_dataset(VM, vm)
        .with_mountpoint(VM, mountpoint)
}

/// Set up and run one cycle with a fixed clock
#[allow(dead_code)]
pub fn run_cycle(
    pool: PoolConfig,
    storage: &MemoryStorage,
    transport: &MemoryTransport,
    domains: &StaticDomains,
    options: RunOptions,
) -> Result<RunReport> {
    run_with_cancel(pool, storage, transport, domains, options, CancellationFlag::new())
}

#[allow(dead_code)]
pub fn run_with_cancel(
    pool: PoolConfig,
    storage: &MemoryStorage,
    transport: &MemoryTransport,
    domains: &StaticDomains,
    options: RunOptions,
    cancel: CancellationFlag,
) -> Result<RunReport> {
    let clock = FixedClock(NOW);
    let orchestrator = Orchestrator::setup(
        pool,
        settings(),
        Collaborators {
            storage,
            transport: Some(transport),
            virtualization: domains,
            clock: &clock,
        },
        cancel,
    )?;
    let report = orchestrator.run(options)?;
    orchestrator.close()?;
    Ok(report)
}
