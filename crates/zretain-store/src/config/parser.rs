//! Configuration parser with validation
//!
//! Parses YAML and validates pool names, dataset paths and settings before
//! anything is allowed to touch a pool

use crate::config::format::{ConfigFile, PoolSection, ReplicationSection, SettingsSection};
use crate::errors::{config_error, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use zretain_core::errors::ZrError;
use zretain_core::model::{DatasetSpec, PoolConfig, ReplicationTarget, RetentionPolicy, Settings};

/// Parse a configuration file from a path
pub fn parse_config_file(path: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(path).map_err(|e| {
        config_error(&format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    parse_config_str(&content)
}

/// Parse a configuration from a string
pub fn parse_config_str(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = serde_yaml::from_str(content)
        .map_err(|e| config_error(&format!("YAML parse error: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

/// Parse, validate and select the pool a run operates on
pub fn load_pool(path: &Path, pool: &str) -> Result<(PoolConfig, Settings)> {
    let config = parse_config_file(path)?;
    select_pool(&config, pool)
}

/// Validate a parsed configuration
fn validate_config(config: &ConfigFile) -> Result<()> {
    validate_settings(&config.settings)?;

    if config.pools.is_empty() {
        return Err(config_error("At least one pool must be defined"));
    }

    let mut pool_names = HashSet::new();
    for pool in &config.pools {
        if pool.name.trim().is_empty() {
            return Err(config_error("Pool name must not be empty"));
        }
        if pool.name.contains('/') || pool.name.contains('@') {
            return Err(config_error(&format!(
                "Invalid pool name `{}`: must not contain '/' or '@'",
                pool.name
            )));
        }
        if !pool_names.insert(pool.name.as_str()) {
            return Err(config_error(&format!("Duplicate pool name `{}`", pool.name)));
        }
        validate_pool(pool)?;
    }

    Ok(())
}

fn validate_settings(settings: &SettingsSection) -> Result<()> {
    if settings.workers == Some(0) {
        return Err(config_error("settings.workers must be at least 1"));
    }
    if settings.command_timeout_secs == Some(0) {
        return Err(config_error("settings.command_timeout_secs must be positive"));
    }
    if settings.send_timeout_secs == Some(0) {
        return Err(config_error("settings.send_timeout_secs must be positive"));
    }
    if settings
        .libvirt_uri
        .as_deref()
        .map_or(false, |uri| uri.trim().is_empty())
    {
        return Err(config_error("settings.libvirt_uri must not be empty"));
    }
    Ok(())
}

fn validate_pool(pool: &PoolSection) -> Result<()> {
    let mut seen = HashSet::new();
    let paths = pool
        .datasets
        .iter()
        .map(|d| d.path.as_str())
        .chain(pool.vms.iter().map(|vm| vm.dataset.as_str()));

    for path in paths {
        validate_dataset_path(&pool.name, path)?;
        if !seen.insert(path) {
            return Err(config_error(&format!(
                "Dataset {} is listed more than once in pool `{}`",
                path, pool.name
            )));
        }
    }

    for vm in &pool.vms {
        if vm.domain.trim().is_empty() {
            return Err(config_error(&format!(
                "VM dataset {} has an empty domain name",
                vm.dataset
            )));
        }
    }

    if let Some(replication) = &pool.replication {
        validate_replication(&pool.name, replication)?;

        // The destination pool root always exists, so no full stream can land there
        let root_replicates = pool
            .datasets
            .iter()
            .filter(|d| d.replicate)
            .map(|d| d.path.as_str())
            .chain(pool.vms.iter().filter(|vm| vm.replicate).map(|vm| vm.dataset.as_str()))
            .any(|path| path == pool.name);
        if root_replicates {
            return Err(config_error(&format!(
                "Pool root {} cannot replicate onto destination pool `{}`; set `replicate: false` for it",
                pool.name, replication.destination_pool
            )));
        }
    }

    Ok(())
}

fn validate_dataset_path(pool: &str, path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(config_error(&format!(
            "Empty dataset path in pool `{}`",
            pool
        )));
    }
    if path.contains('@') {
        return Err(config_error(&format!(
            "Dataset path {} must not name a snapshot",
            path
        )));
    }
    let inside = path == pool || path.strip_prefix(pool).map_or(false, |rest| rest.starts_with('/'));
    if !inside || path.ends_with('/') || path.contains("//") {
        return Err(config_error(&format!(
            "Dataset {} is not a dataset of pool `{}`",
            path, pool
        )));
    }
    Ok(())
}

fn validate_replication(pool: &str, replication: &ReplicationSection) -> Result<()> {
    if replication.host.trim().is_empty() {
        return Err(config_error(&format!(
            "Replication host for pool `{}` must not be empty",
            pool
        )));
    }
    let dest = replication.destination_pool.as_str();
    if dest.trim().is_empty() || dest.contains('@') {
        return Err(config_error(&format!(
            "Invalid destination pool `{}` for pool `{}`",
            dest, pool
        )));
    }
    if replication.port == Some(0) {
        return Err(config_error("Replication port must not be 0"));
    }
    Ok(())
}

/// Select the pool a run operates on and build the in-memory model
///
/// # Errors
///
/// Returns an unknown-pool error when `name` is not defined.
pub fn select_pool(config: &ConfigFile, name: &str) -> Result<(PoolConfig, Settings)> {
    let section = config
        .pools
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| ZrError::UnknownPool {
            pool: name.to_string(),
        })?;

    let mut pool = PoolConfig::new(section.name.clone(), RetentionPolicy::new(section.retention));

    for entry in &section.datasets {
        let mut spec = DatasetSpec::regular(entry.path.clone());
        if let Some(retention) = entry.retention {
            spec = spec.with_retention(RetentionPolicy::new(retention));
        }
        if !entry.replicate {
            spec = spec.without_replication();
        }
        pool = pool.with_dataset(spec);
    }

    for vm in &section.vms {
        let mut spec = DatasetSpec::vm_bound(vm.dataset.clone(), vm.domain.clone());
        if let Some(retention) = vm.retention {
            spec = spec.with_retention(RetentionPolicy::new(retention));
        }
        if !vm.replicate {
            spec = spec.without_replication();
        }
        pool = pool.with_dataset(spec);
    }

    if let Some(r) = &section.replication {
        let mut target = ReplicationTarget::new(r.host.clone(), r.destination_pool.clone());
        target.user = r.user.clone();
        target.port = r.port;
        target.secondary_retention = r.secondary_retention.map(RetentionPolicy::new);
        pool = pool.with_replication(target);
    }

    Ok((pool, settings_from(&config.settings)))
}

fn settings_from(section: &SettingsSection) -> Settings {
    let defaults = Settings::default();
    Settings {
        workers: section.workers.unwrap_or(defaults.workers),
        command_timeout: section
            .command_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.command_timeout),
        send_timeout: section
            .send_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.send_timeout),
        lock_path: section.lock_path.clone().unwrap_or(defaults.lock_path),
        libvirt_uri: section.libvirt_uri.clone().unwrap_or(defaults.libvirt_uri),
    }
}
