//! Configuration file schema
//!
//! Defines the YAML structure of the zretain configuration file

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Top-level configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Run-wide settings, all optional
    #[serde(default)]
    pub settings: SettingsSection,

    /// Pools this host manages; one is selected per run
    pub pools: Vec<PoolSection>,
}

/// Run-wide settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsSection {
    /// Worker pool size
    pub workers: Option<usize>,

    /// Timeout for metadata commands, in seconds
    pub command_timeout_secs: Option<u64>,

    /// Timeout for one send/receive pipeline, in seconds
    pub send_timeout_secs: Option<u64>,

    /// Path of the run lock file
    pub lock_path: Option<PathBuf>,

    /// Hypervisor connection URI
    pub libvirt_uri: Option<String>,
}

/// Pool definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSection {
    /// Pool name
    pub name: String,

    /// Default max snapshots per dataset
    pub retention: u32,

    /// Regular datasets
    #[serde(default)]
    pub datasets: Vec<DatasetEntry>,

    /// Datasets backing virtual machine disks
    #[serde(default)]
    pub vms: Vec<VmEntry>,

    /// Optional replication target
    #[serde(default)]
    pub replication: Option<ReplicationSection>,
}

/// Regular dataset, either a bare path or a map with overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetEntry {
    pub path: String,
    pub retention: Option<u32>,
    pub replicate: bool,
}

/// VM-bound dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmEntry {
    /// Dataset holding the VM disk image
    pub dataset: String,

    /// Hypervisor domain name
    pub domain: String,

    /// Retention override
    #[serde(default)]
    pub retention: Option<u32>,

    /// Opt-out from pool replication
    #[serde(default = "default_true")]
    pub replicate: bool,
}

/// Remote pool reached over ssh
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationSection {
    pub host: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    /// Pool on the remote host receiving the streams
    pub destination_pool: String,

    /// Max snapshots kept on the remote; unset keeps everything
    #[serde(default)]
    pub secondary_retention: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl<'de> Deserialize<'de> for DatasetEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DatasetVisitor;

        impl<'de> Visitor<'de> for DatasetVisitor {
            type Value = DatasetEntry;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a dataset path or a map with a 'path' field")
            }

            fn visit_str<E>(self, value: &str) -> Result<DatasetEntry, E>
            where
                E: de::Error,
            {
                Ok(DatasetEntry {
                    path: value.to_string(),
                    retention: None,
                    replicate: true,
                })
            }

            fn visit_map<M>(self, mut map: M) -> Result<DatasetEntry, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut path = None;
                let mut retention = None;
                let mut replicate = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "path" => path = Some(map.next_value()?),
                        "retention" => retention = Some(map.next_value()?),
                        "replicate" => replicate = Some(map.next_value()?),
                        other => {
                            return Err(de::Error::unknown_field(
                                other,
                                &["path", "retention", "replicate"],
                            ))
                        }
                    }
                }
                Ok(DatasetEntry {
                    path: path.ok_or_else(|| de::Error::missing_field("path"))?,
                    retention,
                    replicate: replicate.unwrap_or(true),
                })
            }
        }

        deserializer.deserialize_any(DatasetVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
pools:
  - name: tank
    retention: 75
    datasets:
      - tank/home
"#;

        let config: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.pools.len(), 1);
        assert_eq!(config.pools[0].name, "tank");
        assert_eq!(config.pools[0].datasets[0].path, "tank/home");
        assert!(config.pools[0].datasets[0].replicate);
        assert!(config.settings.workers.is_none());
    }

    #[test]
    fn test_dataset_map_format() {
        let yaml = r#"
pools:
  - name: tank
    retention: 75
    datasets:
      - path: tank/scratch
        retention: 5
        replicate: false
"#;

        let config: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        let ds = &config.pools[0].datasets[0];
        assert_eq!(ds.path, "tank/scratch");
        assert_eq!(ds.retention, Some(5));
        assert!(!ds.replicate);
    }

    #[test]
    fn test_dataset_map_rejects_unknown_key() {
        let yaml = r#"
pools:
  - name: tank
    retention: 75
    datasets:
      - path: tank/scratch
        keep: 5
"#;

        assert!(serde_yaml::from_str::<ConfigFile>(yaml).is_err());
    }

    #[test]
    fn test_unknown_pool_field_rejected() {
        let yaml = r#"
pools:
  - name: tank
    retention: 75
    compression: lz4
"#;

        assert!(serde_yaml::from_str::<ConfigFile>(yaml).is_err());
    }
}
