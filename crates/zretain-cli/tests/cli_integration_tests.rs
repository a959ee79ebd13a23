//! CLI integration tests
//!
//! Drive the `zretain` binary against scripted `zfs` and `virsh` stand-ins
//! and check exit codes, output and the commands that were issued.

mod common;

use common::{fake_command, invocations, write_config, zretain};
use tempfile::TempDir;
use zretain_store::RunLock;

const HOME_ONLY: &str = "    retention: 2\n    datasets:\n      - tank/home\n";

const FAKE_ZFS: &str = r#"
case "$1" in
  list) printf 'tank/home@100\ntank/home@200\ntank/home@300\n' ;;
  get) echo "-" ;;
esac
"#;

fn setup(zfs_body: &str) -> (TempDir, std::path::PathBuf) {
    let dir = TempDir::new().unwrap();
    fake_command(dir.path(), "zfs", zfs_body);
    let config = write_config(dir.path(), HOME_ONLY);
    (dir, config)
}

#[test]
fn test_run_snapshots_and_retains() {
    let (dir, config) = setup(FAKE_ZFS);

    let output = zretain(dir.path(), &config, &["run", "--json"]);

    assert!(
        output.status.success(),
        "run should succeed. Stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["pool"], "tank");
    assert_eq!(report["dry_run"], false);
    assert_eq!(report["datasets"][0]["outcome"], "succeeded");
    assert_eq!(report["datasets"][0]["destroyed"], serde_json::json!([100, 200]));

    let calls = invocations(dir.path(), "zfs");
    assert!(calls.iter().any(|c| c.starts_with("snapshot tank/home@")));
    assert!(calls.contains(&"destroy tank/home@100".to_string()));
    assert!(calls.contains(&"destroy tank/home@200".to_string()));
    assert!(!calls.iter().any(|c| c.contains("destroy tank/home@300")));
}

#[test]
fn test_dry_run_issues_no_mutation() {
    let (dir, config) = setup(FAKE_ZFS);

    let output = zretain(dir.path(), &config, &["run", "--dry-run", "--json"]);

    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["datasets"][0]["destroyed"], serde_json::json!([100, 200]));

    let calls = invocations(dir.path(), "zfs");
    assert!(!calls.iter().any(|c| c.starts_with("snapshot ") || c.starts_with("destroy ")));
}

#[test]
fn test_human_summary_output() {
    let (dir, config) = setup(FAKE_ZFS);

    let output = zretain(dir.path(), &config, &["run", "--dry-run"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("on pool tank (dry run)"));
    assert!(stdout.contains("tank/home"));
    assert!(stdout.contains("Totals:"));
}

#[test]
fn test_failed_dataset_exits_with_two() {
    let (dir, config) = setup(
        r#"echo "cannot open 'tank/home': dataset does not exist" >&2; exit 1"#,
    );

    let output = zretain(dir.path(), &config, &["run", "--json"]);

    assert_eq!(output.status.code(), Some(2));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["datasets"][0]["outcome"], "failed");
    assert_eq!(report["datasets"][0]["errors"][0]["code"], "ERR_DATASET_NOT_FOUND");
}

#[test]
fn test_held_lock_is_fatal() {
    let (dir, config) = setup(FAKE_ZFS);
    let _held = RunLock::acquire(&dir.path().join("zretain.lock")).unwrap();

    let output = zretain(dir.path(), &config, &["run"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(invocations(dir.path(), "zfs").is_empty());
}

#[test]
fn test_unknown_pool_is_fatal() {
    let (dir, config) = setup(FAKE_ZFS);

    let output = zretain(dir.path(), &config, &["run", "--pool", "rpool"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("rpool"));
    assert!(invocations(dir.path(), "zfs").is_empty());
}

#[test]
fn test_zero_workers_rejected() {
    let (dir, config) = setup(FAKE_ZFS);

    let output = zretain(dir.path(), &config, &["run", "--workers", "0"]);

    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_status_json() {
    let (dir, config) = setup(FAKE_ZFS);

    let output = zretain(dir.path(), &config, &["status", "--json"]);

    assert!(output.status.success());
    let statuses: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(statuses[0]["dataset"], "tank/home");
    assert_eq!(statuses[0]["local_count"], 3);
    assert_eq!(statuses[0]["newest"], 300);
}

#[test]
fn test_clone_invokes_zfs_clone() {
    let (dir, config) = setup(FAKE_ZFS);

    let output = zretain(dir.path(), &config, &["clone", "tank/home@100", "tank/restore"]);

    assert!(output.status.success());
    assert!(invocations(dir.path(), "zfs").contains(&"clone tank/home@100 tank/restore".to_string()));
}

#[test]
fn test_clone_rejects_bad_reference() {
    let (dir, config) = setup(FAKE_ZFS);

    let output = zretain(dir.path(), &config, &["clone", "tank/home", "tank/restore"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(invocations(dir.path(), "zfs").is_empty());
}

// ============================================================================
// validate
// ============================================================================

const WITH_VM: &str = "    retention: 5\n    datasets:\n      - tank/home\n    vms:\n      - dataset: tank/vms/win10\n        domain: win10\n";

#[test]
fn test_validate_checks_domains() {
    let dir = TempDir::new().unwrap();
    fake_command(dir.path(), "virsh", r#"case "$4" in list) printf 'win10\nubuntu\n' ;; esac"#);
    let config = write_config(dir.path(), WITH_VM);

    let output = zretain(dir.path(), &config, &["validate"]);

    assert!(
        output.status.success(),
        "Stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("Configuration valid"));
    let calls = invocations(dir.path(), "virsh");
    assert!(calls.iter().all(|c| c.starts_with("-r -c qemu:///system")));
}

#[test]
fn test_validate_rejects_unknown_domain() {
    let dir = TempDir::new().unwrap();
    fake_command(dir.path(), "virsh", r#"case "$4" in list) echo "ubuntu" ;; esac"#);
    let config = write_config(dir.path(), WITH_VM);

    let output = zretain(dir.path(), &config, &["validate"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(!String::from_utf8_lossy(&output.stdout).contains("Configuration valid"));
}

#[test]
fn test_run_with_unknown_domain_never_snapshots() {
    let dir = TempDir::new().unwrap();
    fake_command(dir.path(), "zfs", FAKE_ZFS);
    fake_command(dir.path(), "virsh", r#"case "$4" in list) echo "ubuntu" ;; esac"#);
    let config = write_config(dir.path(), WITH_VM);

    let output = zretain(dir.path(), &config, &["run"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(!invocations(dir.path(), "zfs")
        .iter()
        .any(|c| c.starts_with("snapshot ")));
}

#[test]
fn test_invalid_config_is_fatal() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.yaml");
    std::fs::write(&config, "pools:\n  - name: tank\n    retention: 5\n    colour: blue\n").unwrap();

    let output = zretain(dir.path(), &config, &["validate"]);

    assert_eq!(output.status.code(), Some(1));
}
