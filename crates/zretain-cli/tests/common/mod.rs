use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Write an executable shell script standing in for `zfs` or `virsh`
///
/// Every invocation appends its arguments to `<dir>/<name>.log`.
#[allow(dead_code)]
pub fn fake_command(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let log = dir.join(format!("{}.log", name));
    let script = format!(
        "#!/bin/sh\necho \"$@\" >> '{}'\n{}\n",
        log.display(),
        body
    );
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// Argument lines recorded by a fake command
#[allow(dead_code)]
pub fn invocations(dir: &Path, name: &str) -> Vec<String> {
    fs::read_to_string(dir.join(format!("{}.log", name)))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Config for pool `tank` with the run lock inside `dir`
#[allow(dead_code)]
pub fn write_config(dir: &Path, pool_body: &str) -> PathBuf {
    let path = dir.join("zretain.yaml");
    let content = format!(
        "settings:\n  workers: 2\n  command_timeout_secs: 10\n  lock_path: {}\npools:\n  - name: tank\n{}",
        dir.join("zretain.lock").display(),
        pool_body
    );
    fs::write(&path, content).unwrap();
    path
}

/// Run the `zretain` binary with fake `zfs` and `virsh` from `dir`
#[allow(dead_code)]
pub fn zretain(dir: &Path, config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_zretain"))
        .arg("--config")
        .arg(config)
        .arg("--zfs-binary")
        .arg(dir.join("zfs"))
        .arg("--virsh-binary")
        .arg(dir.join("virsh"))
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("Failed to execute CLI")
}
