use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

#[allow(dead_code)]
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Write an executable shell script standing in for `zfs`, `ssh` or `virsh`
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
