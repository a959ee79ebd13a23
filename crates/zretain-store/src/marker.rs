//! VM state markers
//!
//! A zero-byte `on` or `off` file at the root of a VM dataset's mountpoint
//! records whether the domain was running when the snapshot was taken.
//! Uses the temp→rename pattern so a marker is never half written.

use crate::errors::{io_error, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use zretain_core::model::MarkerState;

/// Write `state`'s marker under `mountpoint` and remove the opposite one
///
/// Returns the path of the marker that now exists.
pub fn write_marker(mountpoint: &Path, state: MarkerState) -> Result<PathBuf> {
    let target = mountpoint.join(state.file_name());
    let temp_path = mountpoint.join(format!(".{}.tmp", state.file_name()));

    fs::write(&temp_path, b"").map_err(|e| io_error("write_marker_temp", e))?;
    fs::rename(&temp_path, &target).map_err(|e| io_error("rename_marker_temp", e))?;

    let other = mountpoint.join(state.other().file_name());
    match fs::remove_file(&other) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(io_error("remove_stale_marker", e)),
    }

    Ok(target)
}

/// Marker currently present under `mountpoint`, if any
pub fn read_marker(mountpoint: &Path) -> Option<MarkerState> {
    [MarkerState::On, MarkerState::Off]
        .into_iter()
        .find(|state| mountpoint.join(state.file_name()).is_file())
}
