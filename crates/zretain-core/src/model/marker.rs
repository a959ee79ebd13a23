use serde::{Deserialize, Serialize};

/// Running state of a VM at snapshot time, recorded as a zero-byte file
/// at the root of the dataset's mountpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerState {
    On,
    Off,
}

impl MarkerState {
    pub fn from_active(active: bool) -> Self {
        if active {
            MarkerState::On
        } else {
            MarkerState::Off
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            MarkerState::On => "on",
            MarkerState::Off => "off",
        }
    }

    /// The marker that must not coexist with this one
    pub fn other(&self) -> Self {
        match self {
            MarkerState::On => MarkerState::Off,
            MarkerState::Off => MarkerState::On,
        }
    }
}
