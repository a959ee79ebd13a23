//! Commands that run outside the snapshot cycle
//!
//! The cycle itself lives in [`crate::orchestrator`].

pub mod clone;
pub mod status;
