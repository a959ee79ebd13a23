//! zretain engine - orchestration layer
//!
//! Drives the snapshot cycle for one pool: a per-dataset pipeline on a
//! bounded worker pool, sharing one read-only hypervisor session, plus the
//! status and clone commands.

pub mod clock;
pub mod commands;
pub mod orchestrator;
mod pipeline;
pub mod session;

pub use clock::{Clock, FixedClock, SystemClock};
pub use orchestrator::{validate_domains, Collaborators, Orchestrator, RunAborted, RunOptions};
pub use session::DomainSession;
