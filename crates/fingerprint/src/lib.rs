//! Fingerprint Engine - Honeypot identification
//!
//! This crate provides the active side of detection:
//! - Protocol communicators that replay signature steps
//! - Response matching and confidence aggregation
//! - Custom heuristic probes (session isolation, timing side channel)

pub mod communicator;
pub mod heuristics;
pub mod matcher;
pub mod score;
pub mod shell;

pub use communicator::Communicators;
pub use heuristics::{ProbeRegistry, SESSION_ISOLATION, TIMING_SIDE_CHANNEL};
pub use matcher::{compare, matches_step};
pub use score::ScoreAggregator;
pub use shell::{ShellConnector, ShellSession};
