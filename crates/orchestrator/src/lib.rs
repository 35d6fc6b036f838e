//! Orchestrator - port sweep, signature evaluation and detection logging

mod log;
mod orchestrator;
mod port_scanner;
mod progress;
mod rate_limiter;

pub use log::{JsonLinesLog, MemoryLog, TracingLog};
pub use orchestrator::{DetectionOrchestrator, UNKNOWN_VERSION};
pub use port_scanner::PortScanner;
pub use progress::ProgressTracker;
pub use rate_limiter::RateLimiter;
