//! TCP connect scanning primitives
//!
//! Single-port reachability probing and passive banner grabbing. The
//! concurrent sweep over a port range lives in the orchestrator crate.

mod banner;
mod scanner;

pub use banner::BannerGrabber;
pub use scanner::TcpConnectProber;
