use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "honeysift")]
#[command(version = "0.1.0")]
#[command(about = "Active honeypot fingerprinting", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a host and identify the honeypot running on it
    Detect(DetectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DetectArgs {
    /// Target IP address or hostname
    #[arg(short = 't', long, required = true)]
    pub target: String,

    /// Signature database (JSON)
    #[arg(short, long, required = true)]
    pub signatures: PathBuf,

    /// Engine configuration file (JSON); flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Port range to sweep. Examples: 22 or 1-1024
    #[arg(short, long)]
    pub ports: Option<String>,

    /// Port sweep preset
    #[arg(long, value_parser = ["fast", "thorough"])]
    pub preset: Option<String>,

    /// Max concurrent connect workers
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Connection attempts per second
    #[arg(short = 'r', long)]
    pub rate_limit: Option<u32>,

    /// Connect timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Minimum confidence for a match
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Login name for SSH and telnet sessions
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password for SSH and telnet sessions
    #[arg(long)]
    pub password: Option<String>,

    /// Append detection and communication records to this JSON-lines file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Output format: text, json
    #[arg(short, long, default_value = "text")]
    pub output_format: String,
}
