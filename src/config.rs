//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_DATA_DIR: &str = ".photo-drive/data";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOCK_WAIT_SECS: u64 = 5;
pub const DEFAULT_USER_LEVEL: i64 = 1;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;
pub const LOCK_PRUNE_INTERVAL_SECS: u64 = 600;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "photo-drive", version = VERSION_INFO, about = "Photo album storage server")]
pub struct Args {
    #[arg(
        short = 'd',
        long,
        env = "PHOTO_DRIVE_DATA_DIR",
        default_value = DEFAULT_DATA_DIR,
        help = "Directory holding per-user album data"
    )]
    pub data_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "PHOTO_DRIVE_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "PHOTO_DRIVE_PORT",
        default_value_t = 5010,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(long, env = "PHOTO_DRIVE_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "PHOTO_DRIVE_LOG",
        default_value = DEFAULT_LOG_LEVEL,
        help = "Log filter used when RUST_LOG is unset"
    )]
    pub log_level: String,
    #[arg(
        long,
        env = "PHOTO_DRIVE_LOCK_WAIT_SECS",
        default_value_t = DEFAULT_LOCK_WAIT_SECS,
        help = "Seconds to wait for a data file lock before answering busy"
    )]
    pub lock_wait_secs: u64,
    #[arg(
        long,
        env = "PHOTO_DRIVE_DEFAULT_LEVEL",
        default_value_t = DEFAULT_USER_LEVEL,
        help = "Level assigned to users without a ledger"
    )]
    pub default_level: i64,
    #[arg(
        long,
        env = "PHOTO_DRIVE_SWEEP_INTERVAL_SECS",
        default_value_t = DEFAULT_SWEEP_INTERVAL_SECS,
        help = "Scheduled trash sweep interval in seconds (0 to sweep only on read)"
    )]
    pub sweep_interval_secs: u64,
}
