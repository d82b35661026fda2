use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the precache binary.
#[derive(Debug, Parser)]
#[command(
    name = "precache",
    version,
    about = "Versioned resource cache for static sites"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PRECACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Install the configured version, then serve the origin through it.
    Serve(Box<ServeArgs>),
    /// Pre-populate the configured version's bucket without serving.
    Install(InstallArgs),
    /// List the buckets present in storage.
    Buckets(BucketsArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageOverrides {
    /// Override the bucket storage backend (memory|disk).
    #[arg(long = "cache-storage", value_name = "KIND")]
    pub cache_storage: Option<String>,

    /// Override the directory holding disk buckets.
    #[arg(long = "cache-directory", value_name = "PATH")]
    pub cache_directory: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Override the origin URL whose resources are cached.
    #[arg(long = "origin-url", value_name = "URL")]
    pub origin_url: Option<String>,

    /// Override the cache version token.
    #[arg(long = "cache-version", value_name = "VERSION")]
    pub cache_version: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the maximum buffered request body in bytes.
    #[arg(long = "server-max-body-bytes", value_name = "BYTES")]
    pub server_max_body_bytes: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct InstallArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Also activate: evict every other version's bucket.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub activate: bool,
}

#[derive(Debug, Args, Clone)]
pub struct BucketsArgs {
    #[command(flatten)]
    pub storage: StorageOverrides,
}
