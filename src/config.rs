use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "dradisfs", about = "Browse and edit Dradis report content as files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount a Dradis instance
    Mount {
        /// Path to the mount point
        mountpoint: PathBuf,

        /// Base URL of the Dradis instance
        #[arg(long, env = "DRADIS_URL")]
        url: String,

        /// API token
        #[arg(long, env = "DRADIS_TOKEN", hide_env_values = true)]
        token: String,

        /// Expose only this project, as the filesystem root
        #[arg(long)]
        project: Option<u64>,

        /// Log file path
        #[arg(long, default_value = "/tmp/dradisfs.log")]
        log_file: PathBuf,

        /// Per-request timeout for remote calls, in seconds
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,

        /// Retries for idempotent remote reads
        #[arg(long, default_value_t = 2)]
        retries: u32,

        /// Seconds to cache the project listing (default: until unmount)
        #[arg(long)]
        project_cache_secs: Option<u64>,

        /// Number of dispatch worker threads
        #[arg(long, default_value_t = 4)]
        workers: usize,

        /// Minutes before evicting idle content buffers
        #[arg(long, default_value_t = 60)]
        eviction_minutes: u64,

        /// Treat releasedir as a request to delete the directory remotely
        #[arg(long)]
        delete_on_releasedir: bool,

        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
    },
    /// Unmount a dradisfs filesystem
    Unmount {
        /// Path to the mount point
        mountpoint: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct DradisConfig {
    pub mountpoint: PathBuf,
    pub url: String,
    pub token: String,
    pub project: Option<u64>,
    pub log_file: PathBuf,
    pub timeout: Duration,
    pub retries: u32,
    pub project_cache_ttl: Option<Duration>,
    pub workers: usize,
    pub eviction_minutes: u64,
    pub delete_on_releasedir: bool,
    pub foreground: bool,
}

impl Default for DradisConfig {
    fn default() -> Self {
        Self {
            mountpoint: PathBuf::new(),
            url: String::new(),
            token: String::new(),
            project: None,
            log_file: PathBuf::from("/tmp/dradisfs.log"),
            timeout: Duration::from_secs(30),
            retries: 2,
            project_cache_ttl: None,
            workers: 4,
            eviction_minutes: 60,
            delete_on_releasedir: false,
            foreground: false,
        }
    }
}
