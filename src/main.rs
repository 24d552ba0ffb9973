use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{error, info};
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use dradisfs::config::{Cli, Command, DradisConfig};
use dradisfs::fs::tree::ReportTree;
use dradisfs::fs::DradisFs;
use dradisfs::remote::http::DradisClient;
use dradisfs::remote::RemoteClient;
use dradisfs::state::listing_cache::{CachePolicies, CachePolicy};
use dradisfs::FsError;

/// Open files listed when a signal finds the mount busy.
const BUSY_LISTING_CAP: usize = 10;

/// How the mount came down.
enum Exit {
    /// A signal arrived and the mount was released cleanly.
    Released,
    /// A second signal arrived while busy; tear the session down.
    Forced,
    /// Unmounted from outside; the session thread has returned.
    External,
}

/// SIGINT and SIGTERM, delivered as channel messages.
fn signal_channel() -> Result<Receiver<()>, ctrlc::Error> {
    let (tx, rx) = crossbeam_channel::bounded(4);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })?;
    Ok(rx)
}

/// Plain `umount`, which fails while anything holds the mount.
fn release_mount(mountpoint: &Path) -> bool {
    std::process::Command::new("umount")
        .arg(mountpoint)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Name the report files keeping the mount busy.
fn report_busy(tree: &ReportTree) {
    let open = tree.handles().list_open();
    if open.is_empty() {
        eprintln!("dradisfs: mount is busy, a process is using the mountpoint");
    } else {
        eprintln!("dradisfs: mount is busy with {} open file(s):", open.len());
        for handle in open.iter().take(BUSY_LISTING_CAP) {
            let kind = tree
                .entity(&handle.path)
                .map(|e| format!("{:?}", e.kind()))
                .unwrap_or_else(|_| "deleted".to_string());
            eprintln!("  {}  ({}, fh {})", handle.path, kind, handle.fh);
        }
        if open.len() > BUSY_LISTING_CAP {
            eprintln!("  and {} more...", open.len() - BUSY_LISTING_CAP);
        }
    }
    eprintln!(
        "Writes are already pushed to Dradis. Close these to unmount, or signal again to force."
    );
}

/// Wait for a signal or an external unmount. The first signal on a busy
/// mount only reports what holds it; the mount is then retried every second
/// until it frees up or a second signal forces it.
fn await_exit(
    session: &JoinHandle<std::io::Result<()>>,
    signals: &Receiver<()>,
    tree: &ReportTree,
    mountpoint: &Path,
) -> Exit {
    let mut busy = false;
    loop {
        match signals.recv_timeout(Duration::from_secs(1)) {
            Ok(()) => {
                if busy {
                    eprintln!("dradisfs: force unmounting...");
                    return Exit::Forced;
                }
                if session.is_finished() {
                    return Exit::External;
                }
                if release_mount(mountpoint) {
                    eprintln!("dradisfs: unmounting (received signal)...");
                    return Exit::Released;
                }
                busy = true;
                report_busy(tree);
            }
            Err(RecvTimeoutError::Timeout) => {
                if session.is_finished() {
                    return Exit::External;
                }
                if busy && release_mount(mountpoint) {
                    eprintln!("dradisfs: mount released, unmounting...");
                    return Exit::Released;
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!("Signal channel closed, waiting for external unmount");
                while !session.is_finished() {
                    std::thread::sleep(Duration::from_secs(1));
                }
                return Exit::External;
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Command::Mount {
            mountpoint,
            url,
            token,
            project,
            log_file,
            timeout_secs,
            retries,
            project_cache_secs,
            workers,
            eviction_minutes,
            delete_on_releasedir,
            foreground,
        } => {
            // Create mountpoint if it doesn't exist
            if !mountpoint.exists() {
                if let Err(e) = std::fs::create_dir_all(&mountpoint) {
                    eprintln!("Error creating mountpoint {:?}: {}", mountpoint, e);
                    std::process::exit(1);
                }
            }

            let mountpoint = std::fs::canonicalize(&mountpoint).unwrap_or_else(|e| {
                eprintln!("Error: mountpoint {:?}: {}", mountpoint, e);
                std::process::exit(1);
            });

            // Check for a stale FUSE mount left behind by a previous crash or
            // forced kill.
            if is_stale_fuse_mount(&mountpoint) {
                eprintln!(
                    "Error: {} is a stale FUSE mount (previous dradisfs session didn't clean up).\n\
                     Fix with:  umount -f {}",
                    mountpoint.display(),
                    mountpoint.display(),
                );
                std::process::exit(1);
            }

            // Set up logging
            let log_dir = log_file.parent().unwrap_or_else(|| std::path::Path::new("/tmp"));
            let log_name = log_file
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("dradisfs.log"));
            let file_appender = tracing_appender::rolling::never(log_dir, log_name);
            let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

            let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(false),
                )
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false),
                );
            tracing::subscriber::set_global_default(subscriber)
                .expect("Failed to set tracing subscriber");

            let config = DradisConfig {
                mountpoint: mountpoint.clone(),
                url,
                token,
                project,
                log_file,
                timeout: Duration::from_secs(timeout_secs),
                retries,
                project_cache_ttl: project_cache_secs.map(Duration::from_secs),
                workers,
                eviction_minutes,
                delete_on_releasedir,
                foreground,
            };

            info!(
                "dradisfs starting: url={}, project={:?}, mountpoint={}",
                config.url,
                config.project,
                mountpoint.display()
            );

            let tree = match build_tree(&config) {
                Ok(tree) => Arc::new(tree),
                Err(e) => {
                    error!("Failed to initialize: {}", e);
                    std::process::exit(1);
                }
            };

            // Start eviction thread
            let shutdown = Arc::new(AtomicBool::new(false));
            let eviction_handle = dradisfs::state::eviction::start_eviction_thread(
                Arc::clone(&tree),
                eviction_minutes,
                shutdown.clone(),
            );

            let signals = match signal_channel() {
                Ok(rx) => rx,
                Err(e) => {
                    error!("Failed to install signal handler: {}", e);
                    std::process::exit(1);
                }
            };

            // Mount configuration
            let mut fuse_config = fuser::Config::default();
            fuse_config.mount_options = vec![
                fuser::MountOption::FSName("dradisfs".to_string()),
                fuser::MountOption::AutoUnmount,
                fuser::MountOption::DefaultPermissions,
            ];
            fuse_config.acl = fuser::SessionACL::All;

            info!("Mounting dradisfs filesystem...");

            // Spawn FUSE session in background thread
            let fs = DradisFs::new(config.clone(), Arc::clone(&tree));
            let session = match fuser::spawn_mount2(fs, &mountpoint, &fuse_config) {
                Ok(session) => session,
                Err(e) => {
                    if e.raw_os_error() == Some(libc::EPERM)
                        || e.to_string().contains("allow_other")
                    {
                        fuse_config.acl = fuser::SessionACL::Owner;
                        info!("Retrying mount without allow_other...");
                        let retry_fs = DradisFs::new(config, Arc::clone(&tree));
                        match fuser::spawn_mount2(retry_fs, &mountpoint, &fuse_config) {
                            Ok(session) => session,
                            Err(e) => {
                                error!("Failed to mount: {}", e);
                                std::process::exit(1);
                            }
                        }
                    } else {
                        error!("Failed to mount: {}", e);
                        std::process::exit(1);
                    }
                }
            };

            info!("dradisfs mounted at {}", mountpoint.display());

            let exit = await_exit(&session.guard, &signals, &tree, &mountpoint);

            // Stop the eviction thread before joining the session for clean shutdown.
            shutdown.store(true, Ordering::Relaxed);
            let _ = eviction_handle.join();

            match exit {
                Exit::Forced => {
                    if let Err(e) = session.umount_and_join() {
                        error!("Error during unmount, trying force unmount: {}", e);
                        let mp = mountpoint.to_string_lossy();
                        let _ = std::process::Command::new("umount")
                            .args(["-f", &*mp])
                            .status();
                    }
                }
                Exit::Released | Exit::External => {
                    if let Err(e) = session.join() {
                        error!("Error joining FUSE session: {}", e);
                    }
                }
            }

            eprintln!("dradisfs: unmounted {}", mountpoint.display());
        }
        Command::Unmount { mountpoint } => {
            unmount(&mountpoint);
        }
    }
}

/// Wire the HTTP client, listing cache policy and root selection together.
fn build_tree(config: &DradisConfig) -> dradisfs::Result<ReportTree> {
    if config.url.is_empty() {
        return Err(FsError::Config("--url must not be empty".to_string()));
    }
    let remote: Arc<dyn RemoteClient> = Arc::new(DradisClient::new(
        &config.url,
        &config.token,
        config.timeout,
        config.retries,
    ));
    let policies = CachePolicies {
        projects: match config.project_cache_ttl {
            Some(ttl) => CachePolicy::Ttl(ttl),
            None => CachePolicy::Forever,
        },
        ..CachePolicies::default()
    };
    match config.project {
        Some(id) => ReportTree::for_project(remote, id, policies),
        None => Ok(ReportTree::new(remote, policies)),
    }
}

/// A mountpoint listed as a FUSE mount whose directory can no longer be read.
fn is_stale_fuse_mount(path: &Path) -> bool {
    let Ok(output) = std::process::Command::new("mount").output() else {
        return false;
    };
    let listing = String::from_utf8_lossy(&output.stdout);
    let target = path.to_string_lossy();
    let mounted = listing
        .lines()
        .any(|line| line.contains(target.as_ref()) && line.contains("fuse"));
    mounted && std::fs::read_dir(path).is_err()
}

/// `fusermount -u` where available (Linux), otherwise `umount`; `umount -f`
/// as the last resort.
fn unmount(mountpoint: &Path) {
    let mountpoint = std::fs::canonicalize(mountpoint).unwrap_or_else(|e| {
        eprintln!("Error: mountpoint {:?}: {}", mountpoint, e);
        std::process::exit(1);
    });
    let mp = mountpoint.to_string_lossy().into_owned();
    eprintln!("Unmounting {}...", mp);

    let attempts: [(&str, &[&str]); 2] = [("fusermount", &["-u"]), ("umount", &[])];
    for (program, args) in attempts {
        let output = std::process::Command::new(program)
            .args(args)
            .arg(&mp)
            .output();
        match output {
            Ok(o) if o.status.success() => {
                eprintln!("Successfully unmounted {}", mp);
                return;
            }
            Ok(o) if String::from_utf8_lossy(&o.stderr).contains("busy") => {
                eprintln!(
                    "Mount point is busy. Make sure no shells or processes are using {}, then try again.",
                    mp
                );
                std::process::exit(1);
            }
            _ => {}
        }
    }

    let forced = std::process::Command::new("umount")
        .args(["-f", &mp])
        .status();
    if matches!(forced, Ok(s) if s.success()) {
        eprintln!("Successfully unmounted {} (forced)", mp);
        return;
    }

    eprintln!("Failed to unmount {}. Try: sudo umount -f {}", mp, mp);
    std::process::exit(1);
}
