use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::fs::tree::ReportTree;

/// Start a background thread that periodically evicts idle content buffers.
pub fn start_eviction_thread(
    tree: Arc<ReportTree>,
    eviction_minutes: u64,
    shutdown: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    let check_interval = Duration::from_secs(60);
    let idle = Duration::from_secs(eviction_minutes * 60);

    std::thread::Builder::new()
        .name("dradisfs-eviction".to_string())
        .spawn(move || {
            debug!("Eviction thread started, eviction_minutes={}", eviction_minutes);
            while !shutdown.load(Ordering::Relaxed) {
                // Sleep in 1-second ticks so we notice the shutdown flag promptly.
                let mut remaining = check_interval;
                let tick = Duration::from_secs(1);
                while remaining > Duration::ZERO {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let sleep_time = remaining.min(tick);
                    std::thread::sleep(sleep_time);
                    remaining = remaining.saturating_sub(sleep_time);
                }
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                let evicted = tree.evict_idle(idle);
                if evicted > 0 {
                    debug!("Evicted {} idle content buffers", evicted);
                }
            }
            debug!("Eviction thread shutting down");
        })
        .expect("failed to spawn eviction thread")
}
