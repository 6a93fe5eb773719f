//! Periodic scanner.
//!
//! [`start`] spawns a task and returns the [`ScannerHandle`] that owns it.
//! Every cycle re-reads the config file and exits on its own once scanning is
//! disabled; [`ScannerHandle::stop`] ends it at the next wake-up. Scans share
//! `AppState::scan_lock` with manual scans, so the two never drive the browser
//! profile at the same time.

use super::scan::{run_scan, ScanRequest};
use crate::core::app_state::AppState;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug)]
pub struct ScannerOptions {
    /// Upper bound on one sleep, so config changes are noticed promptly.
    pub max_sleep: Duration,
    /// Pause after a failed scan before trying again.
    pub error_backoff: Duration,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            max_sleep: Duration::from_secs(60),
            error_backoff: Duration::from_secs(300),
        }
    }
}

pub struct ScannerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ScannerHandle {
    /// Signal the loop and wait for it to exit. An in-flight scan finishes
    /// first.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("background_scanner: task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit on its own (scanning disabled).
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("background_scanner: task ended abnormally: {}", e);
        }
    }
}

pub fn start(state: AppState) -> ScannerHandle {
    start_with(state, ScannerOptions::default())
}

pub fn start_with(state: AppState, opts: ScannerOptions) -> ScannerHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(scanner_loop(state, opts, stop_rx));
    ScannerHandle { stop_tx, task }
}

async fn scanner_loop(state: AppState, opts: ScannerOptions, mut stop_rx: watch::Receiver<bool>) {
    info!("background_scanner: started");
    // Earliest next attempt decided by this loop (after a failure or an
    // aborted run, neither of which stamps last_scan_time).
    let mut not_before = Instant::now();

    loop {
        if *stop_rx.borrow() {
            info!("background_scanner: stop requested");
            break;
        }

        let cfg = state.load_config();
        if !(cfg.enabled && cfg.auto_scan) {
            info!("background_scanner: auto scan disabled; exiting");
            break;
        }

        let interval = cfg.scan_interval();
        let now = Instant::now();
        let due_at = not_before.max(now + until_due(cfg.last_scan_time, interval));

        if now >= due_at {
            match run_scan(&state, ScanRequest::default()).await {
                Ok(report) => {
                    info!(
                        "background_scanner: scan stored {} task(s); next in {}s",
                        report.stored,
                        interval.as_secs()
                    );
                    not_before = Instant::now() + interval;
                }
                Err(e) => {
                    warn!(
                        "background_scanner: scan failed: {}; retrying in {}s",
                        e,
                        opts.error_backoff.as_secs()
                    );
                    not_before = Instant::now() + opts.error_backoff;
                }
            }
            continue;
        }

        let nap = (due_at - now).min(opts.max_sleep);
        tokio::select! {
            _ = tokio::time::sleep(nap) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    info!("background_scanner: stopped");
}

/// Time left until `interval` has passed since `last`; zero when overdue or
/// never scanned.
fn until_due(last: Option<DateTime<Utc>>, interval: Duration) -> Duration {
    let Some(last) = last else {
        return Duration::ZERO;
    };
    let elapsed = Utc::now()
        .signed_duration_since(last)
        .to_std()
        .unwrap_or(Duration::ZERO);
    interval.saturating_sub(elapsed)
}
