//! Periodic idle-session eviction.

use super::store::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest tick period; `tokio::time::interval` rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

struct Running {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl Running {
    fn cancel(self) {
        self.token.cancel();
        // A sweep in progress completes; no further tick starts.
        drop(self.task);
    }
}

/// Background task that inspects the session store on a fixed interval and
/// removes sessions idle for longer than the session timeout.
///
/// A zero timeout turns the reaper into an observer that only logs the
/// active-session count. Sessions with a request in flight are never
/// removed; they are reconsidered on the next tick.
pub struct Reaper {
    store: Arc<SessionStore>,
    interval: Duration,
    timeout: Duration,
    running: parking_lot::Mutex<Option<Running>>,
}

impl Reaper {
    /// A zero `interval` is raised to one millisecond.
    pub fn new(store: Arc<SessionStore>, interval: Duration, timeout: Duration) -> Self {
        if interval.is_zero() {
            warn!("Reaper interval of zero raised to {:?}", MIN_INTERVAL);
        }
        Self {
            store,
            interval: interval.max(MIN_INTERVAL),
            timeout,
            running: parking_lot::Mutex::new(None),
        }
    }

    /// Starts the periodic task. Returns `false` if it was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("Reaper already running");
            return false;
        }

        let token = CancellationToken::new();
        let reaper = Arc::clone(self);
        let cancelled = token.clone();
        let period = self.interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        reaper.sweep();
                    }
                }
            }
            debug!("Reaper task exited");
        });

        *running = Some(Running { token, task });
        info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Reaper started"
        );
        true
    }

    /// Stops the periodic task. Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        let Some(running) = self.running.lock().take() else {
            return false;
        };
        running.cancel();
        info!("Reaper stopped");
        true
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Runs one inspection pass and returns how many sessions were removed.
    pub fn sweep(&self) -> usize {
        let active = self.store.count();
        if self.timeout.is_zero() {
            debug!(active, "Reaper tick");
            return 0;
        }

        let now = Instant::now();
        let mut reaped = 0;
        for session in self.store.snapshot() {
            if session.idle_for(now) <= self.timeout {
                continue;
            }
            let Some(_exclusive) = session.transport.try_exclusive() else {
                debug!(session_id = %session.id, "Idle session busy, skipping");
                continue;
            };
            // Activity may have landed between the snapshot and the lock.
            if session.idle_for(Instant::now()) <= self.timeout {
                continue;
            }
            if self.store.remove_if_same(&session.id, &session.transport) {
                info!(
                    session_id = %session.id,
                    idle_ms = session.idle_for(now).as_millis() as u64,
                    "Reaped idle session"
                );
                reaped += 1;
            }
        }

        debug!(active = self.store.count(), reaped, "Reaper tick");
        reaped
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel();
        }
    }
}
