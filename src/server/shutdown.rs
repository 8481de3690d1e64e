//! Ordered, deadline-bounded server shutdown.

use super::reaper::Reaper;
use super::store::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Why shutdown was started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / SIGTERM.
    Signal,
    /// The server loop failed and cannot continue.
    Fatal(String),
}

/// How shutdown finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    Clean,
    Failed(String),
    DeadlineExceeded,
}

impl ShutdownOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownOutcome::Clean => 0,
            ShutdownOutcome::Failed(_) | ShutdownOutcome::DeadlineExceeded => 1,
        }
    }
}

/// Drives the stop sequence: halt the reaper, stop accepting connections,
/// close every session, then wait for the server loop to drain.
pub struct ShutdownCoordinator {
    store: Arc<SessionStore>,
    reaper: Arc<Reaper>,
    accept: CancellationToken,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(store: Arc<SessionStore>, reaper: Arc<Reaper>, grace: Duration) -> Self {
        Self {
            store,
            reaper,
            accept: CancellationToken::new(),
            grace,
        }
    }

    /// Cancelled once the server must stop accepting connections. Pass it to
    /// the server's graceful-shutdown hook.
    pub fn accept_token(&self) -> CancellationToken {
        self.accept.clone()
    }

    /// Runs the stop sequence, bounded by the grace period as a whole.
    ///
    /// `server` is the task running the accept loop; it is awaited after
    /// every session has been closed and aborted if the deadline passes.
    pub async fn shutdown(
        &self,
        reason: ShutdownReason,
        server: Option<JoinHandle<std::io::Result<()>>>,
    ) -> ShutdownOutcome {
        info!(?reason, grace_ms = self.grace.as_millis() as u64, "Shutting down");
        let abort = server.as_ref().map(|task| task.abort_handle());

        let sequence = async {
            self.reaper.stop();
            self.accept.cancel();
            let closed = self.store.close_all();
            info!(closed, "Sessions closed");

            match server {
                Some(task) => match task.await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(format!("server loop failed: {}", e)),
                    Err(e) => Err(format!("server task failed: {}", e)),
                },
                None => Ok(()),
            }
        };

        let outcome = match tokio::time::timeout(self.grace, sequence).await {
            Ok(Ok(())) => match reason {
                ShutdownReason::Signal => ShutdownOutcome::Clean,
                ShutdownReason::Fatal(cause) => ShutdownOutcome::Failed(cause),
            },
            Ok(Err(cause)) => {
                error!(%cause, "Shutdown step failed");
                ShutdownOutcome::Failed(cause)
            }
            Err(_) => {
                warn!("Shutdown deadline exceeded, forcing exit");
                if let Some(abort) = abort {
                    abort.abort();
                }
                ShutdownOutcome::DeadlineExceeded
            }
        };

        info!(?outcome, "Shutdown finished");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{DispatchTable, SessionTransport};

    fn setup(grace: Duration) -> (Arc<SessionStore>, Arc<Reaper>, ShutdownCoordinator) {
        let store = Arc::new(SessionStore::new(8));
        let reaper = Arc::new(Reaper::new(
            Arc::clone(&store),
            Duration::from_secs(30),
            Duration::ZERO,
        ));
        let coordinator = ShutdownCoordinator::new(Arc::clone(&store), Arc::clone(&reaper), grace);
        (store, reaper, coordinator)
    }

    #[tokio::test]
    async fn test_clean_shutdown_closes_everything() {
        let (store, reaper, coordinator) = setup(Duration::from_secs(5));
        let transport = Arc::new(SessionTransport::new("a", Arc::new(DispatchTable::new("t"))));
        store.add("a".to_string(), Arc::clone(&transport));
        reaper.start();

        let token = coordinator.accept_token();
        let server = tokio::spawn(async move {
            token.cancelled().await;
            Ok(())
        });

        let outcome = coordinator.shutdown(ShutdownReason::Signal, Some(server)).await;
        assert_eq!(outcome, ShutdownOutcome::Clean);
        assert_eq!(outcome.exit_code(), 0);
        assert!(!reaper.is_running());
        assert!(store.is_empty());
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_fatal_reason_exits_nonzero() {
        let (_, _, coordinator) = setup(Duration::from_secs(5));
        let outcome = coordinator
            .shutdown(ShutdownReason::Fatal("listener died".to_string()), None)
            .await;
        assert_eq!(outcome, ShutdownOutcome::Failed("listener died".to_string()));
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let (_, _, coordinator) = setup(Duration::from_secs(5));
        let server = tokio::spawn(async { Err(std::io::Error::other("boom")) });
        let outcome = coordinator.shutdown(ShutdownReason::Signal, Some(server)).await;
        assert!(matches!(outcome, ShutdownOutcome::Failed(ref cause) if cause.contains("boom")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_forces_exit() {
        let (_, _, coordinator) = setup(Duration::from_secs(10));
        let server = tokio::spawn(async {
            std::future::pending::<()>().await;
            Ok(())
        });
        let outcome = coordinator.shutdown(ShutdownReason::Signal, Some(server)).await;
        assert_eq!(outcome, ShutdownOutcome::DeadlineExceeded);
        assert_eq!(outcome.exit_code(), 1);
    }
}
