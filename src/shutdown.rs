// Graceful shutdown handling for signal trapping

use anyhow::Result;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared shutdown state across the application
#[derive(Clone)]
pub struct ShutdownState {
    /// Flag indicating shutdown has been requested
    shutdown_requested: Arc<AtomicBool>,
    /// Flag indicating cleanup has completed
    cleanup_complete: Arc<AtomicBool>,
}

impl ShutdownState {
    pub fn new() -> Self {
        Self {
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            cleanup_complete: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        log::info!("Shutdown requested");
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn mark_cleanup_complete(&self) {
        self.cleanup_complete.store(true, Ordering::SeqCst);
        log::info!("Cleanup complete");
    }

    pub fn is_cleanup_complete(&self) -> bool {
        self.cleanup_complete.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested, checking every `poll`.
    /// Signal handlers run on their own thread and only flip the flag.
    pub async fn wait_for_shutdown(&self, poll: Duration) {
        let mut interval = tokio::time::interval(poll);
        while !self.is_shutdown_requested() {
            interval.tick().await;
        }
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

/// What the orchestrator left behind when it stopped
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    /// Every in-flight task finished within the grace period
    pub drained: bool,
    /// Tasks still executing when the grace period ran out
    pub still_running: Vec<String>,
}

/// Graceful shutdown handler
pub struct ShutdownHandler {
    state: ShutdownState,
}

impl ShutdownHandler {
    pub fn new() -> Self {
        Self {
            state: ShutdownState::new(),
        }
    }

    pub fn with_state(state: ShutdownState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &ShutdownState {
        &self.state
    }

    /// Run `cleanup` once and log what it reports
    pub async fn handle_shutdown<F, Fut>(&self, cleanup: F) -> ShutdownReport
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ShutdownReport>,
    {
        self.state.request_shutdown();
        log::info!("Starting graceful shutdown...");

        let report = cleanup().await;

        if report.drained {
            log::info!("Shutdown complete: all tasks drained");
        } else {
            log::warn!(
                "Shutdown complete with {} task(s) still running",
                report.still_running.len()
            );
            for task_id in &report.still_running {
                log::warn!("Still running: {}", task_id);
            }
        }

        self.state.mark_cleanup_complete();
        report
    }
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Register signal handlers for graceful shutdown
/// This sets up handlers for SIGINT (Ctrl+C), SIGTERM, and SIGHUP
#[cfg(unix)]
pub fn register_signal_handlers(state: ShutdownState) -> Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])
        .map_err(|e| anyhow::anyhow!("Failed to register signal handlers: {}", e))?;

    thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGINT => log::info!("Received SIGINT (Ctrl+C)"),
                SIGTERM => log::info!("Received SIGTERM"),
                SIGHUP => log::info!("Received SIGHUP"),
                _ => continue,
            }
            state.request_shutdown();
        }
    });

    log::info!("Signal handlers registered (SIGINT, SIGTERM, SIGHUP)");
    Ok(())
}

/// Register signal handlers for Windows
#[cfg(windows)]
pub fn register_signal_handlers(state: ShutdownState) -> Result<()> {
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C");
        state.request_shutdown();
    })
    .map_err(|e| anyhow::anyhow!("Failed to register Ctrl+C handler: {}", e))?;

    log::info!("Signal handler registered (Ctrl+C)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_state_clone_shares_flags() {
        let state1 = ShutdownState::new();
        let state2 = state1.clone();
        assert!(!state2.is_shutdown_requested());

        state1.request_shutdown();
        assert!(state2.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_resolves_after_request() {
        let state = ShutdownState::new();
        let waiter = state.clone();
        let handle =
            tokio::spawn(async move { waiter.wait_for_shutdown(Duration::from_millis(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        state.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_handle_shutdown_marks_cleanup_complete() {
        let handler = ShutdownHandler::new();

        let report = handler
            .handle_shutdown(|| async {
                ShutdownReport {
                    drained: false,
                    still_running: vec!["t1".to_string()],
                }
            })
            .await;

        assert!(!report.drained);
        assert_eq!(report.still_running, vec!["t1".to_string()]);
        assert!(handler.state().is_shutdown_requested());
        assert!(handler.state().is_cleanup_complete());
    }
}
