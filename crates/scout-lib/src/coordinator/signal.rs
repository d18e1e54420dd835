//! Shutdown requests from signals and internal conditions

use crate::observability::StructuredLogger;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cancels a run scope at most once, whoever asks first
#[derive(Clone)]
pub struct ShutdownTrigger {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
    logger: StructuredLogger,
}

impl ShutdownTrigger {
    pub fn new(token: CancellationToken, logger: StructuredLogger) -> Self {
        Self {
            token,
            fired: Arc::new(AtomicBool::new(false)),
            logger,
        }
    }

    /// Request shutdown. Returns false if a request was already made.
    pub fn trigger(&self, reason: &str) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            debug!(reason = %reason, "Shutdown already requested");
            return false;
        }
        self.logger.log_shutdown_requested(reason);
        self.token.cancel();
        true
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Forward SIGINT and SIGTERM to `trigger` until the task is aborted.
///
/// The handlers stay installed after the first signal so repeated
/// interrupts are absorbed instead of killing the process mid-shutdown.
#[cfg(unix)]
pub fn spawn_signal_listener(trigger: ShutdownTrigger) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let reason = tokio::select! {
                Some(()) = sigint.recv() => "SIGINT received",
                Some(()) = sigterm.recv() => "SIGTERM received",
                else => return,
            };
            trigger.trigger(reason);
        }
    }))
}

#[cfg(not(unix))]
pub fn spawn_signal_listener(trigger: ShutdownTrigger) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            trigger.trigger("interrupt received");
        }
    }))
}
