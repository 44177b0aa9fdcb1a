//! Shutdown coordination
//!
//! Everything holding unflushed state (queues, the reference table) registers
//! with a [`ShutdownCoordinator`] created once at startup. On interruption, on a
//! fatal error and on normal completion the coordinator closes every entry so no
//! further work is accepted, then flushes each one to disk.

use crate::{MigrateError, Result};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};

/// State that must reach disk before the process exits
pub trait Flushable: Send + Sync {
    fn name(&self) -> &str;

    /// Stop accepting new work
    fn close(&self);

    /// Persist current state synchronously
    fn flush(&self) -> Result<()>;
}

impl<F: Flushable + ?Sized> Flushable for Arc<F> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn close(&self) {
        (**self).close()
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}

/// Signal that ended a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Registry of flushable state
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    entries: Arc<Mutex<Vec<Arc<dyn Flushable>>>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F: Flushable + 'static>(&self, entry: F) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(name = %entry.name(), "Registered for shutdown flush");
        entries.push(Arc::new(entry));
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every entry, then flush every entry
    ///
    /// All entries are attempted even if some fail; the failures are reported
    /// together.
    pub fn shutdown(&self) -> Result<()> {
        let entries: Vec<Arc<dyn Flushable>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for entry in &entries {
            entry.close();
        }

        let mut failed = Vec::new();
        for entry in &entries {
            match entry.flush() {
                Ok(()) => info!(name = %entry.name(), "Flushed"),
                Err(e) => {
                    error!(name = %entry.name(), error = %e, "Final flush failed");
                    failed.push(entry.name().to_string());
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(MigrateError::Other(format!(
                "Failed to flush on shutdown: {}",
                failed.join(", ")
            )))
        }
    }

    /// Drive `work` until it finishes or a signal arrives, then shut down
    ///
    /// A signal abandons `work` (in-flight calls are not awaited) and yields
    /// [`MigrateError::Interrupted`]. The final flush runs in every case.
    pub async fn run_until<T, W, S>(&self, work: W, signal: S) -> Result<T>
    where
        W: Future<Output = Result<T>>,
        S: Future<Output = Result<ShutdownSignal>>,
    {
        let outcome = tokio::select! {
            result = work => result,
            received = signal => match received {
                Ok(sig) => {
                    info!(signal = %sig, "Received signal, initiating graceful shutdown");
                    Err(MigrateError::Interrupted)
                }
                Err(e) => Err(e),
            },
        };

        if let Err(ref e) = outcome {
            if !matches!(e, MigrateError::Interrupted) {
                error!(error = %e, "Run failed, flushing state before exit");
            }
        }

        let flushed = self.shutdown();
        match (outcome, flushed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(flush_err)) => Err(flush_err),
            (Err(e), _) => Err(e),
        }
    }

    /// [`run_until`](Self::run_until) with SIGINT/SIGTERM
    pub async fn run_until_signal<T, W>(&self, work: W) -> Result<T>
    where
        W: Future<Output = Result<T>>,
    {
        self.run_until(work, wait_for_signal()).await
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
pub async fn wait_for_signal() -> Result<ShutdownSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| MigrateError::Other(format!("Failed to set up SIGTERM handler: {}", e)))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| MigrateError::Other(format!("Failed to set up SIGINT handler: {}", e)))?;

    tokio::select! {
        _ = sigterm.recv() => Ok(ShutdownSignal::Terminate),
        _ = sigint.recv() => Ok(ShutdownSignal::Interrupt),
    }
}

/// Wait for Ctrl-C (non-Unix platforms)
#[cfg(not(unix))]
pub async fn wait_for_signal() -> Result<ShutdownSignal> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| MigrateError::Other(format!("Failed to set up Ctrl-C handler: {}", e)))?;
    Ok(ShutdownSignal::Interrupt)
}
