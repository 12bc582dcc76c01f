//! OS signal handling.
//!
//! # Responsibilities
//! - Listen for SIGINT and SIGTERM (Ctrl-C on Windows)
//! - Translate the first one into a shutdown trigger
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Handlers are registered before the watcher task is spawned
//! - The watcher exits quietly if shutdown was triggered some other way

use std::io;

use tokio::task::JoinHandle;

use super::Shutdown;

/// Registered termination signal handlers.
#[derive(Debug)]
pub struct TerminationSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(windows)]
    ctrl_c: tokio::signal::windows::CtrlC,
}

impl TerminationSignals {
    /// Register the handlers with the OS. Must be called inside a Tokio runtime.
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(windows)]
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    /// Wait for the next termination signal and return its name.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(windows)]
    pub async fn recv(&mut self) -> &'static str {
        self.ctrl_c.recv().await;
        "ctrl-c"
    }
}

/// Register the signal handlers, then spawn a task that triggers `shutdown`
/// on the first termination signal.
pub fn spawn_signal_watcher(shutdown: Shutdown) -> io::Result<JoinHandle<()>> {
    let mut signals = TerminationSignals::install()?;

    Ok(tokio::spawn(async move {
        tokio::select! {
            signal = signals.recv() => {
                tracing::info!(signal, "Shutting down server");
                shutdown.trigger();
            }
            _ = shutdown.triggered() => {}
        }
    }))
}
