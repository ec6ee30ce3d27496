//! Shutdown bridge between Tokio runtime and the poll thread
//!
//! The poll loop runs on a dedicated blocking thread. The runtime side
//! holds a [`ShutdownTrigger`] (typically fired from a Ctrl+C handler); the
//! poll thread checks its [`ShutdownSignal`] once per cycle, so it always
//! finishes the current transfer and unwinds through its claim guard.

use async_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

/// Handle for Tokio runtime (or any thread) to request shutdown
#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Sender<()>,
}

impl ShutdownTrigger {
    /// Request shutdown. Triggering more than once is harmless.
    pub fn trigger(&self) -> crate::Result<()> {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Closed(())) => {
                Err(crate::Error::Channel("shutdown signal dropped".to_string()))
            }
        }
    }
}

/// Handle for the poll thread (non-blocking checks)
pub struct ShutdownSignal {
    rx: Receiver<()>,
}

impl ShutdownSignal {
    /// Check whether shutdown was requested
    ///
    /// A dropped trigger counts as a request: nobody is left to stop the
    /// loop otherwise.
    pub fn should_stop(&self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Closed) => true,
            Err(TryRecvError::Empty) => false,
        }
    }
}

/// Create the shutdown bridge
///
/// Returns (ShutdownTrigger for the runtime, ShutdownSignal for the poll thread)
pub fn create_shutdown_bridge() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = bounded(1);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}
