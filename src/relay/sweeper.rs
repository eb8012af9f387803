//! # Background Sweep Task
//!
//! A named thread that runs a maintenance closure at a fixed interval until
//! told to stop. Both the entry store and the access limiter own one.
//!
//! ```text
//!     start() ──► spawn ──┐
//!                         ▼
//!               ┌──► recv_timeout(interval) ──┐
//!               │         │                   │
//!               │     Timeout             Stop / Disconnected
//!               │         │                   │
//!               └── task(&owner)              ▼
//!                                           exit
//! ```
//!
//! The thread holds only a `Weak` reference to its owner, so dropping the
//! owner ends the loop even if `stop()` was never called.

use parking_lot::Mutex;
use std::io;
use std::sync::{mpsc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

struct Running {
    stop_tx: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// Idempotent start/stop wrapper around a periodic thread.
pub(crate) struct Sweeper {
    name: &'static str,
    running: Mutex<Option<Running>>,
}

impl Sweeper {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(None),
        }
    }

    /// Starts the thread unless it is already running.
    ///
    /// Returns `Ok(true)` if a thread was spawned, `Ok(false)` if one was
    /// already running.
    pub(crate) fn start<T, F>(&self, interval: Duration, owner: Weak<T>, task: F) -> io::Result<bool>
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + 'static,
    {
        let mut running = self.running.lock();
        if running.is_some() {
            debug!("{} already running", self.name);
            return Ok(false);
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let name = self.name;

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                info!("Started {} (interval: {}ms)", name, interval.as_millis());

                loop {
                    match stop_rx.recv_timeout(interval) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => match owner.upgrade() {
                            Some(owner) => task(&owner),
                            None => break,
                        },
                    }
                }

                info!("{} stopping", name);
            })?;

        *running = Some(Running { stop_tx, handle });
        Ok(true)
    }

    /// Signals the thread and waits for it to exit.
    ///
    /// Returns `false` if nothing was running.
    pub(crate) fn stop(&self) -> bool {
        let running = self.running.lock().take();

        match running {
            Some(Running { stop_tx, handle }) => {
                let _ = stop_tx.send(());
                // The owner can be dropped from inside its own sweep tick
                if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                    warn!("{} panicked before shutdown", self.name);
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Sweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sweeper")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}
