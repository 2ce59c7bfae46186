/// Tracking watchdog
///
/// Armed when a region is handed to the renderer. Every update reporting the
/// anchor as still tracked pushes the deadline back by the grace period; if no
/// such update arrives in time the loss callback fires, once.
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::debug;

pub struct TrackingWatchdog {
    grace: Duration,
    armed: Mutex<Option<Armed>>,
}

struct Armed {
    reset_tx: Sender<()>,
    fired: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl TrackingWatchdog {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            armed: Mutex::new(None),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Start the countdown; a previous countdown is cancelled first
    pub fn arm<F>(&self, on_lost: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.disarm();

        let (reset_tx, reset_rx) = bounded::<()>(1);
        let fired = Arc::new(AtomicBool::new(false));
        let grace = self.grace;

        let handle = {
            let fired = Arc::clone(&fired);
            thread::Builder::new()
                .name("tracking-watchdog".into())
                .spawn(move || loop {
                    match reset_rx.recv_timeout(grace) {
                        Ok(()) => continue,
                        Err(RecvTimeoutError::Timeout) => {
                            fired.store(true, Ordering::Release);
                            debug!("No tracking update for {} ms", grace.as_millis());
                            on_lost();
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                })?
        };

        *self.armed.lock() = Some(Armed { reset_tx, fired, handle });
        Ok(())
    }

    /// Report an anchor update. Only a tracked anchor resets the countdown.
    pub fn anchor_updated(&self, tracked: bool) {
        if !tracked {
            return;
        }
        if let Some(armed) = self.armed.lock().as_ref() {
            // A full slot already means "reset pending"
            let _ = armed.reset_tx.try_send(());
        }
    }

    /// Cancel the countdown without firing
    pub fn disarm(&self) {
        let armed = self.armed.lock().take();
        if let Some(Armed { reset_tx, handle, .. }) = armed {
            drop(reset_tx);
            let _ = handle.join();
        }
    }

    /// Counting down and not yet fired
    pub fn is_armed(&self) -> bool {
        self.armed
            .lock()
            .as_ref()
            .map(|armed| !armed.fired.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

impl Drop for TrackingWatchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}
