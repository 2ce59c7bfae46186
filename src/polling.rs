/// Polling session
///
/// Keeps a tracked game fresh: one fetch right away, then one per interval,
/// each on its own short-lived thread so a slow response never delays the
/// cadence. Responses are stamped with the sequence number of their tick and
/// only a response newer than the last applied one is delivered.
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::payload::Payload;
use crate::upload::ScoreService;

/// Receives every applied payload, in issue order
pub type UpdateHandler = Arc<dyn Fn(Payload) + Send + Sync>;

pub struct PollingSession {
    shared: Arc<PollShared>,
    stop_tx: Option<Sender<()>>,
    timer: Option<thread::JoinHandle<()>>,
}

struct PollShared {
    game_id: String,
    service: Arc<dyn ScoreService>,
    on_update: UpdateHandler,
    active: AtomicBool,
    issued: AtomicU64,
    /// Sequence number of the last applied response
    applied: Mutex<u64>,
    latest: Mutex<Option<Payload>>,
}

impl PollingSession {
    pub fn start(
        service: Arc<dyn ScoreService>,
        game_id: impl Into<String>,
        interval: Duration,
        on_update: UpdateHandler,
    ) -> io::Result<Self> {
        let shared = Arc::new(PollShared {
            game_id: game_id.into(),
            service,
            on_update,
            active: AtomicBool::new(true),
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
            latest: Mutex::new(None),
        });

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let timer = {
            let shared = Arc::clone(&shared);
            thread::Builder::new().name("poll-timer".into()).spawn(move || {
                let ticker = tick(interval);
                shared.issue();
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => shared.issue(),
                    }
                }
            })?
        };

        debug!("Polling game {} every {} ms", shared.game_id, interval.as_millis());

        Ok(Self {
            shared,
            stop_tx: Some(stop_tx),
            timer: Some(timer),
        })
    }

    pub fn game_id(&self) -> &str {
        &self.shared.game_id
    }

    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Most recently applied payload
    pub fn latest(&self) -> Option<Payload> {
        self.shared.latest.lock().clone()
    }

    /// Number of fetches issued so far
    pub fn issued(&self) -> u64 {
        self.shared.issued.load(Ordering::Relaxed)
    }

    /// Stop the timer. In-flight responses are discarded; once this returns no
    /// further update is delivered.
    pub fn stop(&mut self) {
        if self.shared.active.swap(false, Ordering::AcqRel) {
            debug!("Polling of game {} stopped", self.shared.game_id);
        }
        // Wait out a delivery that is already running
        drop(self.shared.applied.lock());

        self.stop_tx.take();
        if let Some(timer) = self.timer.take() {
            let _ = timer.join();
        }
    }
}

impl Drop for PollingSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PollShared {
    fn issue(self: &Arc<Self>) {
        if !self.active.load(Ordering::Acquire) {
            return;
        }

        let sequence = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("poll-fetch".into())
            .spawn(move || match shared.service.fetch_game(&shared.game_id) {
                Ok(payload) => shared.apply(sequence, payload),
                Err(err) => debug!("Poll #{} for game {} skipped: {}", sequence, shared.game_id, err),
            });

        if let Err(err) = spawned {
            warn!("Failed to spawn poll fetch: {}", err);
        }
    }

    fn apply(&self, sequence: u64, payload: Payload) {
        let mut applied = self.applied.lock();
        if !self.active.load(Ordering::Acquire) {
            debug!("Poll #{} discarded, session stopped", sequence);
            return;
        }
        if sequence <= *applied {
            debug!("Poll #{} discarded, #{} already applied", sequence, *applied);
            return;
        }

        *applied = sequence;
        *self.latest.lock() = Some(payload.clone());
        (self.on_update)(payload);
    }
}
