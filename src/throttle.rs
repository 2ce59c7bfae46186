/// Frame throttler
///
/// Samples the injected frame source on a fixed cadence and forwards a frame
/// to the detection worker only when the gate is idle and no candidate of the
/// current search cycle is out. Skipped frames are dropped, never queued.
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::acquisition::SearchCycle;
use crate::capture::{Frame, FrameSource};
use crate::detection::{BusyPermit, DetectedRegion, DetectionGate};
use crate::error::DetectionError;

/// Called with the first accepted candidate of a cycle
pub type CandidateHandler = Arc<dyn Fn(SearchCycle, DetectedRegion) + Send + Sync>;

/// What happened to a frame handed to the throttler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    Forwarded,
    /// A pass is already running
    SkippedBusy,
    /// A candidate of this cycle is already out
    SkippedDispatched,
    /// The worker has shut down
    SkippedStopped,
}

struct DetectionJob {
    frame: Frame,
    permit: BusyPermit,
    cycle: SearchCycle,
}

struct Sampler {
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

#[derive(Clone)]
pub struct FrameThrottler {
    inner: Arc<ThrottlerInner>,
}

struct ThrottlerInner {
    gate: DetectionGate,
    cycle: Arc<AtomicU64>,
    job_tx: Mutex<Option<Sender<DetectionJob>>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    sampler: Mutex<Option<Sampler>>,
    forwarded: AtomicU64,
    skipped: AtomicU64,
}

impl FrameThrottler {
    /// Create the throttler and its detection worker thread
    pub fn new(gate: DetectionGate, on_candidate: CandidateHandler) -> io::Result<Self> {
        // Capacity one: a job is only sent while holding the gate's permit,
        // so the slot is always empty when a send happens.
        let (job_tx, job_rx) = bounded::<DetectionJob>(1);
        let cycle = Arc::new(AtomicU64::new(0));

        let worker = {
            let gate = gate.clone();
            let cycle = Arc::clone(&cycle);
            thread::Builder::new()
                .name("detection-worker".into())
                .spawn(move || run_detection_worker(gate, cycle, job_rx, on_candidate))?
        };

        Ok(Self {
            inner: Arc::new(ThrottlerInner {
                gate,
                cycle,
                job_tx: Mutex::new(Some(job_tx)),
                worker: Mutex::new(Some(worker)),
                sampler: Mutex::new(None),
                forwarded: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
            }),
        })
    }

    pub fn gate(&self) -> &DetectionGate {
        &self.inner.gate
    }

    /// Start a new search cycle: results of older cycles are ignored from now
    /// on and a new candidate may be dispatched.
    pub fn begin_cycle(&self, cycle: SearchCycle) {
        self.inner.cycle.store(cycle.0, Ordering::Release);
        self.inner.gate.reset_dispatch();
    }

    pub fn current_cycle(&self) -> SearchCycle {
        SearchCycle(self.inner.cycle.load(Ordering::Acquire))
    }

    /// Offer a frame for detection
    pub fn on_frame(&self, frame: Frame) -> FrameDisposition {
        let disposition = self.forward(frame);
        match disposition {
            FrameDisposition::Forwarded => self.inner.forwarded.fetch_add(1, Ordering::Relaxed),
            _ => self.inner.skipped.fetch_add(1, Ordering::Relaxed),
        };
        disposition
    }

    fn forward(&self, frame: Frame) -> FrameDisposition {
        if self.inner.gate.is_dispatched() {
            return FrameDisposition::SkippedDispatched;
        }

        let Some(permit) = self.inner.gate.try_acquire() else {
            return FrameDisposition::SkippedBusy;
        };

        let job = DetectionJob {
            frame,
            permit,
            cycle: self.current_cycle(),
        };

        let tx = self.inner.job_tx.lock();
        match tx.as_ref() {
            Some(tx) => match tx.try_send(job) {
                Ok(()) => FrameDisposition::Forwarded,
                // Unreachable while the permit protocol holds; the permit is
                // released with the returned job either way.
                Err(TrySendError::Full(_)) => FrameDisposition::SkippedBusy,
                Err(TrySendError::Disconnected(_)) => FrameDisposition::SkippedStopped,
            },
            None => FrameDisposition::SkippedStopped,
        }
    }

    /// Pull frames from `source` every `interval` until stopped
    pub fn start_sampling(&self, source: Arc<dyn FrameSource>, interval: Duration) -> io::Result<()> {
        let mut slot = self.inner.sampler.lock();
        if slot.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ticker = tick(interval);
        let throttler = self.clone();

        let handle = thread::Builder::new()
            .name("frame-sampler".into())
            .spawn(move || loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        if let Some(frame) = source.latest_frame() {
                            let disposition = throttler.on_frame(frame);
                            trace!("Frame {:?}", disposition);
                        }
                    }
                }
            })?;

        debug!("Frame sampling started ({} ms)", interval.as_millis());
        *slot = Some(Sampler { stop_tx, handle });
        Ok(())
    }

    /// Stop the sampling thread, if any, and wait for it
    pub fn stop_sampling(&self) {
        let sampler = self.inner.sampler.lock().take();
        if let Some(Sampler { stop_tx, handle }) = sampler {
            drop(stop_tx);
            let _ = handle.join();
            debug!("Frame sampling stopped");
        }
    }

    pub fn is_sampling(&self) -> bool {
        self.inner.sampler.lock().is_some()
    }

    /// Stop sampling and the detection worker
    pub fn shutdown(&self) {
        self.stop_sampling();
        self.inner.job_tx.lock().take();
        if let Some(handle) = self.inner.worker.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn forwarded(&self) -> u64 {
        self.inner.forwarded.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.inner.skipped.load(Ordering::Relaxed)
    }
}

fn run_detection_worker(
    gate: DetectionGate,
    cycle: Arc<AtomicU64>,
    jobs: Receiver<DetectionJob>,
    on_candidate: CandidateHandler,
) {
    debug!("Detection worker started ({})", gate.detector_name());

    while let Ok(job) = jobs.recv() {
        let DetectionJob { frame, permit, cycle: job_cycle } = job;

        match gate.run_pass(permit, &frame) {
            Ok(region) => {
                let current = SearchCycle(cycle.load(Ordering::Acquire));
                if job_cycle != current {
                    debug!("Dropping candidate from stale cycle {} (now {})", job_cycle, current);
                } else if gate.claim_dispatch() {
                    debug!(
                        "Candidate accepted (confidence {:.2}, frame {})",
                        region.confidence, region.frame_sequence
                    );
                    on_candidate(job_cycle, region);
                } else {
                    trace!("Candidate ignored, one is already dispatched");
                }
            }
            Err(DetectionError::NoRegionFound) => trace!("No region in frame {}", frame.sequence()),
            Err(err @ DetectionError::CorrectionFailed(_)) => warn!("Rectangle detection failed: {err}"),
            Err(err @ DetectionError::HandlerError(_)) => warn!("Rectangle detection failed: {err:#}"),
            Err(DetectionError::GateBusy) => debug!("Gate busy"),
        }
    }

    debug!("Detection worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::LatestFrameSlot;
    use crate::detection::{AcceptanceFilters, FullFrameDetector, Observation, RectangleDetector};
    use crossbeam_channel::unbounded;
    use image::RgbaImage;
    use std::time::Instant;

    /// Blocks each pass until released through a channel
    struct GatedDetector {
        release: Receiver<()>,
    }

    impl RectangleDetector for GatedDetector {
        fn detect(
            &self,
            frame: &Frame,
            filters: &AcceptanceFilters,
        ) -> Result<Vec<Observation>, Box<dyn std::error::Error + Send + Sync>> {
            let _ = self.release.recv_timeout(Duration::from_secs(2));
            FullFrameDetector::default().detect(frame, filters)
        }

        fn name(&self) -> &'static str {
            "GatedDetector"
        }
    }

    fn frame(sequence: u64) -> Frame {
        Frame::new(RgbaImage::new(32, 24), sequence)
    }

    fn collecting_handler() -> (CandidateHandler, Receiver<(SearchCycle, DetectedRegion)>) {
        let (tx, rx) = unbounded();
        let handler: CandidateHandler = Arc::new(move |cycle, region| {
            let _ = tx.send((cycle, region));
        });
        (handler, rx)
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_frames_skipped_while_busy() {
        let (release_tx, release_rx) = unbounded();
        let gate = DetectionGate::new(Arc::new(GatedDetector { release: release_rx }), AcceptanceFilters::default());
        let (handler, candidates) = collecting_handler();
        let throttler = FrameThrottler::new(gate, handler).unwrap();
        throttler.begin_cycle(SearchCycle(1));

        assert_eq!(throttler.on_frame(frame(0)), FrameDisposition::Forwarded);
        assert_eq!(throttler.on_frame(frame(1)), FrameDisposition::SkippedBusy);
        assert_eq!(throttler.on_frame(frame(2)), FrameDisposition::SkippedBusy);

        release_tx.send(()).unwrap();
        let (cycle, region) = candidates.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(cycle, SearchCycle(1));
        assert_eq!(region.frame_sequence, 0);

        assert!(wait_until(|| !throttler.gate().is_busy()));
        assert_eq!(throttler.on_frame(frame(3)), FrameDisposition::SkippedDispatched);
        assert_eq!(throttler.forwarded(), 1);
        assert_eq!(throttler.skipped(), 3);

        throttler.shutdown();
    }

    #[test]
    fn test_one_candidate_per_cycle() {
        let gate = DetectionGate::new(Arc::new(FullFrameDetector::default()), AcceptanceFilters::default());
        let (handler, candidates) = collecting_handler();
        let throttler = FrameThrottler::new(gate, handler).unwrap();
        throttler.begin_cycle(SearchCycle(1));

        for sequence in 0..50 {
            throttler.on_frame(frame(sequence));
            thread::sleep(Duration::from_millis(1));
        }

        assert!(candidates.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(candidates.recv_timeout(Duration::from_millis(100)).is_err());

        // A new cycle allows exactly one more
        throttler.begin_cycle(SearchCycle(2));
        assert!(wait_until(|| throttler.on_frame(frame(99)) == FrameDisposition::Forwarded));
        let (cycle, _) = candidates.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(cycle, SearchCycle(2));

        throttler.shutdown();
    }

    #[test]
    fn test_stale_cycle_candidate_dropped() {
        let (release_tx, release_rx) = unbounded();
        let gate = DetectionGate::new(Arc::new(GatedDetector { release: release_rx }), AcceptanceFilters::default());
        let (handler, candidates) = collecting_handler();
        let throttler = FrameThrottler::new(gate, handler).unwrap();
        throttler.begin_cycle(SearchCycle(1));

        assert_eq!(throttler.on_frame(frame(0)), FrameDisposition::Forwarded);
        throttler.begin_cycle(SearchCycle(2));
        release_tx.send(()).unwrap();

        assert!(candidates.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(wait_until(|| !throttler.gate().is_busy()));
        assert!(!throttler.gate().is_dispatched());

        throttler.shutdown();
    }

    #[test]
    fn test_sampling_pulls_from_source() {
        let gate = DetectionGate::new(Arc::new(FullFrameDetector::default()), AcceptanceFilters::default());
        let (handler, candidates) = collecting_handler();
        let throttler = FrameThrottler::new(gate, handler).unwrap();
        throttler.begin_cycle(SearchCycle(4));

        let source = Arc::new(LatestFrameSlot::new());
        source.publish(RgbaImage::new(40, 30));
        throttler
            .start_sampling(source.clone(), Duration::from_millis(5))
            .unwrap();
        assert!(throttler.is_sampling());

        let (cycle, region) = candidates.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(cycle, SearchCycle(4));
        assert_eq!(region.image.dimensions(), (40, 30));

        throttler.stop_sampling();
        assert!(!throttler.is_sampling());
        throttler.shutdown();
        assert_eq!(throttler.on_frame(frame(1)), FrameDisposition::SkippedDispatched);
    }
}
