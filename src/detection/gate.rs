/// Detection gate
///
/// Serializes detection passes: at most one pass runs at any time, and at
/// most one successful candidate per search cycle is handed upward.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use image::RgbaImage;

use super::detector::{Quad, RectangleDetector};
use super::filters::AcceptanceFilters;
use super::perspective::correct_perspective;
use crate::capture::Frame;
use crate::error::DetectionError;

/// A perspective-corrected screen region ready for upload
#[derive(Debug, Clone)]
pub struct DetectedRegion {
    /// Corners in normalized frame coordinates
    pub corners: Quad,
    pub confidence: f32,
    /// Cropped and rectified region content
    pub image: RgbaImage,
    /// Sequence number of the frame it was cut from
    pub frame_sequence: u64,
}

#[derive(Clone)]
pub struct DetectionGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    detector: Arc<dyn RectangleDetector>,
    filters: AcceptanceFilters,
    busy: AtomicBool,
    dispatched: AtomicBool,
    passes: AtomicU64,
}

/// Proof that the holder owns the gate's single slot.
///
/// Dropping the permit releases the gate, on every exit path.
pub struct BusyPermit {
    gate: DetectionGate,
}

impl Drop for BusyPermit {
    fn drop(&mut self) {
        self.gate.inner.busy.store(false, Ordering::Release);
    }
}

impl DetectionGate {
    pub fn new(detector: Arc<dyn RectangleDetector>, filters: AcceptanceFilters) -> Self {
        Self {
            inner: Arc::new(GateInner {
                detector,
                filters,
                busy: AtomicBool::new(false),
                dispatched: AtomicBool::new(false),
                passes: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Take the gate if it is idle
    pub fn try_acquire(&self) -> Option<BusyPermit> {
        self.inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyPermit { gate: self.clone() })
    }

    /// Run one pass if the gate is idle
    pub fn detect(&self, frame: &Frame) -> Result<DetectedRegion, DetectionError> {
        let permit = self.try_acquire().ok_or(DetectionError::GateBusy)?;
        self.run_pass(permit, frame)
    }

    /// Run one pass under an already acquired permit.
    ///
    /// The permit is consumed and released when the pass returns.
    pub fn run_pass(&self, permit: BusyPermit, frame: &Frame) -> Result<DetectedRegion, DetectionError> {
        debug_assert!(Arc::ptr_eq(&permit.gate.inner, &self.inner));
        let _permit = permit;

        self.inner.passes.fetch_add(1, Ordering::Relaxed);

        let observations = self
            .inner
            .detector
            .detect(frame, &self.inner.filters)
            .map_err(DetectionError::HandlerError)?;

        let candidate = self
            .inner
            .filters
            .select(observations, frame.width(), frame.height())
            .ok_or(DetectionError::NoRegionFound)?;

        let pixel_quad = candidate.corners.to_pixels(frame.width(), frame.height());
        let image = correct_perspective(frame.image(), &pixel_quad)
            .map_err(DetectionError::CorrectionFailed)?;

        Ok(DetectedRegion {
            corners: candidate.corners,
            confidence: candidate.confidence,
            image,
            frame_sequence: frame.sequence(),
        })
    }

    /// Claim the right to dispatch a candidate. Only the first caller after a
    /// reset wins.
    pub fn claim_dispatch(&self) -> bool {
        self.inner
            .dispatched
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_dispatched(&self) -> bool {
        self.inner.dispatched.load(Ordering::Acquire)
    }

    /// Allow a new candidate (new search cycle or failed upload)
    pub fn reset_dispatch(&self) {
        self.inner.dispatched.store(false, Ordering::Release);
    }

    /// Number of passes run so far
    pub fn passes(&self) -> u64 {
        self.inner.passes.load(Ordering::Relaxed)
    }

    pub fn detector_name(&self) -> &'static str {
        self.inner.detector.name()
    }
}
