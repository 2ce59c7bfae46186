/// Detection module
///
/// Turns camera frames into upload candidates.
///
/// ## Architecture
///
/// ```text
/// DetectionGate (one pass at a time)
///   ├── RectangleDetector (external capability)
///   │     └── FullFrameDetector
///   ├── AcceptanceFilters (confidence, aspect ratio, skew, one per frame)
///   └── Perspective correction (quad -> rectified image)
/// ```
///
/// ## Usage
///
/// ```rust,ignore
/// use stats_on_sight::detection::{AcceptanceFilters, DetectionGate, FullFrameDetector};
///
/// let gate = DetectionGate::new(Arc::new(FullFrameDetector::default()), AcceptanceFilters::default());
///
/// match gate.detect(&frame) {
///     Ok(region) if gate.claim_dispatch() => upload(region),
///     Ok(_) => { /* a candidate is already out */ }
///     Err(err) => tracing::debug!("no candidate: {err}"),
/// }
/// ```

pub mod detector;
pub mod filters;
pub mod gate;
pub mod perspective;

// Re-export commonly used types
pub use detector::{FullFrameDetector, Observation, Point, Quad, RectangleDetector};
pub use filters::{AcceptanceFilters, Rejection};
pub use gate::{BusyPermit, DetectedRegion, DetectionGate};
pub use perspective::correct_perspective;
