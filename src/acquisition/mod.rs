/// Acquisition module
///
/// Orchestrates search, upload, tracking and failure.
///
/// ```text
///          start / retry / restart
///   Idle ─────────────┐
///                     ▼
///   ┌───────────► Searching ── candidate ──► AwaitingUploadResult
///   │                 ▲                         │          │
///   │  tracking lost  └─────────────────────────┘          │
///   │                                     success │         │ failure
///   │                                             ▼         ▼
///   └──────────── restart ─────────────── Tracking      Failed ── retry ──► Searching
/// ```

pub mod controller;
pub mod state;

// Re-export commonly used types
pub use controller::{AcquisitionController, ControllerSettings, PipelineParts};
pub use state::{
    AcquisitionState, AcquisitionStateMachine, Effect, SearchCycle, SessionFailure, TransitionError, SEARCH_MESSAGE,
};
