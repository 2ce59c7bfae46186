//! Stats on Sight acquisition pipeline
//!
//! Finds a screen showing a live game in a camera feed, identifies the game
//! through the scoring service and keeps its score fresh while the screen
//! stays tracked.
//!
//! ```text
//! FrameSource ─► FrameThrottler ─► DetectionGate ─► ScoreService::upload
//!                                                          │
//!                          AcquisitionController ◄─────────┘
//!                                   │
//!                         PollingSession ─► Surfaces
//! ```

pub mod acquisition;
pub mod capture;
pub mod config;
pub mod detection;
pub mod error;
pub mod messaging;
pub mod payload;
pub mod polling;
pub mod surfaces;
pub mod throttle;
pub mod tracking;
pub mod upload;

pub use acquisition::{AcquisitionController, AcquisitionState, ControllerSettings, PipelineParts, SessionFailure};
pub use config::Config;
pub use payload::{Payload, Player, TeamPayload};
