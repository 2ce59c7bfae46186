/// Commands for the acquisition controller
///
/// Everything that can change the controller's state arrives as a command on
/// its single channel: user actions, session callbacks and worker results.
use crate::acquisition::{SearchCycle, SessionFailure};
use crate::detection::DetectedRegion;
use crate::error::UploadError;
use crate::payload::Payload;

#[derive(Debug)]
pub enum Command {
    /// Begin (or restart) searching for a screen
    StartSearch,

    /// User tapped retry
    Retry,

    /// The detection worker accepted a region
    CandidateFound { cycle: SearchCycle, region: DetectedRegion },

    /// An upload finished
    UploadFinished {
        cycle: SearchCycle,
        result: Result<Payload, UploadError>,
    },

    /// The polling session applied a fresh payload
    PollUpdated { cycle: SearchCycle, payload: Payload },

    /// The tracked anchor was lost
    TrackingLost,

    /// The tracking watchdog armed in `cycle` ran out
    WatchdogExpired { cycle: SearchCycle },

    /// The AR session reported an error
    SessionFailed(SessionFailure),

    /// Stop every worker and exit the controller thread
    Shutdown,
}

impl Command {
    pub fn description(&self) -> &'static str {
        match self {
            Command::StartSearch => "Start search",
            Command::Retry => "Retry",
            Command::CandidateFound { .. } => "Candidate found",
            Command::UploadFinished { .. } => "Upload finished",
            Command::PollUpdated { .. } => "Poll updated",
            Command::TrackingLost => "Tracking lost",
            Command::WatchdogExpired { .. } => "Watchdog expired",
            Command::SessionFailed(_) => "Session failed",
            Command::Shutdown => "Shutdown",
        }
    }
}
