/// Notifications published by the acquisition controller
///
/// Notifications report what already happened. Observers cannot influence
/// the pipeline through them.
use crate::acquisition::SearchCycle;
use crate::payload::Payload;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The controller entered a new state
    StateChanged {
        from: &'static str,
        to: &'static str,
        cycle: SearchCycle,
    },

    /// A region was accepted and handed to the upload
    CandidateDispatched { cycle: SearchCycle, confidence: f32 },

    /// The service recognised a game
    GameRecognised { payload: Payload },

    /// A poll replaced the tracked payload
    PayloadUpdated { payload: Payload },

    UploadFailed { cycle: SearchCycle, reason: String },

    SessionFailed { reason: String },

    /// The controller has stopped
    Shutdown,
}

impl Notification {
    pub fn description(&self) -> &'static str {
        match self {
            Notification::StateChanged { .. } => "State changed",
            Notification::CandidateDispatched { .. } => "Candidate dispatched",
            Notification::GameRecognised { .. } => "Game recognised",
            Notification::PayloadUpdated { .. } => "Payload updated",
            Notification::UploadFailed { .. } => "Upload failed",
            Notification::SessionFailed { .. } => "Session failed",
            Notification::Shutdown => "Shutdown",
        }
    }
}
