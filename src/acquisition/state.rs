/// Acquisition state machine
///
/// Pure transition logic: every event either returns the effects the
/// controller has to carry out, or a `TransitionError` when it does not apply
/// to the current state. Nothing here touches threads or I/O.
use std::fmt;

use crate::detection::{DetectedRegion, Quad};
use crate::payload::Payload;

pub const SEARCH_MESSAGE: &str = "Place Camera at a Live Game";
pub const SESSION_FAILED_TITLE: &str = "The AR session failed.";

/// Identifier of one search. Results carry the cycle they were issued in and
/// are dropped once a newer cycle has started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SearchCycle(pub u64);

impl SearchCycle {
    pub fn next(self) -> Self {
        SearchCycle(self.0 + 1)
    }
}

impl fmt::Display for SearchCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AcquisitionState {
    /// Nothing started yet
    #[default]
    Idle,

    /// Sampling frames for a screen
    Searching,

    /// A region is being uploaded
    AwaitingUploadResult,

    /// A game is loaded and kept fresh by polling
    Tracking(Payload),

    /// Waiting for the user to retry
    Failed { reason: String },
}

impl AcquisitionState {
    pub fn is_searching(&self) -> bool {
        matches!(self, AcquisitionState::Searching)
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self, AcquisitionState::Tracking(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, AcquisitionState::Failed { .. })
    }

    /// Payload held while tracking
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            AcquisitionState::Tracking(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            AcquisitionState::Idle => "Idle",
            AcquisitionState::Searching => "Searching",
            AcquisitionState::AwaitingUploadResult => "Awaiting upload result",
            AcquisitionState::Tracking(_) => "Tracking",
            AcquisitionState::Failed { .. } => "Failed",
        }
    }
}

/// Why the AR session failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    /// The detected rectangle cannot be tracked; search again quietly
    InvalidReferenceImage,
    /// Anything else, shown to the user
    Other(String),
}

/// Work the controller performs after a transition, in order
#[derive(Debug, Clone)]
pub enum Effect {
    StopPolling,
    ClearOverlay,
    HideRetry,
    ShowRetry,
    /// Start a new cycle and allow one candidate for it
    BeginCycle(SearchCycle),
    /// Allow another candidate in the current cycle
    ResetDispatch,
    ShowMessage { text: String, auto_hide: bool },
    StartSampling,
    StopSampling,
    StartLoading,
    StopLoading,
    PlaceRegion(Quad),
    /// Count down tracking loss for the region placed in this cycle
    ArmWatchdog(SearchCycle),
    DisarmWatchdog,
    Upload { cycle: SearchCycle, region: DetectedRegion },
    RenderPayload(Payload),
    StartPolling { cycle: SearchCycle, game_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The event belongs to an older search cycle
    StaleCycle { event: SearchCycle, current: SearchCycle },

    /// The event has no meaning in the current state
    NotApplicable { event: &'static str, state: &'static str },
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionError::StaleCycle { event, current } => {
                write!(f, "Event from cycle {} ignored, current cycle is {}", event, current)
            }
            TransitionError::NotApplicable { event, state } => {
                write!(f, "{} ignored while {}", event, state)
            }
        }
    }
}

impl std::error::Error for TransitionError {}

pub struct AcquisitionStateMachine {
    state: AcquisitionState,
    cycle: SearchCycle,
}

impl AcquisitionStateMachine {
    pub fn new() -> Self {
        Self {
            state: AcquisitionState::Idle,
            cycle: SearchCycle::default(),
        }
    }

    pub fn state(&self) -> &AcquisitionState {
        &self.state
    }

    pub fn cycle(&self) -> SearchCycle {
        self.cycle
    }

    /// (Re)start the search from any state: launch, session restart
    pub fn start_search(&mut self) -> Vec<Effect> {
        self.cycle = self.cycle.next();
        self.state = AcquisitionState::Searching;

        vec![
            Effect::StopPolling,
            Effect::StopLoading,
            Effect::DisarmWatchdog,
            Effect::ClearOverlay,
            Effect::HideRetry,
            Effect::BeginCycle(self.cycle),
            Effect::ShowMessage {
                text: SEARCH_MESSAGE.to_string(),
                auto_hide: false,
            },
            Effect::StartSampling,
        ]
    }

    /// User asked to try again after a failure
    pub fn retry(&mut self) -> Result<Vec<Effect>, TransitionError> {
        match self.state {
            AcquisitionState::Failed { .. } => Ok(self.start_search()),
            _ => Err(self.not_applicable("Retry")),
        }
    }

    /// First accepted region of a cycle
    pub fn candidate_found(&mut self, cycle: SearchCycle, region: DetectedRegion) -> Result<Vec<Effect>, TransitionError> {
        self.check_cycle(cycle)?;
        if !self.state.is_searching() {
            return Err(self.not_applicable("Candidate"));
        }

        self.state = AcquisitionState::AwaitingUploadResult;
        Ok(vec![
            Effect::StopSampling,
            Effect::StartLoading,
            Effect::PlaceRegion(region.corners),
            Effect::ArmWatchdog(cycle),
            Effect::Upload { cycle, region },
        ])
    }

    pub fn upload_succeeded(&mut self, cycle: SearchCycle, payload: Payload) -> Result<Vec<Effect>, TransitionError> {
        self.check_cycle(cycle)?;
        if self.state != AcquisitionState::AwaitingUploadResult {
            return Err(self.not_applicable("Upload result"));
        }

        let mut effects = vec![
            Effect::StopLoading,
            Effect::DisarmWatchdog,
            Effect::ShowMessage {
                text: payload.following_message(),
                auto_hide: true,
            },
            Effect::RenderPayload(payload.clone()),
        ];
        // Without an embedded id there is nothing the service could be asked for
        if let Some(game_id) = payload.game_key() {
            effects.push(Effect::StartPolling {
                cycle,
                game_id: game_id.to_string(),
            });
        }

        self.state = AcquisitionState::Tracking(payload);
        Ok(effects)
    }

    pub fn upload_failed(&mut self, cycle: SearchCycle, reason: String) -> Result<Vec<Effect>, TransitionError> {
        self.check_cycle(cycle)?;
        if self.state != AcquisitionState::AwaitingUploadResult {
            return Err(self.not_applicable("Upload failure"));
        }

        self.state = AcquisitionState::Failed { reason: reason.clone() };
        Ok(vec![
            Effect::StopLoading,
            Effect::DisarmWatchdog,
            Effect::ResetDispatch,
            Effect::ShowRetry,
            Effect::ShowMessage {
                text: reason,
                auto_hide: false,
            },
        ])
    }

    /// The tracked anchor went away. Once a game has loaded this is ignored.
    pub fn tracking_lost(&mut self) -> Result<Vec<Effect>, TransitionError> {
        match self.state {
            AcquisitionState::Searching | AcquisitionState::AwaitingUploadResult => Ok(self.start_search()),
            _ => Err(self.not_applicable("Tracking loss")),
        }
    }

    /// The watchdog armed in `cycle` ran out. Ignored once that cycle is over.
    pub fn watchdog_expired(&mut self, cycle: SearchCycle) -> Result<Vec<Effect>, TransitionError> {
        self.check_cycle(cycle)?;
        self.tracking_lost()
    }

    /// Fresh game state from the polling session
    pub fn poll_updated(&mut self, cycle: SearchCycle, payload: Payload) -> Result<Vec<Effect>, TransitionError> {
        self.check_cycle(cycle)?;
        if !self.state.is_tracking() {
            return Err(self.not_applicable("Poll update"));
        }

        self.state = AcquisitionState::Tracking(payload.clone());
        Ok(vec![Effect::RenderPayload(payload)])
    }

    pub fn session_failed(&mut self, failure: SessionFailure) -> Vec<Effect> {
        match failure {
            SessionFailure::InvalidReferenceImage => self.start_search(),
            SessionFailure::Other(message) => {
                let text = format!("{}\n{}", SESSION_FAILED_TITLE, message);
                self.state = AcquisitionState::Failed { reason: message };
                vec![
                    Effect::StopSampling,
                    Effect::StopPolling,
                    Effect::StopLoading,
                    Effect::DisarmWatchdog,
                    Effect::ResetDispatch,
                    Effect::ShowRetry,
                    Effect::ShowMessage { text, auto_hide: false },
                ]
            }
        }
    }

    fn check_cycle(&self, cycle: SearchCycle) -> Result<(), TransitionError> {
        if cycle == self.cycle {
            Ok(())
        } else {
            Err(TransitionError::StaleCycle {
                event: cycle,
                current: self.cycle,
            })
        }
    }

    fn not_applicable(&self, event: &'static str) -> TransitionError {
        TransitionError::NotApplicable {
            event,
            state: self.state.description(),
        }
    }
}

impl Default for AcquisitionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::TeamPayload;
    use image::RgbaImage;

    fn region() -> DetectedRegion {
        DetectedRegion {
            corners: Quad::unit(),
            confidence: 0.98,
            image: RgbaImage::new(4, 4),
            frame_sequence: 1,
        }
    }

    fn payload(game_id: Option<&str>) -> Payload {
        Payload {
            home_team: TeamPayload {
                name: "Leafs".into(),
                abbreviation: "TOR".into(),
                goals: 3,
                on_ice: Vec::new(),
            },
            away_team: TeamPayload {
                name: "Bruins".into(),
                abbreviation: "BOS".into(),
                goals: 2,
                on_ice: Vec::new(),
            },
            game_id: game_id.map(str::to_string),
        }
    }

    fn searching() -> AcquisitionStateMachine {
        let mut sm = AcquisitionStateMachine::new();
        sm.start_search();
        sm
    }

    #[test]
    fn test_start_search_begins_new_cycle() {
        let mut sm = AcquisitionStateMachine::new();
        assert_eq!(sm.state(), &AcquisitionState::Idle);

        let effects = sm.start_search();
        assert!(sm.state().is_searching());
        assert_eq!(sm.cycle(), SearchCycle(1));
        assert!(matches!(effects.first(), Some(Effect::StopPolling)));
        assert!(matches!(effects.last(), Some(Effect::StartSampling)));
        assert!(effects.iter().any(|e| matches!(e, Effect::BeginCycle(SearchCycle(1)))));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::ShowMessage { text, auto_hide: false } if text == SEARCH_MESSAGE
        )));

        sm.start_search();
        assert_eq!(sm.cycle(), SearchCycle(2));
    }

    #[test]
    fn test_candidate_moves_to_upload() {
        let mut sm = searching();
        let effects = sm.candidate_found(SearchCycle(1), region()).unwrap();

        assert_eq!(sm.state(), &AcquisitionState::AwaitingUploadResult);
        assert!(matches!(effects[0], Effect::StopSampling));
        assert!(matches!(effects.last(), Some(Effect::Upload { cycle: SearchCycle(1), .. })));
    }

    #[test]
    fn test_duplicate_and_stale_candidates_rejected() {
        let mut sm = searching();
        sm.candidate_found(SearchCycle(1), region()).unwrap();

        assert!(matches!(
            sm.candidate_found(SearchCycle(1), region()),
            Err(TransitionError::NotApplicable { .. })
        ));

        sm.start_search();
        assert_eq!(
            sm.candidate_found(SearchCycle(1), region()).unwrap_err(),
            TransitionError::StaleCycle {
                event: SearchCycle(1),
                current: SearchCycle(2)
            }
        );
    }

    #[test]
    fn test_upload_success_starts_tracking_and_polling() {
        let mut sm = searching();
        sm.candidate_found(SearchCycle(1), region()).unwrap();

        let effects = sm.upload_succeeded(SearchCycle(1), payload(Some("2017020001"))).unwrap();
        assert!(sm.state().is_tracking());
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::ShowMessage { text, auto_hide: true } if text == "Now following Bruins vs. Leafs"
        )));
        assert!(matches!(
            effects.last(),
            Some(Effect::StartPolling { game_id, .. }) if game_id == "2017020001"
        ));
    }

    #[test]
    fn test_no_polling_without_game_id() {
        let mut sm = searching();
        sm.candidate_found(SearchCycle(1), region()).unwrap();

        let effects = sm.upload_succeeded(SearchCycle(1), payload(None)).unwrap();
        assert!(sm.state().is_tracking());
        assert!(effects.iter().any(|e| matches!(e, Effect::RenderPayload(_))));
        assert!(!effects.iter().any(|e| matches!(e, Effect::StartPolling { .. })));
    }

    #[test]
    fn test_upload_failure_waits_for_retry() {
        let mut sm = searching();
        sm.candidate_found(SearchCycle(1), region()).unwrap();

        let effects = sm.upload_failed(SearchCycle(1), "Upload timed out".into()).unwrap();
        assert!(sm.state().is_failed());
        assert!(effects.iter().any(|e| matches!(e, Effect::ShowRetry)));
        assert!(effects.iter().any(|e| matches!(e, Effect::ResetDispatch)));
        assert!(!effects.iter().any(|e| matches!(e, Effect::StartSampling | Effect::StartPolling { .. })));

        sm.retry().unwrap();
        assert!(sm.state().is_searching());
        assert_eq!(sm.cycle(), SearchCycle(2));
        assert!(sm.retry().is_err());
    }

    #[test]
    fn test_late_upload_result_ignored() {
        let mut sm = searching();
        sm.candidate_found(SearchCycle(1), region()).unwrap();
        sm.tracking_lost().unwrap();

        assert!(matches!(
            sm.upload_succeeded(SearchCycle(1), payload(None)),
            Err(TransitionError::StaleCycle { .. })
        ));
        assert!(sm.state().is_searching());
    }

    #[test]
    fn test_tracking_lost_rules() {
        let mut sm = searching();
        sm.tracking_lost().unwrap();
        assert_eq!(sm.cycle(), SearchCycle(2));

        sm.candidate_found(SearchCycle(2), region()).unwrap();
        sm.tracking_lost().unwrap();
        assert!(sm.state().is_searching());
        assert_eq!(sm.cycle(), SearchCycle(3));

        sm.candidate_found(SearchCycle(3), region()).unwrap();
        sm.upload_succeeded(SearchCycle(3), payload(None)).unwrap();
        assert!(sm.tracking_lost().is_err());
        assert!(sm.state().is_tracking());

        let mut idle = AcquisitionStateMachine::new();
        assert!(idle.tracking_lost().is_err());
    }

    #[test]
    fn test_watchdog_expiry_bound_to_its_cycle() {
        let mut sm = searching();
        let effects = sm.candidate_found(SearchCycle(1), region()).unwrap();
        assert!(effects.iter().any(|e| matches!(e, Effect::ArmWatchdog(SearchCycle(1)))));

        // Expiry already queued when the upload failed and the user retried
        sm.upload_failed(SearchCycle(1), "Upload timed out".into()).unwrap();
        sm.retry().unwrap();
        assert_eq!(
            sm.watchdog_expired(SearchCycle(1)).unwrap_err(),
            TransitionError::StaleCycle {
                event: SearchCycle(1),
                current: SearchCycle(2)
            }
        );
        assert!(sm.state().is_searching());
        assert_eq!(sm.cycle(), SearchCycle(2));

        // An expiry of the current cycle still restarts the search
        sm.candidate_found(SearchCycle(2), region()).unwrap();
        sm.watchdog_expired(SearchCycle(2)).unwrap();
        assert!(sm.state().is_searching());
        assert_eq!(sm.cycle(), SearchCycle(3));
    }

    #[test]
    fn test_poll_update_replaces_payload() {
        let mut sm = searching();
        sm.candidate_found(SearchCycle(1), region()).unwrap();
        sm.upload_succeeded(SearchCycle(1), payload(Some("7"))).unwrap();

        let mut fresh = payload(Some("7"));
        fresh.home_team.goals = 4;
        sm.poll_updated(SearchCycle(1), fresh.clone()).unwrap();
        assert_eq!(sm.state().payload(), Some(&fresh));

        sm.start_search();
        assert!(sm.poll_updated(SearchCycle(1), fresh).is_err());
        assert!(sm.state().payload().is_none());
    }

    #[test]
    fn test_session_failure_routing() {
        let mut sm = searching();
        sm.session_failed(SessionFailure::InvalidReferenceImage);
        assert!(sm.state().is_searching());
        assert_eq!(sm.cycle(), SearchCycle(2));

        let effects = sm.session_failed(SessionFailure::Other("Camera unavailable".into()));
        assert_eq!(
            sm.state(),
            &AcquisitionState::Failed {
                reason: "Camera unavailable".into()
            }
        );
        assert!(effects.iter().any(|e| matches!(e, Effect::ShowRetry)));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::ShowMessage { text, .. } if text == "The AR session failed.\nCamera unavailable"
        )));
    }
}
