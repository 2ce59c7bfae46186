/// User-facing surfaces the pipeline drives
///
/// The renderer, message banner, loading spinner and retry button live outside
/// the crate. The controller only ever talks to them through these traits.
use std::sync::Arc;

use tracing::info;

use crate::detection::Quad;
use crate::payload::Payload;

pub trait OverlayRenderer: Send + Sync {
    /// Anchor a new overlay on the region (normalized frame coordinates)
    fn place_region(&self, corners: &Quad);

    /// Draw or refresh the game overlay
    fn show_payload(&self, payload: &Payload);

    fn clear(&self);
}

pub trait MessageSurface: Send + Sync {
    /// `auto_hide` messages disappear on their own after a few seconds
    fn show_message(&self, text: &str, auto_hide: bool);
}

pub trait LoadingIndicator: Send + Sync {
    fn start(&self);
    fn stop(&self);
}

pub trait RetryAffordance: Send + Sync {
    fn show(&self);
    fn hide(&self);
}

/// How long an auto-hiding message stays up
pub const MESSAGE_AUTO_HIDE_SECS: u64 = 5;

/// Every surface the controller needs
#[derive(Clone)]
pub struct Surfaces {
    pub overlay: Arc<dyn OverlayRenderer>,
    pub messages: Arc<dyn MessageSurface>,
    pub loading: Arc<dyn LoadingIndicator>,
    pub retry: Arc<dyn RetryAffordance>,
}

impl Surfaces {
    /// Surfaces that write to the log, for headless runs
    pub fn logging() -> Self {
        let surface = Arc::new(LogSurface);
        Self {
            overlay: surface.clone(),
            messages: surface.clone(),
            loading: surface.clone(),
            retry: surface,
        }
    }
}

/// Logs every surface call at info level
pub struct LogSurface;

impl OverlayRenderer for LogSurface {
    fn place_region(&self, corners: &Quad) {
        info!(
            "[overlay] Region at ({:.2}, {:.2}) - ({:.2}, {:.2})",
            corners.top_left.x, corners.top_left.y, corners.bottom_right.x, corners.bottom_right.y
        );
    }

    fn show_payload(&self, payload: &Payload) {
        let players = payload.home_team.on_ice.len() + payload.away_team.on_ice.len();
        info!("[overlay] {} ({} players on ice)", payload.score_line(), players);
    }

    fn clear(&self) {
        info!("[overlay] Cleared");
    }
}

impl MessageSurface for LogSurface {
    fn show_message(&self, text: &str, auto_hide: bool) {
        if auto_hide {
            info!("[message] {} (hides after {}s)", text, MESSAGE_AUTO_HIDE_SECS);
        } else {
            info!("[message] {}", text);
        }
    }
}

impl LoadingIndicator for LogSurface {
    fn start(&self) {
        info!("[loading] Started");
    }

    fn stop(&self) {
        info!("[loading] Stopped");
    }
}

impl RetryAffordance for LogSurface {
    fn show(&self) {
        info!("[retry] Type 'retry' to search again");
    }

    fn hide(&self) {}
}
