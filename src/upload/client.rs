use std::io;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbaImage};
use tracing::{debug, error, info};

use super::multipart::{unique_filename, MultipartForm};
use crate::config::Config;
use crate::detection::DetectedRegion;
use crate::error::{PollError, UploadError};
use crate::payload::Payload;

/// The remote scoring service
///
/// One attempt per call, no retries: callers decide what a failure means.
pub trait ScoreService: Send + Sync {
    /// Upload a corrected region and decode the game it shows
    fn upload(&self, region: &DetectedRegion) -> Result<Payload, UploadError>;

    /// Fetch the current state of a game
    fn fetch_game(&self, game_id: &str) -> Result<Payload, PollError>;
}

/// `ScoreService` over HTTP
pub struct HttpScoreService {
    agent: ureq::Agent,
    base_url: String,
    timeout: Duration,
    jpeg_quality: u8,
}

impl HttpScoreService {
    pub fn new(base_url: impl Into<String>, timeout: Duration, jpeg_quality: u8) -> Self {
        let user_agent = format!("StatsOnSight/{}", env!("CARGO_PKG_VERSION"));
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(&user_agent)
            .build();

        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.service_base_url, config.request_timeout(), config.jpeg_quality)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

impl ScoreService for HttpScoreService {
    fn upload(&self, region: &DetectedRegion) -> Result<Payload, UploadError> {
        let jpeg = encode_jpeg(&region.image, self.jpeg_quality).map_err(UploadError::EncodeError)?;

        let mut form = MultipartForm::new();
        form.add_file("file", &unique_filename(), "image/jpeg", &jpeg);
        let content_type = form.content_type();
        let body = form.finish();

        let url = self.endpoint("upload");
        info!("Uploading region {}x{} ({} bytes) to {}", region.image.width(), region.image.height(), body.len(), url);

        let response = self
            .agent
            .post(&url)
            .set("Content-Type", &content_type)
            .send_bytes(&body)
            .map_err(|err| match err {
                ureq::Error::Status(code, response) => {
                    UploadError::NetworkError(format!("server returned {} {}", code, response.status_text()))
                }
                ureq::Error::Transport(transport) if is_timeout(&transport) => UploadError::Timeout(self.timeout_ms()),
                ureq::Error::Transport(transport) => UploadError::NetworkError(transport.to_string()),
            })?;

        let text = response.into_string().map_err(|err| {
            if is_timeout(&err) {
                UploadError::Timeout(self.timeout_ms())
            } else {
                UploadError::NetworkError(format!("failed to read response: {}", err))
            }
        })?;

        Payload::from_json(text.as_bytes()).map_err(|err| {
            error!("Upload response is not a game payload: {}", err);
            UploadError::DecodeError(err)
        })
    }

    fn fetch_game(&self, game_id: &str) -> Result<Payload, PollError> {
        let url = self.endpoint("game");
        debug!("Fetching game {} from {}", game_id, url);

        let response = self
            .agent
            .get(&url)
            .query("gameId", game_id)
            .call()
            .map_err(|err| match err {
                ureq::Error::Status(code, response) => {
                    PollError::NoData(format!("server returned {} {}", code, response.status_text()))
                }
                ureq::Error::Transport(transport) => PollError::NoData(transport.to_string()),
            })?;

        let text = response
            .into_string()
            .map_err(|err| PollError::NoData(format!("failed to read response: {}", err)))?;
        if text.trim().is_empty() {
            return Err(PollError::NoData("empty response".into()));
        }

        Payload::from_json(text.as_bytes()).map_err(PollError::DecodeError)
    }
}

/// JPEG-encode a region; alpha is dropped
pub fn encode_jpeg(image: &RgbaImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = DynamicImage::ImageRgba8(image.clone()).into_rgb8();
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality).encode_image(&rgb)?;
    Ok(bytes)
}

/// Whether an error, or anything in its source chain, is an I/O timeout
fn is_timeout(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if matches!(io_err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                return true;
            }
        }
        current = err.source();
    }
    err.to_string().contains("timed out")
}
