/// Acceptance filters for detected rectangles
///
/// A rectangle has to pass every filter to become an upload candidate, and
/// only the best observation of a frame is ever considered.
use serde::{Deserialize, Serialize};

use super::detector::Observation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceptanceFilters {
    /// Minimum detector confidence (0.0-1.0)
    pub min_confidence: f32,
    /// Minimum short-side / long-side ratio
    pub min_aspect_ratio: f32,
    /// Maximum short-side / long-side ratio
    pub max_aspect_ratio: f32,
    /// Maximum deviation of any corner from 90 degrees
    pub quadrature_tolerance_deg: f32,
    /// Number of observations considered per frame
    pub max_observations: usize,
}

impl Default for AcceptanceFilters {
    fn default() -> Self {
        Self {
            min_confidence: 0.95,
            min_aspect_ratio: 0.5,
            max_aspect_ratio: 1.0,
            quadrature_tolerance_deg: 10.0,
            max_observations: 1,
        }
    }
}

/// Why an observation was rejected
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    OutOfFrame,
    LowConfidence(f32),
    AspectRatio(f32),
    Skewed(f32),
}

impl AcceptanceFilters {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(format!("min_confidence {} (must be 0.0-1.0)", self.min_confidence));
        }
        if !(0.0..=1.0).contains(&self.min_aspect_ratio)
            || !(0.0..=1.0).contains(&self.max_aspect_ratio)
            || self.min_aspect_ratio > self.max_aspect_ratio
        {
            return Err(format!(
                "aspect ratio band [{}, {}] (must be ordered within 0.0-1.0)",
                self.min_aspect_ratio, self.max_aspect_ratio
            ));
        }
        if !(0.0..=90.0).contains(&self.quadrature_tolerance_deg) {
            return Err(format!(
                "quadrature_tolerance_deg {} (must be 0-90)",
                self.quadrature_tolerance_deg
            ));
        }
        if self.max_observations == 0 {
            return Err("max_observations must be at least 1".into());
        }
        Ok(())
    }

    /// Check a single observation against every filter.
    ///
    /// Geometry is measured in pixels so that non-square frames do not bend
    /// the aspect ratio.
    pub fn evaluate(&self, observation: &Observation, width: u32, height: u32) -> Result<(), Rejection> {
        if !observation.corners.is_normalized() {
            return Err(Rejection::OutOfFrame);
        }
        if observation.confidence < self.min_confidence {
            return Err(Rejection::LowConfidence(observation.confidence));
        }

        let quad = observation.corners.to_pixels(width, height);
        let ratio = quad.aspect_ratio();
        if ratio < self.min_aspect_ratio || ratio > self.max_aspect_ratio {
            return Err(Rejection::AspectRatio(ratio));
        }

        let skew = quad.quadrature_deviation_deg();
        if skew > self.quadrature_tolerance_deg {
            return Err(Rejection::Skewed(skew));
        }

        Ok(())
    }

    /// Pick the candidate of a frame: the most confident observations (up to
    /// `max_observations`) are tried in order and the first that passes wins.
    pub fn select(&self, mut observations: Vec<Observation>, width: u32, height: u32) -> Option<Observation> {
        observations.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        observations
            .into_iter()
            .take(self.max_observations)
            .find(|observation| match self.evaluate(observation, width, height) {
                Ok(()) => true,
                Err(reason) => {
                    tracing::trace!("Rejected observation: {:?}", reason);
                    false
                }
            })
    }
}
