/// Rectangle detector trait and geometry types
///
/// The detector itself is an external capability: given a frame, it reports
/// zero or more quadrilaterals with a confidence score. Everything after that
/// (filtering, correction, dispatch) happens in this crate.
use crate::capture::Frame;

use super::filters::AcceptanceFilters;

/// A point in either normalized (0-1) or pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn distance(self, other: Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Four corners of a detected rectangle, origin at the top-left of the image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub top_left: Point,
    pub top_right: Point,
    pub bottom_right: Point,
    pub bottom_left: Point,
}

impl Quad {
    pub const fn new(top_left: Point, top_right: Point, bottom_right: Point, bottom_left: Point) -> Self {
        Self {
            top_left,
            top_right,
            bottom_right,
            bottom_left,
        }
    }

    /// The whole image in normalized coordinates
    pub const fn unit() -> Self {
        Self::new(
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        )
    }

    /// Scale normalized corners to pixel coordinates
    pub fn to_pixels(&self, width: u32, height: u32) -> Quad {
        let scale = |p: Point| Point::new(p.x * width as f32, p.y * height as f32);
        Quad::new(
            scale(self.top_left),
            scale(self.top_right),
            scale(self.bottom_right),
            scale(self.bottom_left),
        )
    }

    pub fn corners(&self) -> [Point; 4] {
        [self.top_left, self.top_right, self.bottom_right, self.bottom_left]
    }

    pub fn is_normalized(&self) -> bool {
        self.corners()
            .iter()
            .all(|p| (0.0..=1.0).contains(&p.x) && (0.0..=1.0).contains(&p.y))
    }

    /// Mean width and height (averages of opposite edges)
    pub fn mean_size(&self) -> (f32, f32) {
        let width = (self.top_left.distance(self.top_right)
            + self.bottom_left.distance(self.bottom_right))
            / 2.0;
        let height = (self.top_left.distance(self.bottom_left)
            + self.top_right.distance(self.bottom_right))
            / 2.0;
        (width, height)
    }

    /// Short side over long side, in `[0, 1]`
    pub fn aspect_ratio(&self) -> f32 {
        let (width, height) = self.mean_size();
        let long = width.max(height);
        if long <= f32::EPSILON {
            return 0.0;
        }
        width.min(height) / long
    }

    /// Largest deviation of any corner angle from a right angle, in degrees
    pub fn quadrature_deviation_deg(&self) -> f32 {
        let c = self.corners();
        (0..4)
            .map(|i| {
                let prev = c[(i + 3) % 4];
                let here = c[i];
                let next = c[(i + 1) % 4];
                let (ax, ay) = (prev.x - here.x, prev.y - here.y);
                let (bx, by) = (next.x - here.x, next.y - here.y);
                let norm = (ax.hypot(ay) * bx.hypot(by)).max(f32::EPSILON);
                let cos = ((ax * bx + ay * by) / norm).clamp(-1.0, 1.0);
                (cos.acos().to_degrees() - 90.0).abs()
            })
            .fold(0.0, f32::max)
    }
}

/// Raw detector output for one rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Corners in normalized coordinates
    pub corners: Quad,
    /// Confidence level (0.0-1.0)
    pub confidence: f32,
}

/// Detector trait
///
/// Implement this trait to plug a rectangle detection backend into the gate.
/// The filters are passed as hints; the gate applies them again regardless.
pub trait RectangleDetector: Send + Sync {
    fn detect(
        &self,
        frame: &Frame,
        filters: &AcceptanceFilters,
    ) -> Result<Vec<Observation>, Box<dyn std::error::Error + Send + Sync>>;

    /// Get detector name (for logging)
    fn name(&self) -> &'static str;
}

/// Reports the whole frame as the rectangle
///
/// Used by the headless binary, where the replayed frames are already
/// framed on the screen of interest.
pub struct FullFrameDetector {
    confidence: f32,
}

impl FullFrameDetector {
    pub fn new(confidence: f32) -> Self {
        Self {
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

impl Default for FullFrameDetector {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RectangleDetector for FullFrameDetector {
    fn detect(
        &self,
        frame: &Frame,
        _filters: &AcceptanceFilters,
    ) -> Result<Vec<Observation>, Box<dyn std::error::Error + Send + Sync>> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![Observation {
            corners: Quad::unit(),
            confidence: self.confidence,
        }])
    }

    fn name(&self) -> &'static str {
        "FullFrameDetector"
    }
}
