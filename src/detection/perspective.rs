/// Perspective correction
///
/// Warps the quadrilateral of a detected screen into an axis-aligned image.
/// The output size is the mean length of opposite edges; every output pixel
/// is mapped back through a square-to-quad projective transform and sampled
/// bilinearly.
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use super::detector::Quad;

/// Upper bound on either side of a corrected image
const MAX_OUTPUT_SIDE: u32 = 8192;

/// Projective map from the unit square onto a quadrilateral
#[derive(Debug, Clone, Copy)]
struct SquareToQuad {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
    g: f64,
    h: f64,
}

impl SquareToQuad {
    /// (0,0), (1,0), (1,1), (0,1) map to top-left, top-right, bottom-right,
    /// bottom-left respectively.
    fn new(quad: &Quad) -> Option<Self> {
        let [p0, p1, p2, p3] = quad.corners();
        let (x0, y0) = (p0.x as f64, p0.y as f64);
        let (x1, y1) = (p1.x as f64, p1.y as f64);
        let (x2, y2) = (p2.x as f64, p2.y as f64);
        let (x3, y3) = (p3.x as f64, p3.y as f64);

        let dx3 = x0 - x1 + x2 - x3;
        let dy3 = y0 - y1 + y2 - y3;

        let map = if dx3.abs() < 1e-9 && dy3.abs() < 1e-9 {
            // Parallelogram: affine
            Self {
                a: x1 - x0,
                b: x2 - x1,
                c: x0,
                d: y1 - y0,
                e: y2 - y1,
                f: y0,
                g: 0.0,
                h: 0.0,
            }
        } else {
            let dx1 = x1 - x2;
            let dx2 = x3 - x2;
            let dy1 = y1 - y2;
            let dy2 = y3 - y2;
            let den = dx1 * dy2 - dx2 * dy1;
            if den.abs() < 1e-9 {
                return None;
            }
            let g = (dx3 * dy2 - dx2 * dy3) / den;
            let h = (dx1 * dy3 - dx3 * dy1) / den;
            Self {
                a: x1 - x0 + g * x1,
                b: x3 - x0 + h * x3,
                c: x0,
                d: y1 - y0 + g * y1,
                e: y3 - y0 + h * y3,
                f: y0,
                g,
                h,
            }
        };

        // A convex quad keeps the projective weight positive on the whole square
        let weights = [1.0, 1.0 + map.g, 1.0 + map.h, 1.0 + map.g + map.h];
        if weights.iter().any(|w| *w <= 1e-9) {
            return None;
        }

        Some(map)
    }

    fn apply(&self, u: f64, v: f64) -> (f64, f64) {
        let w = self.g * u + self.h * v + 1.0;
        (
            (self.a * u + self.b * v + self.c) / w,
            (self.d * u + self.e * v + self.f) / w,
        )
    }
}

/// Crop `quad` (pixel coordinates) out of `image` and undo its perspective
pub fn correct_perspective(image: &RgbaImage, quad: &Quad) -> Result<RgbaImage, String> {
    if image.width() == 0 || image.height() == 0 {
        return Err("source image is empty".into());
    }

    let (mean_width, mean_height) = quad.mean_size();
    let out_width = mean_width.round() as u32;
    let out_height = mean_height.round() as u32;
    if out_width == 0 || out_height == 0 {
        return Err(format!("degenerate region {}x{}", mean_width, mean_height));
    }
    if out_width > MAX_OUTPUT_SIDE || out_height > MAX_OUTPUT_SIDE {
        return Err(format!("region {}x{} is too large", out_width, out_height));
    }

    let map = SquareToQuad::new(quad).ok_or_else(|| "region is not a convex quadrilateral".to_string())?;

    let mut output = RgbaImage::new(out_width, out_height);
    let row_size = out_width as usize * 4;

    output
        .as_flat_samples_mut()
        .samples
        .par_chunks_mut(row_size)
        .enumerate()
        .for_each(|(y, row)| {
            let v = (y as f64 + 0.5) / out_height as f64;
            for x in 0..out_width as usize {
                let u = (x as f64 + 0.5) / out_width as f64;
                let (sx, sy) = map.apply(u, v);
                let pixel = sample_bilinear(image, sx - 0.5, sy - 0.5);
                row[x * 4..x * 4 + 4].copy_from_slice(&pixel.0);
            }
        });

    Ok(output)
}

fn sample_bilinear(image: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let max_x = (image.width() - 1) as f64;
    let max_y = (image.height() - 1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = image.get_pixel(x0, y0).0;
    let p10 = image.get_pixel(x1, y0).0;
    let p01 = image.get_pixel(x0, y1).0;
    let p11 = image.get_pixel(x1, y1).0;

    let mut out = [0u8; 4];
    for channel in 0..4 {
        let top = p00[channel] as f64 * (1.0 - fx) + p10[channel] as f64 * fx;
        let bottom = p01[channel] as f64 * (1.0 - fx) + p11[channel] as f64 * fx;
        out[channel] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::detector::Point;

    /// Left half red, right half blue
    fn split_image(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        })
    }

    #[test]
    fn test_identity_region_keeps_image() {
        let image = split_image(40, 20);
        let corrected = correct_perspective(&image, &Quad::unit().to_pixels(40, 20)).unwrap();

        assert_eq!(corrected.dimensions(), (40, 20));
        assert_eq!(corrected.get_pixel(2, 10), &Rgba([255, 0, 0, 255]));
        assert_eq!(corrected.get_pixel(37, 10), &Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_crop_of_right_half() {
        let image = split_image(40, 20);
        let quad = Quad::new(
            Point::new(20.0, 0.0),
            Point::new(40.0, 0.0),
            Point::new(40.0, 20.0),
            Point::new(20.0, 20.0),
        );
        let corrected = correct_perspective(&image, &quad).unwrap();

        assert_eq!(corrected.dimensions(), (20, 20));
        assert!(corrected.pixels().all(|p| *p == Rgba([0, 0, 255, 255])));
    }

    #[test]
    fn test_projective_map_hits_corners() {
        let quad = Quad::new(
            Point::new(10.0, 5.0),
            Point::new(90.0, 12.0),
            Point::new(80.0, 70.0),
            Point::new(15.0, 60.0),
        );
        let map = SquareToQuad::new(&quad).unwrap();

        for ((u, v), corner) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]
            .into_iter()
            .zip(quad.corners())
        {
            let (x, y) = map.apply(u, v);
            assert!((x - corner.x as f64).abs() < 1e-6, "x for ({u}, {v})");
            assert!((y - corner.y as f64).abs() < 1e-6, "y for ({u}, {v})");
        }
    }

    #[test]
    fn test_degenerate_region_fails() {
        let image = split_image(40, 20);
        let collapsed = Quad::new(
            Point::new(5.0, 5.0),
            Point::new(5.0, 5.0),
            Point::new(5.0, 5.0),
            Point::new(5.0, 5.0),
        );
        assert!(correct_perspective(&image, &collapsed).is_err());

        let bow_tie = Quad::new(
            Point::new(0.0, 0.0),
            Point::new(40.0, 20.0),
            Point::new(40.0, 0.0),
            Point::new(0.0, 20.0),
        );
        assert!(correct_perspective(&image, &bow_tie).is_err());
    }
}
