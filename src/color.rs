use image::Rgb;
use palette::{Hsl, IntoColor, Srgb};

// ---------------------------------------------------------------------------
// Fixed colours
// ---------------------------------------------------------------------------

pub const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
pub const AXIS: Rgb<u8> = Rgb([60, 60, 60]);
pub const GRID: Rgb<u8> = Rgb([220, 220, 220]);
pub const TRACE: Rgb<u8> = Rgb([31, 119, 180]);

fn hsl_to_rgb(hue: f32, saturation: f32, lightness: f32) -> Rgb<u8> {
    let rgb: Srgb = Hsl::new(hue, saturation, lightness).into_color();
    Rgb([
        (rgb.red.clamp(0.0, 1.0) * 255.0) as u8,
        (rgb.green.clamp(0.0, 1.0) * 255.0) as u8,
        (rgb.blue.clamp(0.0, 1.0) * 255.0) as u8,
    ])
}

// ---------------------------------------------------------------------------
// Saliency ramp
// ---------------------------------------------------------------------------

/// Maps attribution magnitudes onto a blue (low) → red (high) hue ramp.
#[derive(Debug, Clone)]
pub struct SaliencyRamp {
    max: f64,
}

impl SaliencyRamp {
    /// Ramp scaled to the largest value in `values`.
    pub fn new(values: &[f64]) -> Self {
        let max = values
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(0.0, f64::max);
        SaliencyRamp { max }
    }

    /// Colour for a single value; everything maps to the low end when all
    /// values are zero.
    pub fn color_for(&self, value: f64) -> Rgb<u8> {
        let t = if self.max > 0.0 && value.is_finite() {
            (value / self.max).clamp(0.0, 1.0)
        } else {
            0.0
        };
        hsl_to_rgb(240.0 * (1.0 - t as f32), 0.75, 0.55)
    }
}
