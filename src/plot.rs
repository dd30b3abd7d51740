use std::path::Path;

use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};

use crate::color::{SaliencyRamp, AXIS, BACKGROUND, GRID, TRACE};
use crate::config::PlotConfig;
use crate::data::model::Series;
use crate::state::AnalysisReport;

const MARGIN: u32 = 40;
const STRIP_HEIGHT: u32 = 36;
const STRIP_GAP: u32 = 12;

// ---------------------------------------------------------------------------
// Axis mapping
// ---------------------------------------------------------------------------

/// Frequency → pixel column, logarithmic when every frequency is positive.
struct XAxis {
    log: bool,
    lo: f64,
    hi: f64,
    left: u32,
    width: u32,
}

impl XAxis {
    fn new(min: f64, max: f64, want_log: bool, left: u32, width: u32) -> Self {
        let log = want_log && min > 0.0;
        let (mut lo, mut hi) = if log {
            (min.log10(), max.log10())
        } else {
            (min, max)
        };
        if hi - lo <= f64::EPSILON {
            lo -= 0.5;
            hi += 0.5;
        }
        XAxis {
            log,
            lo,
            hi,
            left,
            width,
        }
    }

    fn to_px(&self, freq: f64) -> f64 {
        let v = if self.log { freq.log10() } else { freq };
        self.left as f64 + (v - self.lo) / (self.hi - self.lo) * (self.width - 1) as f64
    }

    fn to_freq(&self, px: u32) -> f64 {
        let v = self.lo + (px - self.left) as f64 / (self.width - 1) as f64 * (self.hi - self.lo);
        if self.log {
            10f64.powf(v)
        } else {
            v
        }
    }

    /// Decade lines on a log axis, ten even divisions otherwise.
    fn ticks(&self) -> Vec<f64> {
        if self.log {
            (self.lo.ceil() as i32..=self.hi.floor() as i32)
                .map(|e| 10f64.powi(e))
                .collect()
        } else {
            (0..=10)
                .map(|i| self.lo + (self.hi - self.lo) * i as f64 / 10.0)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Draw the magnitude trace and, when present, the saliency strip aligned
/// with the model grid.
pub fn render(
    series: &Series,
    saliency: Option<(&[f64], &[f64])>,
    config: &PlotConfig,
) -> Result<RgbImage> {
    let (width, height) = (config.width, config.height);
    let strip = if saliency.is_some() {
        STRIP_HEIGHT + STRIP_GAP
    } else {
        0
    };
    if width <= 2 * MARGIN + 1 || height <= 2 * MARGIN + strip + 1 {
        bail!("plot size {width}x{height} leaves no drawing area");
    }
    let (fmin, fmax) = series.freq_range().context("empty series")?;

    let plot_w = width - 2 * MARGIN;
    let plot_h = height - 2 * MARGIN - strip;
    let top = MARGIN;
    let bottom = top + plot_h - 1;
    let x_axis = XAxis::new(fmin, fmax, config.log_x, MARGIN, plot_w);

    let ymin = series.mags.iter().copied().fold(f64::INFINITY, f64::min);
    let ymax = series.mags.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let (ylo, yhi) = if ymax - ymin <= f64::EPSILON {
        (ymin - 1.0, ymax + 1.0)
    } else {
        let pad = (ymax - ymin) * 0.05;
        (ymin - pad, ymax + pad)
    };
    let y_to_px =
        |m: f64| bottom as f64 - (m - ylo) / (yhi - ylo) * (plot_h - 1) as f64;

    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

    for tick in x_axis.ticks() {
        let x = x_axis.to_px(tick).round() as i64;
        line(&mut img, (x, top as i64), (x, bottom as i64), GRID);
    }
    for i in 0..=4 {
        let y = (top + (plot_h - 1) * i / 4) as i64;
        line(&mut img, (MARGIN as i64, y), ((MARGIN + plot_w - 1) as i64, y), GRID);
    }
    frame(&mut img, MARGIN, top, plot_w, plot_h);

    let sorted = series.sorted();
    let points: Vec<(i64, i64)> = sorted
        .freqs
        .iter()
        .zip(&sorted.mags)
        .map(|(&f, &m)| (x_axis.to_px(f).round() as i64, y_to_px(m).round() as i64))
        .collect();
    if let [only] = points.as_slice() {
        line(&mut img, *only, *only, TRACE);
    }
    for pair in points.windows(2) {
        line(&mut img, pair[0], pair[1], TRACE);
    }

    if let Some((grid, values)) = saliency {
        let strip_top = top + plot_h + STRIP_GAP;
        draw_strip(&mut img, &x_axis, grid, values, strip_top);
        frame(&mut img, MARGIN, strip_top, plot_w, STRIP_HEIGHT);
    }

    Ok(img)
}

fn draw_strip(img: &mut RgbImage, x_axis: &XAxis, grid: &[f64], values: &[f64], top: u32) {
    if grid.is_empty() || grid.len() != values.len() {
        return;
    }
    let ramp = SaliencyRamp::new(values);
    for px in x_axis.left..x_axis.left + x_axis.width {
        let freq = x_axis.to_freq(px);
        let idx = grid.partition_point(|&g| g < freq).min(grid.len() - 1);
        let nearest = if idx > 0 && (freq - grid[idx - 1]).abs() < (grid[idx] - freq).abs() {
            idx - 1
        } else {
            idx
        };
        let color = ramp.color_for(values[nearest]);
        for y in top..top + STRIP_HEIGHT {
            img.put_pixel(px, y, color);
        }
    }
}

fn frame(img: &mut RgbImage, left: u32, top: u32, w: u32, h: u32) {
    let (l, t, r, b) = (
        left as i64,
        top as i64,
        (left + w - 1) as i64,
        (top + h - 1) as i64,
    );
    line(img, (l, t), (r, t), AXIS);
    line(img, (l, b), (r, b), AXIS);
    line(img, (l, t), (l, b), AXIS);
    line(img, (r, t), (r, b), AXIS);
}

/// Bresenham line, clipped to the image.
fn line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x0, mut y0) = from;
    let (x1, y1) = to;
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let (w, h) = (img.width() as i64, img.height() as i64);
    loop {
        if (0..w).contains(&x0) && (0..h).contains(&y0) {
            img.put_pixel(x0 as u32, y0 as u32, color);
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// Render the report's series to `path` as PNG.  A failure is recorded as a
/// note; the report itself stays valid.
pub fn attach_plot(report: &mut AnalysisReport, path: &Path, config: &PlotConfig) {
    let result = (|| -> Result<()> {
        let series = report.series.as_ref().context("no parsed series to plot")?;
        let saliency = match (&report.grid, &report.saliency) {
            (Some(grid), Some(values)) => Some((grid.as_slice(), values.as_slice())),
            _ => None,
        };
        let img = render(series, saliency, config)?;
        img.save(path)
            .with_context(|| format!("writing plot {}", path.display()))?;
        Ok(())
    })();

    match result {
        Ok(()) => report.plot_path = Some(path.to_path_buf()),
        Err(e) => {
            log::warn!("plot rendering failed: {e:#}");
            report.note(format!("Plot unavailable: {e:#}"));
        }
    }
}
