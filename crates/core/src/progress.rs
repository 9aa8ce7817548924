//! Progress bar completion from bar colours.
//!
//! A reference image of a full bar supplies the "filled" colours. A column
//! of the captured bar counts as filled when enough of its pixels are close
//! to one of them, and the rightmost filled column gives the completion.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use image::RgbImage;

use crate::types::Capture;

/// How far (per channel) a reference colour may be from a pixel and still
/// be one of the bar's colours.
pub const REFERENCE_TOLERANCE: u8 = 10;
/// Per-channel distance below which a frame pixel matches a bar colour.
pub const PIXEL_TOLERANCE: i16 = 10;
/// Share of a column's height that must match for the column to count.
pub const MIN_COLUMN_FILL: f64 = 0.15;

/// Distinct green-dominant colours of `img`, skipping greys and near-whites.
pub fn bar_colors(img: &RgbImage, tolerance: u8) -> Vec<[u8; 3]> {
    let tol = tolerance as i16;
    let unique: BTreeSet<[u8; 3]> = img.pixels().map(|p| p.0).collect();
    unique
        .into_iter()
        .filter(|&[r, g, b]| {
            let (r, g, b) = (r as i16, g as i16, b as i16);
            g > r && g > b && g > tol * 2 && (r - g).abs() > tol && (b - g).abs() > tol
        })
        .collect()
}

/// Load a full-bar reference image and extract its colours.
pub fn load_reference(path: &Path) -> Result<Vec<[u8; 3]>> {
    let img = image::open(path).with_context(|| format!("open progress reference {:?}", path))?;
    let colors = bar_colors(&img.to_rgb8(), REFERENCE_TOLERANCE);
    if colors.is_empty() {
        bail!("no bar colours in progress reference {:?}", path);
    }
    Ok(colors)
}

fn matches_any(px: [u8; 3], colors: &[[u8; 3]]) -> bool {
    colors.iter().any(|c| (0..3).all(|i| (px[i] as i16 - c[i] as i16).abs() < PIXEL_TOLERANCE))
}

/// Completion of the bar in `frame`, 0.0 to 100.0.
pub fn completion_percent(frame: &Capture, colors: &[[u8; 3]]) -> f64 {
    if colors.is_empty() || frame.is_empty() {
        return 0.0;
    }
    let rgb = frame.to_rgb();
    let (width, height) = rgb.dimensions();
    let min_fill = ((height as f64 * MIN_COLUMN_FILL) as u32).max(1);

    let last_filled = (0..width).rev().find(|&x| {
        let filled = (0..height).filter(|&y| matches_any(rgb.get_pixel(x, y).0, colors)).count();
        filled as u32 >= min_fill
    });
    match last_filled {
        Some(x) => ((x + 1) as f64 / width as f64 * 100.0).min(100.0),
        None => 0.0,
    }
}
