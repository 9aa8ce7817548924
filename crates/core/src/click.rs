//! Randomized click points inside a target rectangle.
//!
//! Clicking the exact same pixel every time looks mechanical, so each click
//! lands somewhere near the middle of the target instead.

use std::f64::consts::TAU;

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::settings::ClickShape;
use crate::types::Rect;

/// Pick a point inside `rect`.
///
/// `diminish` shrinks the usable area: 2 confines rectangle clicks to the
/// middle half of the rect and circle clicks to a radius of a quarter of the
/// shorter side. Values below 1 are treated as 1.
pub fn click_point<R: Rng>(rect: &Rect, shape: ClickShape, diminish: f64, rng: &mut R) -> (i32, i32) {
    let diminish = if diminish.is_finite() { diminish.max(1.0) } else { 1.0 };
    let (cx, cy) = rect.center();

    let (x, y) = match shape {
        ClickShape::Circle => {
            let radius = rect.w.min(rect.h) as f64 / 2.0 / diminish;
            let angle = rng.gen_range(0.0..TAU);
            let r = radius * rng.gen::<f64>().sqrt();
            (
                (cx as f64 + r * angle.cos()) as i32,
                (cy as f64 + r * angle.sin()) as i32,
            )
        }
        ClickShape::Rectangle => {
            let area_w = rect.w as f64 * 0.5;
            let area_h = rect.h as f64 * 0.5;
            (
                gaussian_clamped(cx as f64, area_w, diminish, rng),
                gaussian_clamped(cy as f64, area_h, diminish, rng),
            )
        }
    };

    (x.clamp(rect.x, rect.right()), y.clamp(rect.y, rect.bottom()))
}

/// Normal around `center` with sigma `area / 6`, clamped to `center ± area / diminish`.
fn gaussian_clamped<R: Rng>(center: f64, area: f64, diminish: f64, rng: &mut R) -> i32 {
    let std_dev = (area / 6.0).max(1.0);
    let sample = match Normal::new(center, std_dev) {
        Ok(dist) => dist.sample(rng),
        Err(_) => center,
    };
    let bound = area / diminish;
    sample.clamp(center - bound, center + bound) as i32
}
