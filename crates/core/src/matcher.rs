//! Template matching over captured frames.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::GrayImage;
use imageproc::template_matching::{match_template, MatchTemplateMethod};

use crate::types::{Capture, Rect};

/// Scales tried, in order, when a task does not pin one.
const SCALE_LADDER: [f32; 10] = [1.0, 0.9, 1.1, 0.8, 1.2, 0.75, 1.25, 0.5, 1.5, 2.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Detected,
    BelowThreshold,
    /// Template (after scaling) does not fit inside the frame.
    TooLarge,
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchStatus::Detected => "Detected",
            MatchStatus::BelowThreshold => "Not detected",
            MatchStatus::TooLarge => "Template larger than frame",
        };
        f.write_str(s)
    }
}

/// Best placement of a template inside a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// Frame-relative box of the best placement, when one exists.
    pub bbox: Option<Rect>,
    pub scale: f32,
    pub correlation: f32,
    pub status: MatchStatus,
}

impl MatchOutcome {
    pub fn is_detected(&self) -> bool {
        self.status == MatchStatus::Detected
    }
}

pub trait TemplateMatcher: Send {
    /// Locate `template` in `frame`. With `scale == None` the matcher picks
    /// the best scale itself and reports it in the outcome.
    fn locate(&mut self, template: &GrayImage, frame: &Capture, scale: Option<f32>, threshold: f32) -> Result<MatchOutcome>;
}

pub fn load_template(path: &Path) -> Result<GrayImage> {
    let img = image::open(path).with_context(|| format!("open template {:?}", path))?;
    Ok(img.to_luma8())
}

/// Normalized cross-correlation via `imageproc`.
#[derive(Debug, Default)]
pub struct NccMatcher;

impl NccMatcher {
    fn at_scale(frame: &GrayImage, template: &GrayImage, scale: f32) -> Option<(Rect, f32)> {
        let scaled;
        let tpl = if (scale - 1.0).abs() < f32::EPSILON {
            template
        } else {
            let w = (template.width() as f32 * scale).round() as u32;
            let h = (template.height() as f32 * scale).round() as u32;
            if w == 0 || h == 0 {
                return None;
            }
            scaled = imageops::resize(template, w, h, FilterType::Triangle);
            &scaled
        };

        if tpl.width() > frame.width() || tpl.height() > frame.height() {
            return None;
        }

        let scores = match_template(frame, tpl, MatchTemplateMethod::CrossCorrelationNormalized);
        // flat regions divide by zero, skip anything non-finite
        let (mut best, mut at) = (f32::MIN, (0, 0));
        for (x, y, px) in scores.enumerate_pixels() {
            let v = px.0[0];
            if v.is_finite() && v > best {
                best = v;
                at = (x, y);
            }
        }
        if best == f32::MIN {
            return None;
        }
        let bbox = Rect { x: at.0 as i32, y: at.1 as i32, w: tpl.width() as i32, h: tpl.height() as i32 };
        Some((bbox, best))
    }
}

impl TemplateMatcher for NccMatcher {
    fn locate(&mut self, template: &GrayImage, frame: &Capture, scale: Option<f32>, threshold: f32) -> Result<MatchOutcome> {
        let gray = frame.to_gray();
        let scales: &[f32] = match &scale {
            Some(s) => std::slice::from_ref(s),
            None => &SCALE_LADDER,
        };

        let mut best: Option<(Rect, f32, f32)> = None;
        for &s in scales {
            if let Some((bbox, corr)) = Self::at_scale(&gray, template, s) {
                if best.map_or(true, |(_, c, _)| corr > c) {
                    best = Some((bbox, corr, s));
                }
            }
        }

        Ok(match best {
            Some((bbox, correlation, scale)) => {
                let detected = correlation >= threshold;
                MatchOutcome {
                    bbox: Some(bbox),
                    scale,
                    correlation,
                    status: if detected { MatchStatus::Detected } else { MatchStatus::BelowThreshold },
                }
            }
            None => MatchOutcome {
                bbox: None,
                scale: scale.unwrap_or(1.0),
                correlation: 0.0,
                status: MatchStatus::TooLarge,
            },
        })
    }
}
