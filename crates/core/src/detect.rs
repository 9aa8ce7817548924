//! Detection: deciding from a frame (or the clock) whether a task should act.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use image::GrayImage;
use ocrs::OcrEngine;
use rand::Rng;

use crate::hint::StripReader;
use crate::logger;
use crate::matcher::{load_template, NccMatcher, TemplateMatcher};
use crate::ocr::{load_engine, OcrsReader};
use crate::progress::{completion_percent, load_reference};
use crate::settings::{Detection, TaskConfig};
use crate::sleep::secs;
use crate::types::{Capture, Rect, TextHit};

/// Timer tasks never wait less than this between activations.
const MIN_TIMER_PERIOD: f64 = 5.0;

pub trait TextReader: Send {
    fn read(&mut self, frame: &Capture) -> Result<Vec<TextHit>>;
}

/// Builds the per-worker detector instances. Each worker gets its own so
/// engines with internal state never cross threads.
pub trait DetectorFactory: Send + Sync {
    /// Fails when no text engine is available.
    fn text_reader(&self) -> Result<Box<dyn TextReader>>;
    fn template_matcher(&self) -> Box<dyn TemplateMatcher>;
}

/// Where text comes from.
pub enum TextSource {
    /// The ocrs engine, shared by every worker.
    Ocr(Arc<OcrEngine>),
    /// A pixel strip painted into the frame (simulated windows, game add-ons).
    Strip,
    /// Models could not be loaded; holds the reason.
    Unavailable(String),
}

/// ocrs (or the pixel strip) for text, NCC for templates.
pub struct BuiltinDetectors {
    text: TextSource,
}

impl BuiltinDetectors {
    pub fn new(text: TextSource) -> Self {
        Self { text }
    }

    pub fn strip() -> Self {
        Self::new(TextSource::Strip)
    }

    /// Load the OCR models from `dir`. A failure is logged and leaves text
    /// tasks without a reader.
    pub fn with_ocr(dir: Option<&Path>) -> Self {
        let Some(dir) = dir else {
            return Self::new(TextSource::Unavailable("no OCR model directory (HOME unset)".into()));
        };
        match load_engine(dir) {
            Ok(engine) => {
                logger::info(&format!("OCR models loaded from {}", dir.display()));
                Self::new(TextSource::Ocr(engine))
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                logger::error(&format!("OCR unavailable: {}", reason));
                Self::new(TextSource::Unavailable(reason))
            }
        }
    }
}

impl Default for BuiltinDetectors {
    fn default() -> Self {
        Self::strip()
    }
}

impl DetectorFactory for BuiltinDetectors {
    fn text_reader(&self) -> Result<Box<dyn TextReader>> {
        match &self.text {
            TextSource::Ocr(engine) => Ok(Box::new(OcrsReader::new(Arc::clone(engine)))),
            TextSource::Strip => Ok(Box::new(StripReader)),
            TextSource::Unavailable(reason) => Err(anyhow!("OCR unavailable: {}", reason)),
        }
    }

    fn template_matcher(&self) -> Box<dyn TemplateMatcher> {
        Box::new(NccMatcher)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub pattern: String,
    pub text: String,
    pub confidence: f32,
}

/// Case-insensitive containment of each pattern in the text hits.
///
/// Hits below `threshold` are ignored. Patterns are checked against every
/// hit, then against all qualifying hits joined with spaces so a phrase split
/// across fragments still counts. A pattern found in a single hit is not
/// reported again from the joined text.
pub fn match_patterns(hits: &[TextHit], patterns: &[String], threshold: f32) -> Vec<PatternMatch> {
    let patterns: Vec<(&String, String)> = patterns
        .iter()
        .filter(|p| !p.trim().is_empty())
        .map(|p| (p, p.to_lowercase()))
        .collect();
    let eligible: Vec<&TextHit> = hits.iter().filter(|h| h.confidence >= threshold).collect();

    let mut found = Vec::new();
    for hit in &eligible {
        let text = hit.text.to_lowercase();
        for (pattern, lower) in &patterns {
            if text.contains(lower.as_str()) {
                found.push(PatternMatch {
                    pattern: (*pattern).clone(),
                    text: hit.text.clone(),
                    confidence: hit.confidence,
                });
            }
        }
    }

    if eligible.is_empty() {
        return found;
    }

    let combined = eligible.iter().map(|h| h.text.as_str()).collect::<Vec<_>>().join(" ");
    let combined_lower = combined.to_lowercase();
    let avg = eligible.iter().map(|h| h.confidence).sum::<f32>() / eligible.len() as f32;
    for (pattern, lower) in &patterns {
        let already = found.iter().any(|m| &m.pattern == *pattern);
        if !already && combined_lower.contains(lower.as_str()) {
            found.push(PatternMatch { pattern: (*pattern).clone(), text: combined.clone(), confidence: avg });
        }
    }
    found
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Condition holds. `why` is for the log; `at` is where in the frame
    /// the match was found, for detections that locate something.
    Matched { why: String, at: Option<Rect> },
    NoMatch,
}

impl Verdict {
    fn matched(why: impl Into<String>) -> Self {
        Verdict::Matched { why: why.into(), at: None }
    }
}

enum Check {
    Text {
        reader: Box<dyn TextReader>,
        patterns: Vec<String>,
        threshold: f32,
    },
    Template {
        matcher: Box<dyn TemplateMatcher>,
        template: GrayImage,
        threshold: f32,
        scale: Option<f32>,
    },
    Progress {
        colors: Vec<[u8; 3]>,
        threshold: f64,
    },
    Timer {
        duration: f64,
        lead: (f64, f64),
        expiry: Duration,
    },
    /// Detector or asset unavailable; every scan counts as a match.
    Unverified,
}

/// A task's detection, bound to its detector instances and per-task state.
pub struct Condition {
    check: Check,
}

impl Condition {
    /// Bind `task.detection`. A missing asset or text engine does not fail
    /// the task; it degrades to unverified triggering and is logged.
    pub fn build(task: &TaskConfig, assets: &Path, detectors: &dyn DetectorFactory, now: Duration) -> Self {
        let resolve = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { assets.join(p) };
        let check = match &task.detection {
            Detection::Ocr { text_patterns, confidence_threshold } => match detectors.text_reader() {
                Ok(reader) => Check::Text {
                    reader,
                    patterns: text_patterns.clone(),
                    threshold: *confidence_threshold,
                },
                Err(e) => unverified(&task.name, e),
            },
            Detection::Image { template, confidence_threshold, scale } => match load_template(&resolve(template)) {
                Ok(img) => Check::Template {
                    matcher: detectors.template_matcher(),
                    template: img,
                    threshold: *confidence_threshold,
                    scale: *scale,
                },
                Err(e) => unverified(&task.name, e),
            },
            Detection::Progress { reference, threshold_percent } => match load_reference(&resolve(reference)) {
                Ok(colors) => Check::Progress { colors, threshold: *threshold_percent },
                Err(e) => unverified(&task.name, e),
            },
            Detection::Timer { duration, initial_remaining, lead_min, lead_max } => Check::Timer {
                duration: *duration,
                lead: (*lead_min, *lead_max),
                expiry: now.saturating_add(secs(*initial_remaining)),
            },
        };
        Self { check }
    }

    /// Whether evaluation needs a captured frame.
    pub fn needs_frame(&self) -> bool {
        matches!(self.check, Check::Text { .. } | Check::Template { .. } | Check::Progress { .. })
    }

    pub fn is_unverified(&self) -> bool {
        matches!(self.check, Check::Unverified)
    }

    /// Evaluate against `frame` (required when [`needs_frame`](Self::needs_frame)).
    pub fn evaluate(&mut self, frame: Option<&Capture>, now: Duration) -> Result<Verdict> {
        match &mut self.check {
            Check::Text { reader, patterns, threshold } => {
                let Some(frame) = frame else { return Ok(Verdict::NoMatch) };
                let hits = reader.read(frame)?;
                let found = match_patterns(&hits, patterns, *threshold);
                Ok(match found.first() {
                    Some(m) => {
                        Verdict::matched(format!("text '{}' matched '{}' ({:.2})", m.text, m.pattern, m.confidence))
                    }
                    None => Verdict::NoMatch,
                })
            }
            Check::Template { matcher, template, threshold, scale } => {
                let Some(frame) = frame else { return Ok(Verdict::NoMatch) };
                let outcome = matcher.locate(template, frame, *scale, *threshold)?;
                if !outcome.is_detected() {
                    return Ok(Verdict::NoMatch);
                }
                if scale.is_none() {
                    *scale = Some(outcome.scale);
                }
                Ok(Verdict::Matched {
                    why: format!(
                        "template at {} scale {:.2} corr {:.2}",
                        outcome.bbox.map(|b| b.to_string()).unwrap_or_default(),
                        outcome.scale,
                        outcome.correlation
                    ),
                    at: outcome.bbox,
                })
            }
            Check::Progress { colors, threshold } => {
                let Some(frame) = frame else { return Ok(Verdict::NoMatch) };
                let pct = completion_percent(frame, colors);
                Ok(if pct >= *threshold {
                    Verdict::matched(format!("progress {:.0}%", pct))
                } else {
                    Verdict::NoMatch
                })
            }
            Check::Timer { expiry, .. } => Ok(if now >= *expiry {
                Verdict::matched("timer expired")
            } else {
                Verdict::NoMatch
            }),
            Check::Unverified => Ok(Verdict::matched("unverified")),
        }
    }

    /// Record that the task acted at `now`. Timers schedule their next expiry
    /// a random lead before the full duration runs out.
    pub fn on_fired<R: Rng>(&mut self, now: Duration, rng: &mut R) {
        if let Check::Timer { duration, lead, expiry } = &mut self.check {
            let (lo, hi) = *lead;
            let early = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
            *expiry = now.saturating_add(secs((*duration - early).max(MIN_TIMER_PERIOD)));
        }
    }

    /// Next timer expiry, if this is a timer.
    pub fn timer_expiry(&self) -> Option<Duration> {
        match &self.check {
            Check::Timer { expiry, .. } => Some(*expiry),
            _ => None,
        }
    }
}

fn unverified(task: &str, e: anyhow::Error) -> Check {
    logger::warn_p(task, &format!("{:#}; acting without verification", e));
    Check::Unverified
}
