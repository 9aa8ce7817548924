//! Task configuration document (`ticker.json`).
//!
//! Loading never fails: a missing file is created with an empty task list,
//! malformed JSON falls back to the empty default, and a task entry that does
//! not parse is logged and skipped without affecting its siblings.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::logger;
use crate::types::Rect;

fn default_scan_frequency() -> f64 { 0.1 }
fn default_cooldown() -> f64 { 0.6 }
fn default_true() -> bool { true }
fn default_multiplier() -> f64 { 2.0 }
fn default_ocr_threshold() -> f32 { 0.6 }
fn default_image_threshold() -> f32 { 0.8 }
fn default_lead_min() -> f64 { 5.0 }
fn default_lead_max() -> f64 { 10.0 }
fn default_diminish() -> f64 { 2.0 }
fn default_progress_percent() -> f64 { 99.0 }

/// Upper bound for any timing value in seconds (one year). Larger values
/// would overflow the loop's clock arithmetic.
pub const MAX_SECONDS: f64 = 365.0 * 24.0 * 3600.0;
/// Upper bound for `recovery_multiplier`.
pub const MAX_MULTIPLIER: f64 = 1000.0;

/// What decides that a task should act.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Detection {
    /// Case-insensitive substring search over text read from the area.
    Ocr {
        text_patterns: Vec<String>,
        #[serde(default = "default_ocr_threshold")]
        confidence_threshold: f32,
    },
    /// Locate a reference image inside the area.
    Image {
        template: PathBuf,
        #[serde(default = "default_image_threshold")]
        confidence_threshold: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale: Option<f32>,
    },
    /// Fire once a progress bar is at least `threshold_percent` full. The
    /// bar colours are taken from `reference`, an image of a full bar.
    Progress {
        reference: PathBuf,
        #[serde(default = "default_progress_percent")]
        threshold_percent: f64,
    },
    /// Fire every `duration` seconds, a little early (buff refresh).
    Timer {
        duration: f64,
        #[serde(default)]
        initial_remaining: f64,
        #[serde(default = "default_lead_min")]
        lead_min: f64,
        #[serde(default = "default_lead_max")]
        lead_max: f64,
    },
}

impl Detection {
    pub fn kind(&self) -> &'static str {
        match self {
            Detection::Ocr { .. } => "ocr",
            Detection::Image { .. } => "image",
            Detection::Progress { .. } => "progress",
            Detection::Timer { .. } => "timer",
        }
    }

    /// Short human description for the task list.
    pub fn summary(&self) -> String {
        match self {
            Detection::Ocr { text_patterns, confidence_threshold } => {
                format!("ocr {:?} >= {:.2}", text_patterns, confidence_threshold)
            }
            Detection::Image { template, confidence_threshold, .. } => {
                format!("image {} >= {:.2}", template.display(), confidence_threshold)
            }
            Detection::Progress { reference, threshold_percent } => {
                format!("progress {} >= {:.0}%", reference.display(), threshold_percent)
            }
            Detection::Timer { duration, .. } => format!("timer {:.0}s", duration),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickShape {
    #[default]
    Rectangle,
    Circle,
}

/// What a task does once its condition holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    ClickRegion {
        region: Rect,
        #[serde(default)]
        shape: ClickShape,
        #[serde(default = "default_diminish")]
        roi_diminish: f64,
    },
    /// Click inside the box where the template was found.
    ClickMatch {
        #[serde(default)]
        shape: ClickShape,
        #[serde(default = "default_diminish")]
        roi_diminish: f64,
    },
    Key {
        key: String,
    },
}

impl Action {
    pub fn summary(&self) -> String {
        match self {
            Action::ClickRegion { region, .. } => format!("click {}", region),
            Action::ClickMatch { .. } => "click match".into(),
            Action::Key { key } => format!("key '{}'", key),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    /// Capture area; `None` captures the whole window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<Rect>,
    pub detection: Detection,
    pub action: Action,
    #[serde(default = "default_scan_frequency")]
    pub scan_frequency: f64,
    #[serde(default = "default_cooldown")]
    pub cooldown: f64,
    #[serde(default = "default_true")]
    pub recovery_enabled: bool,
    #[serde(default = "default_multiplier")]
    pub recovery_multiplier: f64,
}

impl TaskConfig {
    /// Check values serde cannot express. Returns the reason a task is unusable.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("task name is empty".into());
        }
        if !(self.scan_frequency > 0.0 && self.scan_frequency <= MAX_SECONDS) {
            return Err(format!("scan_frequency must be in (0, {}], got {}", MAX_SECONDS, self.scan_frequency));
        }
        check_seconds("cooldown", self.cooldown)?;
        if self.recovery_enabled && !(self.recovery_multiplier > 0.0 && self.recovery_multiplier <= MAX_MULTIPLIER) {
            return Err(format!(
                "recovery_multiplier must be in (0, {}], got {}",
                MAX_MULTIPLIER, self.recovery_multiplier
            ));
        }
        match &self.detection {
            Detection::Ocr { text_patterns, .. } => {
                if text_patterns.iter().all(|p| p.trim().is_empty()) {
                    return Err("ocr detection needs at least one text pattern".into());
                }
            }
            Detection::Image { scale: Some(s), .. } if !(s.is_finite() && *s > 0.0) => {
                return Err(format!("template scale must be > 0, got {}", s));
            }
            Detection::Image { .. } => {}
            Detection::Progress { threshold_percent, .. } => {
                if !(*threshold_percent > 0.0 && *threshold_percent <= 100.0) {
                    return Err(format!("threshold_percent must be in (0, 100], got {}", threshold_percent));
                }
            }
            Detection::Timer { duration, initial_remaining, lead_min, lead_max } => {
                if !(*duration > 0.0 && *duration <= MAX_SECONDS) {
                    return Err(format!("timer duration must be in (0, {}], got {}", MAX_SECONDS, duration));
                }
                check_seconds("initial_remaining", *initial_remaining)?;
                check_seconds("lead_min", *lead_min)?;
                check_seconds("lead_max", *lead_max)?;
                if lead_max < lead_min {
                    return Err(format!("timer lead range {}..{} is invalid", lead_min, lead_max));
                }
            }
        }
        match &self.action {
            Action::Key { key } if key.trim().is_empty() => Err("key action has an empty key".into()),
            Action::ClickRegion { roi_diminish, .. } | Action::ClickMatch { roi_diminish, .. }
                if !(roi_diminish.is_finite() && *roi_diminish >= 1.0) =>
            {
                Err(format!("roi_diminish must be >= 1, got {}", roi_diminish))
            }
            Action::ClickMatch { .. } if !matches!(self.detection, Detection::Image { .. }) => {
                Err(format!("click_match needs image detection, not {}", self.detection.kind()))
            }
            _ => Ok(()),
        }
    }
}

fn check_seconds(field: &str, value: f64) -> Result<(), String> {
    if value >= 0.0 && value <= MAX_SECONDS {
        Ok(())
    } else {
        Err(format!("{} must be in [0, {}], got {}", field, MAX_SECONDS, value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Case-insensitive regex matched against window titles.
    #[serde(default)]
    pub window_pattern: String,
    /// Where image templates are resolved from. Relative to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets_dir: Option<PathBuf>,
    /// Directory holding the OCR models. Defaults to `~/.cache/ocrs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_models: Option<PathBuf>,
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self { window_pattern: String::new(), assets_dir: None, ocr_models: None, tasks: Vec::new() }
    }
}

/// Same document with tasks kept as raw JSON, so one bad entry can be skipped.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    window_pattern: String,
    #[serde(default)]
    assets_dir: Option<PathBuf>,
    #[serde(default)]
    ocr_models: Option<PathBuf>,
    #[serde(default, alias = "regions")]
    tasks: Vec<Value>,
}

impl Config {
    /// Load from `path`, writing an empty default if the file does not exist.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            logger::warn(&format!("config {} not found, creating an empty one", path.display()));
            let cfg = Self::default();
            if let Err(e) = cfg.save(path) {
                logger::error(&format!("failed to create default config: {:#}", e));
            }
            return cfg;
        }

        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                logger::error(&format!("failed to read {}: {}", path.display(), e));
                return Self::default();
            }
        };

        match Self::parse(&text) {
            Ok(cfg) => {
                logger::info(&format!("loaded {} task(s) from {}", cfg.tasks.len(), path.display()));
                cfg
            }
            Err(e) => {
                logger::error(&format!("{} is not valid JSON: {}", path.display(), e));
                Self::default()
            }
        }
    }

    /// Parse a document. Only a top-level JSON error is fatal; broken or
    /// invalid task entries are logged and dropped.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(text).context("parse config")?;
        let mut tasks = Vec::with_capacity(raw.tasks.len());
        for (i, value) in raw.tasks.into_iter().enumerate() {
            let label = value
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{}", i));
            match serde_json::from_value::<TaskConfig>(value) {
                Ok(task) => match task.validate() {
                    Ok(()) => tasks.push(task),
                    Err(reason) => logger::error(&format!("skipping task {}: {}", label, reason)),
                },
                Err(e) => logger::error(&format!("skipping task {}: {}", label, e)),
            }
        }
        Ok(Self { window_pattern: raw.window_pattern, assets_dir: raw.assets_dir, ocr_models: raw.ocr_models, tasks })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
            }
        }
        let json = serde_json::to_string_pretty(self).context("serialize config")?;
        fs::write(path, json).with_context(|| format!("write {:?}", path))?;
        Ok(())
    }

    /// Directory templates are resolved against.
    pub fn assets_root(&self, config_path: &Path) -> PathBuf {
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        match &self.assets_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base.join(dir),
            None => base.join("assets"),
        }
    }

    /// Directory the OCR models are loaded from, if one can be named.
    pub fn ocr_models_dir(&self, config_path: &Path) -> Option<PathBuf> {
        let base = config_path.parent().unwrap_or_else(|| Path::new("."));
        match &self.ocr_models {
            Some(dir) if dir.is_absolute() => Some(dir.clone()),
            Some(dir) => Some(base.join(dir)),
            None => crate::ocr::default_models_dir(),
        }
    }

    /// True when some task reads text, so OCR models are worth loading.
    pub fn needs_ocr(&self) -> bool {
        self.tasks.iter().any(|t| matches!(t.detection, Detection::Ocr { .. }))
    }
}
