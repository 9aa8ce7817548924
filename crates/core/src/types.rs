use std::fmt;

use image::{GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Window identifier (CGWindowID on macOS, HWND on Windows)
pub type WindowId = u64;

/// Rectangle in window pixel coordinates. Width and height are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[i32; 4]", into = "[i32; 4]")]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Result<Self, String> {
        if w <= 0 || h <= 0 {
            return Err(format!("rect {}x{} must have positive width and height", w, h));
        }
        Ok(Self { x, y, w, h })
    }

    /// Integer center, rounded toward the top-left like pixel grids are.
    pub fn center(&self) -> (i32, i32) {
        (self.x.saturating_add(self.w / 2), self.y.saturating_add(self.h / 2))
    }

    /// Edges saturate at `i32::MAX` instead of overflowing.
    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.w)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.h)
    }

    /// Same size, moved by (dx, dy). Used to turn a box found inside a
    /// capture area into window coordinates.
    pub fn offset(&self, dx: i32, dy: i32) -> Rect {
        Rect { x: self.x.saturating_add(dx), y: self.y.saturating_add(dy), w: self.w, h: self.h }
    }

    /// Inclusive on all four edges.
    pub fn contains(&self, px: i32, py: i32) -> bool {
        px >= self.x && px <= self.right() && py >= self.y && py <= self.bottom()
    }
}

impl TryFrom<[i32; 4]> for Rect {
    type Error = String;

    fn try_from([x, y, w, h]: [i32; 4]) -> Result<Self, Self::Error> {
        Rect::new(x, y, w, h)
    }
}

impl From<Rect> for [i32; 4] {
    fn from(r: Rect) -> Self {
        [r.x, r.y, r.w, r.h]
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}x{})", self.x, self.y, self.w, self.h)
    }
}

/// Raw screenshot pixel data (BGRA)
#[derive(Debug, Clone)]
pub struct Capture {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
}

impl Capture {
    /// A frame filled with one BGR color, fully opaque.
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            data.extend_from_slice(&[bgr[0], bgr[1], bgr[2], 255]);
        }
        Self { data, width, height, bytes_per_row: width * 4 }
    }

    pub fn from_gray(img: &GrayImage) -> Self {
        let (width, height) = img.dimensions();
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for px in img.pixels() {
            let v = px.0[0];
            data.extend_from_slice(&[v, v, v, 255]);
        }
        Self { data, width, height, bytes_per_row: width * 4 }
    }

    /// BGRA bytes at (x, y). Out-of-range reads return transparent black.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        if x >= self.width || y >= self.height {
            return [0; 4];
        }
        let idx = (y * self.bytes_per_row + x * 4) as usize;
        match self.data.get(idx..idx + 4) {
            Some(p) => [p[0], p[1], p[2], p[3]],
            None => [0; 4],
        }
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, bgra: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = (y * self.bytes_per_row + x * 4) as usize;
        if let Some(p) = self.data.get_mut(idx..idx + 4) {
            p.copy_from_slice(&bgra);
        }
    }

    /// Drop alpha and reorder to RGB, for OCR and colour checks.
    pub fn to_rgb(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let [b, g, r, _] = self.pixel(x, y);
            Rgb([r, g, b])
        })
    }

    /// Luma conversion used by the template matcher.
    pub fn to_gray(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let [b, g, r, _] = self.pixel(x, y);
            let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            Luma([luma.round().clamp(0.0, 255.0) as u8])
        })
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }
}

/// Why a capture produced no usable frame.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// The window gave back nothing (minimized, covered, zero-sized).
    Empty,
    /// The backend failed outright.
    Backend(String),
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::Empty => write!(f, "capture returned no image"),
            CaptureError::Backend(msg) => write!(f, "capture failed: {}", msg),
        }
    }
}

impl std::error::Error for CaptureError {}

/// One text fragment reported by a text reader.
#[derive(Debug, Clone, PartialEq)]
pub struct TextHit {
    pub text: String,
    pub confidence: f32,
}

impl TextHit {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self { text: text.into(), confidence }
    }
}

/// Command from the TUI (or hotkeys) to the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start when stopped, otherwise flip pause.
    StartPause,
    Stop,
    Quit,
}

/// Coarse state of one worker, published for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Scanning,
    Cooldown,
    Paused,
    Stopped,
    Failed,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Scanning => "scanning",
            Phase::Cooldown => "cooldown",
            Phase::Paused => "paused",
            Phase::Stopped => "stopped",
            Phase::Failed => "error",
        }
    }
}

/// One configured task and the status its worker last reported
#[derive(Debug, Clone, Default)]
pub struct TaskEntry {
    pub name: String,
    pub summary: String,
    pub phase: Phase,
    pub activations: u32,
    pub status: String,
    pub error: Option<String>,
}
