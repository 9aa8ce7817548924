use anyhow::{bail, Result};
use regex::RegexBuilder;

use super::{Platform, WindowHandle};
use crate::hint::paint_strip;
use crate::logger;
use crate::types::*;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const BACKGROUND: [u8; 3] = [0x30, 0x28, 0x20];

/// Simulated desktop. Every window shows `text` as a pixel strip in the
/// top-left corner of each capture.
pub struct StubPlatform {
    windows: Vec<(WindowId, String)>,
    text: String,
}

impl StubPlatform {
    pub fn new(windows: Vec<(WindowId, String)>, text: impl Into<String>) -> Self {
        Self { windows, text: text.into() }
    }
}

impl Default for StubPlatform {
    fn default() -> Self {
        Self::new(
            vec![
                (10001, "RuneScape".into()),
                (10002, "World of Warcraft".into()),
                (10003, "Notepad".into()),
            ],
            "Ready",
        )
    }
}

impl Platform for StubPlatform {
    fn get_instances(&self, pattern: &str) -> Vec<(WindowId, String)> {
        logger::info_p("stub", &format!("get_instances(\"{}\")", pattern));
        let re = match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => re,
            Err(e) => {
                logger::error_p("stub", &format!("bad window pattern {:?}: {}", pattern, e));
                return Vec::new();
            }
        };
        let found: Vec<_> = self.windows.iter().filter(|(_, title)| re.is_match(title)).cloned().collect();
        if found.is_empty() {
            // keep --stub runs usable with any pattern
            return vec![(30001, format!("Window<{}>", pattern))];
        }
        found
    }

    fn create_window(&self, window_id: WindowId) -> Result<Box<dyn WindowHandle>> {
        logger::info_p("stub", &format!("create_window({})", window_id));
        let title = match self.windows.iter().find(|(id, _)| *id == window_id) {
            Some((_, title)) => title.clone(),
            None if window_id == 30001 => "Window<stub>".to_string(),
            None => bail!("no window with id {}", window_id),
        };
        Ok(Box::new(StubWindow { window_id, title, text: self.text.clone() }))
    }

    fn simulated(&self) -> bool {
        true
    }
}

struct StubWindow {
    window_id: WindowId,
    title: String,
    text: String,
}

impl WindowHandle for StubWindow {
    fn id(&self) -> WindowId {
        self.window_id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn activate(&mut self) {
        logger::info_p("stub", &format!("win({}).activate()", self.window_id));
    }

    fn capture(&mut self, area: Option<Rect>) -> Result<Capture, CaptureError> {
        let (w, h) = match area {
            Some(r) => (r.w as u32, r.h as u32),
            None => (WIDTH, HEIGHT),
        };
        if w == 0 || h == 0 {
            return Err(CaptureError::Empty);
        }
        let mut frame = Capture::filled(w, h, BACKGROUND);
        paint_strip(&mut frame, &self.text, 2, h.min(6));
        Ok(frame)
    }

    fn click(&mut self, x: i32, y: i32) -> Result<()> {
        logger::info_p("stub", &format!("win({}).click({}, {})", self.window_id, x, y));
        Ok(())
    }

    fn send_key(&mut self, key: &str) -> Result<()> {
        logger::info_p("stub", &format!("win({}).send_key(\"{}\")", self.window_id, key));
        Ok(())
    }
}
