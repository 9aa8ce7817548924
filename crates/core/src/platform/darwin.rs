use std::process::{Command as ProcessCommand, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use core_foundation::array::CFArray;
use core_foundation::base::TCFType;
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_graphics::event::*;
use core_graphics::event_source::*;
use core_graphics::geometry::*;
use core_graphics::window::*;
use regex::RegexBuilder;

use super::{Platform, WindowHandle};
use crate::logger;
use crate::types::*;

type WindowInfo = CFDictionary<CFString, *const std::ffi::c_void>;

// AppleScript key codes for named keys
fn applescript_key_code(key: &str) -> Option<u16> {
    match key {
        "enter" | "return" => Some(36),
        "escape" | "esc" => Some(53),
        "delete" | "backspace" => Some(51),
        "tab" => Some(48),
        "space" => Some(49),
        "up" => Some(126),
        "down" => Some(125),
        "left" => Some(123),
        "right" => Some(124),
        "f1" => Some(122),
        "f2" => Some(120),
        "f3" => Some(99),
        "f4" => Some(118),
        "f5" => Some(96),
        "f6" => Some(97),
        "f7" => Some(98),
        "f8" => Some(100),
        "f9" => Some(101),
        "f10" => Some(109),
        _ => None,
    }
}

/// AppleScript that sends `key` (e.g. "1", "shift+tab", "cmd+a") to `pid`.
fn key_script(pid: i32, key: &str) -> Option<String> {
    let parts: Vec<&str> = key.split('+').collect();
    let main_key = *parts.last()?;
    let mut modifiers = Vec::new();
    for part in &parts[..parts.len() - 1] {
        match part.to_lowercase().as_str() {
            "cmd" | "command" => modifiers.push("command down"),
            "shift" => modifiers.push("shift down"),
            "ctrl" | "control" => modifiers.push("control down"),
            "alt" | "option" => modifiers.push("option down"),
            _ => {}
        }
    }

    let mut chars = main_key.chars();
    let lower = match (chars.next(), chars.next()) {
        (Some(ch), None) => {
            if ch.is_ascii_uppercase() && !modifiers.contains(&"shift down") {
                modifiers.push("shift down");
            }
            ch.to_lowercase().to_string()
        }
        _ => main_key.to_lowercase(),
    };

    let key_part = if let Some(code) = applescript_key_code(&lower) {
        format!("key code {}", code)
    } else if lower.chars().count() == 1 {
        format!("keystroke \"{}\"", lower.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        return None;
    };
    let using = if modifiers.is_empty() { String::new() } else { format!(" using {{{}}}", modifiers.join(", ")) };
    Some(format!("tell application \"System Events\" to tell process id {} to {}{}", pid, key_part, using))
}

fn osascript(script: &str) -> Result<()> {
    let status = ProcessCommand::new("osascript")
        .arg("-e")
        .arg(script)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .context("run osascript")?;
    if !status.success() {
        bail!("osascript exited with {}", status);
    }
    Ok(())
}

/// On-screen, layer-0 window list.
fn window_list() -> Option<Vec<WindowInfo>> {
    unsafe {
        let option = kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements;
        let list_ref = CGWindowListCopyWindowInfo(option, kCGNullWindowID);
        if list_ref.is_null() {
            return None;
        }
        let list: CFArray = CFArray::wrap_under_create_rule(list_ref as _);
        let values = list.get_all_values();
        Some(values.iter().map(|ptr| CFDictionary::wrap_under_get_rule(*ptr as _)).collect())
    }
}

pub struct DarwinPlatform;

impl DarwinPlatform {
    pub fn new() -> Self {
        DarwinPlatform
    }
}

impl Default for DarwinPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for DarwinPlatform {
    fn get_instances(&self, pattern: &str) -> Vec<(WindowId, String)> {
        let mut windows = Vec::new();
        let re = match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(r) => r,
            Err(e) => {
                logger::error_p("darwin", &format!("bad window pattern {:?}: {}", pattern, e));
                return windows;
            }
        };
        let Some(list) = window_list() else {
            logger::warn_p("darwin", "failed to get window list");
            return windows;
        };

        for dict in &list {
            let name = get_cf_string(dict, "kCGWindowName").unwrap_or_default();
            let owner = get_cf_string(dict, "kCGWindowOwnerName").unwrap_or_default();
            let title = if !name.is_empty() { &name } else { &owner };
            let is_match = !title.is_empty() && (re.is_match(&name) || re.is_match(&owner));
            if !is_match || get_cf_number(dict, "kCGWindowLayer") != Some(0) {
                continue;
            }
            if let Some(wid) = get_cf_number(dict, "kCGWindowNumber") {
                logger::info_p("darwin", &format!("found window \"{}\" (id {})", title, wid));
                windows.push((wid as WindowId, title.to_string()));
            }
        }
        windows
    }

    fn create_window(&self, window_id: WindowId) -> Result<Box<dyn WindowHandle>> {
        let mut win = DarwinWindow { window_id: window_id as CGWindowID, title: String::new(), pid: None, bounds: None };
        win.refresh();
        if win.bounds.is_none() {
            bail!("window {} is not on screen", window_id);
        }
        Ok(Box::new(win))
    }
}

struct DarwinWindow {
    window_id: CGWindowID,
    title: String,
    pid: Option<i32>,
    /// Screen-space bounds, refreshed before every capture and click.
    bounds: Option<Rect>,
}

impl DarwinWindow {
    fn refresh(&mut self) {
        self.bounds = None;
        let Some(list) = window_list() else { return };
        for dict in &list {
            if get_cf_number(dict, "kCGWindowNumber") != Some(self.window_id as i64) {
                continue;
            }
            let name = get_cf_string(dict, "kCGWindowName").unwrap_or_default();
            let owner = get_cf_string(dict, "kCGWindowOwnerName").unwrap_or_default();
            self.title = if !name.is_empty() { name } else { owner };
            self.pid = get_cf_number(dict, "kCGWindowOwnerPID").map(|v| v as i32);
            if let Some(b) = get_cf_dict(dict, "kCGWindowBounds") {
                let n = |key| get_cf_number(&b, key).unwrap_or(0) as i32;
                self.bounds = Rect::new(n("X"), n("Y"), n("Width"), n("Height")).ok();
            }
            return;
        }
    }

    fn pid(&mut self) -> Result<i32> {
        if self.pid.is_none() {
            self.refresh();
        }
        self.pid.context("window owner process not found")
    }
}

impl WindowHandle for DarwinWindow {
    fn id(&self) -> WindowId {
        self.window_id as WindowId
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn activate(&mut self) {
        let Ok(pid) = self.pid() else { return };
        let script = format!(
            "tell application \"System Events\" to set frontmost of first process whose unix id is {} to true",
            pid
        );
        if let Err(e) = osascript(&script) {
            logger::warn_p("darwin", &format!("activate failed: {:#}", e));
        }
    }

    fn capture(&mut self, area: Option<Rect>) -> Result<Capture, CaptureError> {
        self.refresh();
        let bounds = self.bounds.ok_or_else(|| CaptureError::Backend("window is not on screen".into()))?;

        let screen = match area {
            Some(r) => r.offset(bounds.x, bounds.y),
            None => bounds,
        };
        let cg_rect = CGRect::new(
            &CGPoint::new(screen.x as f64, screen.y as f64),
            &CGSize::new(screen.w as f64, screen.h as f64),
        );
        let options = kCGWindowImageBoundsIgnoreFraming | kCGWindowImageNominalResolution;
        let image = create_image(cg_rect, kCGWindowListOptionIncludingWindow, self.window_id, options)
            .ok_or(CaptureError::Empty)?;

        let bytes_per_row = image.bytes_per_row() as u32;
        let width = (image.width() as u32).min(bytes_per_row / 4);
        let height = image.height() as u32;
        let data = image.data().bytes().to_vec();
        let frame = Capture { data, width, height, bytes_per_row };
        if frame.is_empty() {
            return Err(CaptureError::Empty);
        }
        Ok(frame)
    }

    fn click(&mut self, x: i32, y: i32) -> Result<()> {
        self.refresh();
        let bounds = self.bounds.context("window is not on screen")?;
        let pid = self.pid()?;
        let point = CGPoint::new(bounds.x as f64 + x as f64, bounds.y as f64 + y as f64);

        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|_| anyhow::anyhow!("cannot create event source"))?;
        for kind in [CGEventType::LeftMouseDown, CGEventType::LeftMouseUp] {
            let event = CGEvent::new_mouse_event(source.clone(), kind, point, CGMouseButton::Left)
                .map_err(|_| anyhow::anyhow!("cannot create mouse event"))?;
            event.post_to_pid(pid);
            thread::sleep(Duration::from_millis(15));
        }
        Ok(())
    }

    fn send_key(&mut self, key: &str) -> Result<()> {
        let pid = self.pid()?;
        let script = key_script(pid, key).with_context(|| format!("unknown key {:?}", key))?;
        osascript(&script)?;
        thread::sleep(Duration::from_millis(50));
        Ok(())
    }
}

// --- CF dictionary helpers ---

fn get_cf_string(dict: &WindowInfo, key: &str) -> Option<String> {
    let value = dict.find(&CFString::new(key))?;
    let s: CFString = unsafe { CFString::wrap_under_get_rule(*value as _) };
    Some(s.to_string())
}

fn get_cf_number(dict: &WindowInfo, key: &str) -> Option<i64> {
    let value = dict.find(&CFString::new(key))?;
    let n: CFNumber = unsafe { CFNumber::wrap_under_get_rule(*value as _) };
    n.to_i64()
}

fn get_cf_dict(dict: &WindowInfo, key: &str) -> Option<WindowInfo> {
    let value = dict.find(&CFString::new(key))?;
    Some(unsafe { CFDictionary::wrap_under_get_rule(*value as _) })
}
