pub mod hotkey;
pub mod stub;

#[cfg(target_os = "macos")]
pub mod darwin;

use std::sync::Arc;

use anyhow::Result;

use crate::logger;
use crate::types::*;

/// Handle to one OS window, bound by a single worker.
pub trait WindowHandle: Send {
    fn id(&self) -> WindowId;
    fn title(&self) -> &str;
    /// Bring the window to the foreground before input is sent.
    fn activate(&mut self);
    /// Grab `area` (window coordinates), or the whole client area.
    fn capture(&mut self, area: Option<Rect>) -> Result<Capture, CaptureError>;
    fn click(&mut self, x: i32, y: i32) -> Result<()>;
    fn send_key(&mut self, key: &str) -> Result<()>;
}

/// Window enumeration and handle factory. Shared by all workers.
pub trait Platform: Send + Sync {
    /// Windows whose title matches `pattern` (case-insensitive regex).
    fn get_instances(&self, pattern: &str) -> Vec<(WindowId, String)>;
    fn create_window(&self, window_id: WindowId) -> Result<Box<dyn WindowHandle>>;
    /// True for the simulated desktop, whose frames carry a text strip
    /// instead of real text.
    fn simulated(&self) -> bool {
        false
    }
}

/// Create the platform appropriate for the current OS.
pub fn create_platform(force_stub: bool) -> Arc<dyn Platform> {
    if force_stub {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        return Arc::new(stub::StubPlatform::default());
    }
    #[cfg(target_os = "macos")]
    {
        logger::register_prefix("darwin", logger::COLOR_GRAY);
        Arc::new(darwin::DarwinPlatform::new())
    }
    #[cfg(not(target_os = "macos"))]
    {
        logger::register_prefix("stub", logger::COLOR_GRAY);
        logger::warn("no native window backend for this OS, using the simulated window");
        Arc::new(stub::StubPlatform::default())
    }
}
