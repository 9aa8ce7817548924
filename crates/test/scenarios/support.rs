//! Scripted collaborators for driving trigger loops on simulated time.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use ticker_core::control::RunState;
use ticker_core::detect::{Condition, DetectorFactory, TextReader};
use ticker_core::engine::{StatusSlot, TriggerLoop};
use ticker_core::hint::StripReader;
use ticker_core::matcher::{NccMatcher, TemplateMatcher};
use ticker_core::platform::WindowHandle;
use ticker_core::settings::{Action, Detection, TaskConfig};
use ticker_core::sleep::{Clock, ManualClock};
use ticker_core::types::*;

pub fn secs(v: f64) -> Duration {
    Duration::from_secs_f64(v)
}

#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Pause,
    Resume,
    Stop,
}

/// Manual clock that applies run-state signals once their time is reached.
/// A run always gets a final `Stop` so loops terminate.
pub struct ScriptClock {
    inner: ManualClock,
    run: Arc<RunState>,
    signals: Mutex<Vec<(Duration, Signal)>>,
}

impl ScriptClock {
    pub fn new(run: Arc<RunState>, stop_at: f64) -> Arc<Self> {
        Self::with_signals(run, stop_at, Vec::new())
    }

    pub fn with_signals(run: Arc<RunState>, stop_at: f64, mut signals: Vec<(f64, Signal)>) -> Arc<Self> {
        signals.push((stop_at, Signal::Stop));
        let mut signals: Vec<_> = signals.into_iter().map(|(t, s)| (secs(t), s)).collect();
        signals.sort_by_key(|(t, _)| *t);
        Arc::new(Self { inner: ManualClock::new(), run, signals: Mutex::new(signals) })
    }

    fn apply_due(&self) {
        let now = self.inner.now();
        let mut signals = self.signals.lock().unwrap();
        while signals.first().is_some_and(|(t, _)| *t <= now) {
            let (_, signal) = signals.remove(0);
            match signal {
                Signal::Pause | Signal::Resume => {
                    self.run.toggle_pause();
                }
                Signal::Stop => self.run.stop(),
            }
        }
    }
}

impl Clock for ScriptClock {
    fn now(&self) -> Duration {
        self.inner.now()
    }

    fn sleep(&self, d: Duration) {
        self.inner.sleep(d);
        self.apply_due();
    }
}

/// Everything the scripted window saw, in seconds since the run began.
#[derive(Debug, Default)]
pub struct Trace {
    pub captures: Vec<f64>,
    pub clicks: Vec<(f64, i32, i32)>,
    pub keys: Vec<f64>,
}

impl Trace {
    /// Times of every action, clicks and keys together.
    pub fn actions(&self) -> Vec<f64> {
        let mut all: Vec<f64> = self.clicks.iter().map(|c| c.0).chain(self.keys.iter().copied()).collect();
        all.sort_by(|a, b| a.total_cmp(b));
        all
    }
}

pub type FrameScript = Box<dyn FnMut(f64) -> Result<Capture, CaptureError> + Send>;

pub struct ScriptedWindow {
    clock: Arc<dyn Clock>,
    trace: Arc<Mutex<Trace>>,
    frame: FrameScript,
    fail_input: bool,
}

impl ScriptedWindow {
    pub fn new(clock: Arc<dyn Clock>, trace: Arc<Mutex<Trace>>, frame: FrameScript) -> Self {
        Self { clock, trace, frame, fail_input: false }
    }

    /// Clicks and keys are still traced but report failure.
    pub fn failing_input(mut self) -> Self {
        self.fail_input = true;
        self
    }

    fn input_result(&self) -> Result<()> {
        if self.fail_input {
            anyhow::bail!("input injection refused");
        }
        Ok(())
    }

    /// A window whose captures always succeed with a blank frame.
    pub fn blank(clock: Arc<dyn Clock>, trace: Arc<Mutex<Trace>>) -> Self {
        Self::new(clock, trace, Box::new(|_| Ok(Capture::filled(64, 32, [40, 40, 40]))))
    }

    fn t(&self) -> f64 {
        self.clock.now().as_secs_f64()
    }
}

impl WindowHandle for ScriptedWindow {
    fn id(&self) -> WindowId {
        1
    }

    fn title(&self) -> &str {
        "scripted"
    }

    fn activate(&mut self) {}

    fn capture(&mut self, _area: Option<Rect>) -> Result<Capture, CaptureError> {
        let t = self.t();
        self.trace.lock().unwrap().captures.push(t);
        (self.frame)(t)
    }

    fn click(&mut self, x: i32, y: i32) -> Result<()> {
        let t = self.t();
        self.trace.lock().unwrap().clicks.push((t, x, y));
        self.input_result()
    }

    fn send_key(&mut self, _key: &str) -> Result<()> {
        let t = self.t();
        self.trace.lock().unwrap().keys.push(t);
        self.input_result()
    }
}

pub type TextScript = Box<dyn FnMut(f64) -> Vec<TextHit> + Send>;

pub struct ScriptedReader {
    clock: Arc<dyn Clock>,
    script: TextScript,
}

impl TextReader for ScriptedReader {
    fn read(&mut self, _frame: &Capture) -> Result<Vec<TextHit>> {
        Ok((self.script)(self.clock.now().as_secs_f64()))
    }
}

/// Hands out one scripted reader, then falls back to the strip reader.
pub struct ScriptedDetectors {
    reader: Mutex<Option<Box<dyn TextReader>>>,
}

impl ScriptedDetectors {
    pub fn new(clock: Arc<dyn Clock>, script: TextScript) -> Self {
        Self { reader: Mutex::new(Some(Box::new(ScriptedReader { clock, script }))) }
    }

    pub fn builtin() -> Self {
        Self { reader: Mutex::new(None) }
    }
}

impl DetectorFactory for ScriptedDetectors {
    fn text_reader(&self) -> Result<Box<dyn TextReader>> {
        Ok(self.reader.lock().unwrap().take().unwrap_or_else(|| Box::new(StripReader)))
    }

    fn template_matcher(&self) -> Box<dyn TemplateMatcher> {
        Box::new(NccMatcher)
    }
}

pub fn ocr_task(pattern: &str) -> TaskConfig {
    TaskConfig {
        name: "scenario".into(),
        area: None,
        detection: Detection::Ocr { text_patterns: vec![pattern.into()], confidence_threshold: 0.6 },
        action: Action::Key { key: "1".into() },
        scan_frequency: 0.1,
        cooldown: 0.6,
        recovery_enabled: false,
        recovery_multiplier: 2.0,
    }
}

/// Run one trigger loop to completion on the calling thread and return its
/// final status row.
pub fn run_loop(
    task: TaskConfig,
    run: &Arc<RunState>,
    clock: Arc<dyn Clock>,
    window: ScriptedWindow,
    detectors: &dyn DetectorFactory,
    assets: &Path,
) -> TaskEntry {
    let board = Arc::new(Mutex::new(vec![TaskEntry { name: task.name.clone(), ..Default::default() }]));
    run.start();
    let condition = Condition::build(&task, assets, detectors, clock.now());
    let slot = StatusSlot::new(Arc::clone(&board), 0);
    TriggerLoop::new(task, Box::new(window), condition, run.handle(), clock, slot)
        .with_seed(42)
        .run();
    let entry = board.lock().unwrap()[0].clone();
    entry
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}
