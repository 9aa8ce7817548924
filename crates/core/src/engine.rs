//! The per-task trigger loop: scan, act, cool down, repeat.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::click::click_point;
use crate::control::RunHandle;
use crate::detect::{Condition, Verdict};
use crate::logger;
use crate::platform::WindowHandle;
use crate::settings::{Action, TaskConfig};
use crate::sleep::{interruptible_sleep, scale, secs, wait_while_paused, Clock};
use crate::types::{Phase, Rect, TaskEntry};

/// Activation timestamps kept for interval learning.
pub const MAX_HISTORY: usize = 3;
/// Consecutive scan errors before the long backoff.
pub const BACKOFF_AFTER: u32 = 5;
pub const RETRY_DELAY: Duration = Duration::from_secs(1);
pub const BACKOFF_DELAY: Duration = Duration::from_secs(5);

pub type StatusBoard = Arc<Mutex<Vec<TaskEntry>>>;

/// Mutable loop bookkeeping, owned by one worker.
#[derive(Debug, Default, Clone)]
pub struct LoopState {
    pub last_action_time: Option<Duration>,
    pub in_cooldown: bool,
    pub history: VecDeque<Duration>,
    pub expected_interval: Option<Duration>,
    pub recovery_due_time: Option<Duration>,
    pub consecutive_errors: u32,
}

impl LoopState {
    /// Leave cooldown once `cooldown` has passed since the last action.
    /// Returns true on the transition.
    pub fn expire_cooldown(&mut self, now: Duration, cooldown: Duration) -> bool {
        if !self.in_cooldown {
            return false;
        }
        let since = self.last_action_time.map_or(cooldown, |t| now.saturating_sub(t));
        if since >= cooldown {
            self.in_cooldown = false;
            return true;
        }
        false
    }

    /// Record an action at `now`: enter cooldown and relearn the interval.
    pub fn record_activation(&mut self, now: Duration, multiplier: f64) {
        self.last_action_time = Some(now);
        self.in_cooldown = true;
        self.history.push_back(now);
        while self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
        if self.history.len() >= 2 {
            let (first, last) = (self.history[0], self.history[self.history.len() - 1]);
            let gaps = (self.history.len() - 1) as u32;
            let expected = last.saturating_sub(first) / gaps;
            self.expected_interval = Some(expected);
            self.recovery_due_time = Some(now.saturating_add(scale(expected, multiplier)));
        }
    }

    /// Recovery fires only outside cooldown, after an interval was learned
    /// and its due time passed.
    pub fn recovery_due(&self, now: Duration) -> bool {
        !self.in_cooldown
            && self.expected_interval.is_some()
            && self.recovery_due_time.is_some_and(|due| now >= due)
    }

    /// Push the due time out again after a recovery action that failed.
    pub fn rearm_recovery(&mut self, now: Duration, multiplier: f64) {
        if let Some(expected) = self.expected_interval {
            self.recovery_due_time = Some(now.saturating_add(scale(expected, multiplier)));
        }
    }

    /// Count a failed scan and return how long to wait before retrying.
    pub fn note_error(&mut self) -> Duration {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= BACKOFF_AFTER {
            self.consecutive_errors = 0;
            BACKOFF_DELAY
        } else {
            RETRY_DELAY
        }
    }
}

/// One task's row on the status board.
#[derive(Clone)]
pub struct StatusSlot {
    board: StatusBoard,
    index: usize,
}

impl StatusSlot {
    pub fn new(board: StatusBoard, index: usize) -> Self {
        Self { board, index }
    }

    pub fn update(&self, f: impl FnOnce(&mut TaskEntry)) {
        let mut entries = match self.board.lock() {
            Ok(e) => e,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entry) = entries.get_mut(self.index) {
            f(entry);
        }
    }

    pub fn set_phase(&self, phase: Phase) {
        self.update(|e| e.phase = phase);
    }
}

pub struct TriggerLoop {
    task: TaskConfig,
    window: Box<dyn WindowHandle>,
    condition: Condition,
    run: RunHandle,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    slot: StatusSlot,
    state: LoopState,
    /// Window-space box of the latest located match, for `click_match`.
    last_match: Option<Rect>,
}

impl TriggerLoop {
    pub fn new(
        task: TaskConfig,
        window: Box<dyn WindowHandle>,
        condition: Condition,
        run: RunHandle,
        clock: Arc<dyn Clock>,
        slot: StatusSlot,
    ) -> Self {
        Self {
            task,
            window,
            condition,
            run,
            clock,
            rng: StdRng::from_entropy(),
            slot,
            state: LoopState::default(),
            last_match: None,
        }
    }

    /// Replace the click/timer randomness, for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Loop until the run stops. Scan errors are logged and retried; nothing
    /// escapes this function.
    pub fn run(mut self) {
        let name = self.task.name.clone();
        if matches!(self.task.action, Action::ClickMatch { .. }) && self.condition.is_unverified() {
            let msg = "click_match has nothing to locate without its template".to_string();
            logger::error_p(&name, &msg);
            self.slot.update(|entry| {
                entry.phase = Phase::Failed;
                entry.error = Some(msg);
            });
            return;
        }
        logger::info_p(&name, &format!("watching {} ({})", self.window.title(), self.task.detection.summary()));
        self.slot.set_phase(Phase::Scanning);

        let scan = secs(self.task.scan_frequency);
        let cooldown = secs(self.task.cooldown);
        let multiplier = self.task.recovery_multiplier;

        while self.run.is_running() {
            if self.run.is_paused() {
                self.slot.set_phase(Phase::Paused);
                if !wait_while_paused(&self.run, self.clock.as_ref()) {
                    break;
                }
                self.slot.set_phase(self.active_phase());
            }

            let now = self.clock.now();
            if self.state.expire_cooldown(now, cooldown) {
                self.slot.set_phase(Phase::Scanning);
            }

            if self.task.recovery_enabled && self.state.recovery_due(now) {
                let idle = self.state.last_action_time.map_or(Duration::ZERO, |t| now.saturating_sub(t));
                logger::info_p(&name, &format!("nothing matched for {:.1}s, acting anyway", idle.as_secs_f64()));
                if self.act() {
                    self.record();
                } else {
                    self.state.rearm_recovery(now, multiplier);
                }
            } else if !self.state.in_cooldown {
                match self.scan(now) {
                    Ok(Verdict::Matched { why, at }) => {
                        self.clear_errors();
                        logger::info_p(&name, &why);
                        if let Some(found) = at {
                            self.last_match = Some(self.to_window(found));
                        }
                        if self.act() {
                            self.record();
                        }
                    }
                    Ok(Verdict::NoMatch) => self.clear_errors(),
                    Err(e) => {
                        let delay = self.state.note_error();
                        let msg = format!("{:#}", e);
                        logger::warn_p(&name, &format!("scan failed: {}; retry in {}s", msg, delay.as_secs()));
                        self.slot.update(|entry| entry.error = Some(msg));
                        if !interruptible_sleep(&self.run, self.clock.as_ref(), delay) {
                            break;
                        }
                        continue;
                    }
                }
            }

            if !interruptible_sleep(&self.run, self.clock.as_ref(), scan) {
                break;
            }
        }

        self.slot.set_phase(Phase::Stopped);
        logger::info_p(&name, "stopped");
    }

    fn active_phase(&self) -> Phase {
        if self.state.in_cooldown { Phase::Cooldown } else { Phase::Scanning }
    }

    fn scan(&mut self, now: Duration) -> Result<Verdict> {
        if !self.condition.needs_frame() {
            return self.condition.evaluate(None, now);
        }
        let frame = self.window.capture(self.task.area)?;
        if frame.is_empty() {
            return Err(crate::types::CaptureError::Empty.into());
        }
        #[cfg(feature = "debug-capture")]
        dump_frame(&self.task.name, &frame);
        self.condition.evaluate(Some(&frame), now)
    }

    /// Frame-relative box to window coordinates.
    fn to_window(&self, found: Rect) -> Rect {
        match self.task.area {
            Some(area) => found.offset(area.x, area.y),
            None => found,
        }
    }

    fn clear_errors(&mut self) {
        if self.state.consecutive_errors > 0 {
            self.state.consecutive_errors = 0;
            self.slot.update(|entry| entry.error = None);
        }
    }

    /// Perform the action. Returns false if the input could not be sent.
    fn act(&mut self) -> bool {
        self.window.activate();
        let result = match &self.task.action {
            Action::ClickRegion { region, shape, roi_diminish } => {
                let (x, y) = click_point(region, *shape, *roi_diminish, &mut self.rng);
                self.window.click(x, y).map(|_| format!("click ({}, {})", x, y))
            }
            Action::ClickMatch { shape, roi_diminish } => match self.last_match {
                Some(found) => {
                    let (x, y) = click_point(&found, *shape, *roi_diminish, &mut self.rng);
                    self.window.click(x, y).map(|_| format!("click ({}, {}) in {}", x, y, found))
                }
                None => Err(anyhow::anyhow!("no match location to click")),
            },
            Action::Key { key } => self.window.send_key(key).map(|_| format!("key '{}'", key)),
        };
        match result {
            Ok(done) => {
                logger::info_p(&self.task.name, &done);
                self.slot.update(|entry| entry.status = done);
                true
            }
            Err(e) => {
                let msg = format!("action failed: {:#}", e);
                logger::error_p(&self.task.name, &msg);
                self.slot.update(|entry| entry.error = Some(msg));
                false
            }
        }
    }

    fn record(&mut self) {
        let now = self.clock.now();
        self.state.record_activation(now, self.task.recovery_multiplier);
        self.condition.on_fired(now, &mut self.rng);
        self.slot.update(|entry| {
            entry.activations += 1;
            entry.phase = Phase::Cooldown;
        });
    }
}

#[cfg(feature = "debug-capture")]
fn dump_frame(task: &str, frame: &crate::types::Capture) {
    let img = image::RgbaImage::from_fn(frame.width, frame.height, |x, y| {
        let [b, g, r, a] = frame.pixel(x, y);
        image::Rgba([r, g, b, a])
    });
    let dir = std::path::Path::new("logs").join("captures");
    if std::fs::create_dir_all(&dir).is_ok() {
        img.save(dir.join(format!("{}.png", task))).ok();
    }
}
