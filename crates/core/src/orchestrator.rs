use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};

use crate::control::RunState;
use crate::detect::{Condition, DetectorFactory};
use crate::engine::{StatusBoard, StatusSlot, TriggerLoop};
use crate::logger;
use crate::platform::Platform;
use crate::settings::{Config, TaskConfig};
use crate::sleep::Clock;
use crate::types::*;

/// What a run works on: the target window pattern and its tasks.
#[derive(Debug, Clone)]
pub struct Job {
    pub window_pattern: String,
    pub tasks: Vec<TaskConfig>,
    pub assets_root: PathBuf,
}

impl Job {
    pub fn from_config(config: &Config, assets_root: PathBuf) -> Self {
        Self { window_pattern: config.window_pattern.clone(), tasks: config.tasks.clone(), assets_root }
    }
}

/// Owns the run flags and one worker thread per task.
pub struct Orchestrator {
    platform: Arc<dyn Platform>,
    detectors: Arc<dyn DetectorFactory>,
    clock: Arc<dyn Clock>,
    job: Job,
    run: Arc<RunState>,
    board: StatusBoard,
    workers: Vec<JoinHandle<()>>,
    seed: Option<u64>,
}

impl Orchestrator {
    pub fn new(platform: Arc<dyn Platform>, detectors: Arc<dyn DetectorFactory>, clock: Arc<dyn Clock>, job: Job) -> Self {
        let entries = job
            .tasks
            .iter()
            .map(|t| TaskEntry {
                name: t.name.clone(),
                summary: format!("{} -> {}", t.detection.summary(), t.action.summary()),
                ..Default::default()
            })
            .collect();
        for t in &job.tasks {
            logger::register_task(&t.name);
        }
        Self {
            platform,
            detectors,
            clock,
            job,
            run: RunState::new(),
            board: Arc::new(Mutex::new(entries)),
            workers: Vec::new(),
            seed: None,
        }
    }

    /// Seed every worker's randomness (worker i gets `seed + i`).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn run_state(&self) -> Arc<RunState> {
        Arc::clone(&self.run)
    }

    pub fn board(&self) -> StatusBoard {
        Arc::clone(&self.board)
    }

    /// Resolve the target window and spawn a worker per task. Returns once
    /// the workers are spawned.
    pub fn start(&mut self) -> Result<()> {
        if self.run.is_running() {
            bail!("already running");
        }
        if self.job.tasks.is_empty() {
            bail!("no tasks configured");
        }
        let (window_id, title) = self
            .platform
            .get_instances(&self.job.window_pattern)
            .into_iter()
            .next()
            .with_context(|| format!("no window matches {:?}", self.job.window_pattern))?;

        self.workers.retain(|w| !w.is_finished());
        if !self.run.start() {
            bail!("already running");
        }
        logger::info(&format!("started on {} ({} task(s))", title, self.job.tasks.len()));

        for (index, task) in self.job.tasks.iter().enumerate() {
            let slot = StatusSlot::new(Arc::clone(&self.board), index);
            slot.update(|e| {
                e.phase = Phase::Idle;
                e.status.clear();
                e.error = None;
            });
            let worker = Worker {
                task: task.clone(),
                window_id,
                assets_root: self.job.assets_root.clone(),
                platform: Arc::clone(&self.platform),
                detectors: Arc::clone(&self.detectors),
                clock: Arc::clone(&self.clock),
                run: self.run.handle(),
                slot,
                seed: self.seed.map(|s| s.wrapping_add(index as u64)),
            };
            let handle = thread::Builder::new()
                .name(format!("task-{}", task.name))
                .spawn(move || worker.run())
                .with_context(|| format!("spawn worker for {}", task.name))?;
            self.workers.push(handle);
        }
        Ok(())
    }

    /// Flip pause. Returns the new paused value.
    pub fn toggle_pause(&self) -> Result<bool> {
        match self.run.toggle_pause() {
            Some(paused) => {
                logger::info(if paused { "paused" } else { "resumed" });
                Ok(paused)
            }
            None => bail!("not running"),
        }
    }

    /// Signal every worker to stop. Does not wait for them.
    pub fn stop(&self) {
        if self.run.is_running() {
            logger::info("stopping");
        }
        self.run.stop();
    }

    /// Wait for all spawned workers to exit.
    pub fn join(&mut self) {
        for w in self.workers.drain(..) {
            w.join().ok();
        }
    }

    fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::StartPause => {
                let result = if self.run.is_running() { self.toggle_pause().map(|_| ()) } else { self.start() };
                if let Err(e) = result {
                    logger::error(&format!("cannot start: {:#}", e));
                }
            }
            Command::Stop => self.stop(),
            Command::Quit => {
                logger::info("shutting down");
                self.stop();
                self.join();
                return false;
            }
        }
        true
    }

    /// Serve commands until Quit or the sender goes away.
    pub fn serve(mut self, cmd_rx: mpsc::Receiver<Command>) {
        while let Ok(cmd) = cmd_rx.recv() {
            if !self.handle(cmd) {
                return;
            }
        }
        self.stop();
        self.join();
    }
}

struct Worker {
    task: TaskConfig,
    window_id: WindowId,
    assets_root: PathBuf,
    platform: Arc<dyn Platform>,
    detectors: Arc<dyn DetectorFactory>,
    clock: Arc<dyn Clock>,
    run: crate::control::RunHandle,
    slot: StatusSlot,
    seed: Option<u64>,
}

impl Worker {
    fn run(self) {
        // binding failure ends only this worker
        let window = match self.platform.create_window(self.window_id) {
            Ok(w) => w,
            Err(e) => {
                let msg = format!("cannot bind window: {:#}", e);
                logger::error_p(&self.task.name, &msg);
                self.slot.update(|entry| {
                    entry.phase = Phase::Failed;
                    entry.error = Some(msg);
                });
                return;
            }
        };
        let condition = Condition::build(&self.task, &self.assets_root, self.detectors.as_ref(), self.clock.now());
        if condition.is_unverified() {
            self.slot.update(|entry| entry.status = "unverified".into());
        }
        let mut trigger = TriggerLoop::new(self.task, window, condition, self.run, self.clock, self.slot);
        if let Some(seed) = self.seed {
            trigger = trigger.with_seed(seed);
        }
        trigger.run();
    }
}
