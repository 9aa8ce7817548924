//! End-to-end trigger loop scenarios. Most run on a scripted clock so
//! minutes of loop time pass in milliseconds.

mod support;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use image::{GrayImage, Luma};
use libtest_mimic::{Arguments, Failed, Trial};
use ticker_core::control::RunState;
use ticker_core::detect::{BuiltinDetectors, Condition};
use ticker_core::engine::{StatusSlot, TriggerLoop};
use ticker_core::orchestrator::{Job, Orchestrator};
use ticker_core::platform::stub::StubPlatform;
use ticker_core::platform::{Platform, WindowHandle};
use ticker_core::settings::{Action, ClickShape, Config, Detection};
use ticker_core::sleep::{SystemClock, TICK};
use ticker_core::types::*;

use support::*;

fn check(cond: bool, msg: impl Into<String>) -> Result<(), Failed> {
    if cond {
        return Ok(());
    }
    let msg: String = msg.into();
    Err(msg.into())
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ticker-scenario-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).ok();
    dir
}

fn ocr_match_acts_once_then_cools() -> Result<(), Failed> {
    let run = RunState::new();
    let clock = ScriptClock::new(Arc::clone(&run), 0.35);
    let trace = Arc::new(Mutex::new(Trace::default()));
    let detectors = ScriptedDetectors::new(clock.clone(), Box::new(|_| vec![TextHit::new("Ready to cast", 0.8)]));
    let window = ScriptedWindow::blank(clock.clone(), Arc::clone(&trace));

    let entry = run_loop(ocr_task("Ready"), &run, clock, window, &detectors, Path::new("."));

    let trace = trace.lock().unwrap();
    check(trace.keys.len() == 1, format!("expected one key press, got {:?}", trace.keys))?;
    check(approx(trace.keys[0], 0.0), "action should happen on the first scan")?;
    // cooldown suppresses further captures
    check(trace.captures.len() == 1, format!("captures {:?}", trace.captures))?;
    check(entry.activations == 1, format!("activations {}", entry.activations))?;
    check(entry.phase == Phase::Stopped, format!("phase {:?}", entry.phase))
}

fn low_confidence_is_ignored() -> Result<(), Failed> {
    let run = RunState::new();
    let clock = ScriptClock::new(Arc::clone(&run), 1.0);
    let trace = Arc::new(Mutex::new(Trace::default()));
    let detectors = ScriptedDetectors::new(clock.clone(), Box::new(|_| vec![TextHit::new("Ready", 0.5)]));
    let window = ScriptedWindow::blank(clock.clone(), Arc::clone(&trace));

    let entry = run_loop(ocr_task("ready"), &run, clock, window, &detectors, Path::new("."));

    let trace = trace.lock().unwrap();
    check(trace.keys.is_empty(), "below-threshold text must not act")?;
    check(trace.captures.len() == 10, format!("expected a scan every 100ms, got {}", trace.captures.len()))?;
    check(entry.error.is_none(), "no match is not an error")
}

fn capture_failures_back_off() -> Result<(), Failed> {
    let run = RunState::new();
    let clock = ScriptClock::new(Arc::clone(&run), 18.5);
    let trace = Arc::new(Mutex::new(Trace::default()));
    let detectors = ScriptedDetectors::builtin();
    let window = ScriptedWindow::new(
        clock.clone(),
        Arc::clone(&trace),
        Box::new(|_| Err(CaptureError::Backend("window is minimized".into()))),
    );

    let entry = run_loop(ocr_task("ready"), &run, clock, window, &detectors, Path::new("."));

    let trace = trace.lock().unwrap();
    let expected = [0.0, 1.0, 2.0, 3.0, 4.0, 9.0, 10.0, 11.0, 12.0, 13.0, 18.0];
    check(trace.captures.len() == expected.len(), format!("captures {:?}", trace.captures))?;
    for (got, want) in trace.captures.iter().zip(expected) {
        check(approx(*got, want), format!("captures {:?}, expected {:?}", trace.captures, expected))?;
    }
    check(entry.error.is_some(), "failure should be on the status board")?;
    check(entry.phase == Phase::Stopped, "loop must survive until stopped")
}

fn recovery_fires_after_learned_interval() -> Result<(), Failed> {
    let run = RunState::new();
    let clock = ScriptClock::new(Arc::clone(&run), 901.0);
    let trace = Arc::new(Mutex::new(Trace::default()));
    let detectors = ScriptedDetectors::new(
        clock.clone(),
        Box::new(|t| {
            if t < 0.05 || (300.0..300.05).contains(&t) {
                vec![TextHit::new("Ready", 0.9)]
            } else {
                Vec::new()
            }
        }),
    );
    let window = ScriptedWindow::blank(clock.clone(), Arc::clone(&trace));
    let mut task = ocr_task("ready");
    task.recovery_enabled = true;
    task.recovery_multiplier = 2.0;

    let entry = run_loop(task, &run, clock, window, &detectors, Path::new("."));

    let trace = trace.lock().unwrap();
    check(trace.keys.len() == 3, format!("keys {:?}", trace.keys))?;
    check(approx(trace.keys[0], 0.0) && approx(trace.keys[1], 300.0), format!("keys {:?}", trace.keys))?;
    let fired = trace.keys[2];
    check((900.0..=902.0).contains(&fired), format!("recovery fired at {}", fired))?;
    check(!trace.captures.iter().any(|t| approx(*t, fired)), "recovery must not capture")?;
    check(entry.activations == 3, format!("activations {}", entry.activations))
}

fn pause_blocks_all_work() -> Result<(), Failed> {
    let run = RunState::new();
    let clock = ScriptClock::with_signals(
        Arc::clone(&run),
        7.0,
        vec![(1.0, Signal::Pause), (5.0, Signal::Resume)],
    );
    let trace = Arc::new(Mutex::new(Trace::default()));
    let detectors = ScriptedDetectors::new(clock.clone(), Box::new(|_| vec![TextHit::new("Ready", 0.9)]));
    let window = ScriptedWindow::blank(clock.clone(), Arc::clone(&trace));

    run_loop(ocr_task("ready"), &run, clock, window, &detectors, Path::new("."));

    let trace = trace.lock().unwrap();
    let during = |t: &f64| *t > 1.0 && *t < 5.0;
    check(!trace.captures.iter().any(during), format!("captured while paused: {:?}", trace.captures))?;
    check(!trace.keys.iter().any(during), format!("acted while paused: {:?}", trace.keys))?;
    check(trace.keys.iter().any(|t| approx(*t, 5.0)), format!("no action on resume: {:?}", trace.keys))?;
    check(trace.keys.len() == 6, format!("keys {:?}", trace.keys))
}

fn resume_respects_cooldown() -> Result<(), Failed> {
    let run = RunState::new();
    let clock = ScriptClock::with_signals(
        Arc::clone(&run),
        2.0,
        vec![(0.7, Signal::Pause), (0.9, Signal::Resume)],
    );
    let trace = Arc::new(Mutex::new(Trace::default()));
    let detectors = ScriptedDetectors::new(clock.clone(), Box::new(|_| vec![TextHit::new("Ready", 0.9)]));
    let window = ScriptedWindow::blank(clock.clone(), Arc::clone(&trace));

    run_loop(ocr_task("ready"), &run, clock, window, &detectors, Path::new("."));

    let keys = trace.lock().unwrap().keys.clone();
    for pair in keys.windows(2) {
        check(pair[1] - pair[0] >= 0.6 - 1e-6, format!("actions closer than cooldown: {:?}", keys))?;
    }
    check(keys.len() == 4, format!("keys {:?}", keys))
}

fn stop_interrupts_long_sleep() -> Result<(), Failed> {
    let run = RunState::new();
    run.start();
    let clock = Arc::new(SystemClock::new());
    let trace = Arc::new(Mutex::new(Trace::default()));
    let window = ScriptedWindow::blank(clock.clone(), Arc::clone(&trace));
    let mut task = ocr_task("never");
    task.scan_frequency = 30.0;

    let board = Arc::new(Mutex::new(vec![TaskEntry::default()]));
    let condition = Condition::build(&task, Path::new("."), &BuiltinDetectors::strip(), Duration::ZERO);
    let worker = TriggerLoop::new(task, Box::new(window), condition, run.handle(), clock, StatusSlot::new(board, 0));
    let handle = thread::spawn(move || worker.run());

    thread::sleep(Duration::from_millis(200));
    let stopped_at = Instant::now();
    run.stop();
    handle.join().map_err(|_| "worker panicked")?;
    let took = stopped_at.elapsed();
    check(took < TICK + Duration::from_millis(150), format!("stop took {:?}", took))
}

/// Fails the first window binding, then behaves like the stub.
struct FlakyPlatform {
    inner: StubPlatform,
    failed: AtomicBool,
}

impl Platform for FlakyPlatform {
    fn get_instances(&self, pattern: &str) -> Vec<(WindowId, String)> {
        self.inner.get_instances(pattern)
    }

    fn create_window(&self, window_id: WindowId) -> anyhow::Result<Box<dyn WindowHandle>> {
        if !self.failed.swap(true, Ordering::AcqRel) {
            anyhow::bail!("window {} vanished", window_id);
        }
        self.inner.create_window(window_id)
    }
}

fn setup_failure_is_isolated() -> Result<(), Failed> {
    let mut first = ocr_task("ready");
    first.name = "first".into();
    first.scan_frequency = 0.05;
    let mut second = first.clone();
    second.name = "second".into();
    let job = Job { window_pattern: "notepad".into(), tasks: vec![first, second], assets_root: PathBuf::from(".") };

    let platform = FlakyPlatform { inner: StubPlatform::default(), failed: AtomicBool::new(false) };
    let mut orch = Orchestrator::new(Arc::new(platform), Arc::new(BuiltinDetectors::strip()), Arc::new(SystemClock::new()), job);
    orch.start()?;
    thread::sleep(Duration::from_millis(400));
    orch.stop();
    orch.join();

    let board = orch.board();
    let entries = board.lock().unwrap();
    let failed: Vec<_> = entries.iter().filter(|e| e.phase == Phase::Failed).collect();
    let alive: Vec<_> = entries.iter().filter(|e| e.phase == Phase::Stopped).collect();
    check(failed.len() == 1 && failed[0].error.is_some(), format!("{:?}", *entries))?;
    check(alive.len() == 1 && alive[0].activations >= 1, format!("{:?}", *entries))
}

fn template_match_clicks_inside_region() -> Result<(), Failed> {
    let dir = scratch_dir("template");
    let template = GrayImage::from_fn(12, 12, |x, y| if (x / 2 + y / 2) % 2 == 0 { Luma([230]) } else { Luma([20]) });
    template.save(dir.join("button.png"))?;
    let mut canvas = GrayImage::from_pixel(64, 48, Luma([128]));
    image::imageops::replace(&mut canvas, &template, 20, 10);
    let frame = Capture::from_gray(&canvas);

    let region = Rect { x: 100, y: 100, w: 40, h: 20 };
    let mut task = ocr_task("unused");
    task.detection = Detection::Image { template: "button.png".into(), confidence_threshold: 0.9, scale: None };
    task.action = Action::ClickRegion { region, shape: ClickShape::Circle, roi_diminish: 2.0 };

    let run = RunState::new();
    let clock = ScriptClock::new(Arc::clone(&run), 0.05);
    let trace = Arc::new(Mutex::new(Trace::default()));
    let window = ScriptedWindow::new(clock.clone(), Arc::clone(&trace), Box::new(move |_| Ok(frame.clone())));

    let entry = run_loop(task, &run, clock, window, &ScriptedDetectors::builtin(), &dir);
    std::fs::remove_dir_all(&dir).ok();

    let trace = trace.lock().unwrap();
    check(trace.clicks.len() == 1, format!("clicks {:?}", trace.clicks))?;
    let (_, x, y) = trace.clicks[0];
    check(region.contains(x, y), format!("click ({}, {}) outside {}", x, y, region))?;
    check(entry.activations == 1, "match should count")
}

fn click_match_hits_found_box() -> Result<(), Failed> {
    let dir = scratch_dir("click-match");
    let template = GrayImage::from_fn(12, 12, |x, y| if (x / 2 + y / 2) % 2 == 0 { Luma([230]) } else { Luma([20]) });
    template.save(dir.join("anvil.png"))?;
    let mut canvas = GrayImage::from_pixel(64, 48, Luma([128]));
    image::imageops::replace(&mut canvas, &template, 20, 10);
    let frame = Capture::from_gray(&canvas);

    let mut task = ocr_task("unused");
    task.area = Some(Rect { x: 300, y: 200, w: 64, h: 48 });
    task.detection = Detection::Image { template: "anvil.png".into(), confidence_threshold: 0.9, scale: None };
    task.action = Action::ClickMatch { shape: ClickShape::Rectangle, roi_diminish: 2.0 };

    let run = RunState::new();
    let clock = ScriptClock::new(Arc::clone(&run), 0.05);
    let trace = Arc::new(Mutex::new(Trace::default()));
    let window = ScriptedWindow::new(clock.clone(), Arc::clone(&trace), Box::new(move |_| Ok(frame.clone())));

    let entry = run_loop(task, &run, clock, window, &ScriptedDetectors::builtin(), &dir);
    std::fs::remove_dir_all(&dir).ok();

    // found at (20, 10) inside an area starting at (300, 200)
    let target = Rect { x: 320, y: 210, w: 12, h: 12 };
    let trace = trace.lock().unwrap();
    check(trace.clicks.len() == 1, format!("clicks {:?}", trace.clicks))?;
    let (_, x, y) = trace.clicks[0];
    check(target.contains(x, y), format!("click ({}, {}) outside {}", x, y, target))?;
    check(entry.activations == 1, "match should count")
}

fn click_match_needs_template() -> Result<(), Failed> {
    let mut task = ocr_task("unused");
    task.detection = Detection::Image { template: "missing.png".into(), confidence_threshold: 0.8, scale: None };
    task.action = Action::ClickMatch { shape: ClickShape::Circle, roi_diminish: 2.0 };

    let run = RunState::new();
    let clock = ScriptClock::new(Arc::clone(&run), 1.0);
    let trace = Arc::new(Mutex::new(Trace::default()));
    let window = ScriptedWindow::blank(clock.clone(), Arc::clone(&trace));

    let entry = run_loop(task, &run, clock, window, &ScriptedDetectors::builtin(), Path::new("/nonexistent"));

    let trace = trace.lock().unwrap();
    check(entry.phase == Phase::Failed, format!("phase {:?}", entry.phase))?;
    check(entry.error.is_some(), "reason should be on the status board")?;
    check(trace.clicks.is_empty() && trace.captures.is_empty(), format!("{:?}", *trace))
}

fn progress_bar_fires_when_full() -> Result<(), Failed> {
    let dir = scratch_dir("progress");
    image::RgbImage::from_pixel(10, 4, image::Rgb([40, 200, 60])).save(dir.join("full.png"))?;

    let mut task = ocr_task("unused");
    task.area = Some(Rect { x: 0, y: 0, w: 50, h: 6 });
    task.detection = Detection::Progress { reference: "full.png".into(), threshold_percent: 99.0 };

    let run = RunState::new();
    let clock = ScriptClock::new(Arc::clone(&run), 5.05);
    let trace = Arc::new(Mutex::new(Trace::default()));
    // the bar fills ten columns per second
    let frames: FrameScript = Box::new(|t| {
        let filled = ((t * 10.0).round() as u32).min(50);
        let mut bar = Capture::filled(50, 6, [50, 50, 50]);
        for x in 0..filled {
            for y in 0..6 {
                bar.set_pixel(x, y, [60, 200, 40, 255]);
            }
        }
        Ok(bar)
    });
    let window = ScriptedWindow::new(clock.clone(), Arc::clone(&trace), frames);

    let entry = run_loop(task, &run, clock, window, &ScriptedDetectors::builtin(), &dir);
    std::fs::remove_dir_all(&dir).ok();

    let trace = trace.lock().unwrap();
    check(trace.keys.len() == 1, format!("keys {:?}", trace.keys))?;
    check(approx(trace.keys[0], 5.0), format!("keys {:?}", trace.keys))?;
    check(entry.activations == 1, format!("activations {}", entry.activations))
}

fn missing_template_runs_unverified() -> Result<(), Failed> {
    let mut task = ocr_task("unused");
    task.detection = Detection::Image { template: "missing.png".into(), confidence_threshold: 0.8, scale: None };
    task.cooldown = 1.0;

    let run = RunState::new();
    let clock = ScriptClock::new(Arc::clone(&run), 3.05);
    let trace = Arc::new(Mutex::new(Trace::default()));
    let window = ScriptedWindow::blank(clock.clone(), Arc::clone(&trace));

    run_loop(task, &run, clock, window, &ScriptedDetectors::builtin(), Path::new("/nonexistent"));

    let trace = trace.lock().unwrap();
    let want = [0.0, 1.0, 2.0, 3.0];
    check(trace.keys.len() == want.len(), format!("keys {:?}", trace.keys))?;
    for (got, want) in trace.keys.iter().zip(want) {
        check(approx(*got, want), format!("keys {:?}", trace.keys))?;
    }
    check(trace.captures.is_empty(), "unverified tasks do not capture")
}

fn timer_refreshes_early() -> Result<(), Failed> {
    let mut task = ocr_task("unused");
    task.detection = Detection::Timer { duration: 20.0, initial_remaining: 0.0, lead_min: 5.0, lead_max: 5.0 };

    let run = RunState::new();
    let clock = ScriptClock::new(Arc::clone(&run), 31.0);
    let trace = Arc::new(Mutex::new(Trace::default()));
    let window = ScriptedWindow::blank(clock.clone(), Arc::clone(&trace));

    run_loop(task, &run, clock, window, &ScriptedDetectors::builtin(), Path::new("."));

    let trace = trace.lock().unwrap();
    let want = [0.0, 15.0, 30.0];
    check(trace.keys.len() == want.len(), format!("keys {:?}", trace.keys))?;
    for (got, want) in trace.keys.iter().zip(want) {
        check(approx(*got, want), format!("keys {:?}", trace.keys))?;
    }
    check(trace.captures.is_empty(), "timers do not capture")
}

fn failed_action_is_not_counted() -> Result<(), Failed> {
    let run = RunState::new();
    let clock = ScriptClock::new(Arc::clone(&run), 0.35);
    let trace = Arc::new(Mutex::new(Trace::default()));
    let detectors = ScriptedDetectors::new(clock.clone(), Box::new(|_| vec![TextHit::new("Ready", 0.9)]));
    let window = ScriptedWindow::blank(clock.clone(), Arc::clone(&trace)).failing_input();

    let entry = run_loop(ocr_task("ready"), &run, clock, window, &detectors, Path::new("."));

    let trace = trace.lock().unwrap();
    check(entry.activations == 0, format!("activations {}", entry.activations))?;
    check(entry.error.is_some(), "failure should be on the status board")?;
    // no cooldown after a failed action, so every scan retries
    check(trace.keys.len() == 4, format!("attempts {:?}", trace.keys))
}

fn config_document_drives_stub() -> Result<(), Failed> {
    let text = r#"{
        "window_pattern": "NOTEPAD",
        "regions": [
            {
                "name": "ready",
                "area": [0, 0, 120, 8],
                "detection": { "type": "ocr", "text_patterns": ["ready"] },
                "action": { "type": "click_region", "region": [10, 10, 50, 30] },
                "scan_frequency": 0.05
            },
            { "name": "broken", "action": { "type": "key", "key": "1" } }
        ]
    }"#;
    let config = Config::parse(text)?;
    check(config.tasks.len() == 1, format!("tasks {:?}", config.tasks))?;

    let job = Job::from_config(&config, PathBuf::from("."));
    let mut orch = Orchestrator::new(
        Arc::new(StubPlatform::default()),
        Arc::new(BuiltinDetectors::strip()),
        Arc::new(SystemClock::new()),
        job,
    )
    .with_seed(7);
    orch.start()?;
    thread::sleep(Duration::from_millis(300));
    orch.stop();
    orch.join();

    let board = orch.board();
    let entries = board.lock().unwrap();
    check(entries[0].activations >= 1, format!("{:?}", entries[0]))?;
    check(entries[0].error.is_none(), format!("{:?}", entries[0]))
}

fn main() {
    let args = Arguments::from_args();

    let tests = vec![
        Trial::test("ocr_match_acts_once_then_cools", ocr_match_acts_once_then_cools),
        Trial::test("low_confidence_is_ignored", low_confidence_is_ignored),
        Trial::test("capture_failures_back_off", capture_failures_back_off),
        Trial::test("recovery_fires_after_learned_interval", recovery_fires_after_learned_interval),
        Trial::test("pause_blocks_all_work", pause_blocks_all_work),
        Trial::test("resume_respects_cooldown", resume_respects_cooldown),
        Trial::test("stop_interrupts_long_sleep", stop_interrupts_long_sleep),
        Trial::test("setup_failure_is_isolated", setup_failure_is_isolated),
        Trial::test("template_match_clicks_inside_region", template_match_clicks_inside_region),
        Trial::test("click_match_hits_found_box", click_match_hits_found_box),
        Trial::test("click_match_needs_template", click_match_needs_template),
        Trial::test("progress_bar_fires_when_full", progress_bar_fires_when_full),
        Trial::test("missing_template_runs_unverified", missing_template_runs_unverified),
        Trial::test("timer_refreshes_early", timer_refreshes_early),
        Trial::test("failed_action_is_not_counted", failed_action_is_not_counted),
        Trial::test("config_document_drives_stub", config_document_drives_stub),
    ];

    libtest_mimic::run(&args, tests).exit();
}
