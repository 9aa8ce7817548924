use std::io;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{Context, Result};
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use ticker_core::detect::BuiltinDetectors;
use ticker_core::orchestrator::{Job, Orchestrator};
use ticker_core::platform::{create_platform, hotkey};
use ticker_core::settings::Config;
use ticker_core::sleep::SystemClock;
use ticker_core::types::Command;
use ticker_core::logger;

struct Args {
    force_stub: bool,
    config: PathBuf,
}

fn parse_args() -> Result<Args> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut args = Args { force_stub: false, config: cwd.join("ticker.json") };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--stub" => args.force_stub = true,
            "--config" => args.config = it.next().map(PathBuf::from).context("--config needs a path")?,
            other => anyhow::bail!("unknown argument {:?} (usage: ticker [--stub] [--config <path>])", other),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    let args = parse_args()?;

    let logs_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join("logs");
    logger::init(&logs_dir)?;

    let config = Config::load(&args.config);
    let assets_root = config.assets_root(&args.config);
    if config.window_pattern.is_empty() {
        logger::warn(&format!("no window_pattern in {}", args.config.display()));
    }

    let platform = create_platform(args.force_stub);
    // simulated frames carry a text strip, not text an OCR engine could read
    let detectors = if platform.simulated() || !config.needs_ocr() {
        BuiltinDetectors::strip()
    } else {
        BuiltinDetectors::with_ocr(config.ocr_models_dir(&args.config).as_deref())
    };
    let job = Job::from_config(&config, assets_root);
    let orchestrator = Orchestrator::new(platform, Arc::new(detectors), Arc::new(SystemClock::new()), job);
    let board = orchestrator.board();
    let run = orchestrator.run_state();

    let (log_tx, log_rx) = mpsc::channel::<String>();
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
    logger::set_tui_sender(log_tx);
    logger::info(&format!("ticker ready, {} task(s) for {:?}", config.tasks.len(), config.window_pattern));

    let orch_thread = thread::spawn(move || orchestrator.serve(cmd_rx));

    let hotkeys = hotkey::HotkeyFlags::new();
    hotkey::start_hotkey_listener(Arc::clone(&hotkeys));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let mut app = ticker_tui::App::new(board, run, log_rx, cmd_tx);
    let result = ticker_tui::event::run(&mut terminal, &mut app, hotkeys);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    // the App owned the only sender; dropping it ends serve() if Quit was never sent
    drop(app);
    orch_thread.join().ok();

    result
}
