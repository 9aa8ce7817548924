use std::sync::{mpsc, Arc};

use ticker_core::control::RunState;
use ticker_core::engine::StatusBoard;
use ticker_core::types::Command;

use crate::confirm::ConfirmDialog;

/// Older log lines are dropped past this many.
const MAX_LOG_LINES: usize = 2000;

pub struct App {
    pub board: StatusBoard,
    pub run: Arc<RunState>,
    pub selected: usize,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // scroll offset from bottom (0 = latest)
    pub log_rx: mpsc::Receiver<String>,
    pub cmd_tx: mpsc::Sender<Command>,
    /// Open while asking whether to quit a running session.
    pub confirm: Option<ConfirmDialog>,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        board: StatusBoard,
        run: Arc<RunState>,
        log_rx: mpsc::Receiver<String>,
        cmd_tx: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            board,
            run,
            selected: 0,
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            cmd_tx,
            confirm: None,
            should_quit: false,
        }
    }

    pub fn drain_logs(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
        }
        if self.log_messages.len() > MAX_LOG_LINES {
            let extra = self.log_messages.len() - MAX_LOG_LINES;
            self.log_messages.drain(..extra);
        }
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    pub fn move_up(&mut self) {
        self.selected = self.selected.saturating_sub(1);
    }

    pub fn move_down(&mut self) {
        let len = self.board.lock().map(|b| b.len()).unwrap_or(0);
        if self.selected + 1 < len {
            self.selected += 1;
        }
    }

    /// Start when stopped, otherwise flip pause.
    pub fn start_pause(&mut self) {
        self.cmd_tx.send(Command::StartPause).ok();
    }

    pub fn stop(&mut self) {
        self.cmd_tx.send(Command::Stop).ok();
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    /// Quit right away when idle; ask first while tasks are running.
    pub fn request_quit(&mut self) {
        if self.run.is_running() {
            self.confirm = Some(ConfirmDialog::new("Tasks are running. Quit?"));
        } else {
            self.quit();
        }
    }

    /// Close the dialog; quit if the answer was yes.
    pub fn answer_confirm(&mut self, yes: bool) {
        self.confirm = None;
        if yes {
            self.quit();
        }
    }

    pub fn quit(&mut self) {
        self.cmd_tx.send(Command::Quit).ok();
        self.should_quit = true;
    }
}
