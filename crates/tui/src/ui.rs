use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use ticker_core::types::{Phase, TaskEntry};

use crate::App;

pub fn draw(f: &mut Frame, app: &App) {
    let chunks = if app.log_visible {
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(f.area())
    } else {
        Layout::default().constraints([Constraint::Percentage(100)]).split(f.area())
    };

    let (banner_label, banner_bg) = match (app.run.is_running(), app.run.is_paused()) {
        (true, true) => ("PAUSED (S/F11 resume, X/F12 stop)", Color::Yellow),
        (true, false) => ("RUNNING (S/F11 pause, X/F12 stop)", Color::Green),
        _ => ("STOPPED (S/F11 to start)", Color::Red),
    };

    let mut lines: Vec<Line> = vec![
        Line::from(vec![
            Span::styled(" j", Style::default().fg(Color::Yellow)),
            Span::raw("/"),
            Span::styled("k", Style::default().fg(Color::Yellow)),
            Span::raw(" select, "),
            Span::styled("l", Style::default().fg(Color::Yellow)),
            Span::raw(" logs, "),
            Span::styled("q", Style::default().fg(Color::Yellow)),
            Span::raw(" quit"),
        ]),
        Line::from(""),
    ];

    {
        let entries = match app.board.lock() {
            Ok(e) => e,
            Err(poisoned) => poisoned.into_inner(),
        };
        if entries.is_empty() {
            lines.push(Line::from(Span::styled(
                "  no tasks configured",
                Style::default().fg(Color::DarkGray),
            )));
        }
        for (i, entry) in entries.iter().enumerate() {
            lines.extend(task_lines(entry, i == app.selected));
        }
    }

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(0)])
        .split(chunks[0]);

    let pad_total = (left[0].width as usize).saturating_sub(banner_label.len());
    let pad_left = pad_total / 2;
    let centered = format!("{}{}{}", " ".repeat(pad_left), banner_label, " ".repeat(pad_total - pad_left));
    let banner = Paragraph::new(Line::from(Span::styled(
        centered,
        Style::default().fg(Color::Black).bg(banner_bg).add_modifier(Modifier::BOLD),
    )));
    f.render_widget(banner, left[0]);

    let task_list = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::LEFT | Borders::RIGHT | Borders::BOTTOM)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(task_list, left[1]);

    if app.log_visible && chunks.len() > 1 {
        let visible_height = chunks[1].height.saturating_sub(2) as usize;
        let total = app.log_messages.len();
        let scroll = app.log_scroll.min(total.saturating_sub(visible_height));
        let start = total.saturating_sub(visible_height + scroll);
        let end = total.saturating_sub(scroll);
        let log_lines: Vec<Line> = app.log_messages[start..end].iter().map(|m| parse_log_line(m)).collect();

        let log_panel = Paragraph::new(log_lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Logs ")
                    .border_style(Style::default().fg(Color::Yellow)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(log_panel, chunks[1]);
    }

    if let Some(dialog) = &app.confirm {
        dialog.render(f);
    }
}

fn phase_color(phase: Phase) -> Color {
    match phase {
        Phase::Scanning => Color::Cyan,
        Phase::Cooldown => Color::Green,
        Phase::Paused => Color::Yellow,
        Phase::Failed => Color::Red,
        Phase::Idle | Phase::Stopped => Color::DarkGray,
    }
}

/// Header line plus a detail line for one task.
fn task_lines(entry: &TaskEntry, selected: bool) -> Vec<Line<'static>> {
    let prefix = if selected { "> " } else { "  " };
    let header = Line::from(vec![
        Span::raw(prefix),
        Span::styled(
            format!("{:<9}", entry.phase.label()),
            Style::default().fg(phase_color(entry.phase)),
        ),
        Span::styled(entry.name.clone(), Style::default().fg(Color::White).add_modifier(Modifier::BOLD)),
        Span::styled(format!("  x{}", entry.activations), Style::default().fg(Color::Yellow)),
    ]);

    let detail = match &entry.error {
        Some(e) => Span::styled(format!("    err: {}", e), Style::default().fg(Color::Red)),
        None if !entry.status.is_empty() => {
            Span::styled(format!("    {}  {}", entry.summary, entry.status), Style::default().fg(Color::DarkGray))
        }
        None => Span::styled(format!("    {}", entry.summary), Style::default().fg(Color::DarkGray)),
    };
    vec![header, Line::from(detail)]
}

/// Parse a structured log line (level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage)
/// into a colored Line for TUI rendering.
fn parse_log_line(raw: &str) -> Line<'_> {
    let parts: Vec<&str> = raw.splitn(5, '\x1f').collect();
    if parts.len() < 5 {
        return Line::from(raw);
    }
    let (level, prefix, timestamp, message) = (parts[0], parts[1], parts[3], parts[4]);

    let color = match parts[2].parse::<u8>().unwrap_or(0) {
        1 => Color::DarkGray,
        2 => Color::LightBlue,
        3 => Color::LightGreen,
        4 => Color::LightMagenta,
        5 => Color::Cyan,
        _ => Color::White,
    };

    let mut spans = vec![Span::styled(timestamp, Style::default().fg(Color::DarkGray)), Span::raw(" ")];
    match level {
        "ERROR" => spans.push(Span::styled("error ", Style::default().fg(Color::Red))),
        "WARN" => spans.push(Span::styled("warn ", Style::default().fg(Color::Yellow))),
        _ => {}
    }
    if !prefix.is_empty() {
        spans.push(Span::styled(prefix, Style::default().fg(color).add_modifier(Modifier::BOLD)));
        spans.push(Span::raw(" "));
    }
    spans.push(Span::styled(message, Style::default().fg(color)));
    Line::from(spans)
}
