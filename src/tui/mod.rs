mod export;
mod help;
mod state;

use crate::cli::{build_config, Cli};
use crate::model::{LaunchEvent, LaunchOutcome, LaunchPhase, LaunchRecord, Sentinel};
use crate::orchestrator::{self, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use export::{copy_to_clipboard, ellipsize, save_and_show_path};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::UiState;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

// Tabs row (3) plus history borders (2) and header line (1).
const HISTORY_CHROME_ROWS: usize = 6;

fn history_rows(terminal_height: u16) -> usize {
    (terminal_height as usize)
        .saturating_sub(HISTORY_CHROME_ROWS)
        .max(1)
}

fn push_wrapped_status_kv(
    out: &mut Vec<Line<'static>>,
    label: &str,
    value: &str,
    status_area_width: u16,
) {
    let value = value.trim();
    if value.is_empty() {
        return;
    }

    // Account for borders (2 chars on each side)
    let usable_width = status_area_width.saturating_sub(4).max(1);
    let label_text = format!("{label}:");
    let label_width = label_text.chars().count() as u16;

    let value_chars: Vec<char> = value.chars().collect();
    let mut remaining = value_chars.as_slice();
    let mut first = true;

    while !remaining.is_empty() {
        let line_width = if first {
            usable_width.saturating_sub(label_width + 1).max(1)
        } else {
            usable_width.saturating_sub(2).max(1)
        };

        let chars_to_take = (remaining.len() as u16).min(line_width) as usize;
        let (line_chars, rest) = remaining.split_at(chars_to_take);
        let line_text: String = line_chars.iter().collect();

        if first {
            out.push(Line::from(vec![
                Span::styled(label_text.clone(), Style::default().fg(Color::Gray)),
                Span::raw(" "),
                Span::raw(line_text),
            ]));
            first = false;
        } else {
            out.push(Line::from(vec![Span::raw("  "), Span::raw(line_text)]));
        }

        remaining = rest;
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args)?;

    // Unbounded channels keep the engine from ever waiting on the renderer.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<LaunchEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_args = args.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(ui_args, event_rx, cmd_tx));

    let res = orchestrator::run_controller(&cfg, args.stop_on_exit, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    args: Cli,
    mut event_rx: UnboundedReceiver<LaunchEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let initial_load = terminal
        .size()
        .map(|size| (history_rows(size.height) * 3).max(20))
        .unwrap_or(50);

    let mut state = UiState {
        auto_save: args.auto_save,
        history_load_size: initial_load,
        ..Default::default()
    };
    state.history = crate::storage::load_recent(initial_load).unwrap_or_default();

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            match ev {
                LaunchEvent::CycleCompleted { record } => {
                    handle_cycle_completed(&args, &mut state, *record);
                }
                other => state.apply_event(other),
            }
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    (_, KeyCode::Char('r')) => {
                        if state.tab == 1 {
                            refresh_history(&mut state);
                        } else {
                            let _ = cmd_tx.send(UiCommand::Restart);
                            state.reset_cycle();
                            state.info = "Restart requested…".into();
                        }
                    }
                    (_, KeyCode::Char('x')) => {
                        let _ = cmd_tx.send(UiCommand::StopServer);
                        state.info = "Stop requested…".into();
                    }
                    (_, KeyCode::Char('s')) => {
                        if state.tab == 0 {
                            if let Some(r) = state.last_record.clone() {
                                save_and_show_path(&r, &mut state);
                            } else {
                                state.info = "No finished launch to save yet.".into();
                            }
                        }
                    }
                    (_, KeyCode::Char('y')) => {
                        let url = if state.tab == 1 {
                            state
                                .history
                                .get(state.history_selected)
                                .and_then(|r| r.endpoint.as_ref())
                                .map(|e| e.url.clone())
                        } else {
                            state.url.clone()
                        };
                        match url {
                            Some(url) => match copy_to_clipboard(&url) {
                                Ok(_) => {
                                    state.info =
                                        format!("✓ Copied to clipboard: {}", ellipsize(&url, 60));
                                }
                                Err(e) => {
                                    state.info = format!("Clipboard copy failed: {e:#}");
                                }
                            },
                            None => state.info = "No workspace URL to copy".into(),
                        }
                    }
                    (_, KeyCode::Char('o')) => match state.url.clone() {
                        Some(url) => match crate::browser::open_url(&url) {
                            Ok(()) => state.info = format!("Opened {}", ellipsize(&url, 60)),
                            Err(e) => state.info = format!("Open failed: {e:#}"),
                        },
                        None => state.info = "Workspace URL not known yet".into(),
                    },
                    (_, KeyCode::Char('a')) => {
                        state.auto_save = !state.auto_save;
                        state.info = if state.auto_save {
                            "Auto-save enabled".into()
                        } else {
                            "Auto-save disabled".into()
                        };
                    }
                    (_, KeyCode::Tab) => {
                        let new_tab = (state.tab + 1) % 3;
                        state.tab = new_tab;
                        if new_tab == 1 {
                            state.history_selected = 0;
                            state.history_scroll_offset = 0;
                        }
                    }
                    (_, KeyCode::Char('?')) => {
                        state.tab = 2;
                    }
                    (_, KeyCode::Up) | (_, KeyCode::Char('k')) => {
                        if state.tab == 1 {
                            state.select_prev();
                        }
                    }
                    (_, KeyCode::Down) | (_, KeyCode::Char('j')) => {
                        if state.tab == 1 {
                            let visible = terminal
                                .size()
                                .map(|s| history_rows(s.height))
                                .unwrap_or(20);
                            state.select_next(visible);
                        }
                    }
                    (_, KeyCode::Char('d')) => {
                        if state.tab == 1 {
                            if let Some(to_delete) =
                                state.history.get(state.history_selected).cloned()
                            {
                                if let Err(e) = crate::storage::delete_record(&to_delete) {
                                    state.info = format!("Delete failed: {e:#}");
                                } else {
                                    state.history.remove(state.history_selected);
                                    state.clamp_selection();
                                    state.info = "Deleted".into();
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

fn refresh_history(state: &mut UiState) {
    let reload_size = state.history_load_size.max(state.history.len());
    match crate::storage::load_recent(reload_size) {
        Ok(new_history) => {
            let old_count = state.history.len();
            state.history = new_history;
            state.clamp_selection();

            let new_count = state.history.len();
            state.info = if new_count > old_count {
                format!("Refreshed: {} new launch(es)", new_count - old_count)
            } else if new_count < old_count {
                format!("Refreshed: {} launch(es) removed", old_count - new_count)
            } else {
                "Refreshed".into()
            };
        }
        Err(e) => {
            state.info = format!("Refresh failed: {e:#}");
        }
    }
}

fn handle_cycle_completed(args: &Cli, state: &mut UiState, r: LaunchRecord) {
    let reload_size = (state.history.len() + 1).max(state.history_load_size);
    let processed =
        orchestrator::process_launch_completion(args, reload_size, state.auto_save, &r);

    state.apply_event(LaunchEvent::CycleCompleted {
        record: Box::new(r),
    });

    if let Some(path) = processed.auto_saved_path.as_ref() {
        state.info = format!("Saved: {}", path.display());
    }
    if !processed.export_messages.is_empty() {
        state.info = processed.export_messages.join("; ");
    }

    state.history = processed.history;
    if state.tab == 1 {
        state.history_selected = 0;
        state.history_scroll_offset = 0;
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Dashboard"),
        Line::from("History"),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("workspace-launcher"),
    )
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_dashboard(chunks[1], f, state),
        1 => draw_history(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }
}

fn phase_lines(state: &UiState) -> Vec<Line<'static>> {
    let reached = state.furthest.and_then(|p| p.ladder_index());
    let failed = state.phase.is_terminal() && state.phase != LaunchPhase::Ready;

    let mut lines: Vec<Line<'static>> = LaunchPhase::LADDER
        .iter()
        .enumerate()
        .map(|(i, phase)| {
            let (mark, style) = match reached {
                Some(r) if i < r || (i == r && state.phase == LaunchPhase::Ready) => {
                    ("✓", Style::default().fg(Color::Green))
                }
                Some(r) if i == r && failed => ("✗", Style::default().fg(Color::Red)),
                Some(r) if i == r => (
                    "›",
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::BOLD),
                ),
                _ => (" ", Style::default().fg(Color::DarkGray)),
            };
            Line::from(vec![
                Span::styled(format!(" {mark} "), style),
                Span::styled(phase.label(), style),
            ])
        })
        .collect();

    if failed {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!(" {}", state.phase.label()),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )));
    }
    lines
}

fn waiting_text(state: &UiState) -> Option<String> {
    let sentinel = state.waiting_for?;
    let what = match sentinel {
        Sentinel::Port => "server port",
        Sentinel::Url => "workspace URL",
    };
    Some(format!(
        "{what} ({}) {:.0}s",
        sentinel.file_name(),
        state.waited_ms as f64 / 1000.0
    ))
}

fn draw_dashboard(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(10), // Phase ladder + workspace details
                Constraint::Min(0),     // Message log
                Constraint::Length(5),  // Status row
            ]
            .as_ref(),
        )
        .split(area);

    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(36), Constraint::Min(0)].as_ref())
        .split(main[0]);

    let progress = Paragraph::new(phase_lines(state))
        .block(Block::default().borders(Borders::ALL).title("Progress"));
    f.render_widget(progress, top[0]);

    let width = top[1].width;
    let mut details: Vec<Line<'static>> = Vec::new();
    push_wrapped_status_kv(
        &mut details,
        "Install",
        state.base_dir.as_deref().unwrap_or("resolving…"),
        width,
    );
    if let Some(port) = state.port {
        push_wrapped_status_kv(&mut details, "Port", &port.to_string(), width);
    }
    if let Some(url) = state.url.as_deref() {
        push_wrapped_status_kv(&mut details, "URL", url, width);
    }
    if let Some(waiting) = waiting_text(state) {
        push_wrapped_status_kv(&mut details, "Waiting for", &waiting, width);
    }
    if let Some(s) = state.start_script.as_deref() {
        push_wrapped_status_kv(&mut details, "Start script", s, width);
    }
    if let Some(s) = state.stop_script.as_deref() {
        push_wrapped_status_kv(&mut details, "Stop script", s, width);
    }
    match state.url_reachable {
        Some(true) => push_wrapped_status_kv(&mut details, "URL check", "reachable", width),
        Some(false) => push_wrapped_status_kv(&mut details, "URL check", "no answer", width),
        None => {}
    }
    push_wrapped_status_kv(
        &mut details,
        "Server",
        if state.server_running {
            "started"
        } else {
            "not running"
        },
        width,
    );
    let details = Paragraph::new(details)
        .block(Block::default().borders(Borders::ALL).title("Workspace"));
    f.render_widget(details, top[1]);

    // Show the newest messages that fit.
    let log_rows = (main[1].height as usize).saturating_sub(2);
    let skip = state.log.len().saturating_sub(log_rows);
    let log_lines: Vec<Line> = state.log[skip..]
        .iter()
        .map(|l| Line::from(l.as_str()))
        .collect();
    let log = Paragraph::new(log_lines)
        .block(Block::default().borders(Borders::ALL).title("Messages"));
    f.render_widget(log, main[1]);

    let auto_save = if state.auto_save { "on" } else { "off" };
    let status = Paragraph::new(vec![
        Line::from(state.info.clone()),
        Line::from(vec![
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(": quit  "),
            Span::styled("r", Style::default().fg(Color::Magenta)),
            Span::raw(": restart  "),
            Span::styled("x", Style::default().fg(Color::Magenta)),
            Span::raw(": stop server  "),
            Span::styled("y", Style::default().fg(Color::Magenta)),
            Span::raw(": copy URL  "),
            Span::styled("o", Style::default().fg(Color::Magenta)),
            Span::raw(": open  "),
            Span::styled("s", Style::default().fg(Color::Magenta)),
            Span::raw(": save  "),
            Span::styled("a", Style::default().fg(Color::Magenta)),
            Span::raw(format!(": auto-save ({auto_save})")),
        ]),
    ])
    .wrap(Wrap { trim: true })
    .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status, main[2]);
}

fn history_line(r: &LaunchRecord, selected: bool) -> Line<'static> {
    let (status, color) = match &r.outcome {
        LaunchOutcome::Ready => ("ready    ".to_string(), Color::Green),
        LaunchOutcome::Failed { .. } => ("failed   ".to_string(), Color::Red),
        LaunchOutcome::Cancelled => ("cancelled".to_string(), Color::DarkGray),
    };
    let detail = match (&r.outcome, r.endpoint.as_ref()) {
        (_, Some(e)) => e.url.clone(),
        (LaunchOutcome::Failed { reason }, None) => reason.clone(),
        _ => r.base_dir.display().to_string(),
    };
    let marker = if selected { "> " } else { "  " };
    let row_style = if selected {
        Style::default().add_modifier(Modifier::REVERSED)
    } else {
        Style::default()
    };
    Line::from(vec![
        Span::styled(marker, row_style),
        Span::styled(r.timestamp_utc.clone(), row_style.fg(Color::Gray)),
        Span::raw("  "),
        Span::styled(status, row_style.fg(color)),
        Span::raw("  "),
        Span::styled(detail, row_style),
    ])
}

fn draw_history(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines: Vec<Line> = Vec::new();

    let max_items = (area.height as usize).saturating_sub(3);

    let total_count = state.history.len();
    let current_pos = if total_count > 0 {
        state.history_selected + 1
    } else {
        0
    };

    lines.push(Line::from(vec![
        Span::raw(format!("History ({current_pos}/{total_count}) - ")),
        Span::styled("↑/↓/j/k", Style::default().fg(Color::Magenta)),
        Span::raw(": navigate, "),
        Span::styled("r", Style::default().fg(Color::Magenta)),
        Span::raw(": refresh, "),
        Span::styled("d", Style::default().fg(Color::Magenta)),
        Span::raw(": delete, "),
        Span::styled("y", Style::default().fg(Color::Magenta)),
        Span::raw(": copy URL"),
    ]));

    if state.history.is_empty() {
        lines.push(Line::from(Span::styled(
            "No saved launches yet.",
            Style::default().fg(Color::DarkGray),
        )));
    } else {
        lines.extend(
            state
                .history
                .iter()
                .enumerate()
                .skip(state.history_scroll_offset)
                .take(max_items)
                .map(|(i, r)| history_line(r, i == state.history_selected)),
        );
    }

    let title = if state.info.is_empty() {
        "History".to_string()
    } else {
        format!("History - {}", ellipsize(&state.info, 60))
    };
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_values_wrap_under_label() {
        let mut out = Vec::new();
        push_wrapped_status_kv(&mut out, "URL", "http://localhost:8080/workspace", 20);
        assert!(out.len() > 1);

        let text: String = out
            .iter()
            .flat_map(|l| l.spans.iter())
            .map(|s| s.content.to_string())
            .collect();
        assert!(text.starts_with("URL:"));
        assert!(text.contains("8080"));
    }

    #[test]
    fn blank_status_value_is_skipped() {
        let mut out = Vec::new();
        push_wrapped_status_kv(&mut out, "Port", "  ", 40);
        assert!(out.is_empty());
    }

    #[test]
    fn ladder_marks_failure_at_furthest_step() {
        let mut state = UiState::default();
        for phase in [
            LaunchPhase::Idle,
            LaunchPhase::SelectorLaunched,
            LaunchPhase::PortDiscovered,
            LaunchPhase::Failed,
        ] {
            state.apply_event(LaunchEvent::PhaseChanged { phase });
        }
        let lines = phase_lines(&state);
        let marks: Vec<String> = lines
            .iter()
            .take(LaunchPhase::LADDER.len())
            .map(|l| l.spans[0].content.trim().to_string())
            .collect();
        assert_eq!(marks, ["✓", "✓", "✗", "", "", ""]);
    }

    #[test]
    fn history_rows_never_zero() {
        assert_eq!(history_rows(3), 1);
        assert_eq!(history_rows(30), 24);
    }
}
