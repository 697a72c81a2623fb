use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key(k: &'static str, pad: &'static str, desc: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(k, Style::default().fg(Color::Magenta)),
        Span::raw(pad),
        Span::raw(desc),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit (stops the server when --stop-on-exit is set)"),
        ]),
        key("r", "           ", "Restart the launch cycle"),
        key("x", "           ", "Run the stop script"),
        key("y", "           ", "Copy URL to clipboard"),
        key("o", "           ", "Open URL in browser"),
        key("s", "           ", "Save the finished launch to history"),
        key("a", "           ", "Toggle auto-save"),
        key("tab", "         ", "Switch tabs"),
        key("?", "           ", "Show this help"),
        Line::from(""),
        Line::from("History tab:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("↑/↓", Style::default().fg(Color::Magenta)),
            Span::raw(" or "),
            Span::styled("j/k", Style::default().fg(Color::Magenta)),
            Span::raw("  Navigate"),
        ]),
        key("y", "           ", "Copy selected URL to clipboard"),
        key("d", "           ", "Delete selected"),
        key("r", "           ", "Refresh history"),
        Line::from(""),
        Line::from("Sentinel files (under the install's bin/ directory):"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("PORT", Style::default().fg(Color::Cyan)),
            Span::raw("        Written by the server once it listens"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("url.txt", Style::default().fg(Color::Cyan)),
            Span::raw("     Written once the workspace is ready"),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
