use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key_line(key: &str, pad: &str, desc: &str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(key.to_string(), Style::default().fg(Color::Magenta)),
        Span::raw(pad.to_string()),
        Span::raw(desc.to_string()),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        key_line("Ctrl-C", "      ", "Quit"),
        key_line("F1", "          ", "Show/hide this help"),
        key_line("tab", "         ", "Switch focus (prompt / history)"),
        key_line("enter", "       ", "Submit prompt (prompt focus)"),
        key_line("esc", "         ", "Cancel the running job"),
        key_line("Ctrl-L", "      ", "Sign out"),
        Line::from(""),
        Line::from("History pane:"),
        key_line("↑/↓", "         ", "Navigate"),
        key_line("j/k", "         ", "Navigate"),
        key_line("enter", "       ", "Load entry into the editor"),
        key_line("r", "           ", "Refresh history from the service"),
        key_line("y", "           ", "Copy the shown result to clipboard"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
