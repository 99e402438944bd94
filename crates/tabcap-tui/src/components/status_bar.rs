//! Status bar — last engine log line plus the keybinding footer.

use ratatui::{
    layout::Rect,
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::theme::{style_accent, style_muted, style_secondary};

/// Last log or error line from the engine, if any.
pub fn draw_log_bar(frame: &mut Frame, area: Rect, last_log: Option<&str>) {
    let line = Line::from(Span::styled(
        format!(" {}", last_log.unwrap_or("")),
        style_secondary(),
    ));
    frame.render_widget(Paragraph::new(line), area);
}

pub fn draw_keys_bar(frame: &mut Frame, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" tabcap ", style_accent()),
        Span::styled(
            " ↑↓/jk select  n new tab  s start/cycle  x stop  +/- cap  v visuals  q quit",
            style_muted(),
        ),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}
