//! Session list — one row per tab, ordered by tab id.

use ratatui::{
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem},
    Frame,
};

use tabcap_proto::protocol::{SessionSnapshot, MAX_CAP};

use crate::theme::{
    style_accent, style_border, style_default, style_muted, style_secondary, style_selected,
    C_CAPPING,
};

const GAUGE_CELLS: usize = 10;

/// Fixed-width cap gauge, `▰` filled against `▱`.
fn cap_gauge(cap: u8, cells: usize) -> String {
    let filled = ((cap as f32 / MAX_CAP as f32) * cells as f32).round() as usize;
    let filled = filled.min(cells);
    let mut s = String::with_capacity(cells * 3);
    for _ in 0..filled {
        s.push('▰');
    }
    for _ in filled..cells {
        s.push('▱');
    }
    s
}

/// Capture marker: capturing, enabled but stream dead, or off.
fn marker(snapshot: &SessionSnapshot) -> (&'static str, Style) {
    if snapshot.capturing {
        ("●", Style::default().fg(C_CAPPING))
    } else if snapshot.enabled {
        ("○", style_accent())
    } else {
        ("·", style_muted())
    }
}

fn build_row(snapshot: &SessionSnapshot, selected: bool) -> Line<'static> {
    let (mark, mark_style) = marker(snapshot);
    let mut spans = vec![
        Span::styled(format!(" {mark} "), mark_style),
        Span::styled(format!("tab {:<5}", snapshot.tab_id), style_default()),
        Span::styled(format!("{:>3} ", snapshot.cap), style_secondary()),
        Span::styled(cap_gauge(snapshot.cap, GAUGE_CELLS), style_secondary()),
        Span::styled(format!(" {:+.2} ", snapshot.gain), style_muted()),
    ];
    if let Some(stream) = &snapshot.stream_id {
        spans.push(Span::styled(stream.clone(), style_muted()));
    }
    if snapshot.visual_hidden {
        spans.push(Span::styled(" [hidden]", style_muted()));
    }
    let mut line = Line::from(spans);
    if selected {
        line = line.style(style_selected());
    }
    line
}

pub fn draw(frame: &mut Frame, area: Rect, sessions: &[SessionSnapshot], selected: usize) {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(style_border())
        .title(format!(" sessions ({}) ", sessions.len()));

    let items: Vec<ListItem> = if sessions.is_empty() {
        vec![ListItem::new(Line::styled(
            " none — press n to add a demo tab",
            style_muted(),
        ))]
    } else {
        sessions
            .iter()
            .enumerate()
            .map(|(i, s)| ListItem::new(build_row(s, i == selected)))
            .collect()
    };

    frame.render_widget(List::new(items).block(block), area);
}
