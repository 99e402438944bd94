//! Shared color palette and text styles.

use ratatui::style::{Color, Modifier, Style};

pub const C_PRIMARY: Color = Color::Rgb(210, 212, 216);
pub const C_SECONDARY: Color = Color::Rgb(150, 153, 160);
pub const C_MUTED: Color = Color::Rgb(98, 100, 110);
pub const C_ACCENT: Color = Color::Rgb(255, 145, 95);
pub const C_CAPPING: Color = Color::Rgb(118, 220, 130);
pub const C_SELECTION_BG: Color = Color::Rgb(44, 46, 60);
pub const C_PANEL_BORDER: Color = Color::Rgb(70, 72, 86);

// Spectrum panel: bars plus the three overlay lines.
pub const C_BAR: Color = Color::Rgb(110, 160, 250);
pub const C_AVG_LINE: Color = Color::Rgb(228, 226, 120);
pub const C_CORRECTED_LINE: Color = Color::Rgb(118, 220, 130);
pub const C_CAP_LINE: Color = Color::Rgb(240, 95, 95);

pub fn style_default() -> Style {
    Style::default().fg(C_PRIMARY)
}

pub fn style_secondary() -> Style {
    Style::default().fg(C_SECONDARY)
}

pub fn style_muted() -> Style {
    Style::default().fg(C_MUTED)
}

pub fn style_accent() -> Style {
    Style::default().fg(C_ACCENT)
}

/// Selected session row.
pub fn style_selected() -> Style {
    Style::default()
        .fg(C_PRIMARY)
        .bg(C_SELECTION_BG)
        .add_modifier(Modifier::BOLD)
}

pub fn style_border() -> Style {
    Style::default().fg(C_PANEL_BORDER)
}
