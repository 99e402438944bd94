//! Spectrum panel — per-tick bin magnitudes as bars, with the sampler's
//! reference levels drawn as horizontal lines over them.
//!
//! The builder is pure: each frame is rebuilt from scratch from the latest
//! `VisualFrame`, nothing is retained between ticks.  Terminal cells are the
//! canvas; bins are grouped into one column per cell and bar tops use
//! eighth-block characters for sub-cell precision.

use ratatui::{
    layout::Rect,
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

use tabcap_engine::spectrum::NATIVE_MAX;
use tabcap_proto::protocol::{SessionSnapshot, VisualFrame};

use crate::theme::{
    style_border, style_muted, C_AVG_LINE, C_BAR, C_CAP_LINE, C_CORRECTED_LINE, C_MUTED,
};

/// Partial blocks for bar tops [1/8 .. 7/8].
const FRACTIONAL: [char; 7] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇'];
const BAR_FULL: char = '█';
const BAR_EMPTY: char = ' ';
const LINE_CHAR: char = '─';

/// Row index measured from the bottom of the canvas for a 0..=255 level.
fn row_from_bottom(value: f32, height: usize) -> usize {
    (((value / NATIVE_MAX) * height as f32) as usize).min(height.saturating_sub(1))
}

/// Peak magnitude of the bin group feeding one column.
fn column_value(bins: &[u8], col: usize, width: usize) -> u8 {
    if bins.is_empty() {
        return 0;
    }
    let start = col * bins.len() / width;
    let end = (((col + 1) * bins.len()) / width).max(start + 1).min(bins.len());
    bins[start..end].iter().copied().max().unwrap_or(0)
}

/// Build the bar rows for one frame.  `height` rows, each `width` cells.
pub fn build_spectrum(frame: &VisualFrame, width: usize, height: usize) -> Vec<Line<'static>> {
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let avg_row = row_from_bottom(frame.average, height);
    let corrected_row = row_from_bottom(frame.corrected, height);
    let cap_row = row_from_bottom(frame.scaled_cap, height);

    // Cap drawn over corrected drawn over average where rows coincide.
    let line_color = |from_bottom: usize| -> Option<Color> {
        if from_bottom == cap_row {
            Some(C_CAP_LINE)
        } else if from_bottom == corrected_row {
            Some(C_CORRECTED_LINE)
        } else if from_bottom == avg_row {
            Some(C_AVG_LINE)
        } else {
            None
        }
    };

    // Per-column fill, precomputed once for all rows.
    let columns: Vec<(usize, usize)> = (0..width)
        .map(|col| {
            let value = column_value(&frame.bins, col, width);
            let total_eighths =
                ((value as f32 / NATIVE_MAX) * (height * 8) as f32).round() as usize;
            (total_eighths / 8, total_eighths % 8)
        })
        .collect();

    let flush = |spans: &mut Vec<Span<'static>>, color: Color, s: String| {
        if !s.is_empty() {
            spans.push(Span::styled(s, Style::default().fg(color)));
        }
    };

    let mut rows = Vec::with_capacity(height);
    for r in 0..height {
        let from_bottom = height - 1 - r;
        let overlay = line_color(from_bottom);

        let mut spans: Vec<Span<'static>> = Vec::new();
        let mut current_color: Option<Color> = None;
        let mut current_str = String::new();

        for &(full_cells, partial) in &columns {
            let (ch, bar_color) = if from_bottom < full_cells {
                (BAR_FULL, C_BAR)
            } else if from_bottom == full_cells && partial > 0 {
                (FRACTIONAL[partial - 1], C_BAR)
            } else {
                (BAR_EMPTY, C_MUTED)
            };

            // A reference line recolors bar cells and strokes through gaps.
            let (ch, color) = match overlay {
                Some(line) if ch == BAR_EMPTY => (LINE_CHAR, line),
                Some(line) => (ch, line),
                None => (ch, bar_color),
            };

            if current_color == Some(color) {
                current_str.push(ch);
            } else {
                if let Some(c) = current_color.take() {
                    flush(&mut spans, c, current_str.clone());
                    current_str.clear();
                }
                current_color = Some(color);
                current_str.push(ch);
            }
        }
        if let Some(c) = current_color {
            flush(&mut spans, c, current_str);
        }
        rows.push(Line::from(spans));
    }
    rows
}

/// One-line key for the overlay lines plus the applied gain.
pub fn legend(frame: &VisualFrame) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            format!("─ avg {:>5.1}  ", frame.average),
            Style::default().fg(C_AVG_LINE),
        ),
        Span::styled(
            format!("─ corrected {:>5.1}  ", frame.corrected),
            Style::default().fg(C_CORRECTED_LINE),
        ),
        Span::styled(
            format!("─ cap {:>5.1}  ", frame.scaled_cap),
            Style::default().fg(C_CAP_LINE),
        ),
        Span::styled(format!("gain {:+.2}", frame.gain), style_muted()),
    ])
}

/// Render the panel for the selected session, or a placeholder when there is
/// nothing to show.
pub fn draw(
    frame: &mut Frame,
    area: Rect,
    visual: Option<&VisualFrame>,
    snapshot: Option<&SessionSnapshot>,
) {
    let title = match snapshot {
        Some(s) => format!(" spectrum — tab {} ", s.tab_id),
        None => " spectrum ".to_string(),
    };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(style_border())
        .title(title);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if inner.width == 0 || inner.height == 0 {
        return;
    }

    let placeholder = |text: &str, frame: &mut Frame| {
        frame.render_widget(Paragraph::new(text.to_string()).style(style_muted()), inner);
    };

    let Some(snapshot) = snapshot else {
        placeholder("no session selected — press n to add a demo tab", frame);
        return;
    };
    if snapshot.visual_hidden {
        placeholder("visuals hidden — press v to show", frame);
        return;
    }
    let Some(visual) = visual.filter(|_| snapshot.capturing) else {
        placeholder("no signal — press s to start capture", frame);
        return;
    };

    // Last row is the legend, the rest is canvas.
    let canvas_height = inner.height.saturating_sub(1) as usize;
    let mut lines = build_spectrum(visual, inner.width as usize, canvas_height);
    lines.push(legend(visual));
    frame.render_widget(Paragraph::new(lines), inner);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(bins: Vec<u8>, average: f32, corrected: f32, scaled_cap: f32) -> VisualFrame {
        VisualFrame {
            tab_id: 1,
            bins,
            average,
            corrected,
            scaled_cap,
            gain: -0.25,
        }
    }

    fn text_of(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    fn colors_of(line: &Line) -> Vec<Color> {
        line.spans.iter().filter_map(|s| s.style.fg).collect()
    }

    #[test]
    fn zero_size_builds_nothing() {
        let f = frame_with(vec![200; 8], 100.0, 75.0, 130.0);
        assert!(build_spectrum(&f, 0, 4).is_empty());
        assert!(build_spectrum(&f, 4, 0).is_empty());
    }

    #[test]
    fn full_scale_bins_fill_every_cell() {
        let f = frame_with(vec![255; 16], 0.0, 0.0, 0.0);
        let rows = build_spectrum(&f, 4, 3);
        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert_eq!(text_of(row), "████");
        }
    }

    #[test]
    fn silence_is_reference_lines_over_blank_rows() {
        // Cap pinned to the top row, average and corrected on the bottom one.
        let f = frame_with(vec![0; 16], 0.0, 0.0, 255.0);
        let rows = build_spectrum(&f, 5, 4);
        assert_eq!(text_of(&rows[0]), "─────");
        assert_eq!(colors_of(&rows[0]), vec![C_CAP_LINE]);
        assert_eq!(text_of(&rows[1]), "     ");
        assert_eq!(text_of(&rows[2]), "     ");
        // Corrected wins the collision with average on the bottom row.
        assert_eq!(text_of(&rows[3]), "─────");
        assert_eq!(colors_of(&rows[3]), vec![C_CORRECTED_LINE]);
    }

    #[test]
    fn columns_track_their_bin_groups() {
        // Left half loud, right half silent; all reference levels at the
        // bottom so only the bottom row carries a line stroke.
        let f = frame_with(vec![255, 255, 0, 0], 0.0, 0.0, 0.0);
        let rows = build_spectrum(&f, 2, 2);
        assert_eq!(text_of(&rows[0]), "█ ");
        assert_eq!(text_of(&rows[1]), "█─");
    }

    #[test]
    fn bar_tops_use_partial_blocks() {
        // 96/255 of one row is 3.01 eighths.
        let f = frame_with(vec![96; 4], 0.0, 0.0, 255.0);
        let rows = build_spectrum(&f, 1, 1);
        assert_eq!(text_of(&rows[0]), "▃");
    }

    #[test]
    fn reference_line_recolors_bars_without_erasing_them() {
        // Full columns, cap mid-scale: the cap row keeps its bar glyphs but
        // takes the line color.
        let f = frame_with(vec![255; 8], 0.0, 0.0, 127.0);
        let rows = build_spectrum(&f, 3, 2);
        // 127/255 * 2 rows lands on the bottom row.
        assert_eq!(text_of(&rows[1]), "███");
        assert_eq!(colors_of(&rows[1]), vec![C_CAP_LINE]);
        assert_eq!(colors_of(&rows[0]), vec![C_BAR]);
    }

    #[test]
    fn legend_names_all_three_lines() {
        let f = frame_with(vec![0; 4], 41.0, 30.7, 84.7);
        let text = text_of(&legend(&f));
        assert!(text.contains("avg"));
        assert!(text.contains("corrected"));
        assert!(text.contains("cap"));
        assert!(text.contains("-0.25"));
    }
}
