//! Reusable widgets for the dashboard.

use humansize::{format_size, BINARY};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Wrap},
    Frame,
};

use crate::ui::log_layer::LogLine;

/// Human-readable binary size, e.g. `1.50 MiB`.
pub fn format_bytes(bytes: u64) -> String {
    format_size(bytes, BINARY)
}

/// Keep the tail of a long path, prefixed with `...`.
pub fn truncate_path(path: &str, max_len: usize) -> String {
    let chars = path.chars().count();
    if chars <= max_len {
        return path.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let tail: String = path.chars().skip(chars - keep).collect();
    format!("...{}", tail)
}

fn title_style() -> Style {
    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)
}

/// Bordered panel with an optional progress gauge above its lines.
pub fn render_panel(f: &mut Frame, area: Rect, title: &str, lines: &[String], percent: Option<f64>) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(format!(" {} ", title), title_style()));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let text_area = match percent {
        Some(pct) if inner.height > 1 => {
            let rows = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(1), Constraint::Min(0)])
                .split(inner);
            let ratio = (pct / 100.0).clamp(0.0, 1.0);
            let gauge = Gauge::default()
                .gauge_style(Style::default().fg(Color::Green).bg(Color::Black))
                .ratio(ratio)
                .label(format!("{:.0}%", ratio * 100.0));
            f.render_widget(gauge, rows[0]);
            rows[1]
        }
        _ => inner,
    };

    let text: Vec<Line> = lines.iter().map(|l| Line::from(l.as_str())).collect();
    f.render_widget(Paragraph::new(text).wrap(Wrap { trim: false }), text_area);
}

/// Log pane showing as many trailing lines as fit.
pub fn render_log(f: &mut Frame, area: Rect, lines: &[LogLine]) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(" LOG ", title_style()));
    let visible = area.height.saturating_sub(2) as usize;
    let skip = lines.len().saturating_sub(visible);

    let text: Vec<Line> = if lines.is_empty() {
        vec![Line::from(Span::styled("No logs yet...", Style::default().fg(Color::DarkGray)))]
    } else {
        lines
            .iter()
            .skip(skip)
            .map(|line| {
                if line.highlighted {
                    Line::from(Span::styled(
                        line.text.clone(),
                        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                    ))
                } else {
                    Line::from(line.text.clone())
                }
            })
            .collect()
    };

    f.render_widget(Paragraph::new(text).block(block), area);
}

pub fn render_footer(f: &mut Frame, area: Rect, text: &str) {
    let footer = Paragraph::new(Line::from(Span::styled(
        text.to_string(),
        Style::default().add_modifier(Modifier::BOLD),
    )))
    .style(Style::default().bg(Color::DarkGray).fg(Color::White));
    f.render_widget(footer, area);
}
