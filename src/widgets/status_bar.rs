use ratatui::prelude::*;
use ratatui::text::{Line, Span};
use ratatui::widgets::*;

use crate::ui::{AppState, ToastLevel};

/// Two rows: activity, toast and latest error on top; key help below.
pub(crate) fn draw_status_bar(f: &mut Frame, area: Rect, state: &AppState, help_text: &str) {
    let theme = &state.theme;
    let mut spans: Vec<Span> = Vec::new();
    if let Some(phase) = state.panel.loading {
        let spinner = ["⠋", "⠙", "⠸", "⠴", "⠦", "⠇"][state.tick as usize % 6];
        spans.push(Span::raw(format!(" {spinner} {} request…", phase.as_str())));
        spans.push(Span::raw("  |  "));
    }
    if let Some(t) = &state.toast {
        let color = theme.toast_color(t.level);
        let tag = match t.level {
            ToastLevel::Success => "[OK]",
            ToastLevel::Warning => "[WARN]",
            ToastLevel::Error => "[ERROR]",
            ToastLevel::Info => "[INFO]",
        };
        spans.push(Span::styled(
            format!("{tag} "),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled(format!("{}  |  ", t.text), Style::default().fg(color)));
    }
    if let Some(err) = &state.panel.error {
        spans.push(Span::styled(format!("error: {err}"), theme.text_error()));
    } else if state.editor.is_dirty() {
        spans.push(Span::styled("editor: unsaved changes", theme.text_editing_bold()));
    }
    let lines = vec![
        Line::from(spans),
        Line::from(Span::styled(help_text.to_string(), theme.text_muted())),
    ];
    f.render_widget(Paragraph::new(lines), area);
}
