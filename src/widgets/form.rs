//! Terminal rendering of the runtime form.

use crate::app::{ChangedElement, ElementView, PanelState};
use crate::engine::files::FileRef;
use crate::model::{ElementOption, ElementType};
use crate::theme::Theme;
use crate::widgets::chrome::panel_block;
use ratatui::prelude::*;
use ratatui::widgets::*;
use serde_json::Value as JsonValue;

/// Cursor and in-progress edit of the form pane.
#[derive(Clone, Debug, Default)]
pub struct FormCursor {
    pub selected: usize,
    pub edit: Option<String>,
}

/// Display text of a raw element value.
pub fn value_text(v: &JsonValue) -> String {
    if let Some(files) = FileRef::list_from_value(v) {
        return files
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
    }
    match v {
        JsonValue::Null => String::new(),
        JsonValue::Bool(true) => "On".into(),
        JsonValue::Bool(false) => "Off".into(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(items) => items.iter().map(value_text).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

fn option_label<'a>(options: &'a [ElementOption], v: &JsonValue) -> Option<&'a str> {
    options.iter().find(|o| &o.value == v).map(|o| o.label.as_str())
}

/// What the value column shows for `view`.
pub fn display_value(view: &ElementView) -> String {
    match view.kind {
        ElementType::Password => "•".repeat(value_text(&view.value).chars().count()),
        ElementType::CustomButton => format!("[ {} ]", view.title),
        _ if view.kind.has_options() => match &view.value {
            JsonValue::Array(items) => items
                .iter()
                .map(|i| option_label(&view.options, i).map(str::to_string).unwrap_or_else(|| value_text(i)))
                .collect::<Vec<_>>()
                .join(", "),
            v => option_label(&view.options, v)
                .map(str::to_string)
                .unwrap_or_else(|| value_text(v)),
        },
        _ => value_text(&view.value),
    }
}

fn is_selected(view: &ElementView, opt: &ElementOption) -> bool {
    match &view.value {
        JsonValue::Array(items) => items.contains(&opt.value),
        v => v == &opt.value,
    }
}

/// Build the form lines and the index of the cursor line.
pub fn form_lines(
    panel: &PanelState,
    cursor: &FormCursor,
    theme: &Theme,
    cursor_on: bool,
) -> (Vec<Line<'static>>, usize) {
    let mut lines: Vec<Line> = Vec::new();
    let mut cursor_line = 0;
    let mut last_section: Option<&str> = None;
    for (i, view) in panel.views.iter().enumerate() {
        if let Some(sec) = view.section.as_deref() {
            if last_section != Some(sec) {
                let name = panel
                    .config
                    .layout
                    .sections
                    .iter()
                    .find(|s| s.id == sec)
                    .map(|s| s.name.as_str())
                    .unwrap_or(sec);
                lines.push(Line::from(Span::styled(format!("-- {name} --"), theme.title_style())));
                last_section = Some(sec);
            }
        }
        let here = i == cursor.selected;
        if here {
            cursor_line = lines.len();
        }
        let sel = if here { '›' } else { ' ' };
        let mark = if view.changed { " *" } else { "" };
        let label_style = if view.disabled {
            theme.text_muted()
        } else {
            Style::default()
        };
        if view.kind == ElementType::CustomButton {
            let style = if here { theme.text_active_bold() } else { label_style };
            lines.push(Line::from(vec![
                Span::raw(format!("{sel} ")),
                Span::styled(display_value(view), style),
            ]));
            continue;
        }
        let mut value = match (&cursor.edit, here) {
            (Some(buf), true) => buf.clone(),
            _ => display_value(view),
        };
        if here && cursor.edit.is_some() && cursor_on {
            value.push('▏');
        }
        let value_style = match (here, cursor.edit.is_some(), view.changed) {
            (true, true, _) => theme.text_editing_bold(),
            (true, false, _) => theme.text_active_bold(),
            (false, _, true) => theme.text_changed(),
            _ => label_style,
        };
        let mut spans = vec![
            Span::styled(format!("{sel} {}{mark}: ", view.title), label_style),
            Span::styled(value, value_style),
        ];
        if let Some(err) = &view.blocked {
            spans.push(Span::styled(format!("  ⚠ {err}"), theme.text_error()));
        }
        lines.push(Line::from(spans));
        if here && !view.options.is_empty() {
            let opts: Vec<Span> = view
                .options
                .iter()
                .map(|o| {
                    if is_selected(view, o) {
                        Span::styled(format!("[{}] ", o.label), theme.text_active_bold())
                    } else {
                        Span::styled(format!(" {}  ", o.label), theme.text_muted())
                    }
                })
                .collect();
            lines.push(Line::from([vec![Span::raw("    ")], opts].concat()));
        }
    }
    if lines.is_empty() {
        lines.push(Line::from(Span::styled("(no visible elements)", theme.text_muted())));
    }
    (lines, cursor_line)
}

pub fn draw_form(
    f: &mut Frame,
    area: Rect,
    panel: &PanelState,
    cursor: &FormCursor,
    theme: &Theme,
    focused: bool,
    cursor_on: bool,
) {
    let title = match panel.loading {
        Some(phase) => format!("Form ({} …)", phase.as_str()),
        None => "Form".to_string(),
    };
    let block = panel_block(&title, focused, theme);
    let inner_h = area.height.saturating_sub(2) as usize;
    let (lines, cursor_line) = form_lines(panel, cursor, theme, cursor_on);
    // keep the cursor line and its option row in view
    let offset = (cursor_line + 2).saturating_sub(inner_h);
    let p = Paragraph::new(lines)
        .block(block)
        .scroll((offset as u16, 0));
    f.render_widget(p, area);
}

/// Modal listing the pending changes before an update is sent.
pub fn draw_confirm(f: &mut Frame, area: Rect, title: &str, changes: &[ChangedElement], theme: &Theme) {
    let w = area.width.saturating_sub(8).min(70);
    let h = (changes.len() as u16 + 4).min(area.height);
    let rect = Rect {
        x: area.x + (area.width.saturating_sub(w)) / 2,
        y: area.y + (area.height.saturating_sub(h)) / 2,
        width: w,
        height: h,
    };
    let mut lines: Vec<Line> = changes
        .iter()
        .map(|c| {
            Line::from(vec![
                Span::raw(format!("{}: ", c.title)),
                Span::styled(value_text(&c.old), theme.text_muted()),
                Span::raw(" → "),
                Span::styled(value_text(&c.new), theme.text_changed()),
            ])
        })
        .collect();
    if lines.is_empty() {
        lines.push(Line::from(Span::styled("No changes", theme.text_muted())));
    }
    lines.push(Line::from(Span::styled("y confirm  n cancel", theme.text_muted())));
    f.render_widget(Clear, rect);
    let p = Paragraph::new(lines)
        .block(panel_block(title, true, theme))
        .wrap(Wrap { trim: true });
    f.render_widget(p, rect);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{update, AppMsg};
    use crate::model::{Element, LayoutSection, PanelConfig};
    use crate::sandbox::HookEnv;
    use crate::services::frames::PanelData;
    use ratatui::backend::TestBackend;
    use serde_json::json;

    fn screen(panel: &PanelState, cursor: &FormCursor, w: u16, h: u16) -> Vec<String> {
        let mut terminal = Terminal::new(TestBackend::new(w, h)).unwrap();
        let theme = Theme::default();
        terminal
            .draw(|f| draw_form(f, f.area(), panel, cursor, &theme, true, false))
            .unwrap();
        let buf = terminal.backend().buffer().clone();
        (0..buf.area.height)
            .map(|y| {
                let mut line: String = (0..buf.area.width)
                    .map(|x| buf[(x, y)].symbol().to_string())
                    .collect();
                while line.ends_with(' ') {
                    line.pop();
                }
                line
            })
            .collect()
    }

    fn sample() -> PanelState {
        let mut secret = Element::new("pw", ElementType::Password).with_value("abc");
        secret.section = Some("s1".into());
        let mut hidden = Element::new("h", ElementType::String).with_value("x");
        hidden.hidden = Some(true);
        let mut color = Element::new("color", ElementType::Radio).with_value("g");
        color.options = Some(vec![ElementOption::new("Red", "r"), ElementOption::new("Green", "g")]);
        color.section = Some("s1".into());
        let cfg = PanelConfig {
            elements: vec![
                Element::new("name", ElementType::String)
                    .with_title("Name")
                    .with_value("alice"),
                hidden,
                secret,
                color,
            ],
            layout: crate::model::LayoutOptions {
                sections: vec![LayoutSection {
                    id: "s1".into(),
                    name: "Secrets".into(),
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        PanelState::new(cfg, PanelData::default(), HookEnv::default())
    }

    #[test]
    fn renders_sections_masks_and_omits_hidden() {
        let panel = sample();
        let rows = screen(&panel, &FormCursor::default(), 40, 10);
        let text = rows.join("\n");
        assert!(text.contains("› Name: alice"), "{text}");
        assert!(text.contains("-- Secrets --"));
        assert!(text.contains("pw: •••"));
        assert!(text.contains("color: Green"));
        assert!(!text.contains("h: x"));
    }

    #[test]
    fn changed_marker_and_option_row_follow_state() {
        let mut panel = sample();
        let uid = panel.views[0].uid.clone();
        let _ = update(&mut panel, AppMsg::SetValue { uid, value: json!("bob") });
        let cursor = FormCursor {
            selected: 2,
            edit: None,
        };
        let text = screen(&panel, &cursor, 40, 10).join("\n");
        assert!(text.contains("Name *: bob"), "{text}");
        assert!(text.contains("[Green]"));
        assert!(text.contains(" Red "));
    }

    #[test]
    fn edit_buffer_replaces_value() {
        let panel = sample();
        let cursor = FormCursor {
            selected: 0,
            edit: Some("typed".into()),
        };
        let text = screen(&panel, &cursor, 40, 6).join("\n");
        assert!(text.contains("Name: typed"));
    }

    #[test]
    fn value_text_formats_scalars_lists_and_files() {
        assert_eq!(value_text(&json!(null)), "");
        assert_eq!(value_text(&json!(true)), "On");
        assert_eq!(value_text(&json!(2.5)), "2.5");
        assert_eq!(value_text(&json!(["a", 1])), "a, 1");
        assert_eq!(
            value_text(&json!([{"name": "a.txt", "path": "/tmp/a.txt"}])),
            "a.txt"
        );
    }
}
