use crate::app::{update, AppMsg, Effect, PanelState, Pending};
use crate::engine::editor::ElementEditor;
use crate::engine::files::FileRef;
use crate::engine::normalize::to_persisted;
use crate::engine::variables::Variables;
use crate::model::{Element, ElementOption, ElementType, LayoutSection};
use crate::sandbox::{HookEnv, LocationChange, NotifyLevel};
use crate::services::datasource::Datasources;
use crate::services::frames::PanelData;
use crate::services::loader::{spawn_request, LoadMsg};
use crate::services::request::Transport;
use crate::services::store::ConfigStore;
use crate::theme::Theme;
use crate::widgets::form::{draw_confirm, draw_form, value_text, FormCursor};
use crate::widgets::status_bar::draw_status_bar;
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::prelude::*;
use ratatui::widgets::*;
use serde_json::{json, Value as JsonValue};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Everything `run` needs, resolved from the command line and environment.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub document: PathBuf,
    pub data: Option<PathBuf>,
    pub datasources: Option<PathBuf>,
    pub variables: Vec<(String, String)>,
    pub autosave: Duration,
    pub headless: bool,
    pub ticks: u64,
    pub summary: bool,
    pub theme: Theme,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl From<NotifyLevel> for ToastLevel {
    fn from(l: NotifyLevel) -> Self {
        match l {
            NotifyLevel::Success => ToastLevel::Success,
            NotifyLevel::Warning => ToastLevel::Warning,
            NotifyLevel::Error => ToastLevel::Error,
        }
    }
}

pub struct Toast {
    pub text: String,
    pub level: ToastLevel,
    pub expires_at_tick: u64,
}

pub(crate) struct AppState {
    pub(crate) panel: PanelState,
    pub(crate) editor: ElementEditor,
    store: Rc<RefCell<ConfigStore>>,
    pub(crate) cursor: FormCursor,
    pub(crate) tick: u64,
    pub(crate) toast: Option<Toast>,
    pub(crate) theme: Theme,
    // Debug log (rendered in bottom debug pane)
    pub(crate) debug_log: VecDeque<String>,
    /// Messages deferred to the next pump, so a hook that reruns the initial
    /// request cannot recurse.
    pending: VecDeque<AppMsg>,
    tx: Sender<LoadMsg>,
    rx: Receiver<LoadMsg>,
    datasources: Arc<Datasources>,
    transport: Arc<dyn Transport>,
}

impl AppState {
    /// Open the document, wire the editor's commits to the store and build
    /// the panel runtime. No request is sent yet.
    pub(crate) fn open(opts: &RunOptions, transport: Arc<dyn Transport>) -> Result<AppState> {
        let datasources = match &opts.datasources {
            Some(p) => Datasources::load(p)?,
            None => Datasources::default(),
        };
        let (store, applied) = ConfigStore::open(&opts.document, &datasources)
            .with_context(|| format!("opening {}", opts.document.display()))?;
        let data = match &opts.data {
            Some(p) => PanelData::load(p).with_context(|| format!("loading data {}", p.display()))?,
            None => PanelData::default(),
        };
        let variables = opts
            .variables
            .iter()
            .fold(Variables::new(), |v, (k, val)| v.with(k.clone(), val.clone()));
        let env = HookEnv {
            variables,
            file_root: opts.document.parent().map(|p| p.to_path_buf()),
        };

        let store = Rc::new(RefCell::new(store));
        let (persisted, sections) = {
            let s = store.borrow();
            (s.elements(), s.get().layout.sections.clone())
        };
        let sink = Rc::clone(&store);
        let editor = ElementEditor::new(
            persisted,
            sections,
            opts.autosave,
            Box::new(move |els: Arc<Vec<Element>>, secs: Vec<LayoutSection>| {
                sink.borrow_mut().replace_elements(els, secs)
            }),
        );
        // the panel shares the editor's uids so selections map across
        let mut config = store.borrow().get().clone();
        config.elements = to_persisted(editor.elements());
        let panel = PanelState::new(config, data, env);

        let (tx, rx) = mpsc::channel::<LoadMsg>();
        let mut state = AppState {
            panel,
            editor,
            store,
            cursor: FormCursor::default(),
            tick: 0,
            toast: None,
            theme: opts.theme.clone(),
            debug_log: VecDeque::new(),
            pending: VecDeque::new(),
            tx,
            rx,
            datasources: Arc::new(datasources),
            transport,
        };
        for t in applied {
            state.dbg(format!("migrated: {}", t.describe()));
        }
        Ok(state)
    }

    pub fn dbg(&mut self, msg: impl Into<String>) {
        const MAX_LOG_LINES: usize = 200;
        let msg = msg.into();
        debug!(target: "dynaform::ui", "{msg}");
        if self.debug_log.len() >= MAX_LOG_LINES {
            self.debug_log.pop_front();
        }
        self.debug_log.push_back(msg);
    }

    fn toast(&mut self, level: ToastLevel, text: impl Into<String>) {
        let ticks = 4 * 5; // ~200ms tick
        self.toast = Some(Toast {
            text: text.into(),
            level,
            expires_at_tick: self.tick.saturating_add(ticks),
        });
    }

    pub(crate) fn dispatch(&mut self, msg: AppMsg) {
        let effects = update(&mut self.panel, msg);
        run_effects(self, effects);
        let n = self.panel.views.len();
        if self.cursor.selected >= n {
            self.cursor.selected = n.saturating_sub(1);
        }
    }

    /// Selected view's uid.
    fn selected_uid(&self) -> Option<String> {
        self.panel
            .views
            .get(self.cursor.selected)
            .map(|v| v.uid.clone())
    }

    fn editor_index(&self, uid: &str) -> Option<usize> {
        self.editor.elements().iter().position(|e| e.uid == uid)
    }

    /// Rebuild the panel from the store after the editor committed.
    fn after_commit(&mut self) {
        let cfg = self.store.borrow().get().clone();
        let writes = self.store.borrow().writes();
        self.dbg(format!("saved document (write #{writes})"));
        self.dispatch(AppMsg::ConfigReplaced(cfg));
    }

    /// Drain finished requests and deferred messages, then give the editor a
    /// chance to auto-save.
    pub(crate) fn pump(&mut self, now: Instant) {
        let mut drained: Vec<LoadMsg> = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            drained.push(msg);
        }
        for LoadMsg { phase, outcome } in drained {
            match &outcome {
                Ok(_) => self.dbg(format!("{} response received", phase.as_str())),
                Err(e) => self.dbg(format!("{} failed: {e}", phase.as_str())),
            }
            self.dispatch(AppMsg::Loaded { phase, outcome });
        }
        let batch: Vec<AppMsg> = self.pending.drain(..).collect();
        for msg in batch {
            self.dispatch(msg);
        }
        match self.editor.poll(now) {
            Ok(true) => self.after_commit(),
            Ok(false) => {}
            Err(e) => {
                let msg = format!("Auto-save failed: {e}");
                self.dbg(&msg);
                self.toast(ToastLevel::Error, msg);
            }
        }
        if let Some(t) = &self.toast {
            if self.tick >= t.expires_at_tick {
                self.toast = None;
            }
        }
    }
}

fn run_effects(state: &mut AppState, effects: Vec<Effect>) {
    for eff in effects {
        match eff {
            Effect::Send { phase, plan } => {
                state.dbg(format!("{} request: {}", phase.as_str(), plan.describe()));
                spawn_request(
                    phase,
                    plan,
                    Arc::clone(&state.transport),
                    Arc::clone(&state.datasources),
                    state.tx.clone(),
                );
            }
            Effect::RerunInitial => state.pending.push_back(AppMsg::Start),
            Effect::Notify { level, text } => state.toast(level.into(), text),
            Effect::Navigate(loc) => {
                let text = match loc {
                    LocationChange::Push(path) => format!("navigate to {path}"),
                    LocationChange::Partial { query, replace } => {
                        format!("update query {query} (replace: {replace})")
                    }
                    LocationChange::Reload => "reload requested".to_string(),
                };
                state.dbg(&text);
                state.toast(ToastLevel::Info, text);
            }
            Effect::PersistConfig(cfg) => {
                let res = state.store.borrow_mut().replace(*cfg);
                match res {
                    Ok(()) => {
                        let (els, secs) = {
                            let s = state.store.borrow();
                            (s.elements(), s.get().layout.sections.clone())
                        };
                        if state.editor.sync_from(els, secs) {
                            state.dbg("editor resynced from saved options");
                        }
                    }
                    Err(e) => {
                        let msg = format!("Saving options failed: {e}");
                        state.dbg(&msg);
                        state.toast(ToastLevel::Error, msg);
                    }
                }
            }
        }
    }
}

/// Text put in the edit buffer for `value`.
pub(crate) fn edit_text(kind: &ElementType, value: &JsonValue) -> String {
    match (kind, value) {
        (ElementType::File, v) => FileRef::list_from_value(v)
            .map(|files| {
                files
                    .iter()
                    .map(|f| f.path.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default(),
        (_, v) => value_text(v),
    }
}

/// Parse an edit buffer into an element value.
pub(crate) fn parse_input(
    kind: &ElementType,
    text: &str,
    options: &[ElementOption],
) -> std::result::Result<JsonValue, String> {
    let text = text.trim();
    match kind {
        ElementType::Number | ElementType::Slider => {
            if text.is_empty() {
                return Ok(JsonValue::Null);
            }
            if let Ok(i) = text.parse::<i64>() {
                return Ok(json!(i));
            }
            text.parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .ok_or_else(|| format!("'{text}' is not a number"))
        }
        ElementType::Multiselect | ElementType::CheckboxList => Ok(JsonValue::Array(
            text.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(|t| {
                    options
                        .iter()
                        .find(|o| o.label == t || value_text(&o.value) == t)
                        .map(|o| o.value.clone())
                        .unwrap_or_else(|| JsonValue::String(t.to_string()))
                })
                .collect(),
        )),
        ElementType::File => text
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|p| {
                FileRef::from_path(std::path::Path::new(p))
                    .map(|f| f.to_json())
                    .map_err(|e| e.to_string())
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        _ => Ok(JsonValue::String(text.to_string())),
    }
}

/// Enter on the selected element.
fn activate(state: &mut AppState) {
    let Some(view) = state.panel.views.get(state.cursor.selected).cloned() else {
        return;
    };
    if view.disabled || view.blocked.is_some() {
        state.toast(ToastLevel::Info, format!("{} is read-only", view.title));
        return;
    }
    match view.kind {
        ElementType::CustomButton => state.dispatch(AppMsg::RunButton(view.uid)),
        ElementType::Boolean => {
            let on = view.value.as_bool().unwrap_or(false);
            state.dispatch(AppMsg::SetValue {
                uid: view.uid,
                value: JsonValue::Bool(!on),
            });
        }
        ElementType::Select | ElementType::Radio if !view.options.is_empty() => {
            let next = view
                .options
                .iter()
                .position(|o| o.value == view.value)
                .map(|p| (p + 1) % view.options.len())
                .unwrap_or(0);
            let value = view.options[next].value.clone();
            state.dispatch(AppMsg::SetValue { uid: view.uid, value });
        }
        ElementType::Link => {
            state.toast(ToastLevel::Info, format!("link: {}", value_text(&view.value)));
        }
        kind => state.cursor.edit = Some(edit_text(&kind, &view.value)),
    }
}

fn commit_edit(state: &mut AppState) {
    let Some(text) = state.cursor.edit.take() else {
        return;
    };
    let Some(view) = state.panel.views.get(state.cursor.selected).cloned() else {
        return;
    };
    match parse_input(&view.kind, &text, &view.options) {
        Ok(value) => state.dispatch(AppMsg::SetValue { uid: view.uid, value }),
        Err(e) => state.toast(ToastLevel::Error, e),
    }
}

fn editor_action(state: &mut AppState, code: KeyCode) {
    let Some(uid) = state.selected_uid() else {
        return;
    };
    let res = match (code, state.editor_index(&uid)) {
        (KeyCode::Char('K'), Some(i)) if i > 0 => {
            state.editor.move_element(i, i - 1);
            Ok(())
        }
        (KeyCode::Char('J'), Some(i)) => {
            state.editor.move_element(i, i + 1);
            Ok(())
        }
        (KeyCode::Char('x'), Some(_)) => state.editor.remove_element(&uid),
        _ => Ok(()),
    };
    match res {
        Ok(()) if state.editor.is_dirty() => state.dbg("editor: unsaved changes"),
        Ok(()) => {}
        Err(e) => state.toast(ToastLevel::Error, e.to_string()),
    }
}

/// Apply one key press. Returns true when the app should quit.
pub(crate) fn handle_key(state: &mut AppState, key: KeyEvent) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }
    if let Some(buf) = &mut state.cursor.edit {
        match key.code {
            KeyCode::Char(c) => buf.push(c),
            KeyCode::Backspace => {
                buf.pop();
            }
            KeyCode::Esc => state.cursor.edit = None,
            KeyCode::Enter => commit_edit(state),
            _ => {}
        }
        return false;
    }
    if state.panel.confirming.is_some() {
        match key.code {
            KeyCode::Char('y') | KeyCode::Enter => state.dispatch(AppMsg::Confirm(true)),
            KeyCode::Char('n') | KeyCode::Esc => state.dispatch(AppMsg::Confirm(false)),
            _ => {}
        }
        return false;
    }
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return true,
        KeyCode::Up | KeyCode::Char('k') => {
            state.cursor.selected = state.cursor.selected.saturating_sub(1);
        }
        KeyCode::Down | KeyCode::Char('j') => {
            let last = state.panel.views.len().saturating_sub(1);
            state.cursor.selected = (state.cursor.selected + 1).min(last);
        }
        KeyCode::Enter => activate(state),
        KeyCode::Char('u') => state.dispatch(AppMsg::Submit),
        KeyCode::Char('r') => state.dispatch(AppMsg::Reset),
        KeyCode::Char('b') => {
            let is_button = state
                .panel
                .views
                .get(state.cursor.selected)
                .is_some_and(|v| v.kind == ElementType::CustomButton);
            if is_button {
                activate(state);
            }
        }
        KeyCode::Char('K') | KeyCode::Char('J') | KeyCode::Char('x') => {
            editor_action(state, key.code)
        }
        KeyCode::Char('S') => match state.editor.save_now() {
            Ok(()) => {
                state.after_commit();
                state.toast(ToastLevel::Success, "Saved");
            }
            Err(e) => state.toast(ToastLevel::Error, format!("Save failed: {e}")),
        },
        _ => {}
    }
    false
}

fn draw_header(f: &mut Frame, area: Rect, state: &AppState) {
    let cfg = &state.panel.config;
    let name = state
        .store
        .borrow()
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let mut spans = vec![
        Span::styled(format!(" {name} "), state.theme.title_style()),
        Span::styled(
            format!("v{}", cfg.version.as_deref().unwrap_or("?")),
            state.theme.text_muted(),
        ),
    ];
    if state.editor.is_dirty() {
        spans.push(Span::styled("  ● unsaved", state.theme.text_editing_bold()));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_debug(f: &mut Frame, area: Rect, state: &AppState) {
    let b = Block::default()
        .borders(Borders::TOP)
        .border_style(state.theme.text_muted())
        .title(Span::styled(
            "Debug",
            state.theme.text_muted().add_modifier(Modifier::BOLD),
        ));
    // Take last lines that fit under the border
    let h = area.height.saturating_sub(1) as usize;
    let start = state.debug_log.len().saturating_sub(h);
    let lines: Vec<Line> = state
        .debug_log
        .iter()
        .skip(start)
        .map(|s| Line::raw(s.clone()))
        .collect();
    let p = Paragraph::new(lines)
        .style(Style::default().fg(Color::Gray))
        .block(b);
    f.render_widget(p, area);
}

fn help_text(state: &AppState) -> &'static str {
    if state.cursor.edit.is_some() {
        "type  Enter apply  Esc cancel"
    } else if state.panel.confirming.is_some() {
        "y confirm  n cancel"
    } else {
        "↑/↓ select  Enter edit  u submit  r reset  b button  K/J move  x remove  S save  q quit"
    }
}

fn ui(f: &mut Frame, state: &AppState) {
    let screen = f.area();
    f.render_widget(Block::default().style(state.theme.base_style()), screen);
    const DEBUG_H: u16 = 4;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(DEBUG_H),
            Constraint::Length(2),
        ])
        .split(screen);
    draw_header(f, chunks[0], state);
    draw_form(
        f,
        chunks[1],
        &state.panel,
        &state.cursor,
        &state.theme,
        true,
        state.tick % 2 == 0,
    );
    draw_debug(f, chunks[2], state);
    draw_status_bar(f, chunks[3], state, help_text(state));
    if let Some(action) = state.panel.confirming {
        let title = match action {
            Pending::Submit => "Confirm update",
            Pending::Reset => "Confirm reset",
        };
        draw_confirm(f, chunks[1], title, &state.panel.changed_elements(), &state.theme);
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(false)
}

/// Headless mode also honours `DYNAFORM_HEADLESS`, like the smoke runs.
pub fn headless_requested(flag: bool) -> bool {
    flag || env_flag("DYNAFORM_HEADLESS")
}

fn summary(state: &AppState) -> JsonValue {
    json!({
        "ok": state.panel.error.is_none(),
        "error": state.panel.error,
        "elements": state.panel.elements.len(),
        "visible": state.panel.views.len(),
        "changed": state.panel.changed_elements().len(),
        "loading": state.panel.loading.map(|p| p.as_str()),
        "writes": state.store.borrow().writes(),
        "dirty": state.editor.is_dirty(),
    })
}

pub fn run(opts: RunOptions, transport: Arc<dyn Transport>) -> Result<()> {
    let mut state = AppState::open(&opts, transport)?;
    state.dispatch(AppMsg::Start);
    let tick_rate = Duration::from_millis(200);
    if opts.headless {
        let backend = ratatui::backend::TestBackend::new(80, 24);
        let mut terminal = Terminal::new(backend)?;
        for _ in 0..opts.ticks {
            state.pump(Instant::now());
            terminal.draw(|f| ui(f, &state))?;
            state.tick = state.tick.wrapping_add(1);
            std::thread::sleep(tick_rate);
        }
        if opts.summary {
            println!("{}", summary(&state));
        }
        return Ok(());
    }
    // Setup terminal (interactive)
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut last_tick = Instant::now();
    let res: Result<()> = loop {
        if let Err(e) = terminal.draw(|f| ui(f, &state)) {
            break Err(e.into());
        }
        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_millis(0));
        match event::poll(timeout) {
            Ok(true) => match event::read() {
                Ok(Event::Key(key)) => {
                    if handle_key(&mut state, key) {
                        break Ok(());
                    }
                }
                Ok(_) => {}
                Err(e) => break Err(e.into()),
            },
            Ok(false) => {}
            Err(e) => break Err(e.into()),
        }
        state.pump(Instant::now());
        if last_tick.elapsed() >= tick_rate {
            state.tick = state.tick.wrapping_add(1);
            last_tick = Instant::now();
        }
    };
    // Restore
    disable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    // dropping the editor cancels a pending auto-save
    drop(state);
    res
}
