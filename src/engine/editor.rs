//! Interactive element editing with conflict checks and debounced auto-save.
//!
//! The editor owns an ephemeral copy of the elements and sections. Every
//! mutation marks it dirty and pushes the auto-save deadline out by one
//! window; the host calls [`ElementEditor::poll`] from its loop and the
//! commit fires once the deadline passes without further mutations.

use super::normalize::{conflict, conflict_error, to_persisted, to_runtime_partial, RuntimeElement};
use crate::error::{FormError, Result};
use crate::model::{Element, LayoutSection};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_AUTOSAVE: Duration = Duration::from_millis(1500);

/// Receives the committed elements and sections. The same `Arc` should be
/// handed back through [`ElementEditor::sync_from`] so it is recognised as
/// the editor's own write.
pub type CommitFn = Box<dyn FnMut(Arc<Vec<Element>>, Vec<LayoutSection>) -> Result<()>>;

/// Time source for auto-save deadlines.
pub type Clock = fn() -> Instant;

/// Stable move: remove at `from`, reinsert at `to`. Out-of-range indices are
/// a no-op.
pub fn reorder<T>(list: &mut Vec<T>, from: usize, to: usize) {
    if from >= list.len() || to >= list.len() || from == to {
        return;
    }
    let item = list.remove(from);
    list.insert(to, item);
}

pub struct ElementEditor {
    elements: Vec<RuntimeElement>,
    sections: Vec<LayoutSection>,
    source: Arc<Vec<Element>>,
    dirty: bool,
    window: Duration,
    deadline: Option<Instant>,
    clock: Clock,
    commit: CommitFn,
    commits: usize,
}

impl std::fmt::Debug for ElementEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementEditor")
            .field("elements", &self.elements.len())
            .field("dirty", &self.dirty)
            .field("deadline", &self.deadline)
            .field("commits", &self.commits)
            .finish()
    }
}

impl ElementEditor {
    pub fn new(
        persisted: Arc<Vec<Element>>,
        sections: Vec<LayoutSection>,
        window: Duration,
        commit: CommitFn,
    ) -> Self {
        let (elements, _) = to_runtime_partial(&persisted);
        Self {
            elements,
            sections,
            source: persisted,
            dirty: false,
            window,
            deadline: None,
            clock: Instant::now,
            commit,
            commits: 0,
        }
    }

    /// Read mutation times from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn elements(&self) -> &[RuntimeElement] {
        &self.elements
    }

    pub fn sections(&self) -> &[LayoutSection] {
        &self.sections
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn get(&self, uid: &str) -> Option<&RuntimeElement> {
        self.elements.iter().find(|e| e.uid == uid)
    }

    fn index_of(&self, uid: &str) -> Result<usize> {
        self.elements
            .iter()
            .position(|e| e.uid == uid)
            .ok_or_else(|| FormError::UnknownElement(uid.to_string()))
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.deadline = Some((self.clock)() + self.window);
    }

    /// Replace the element with the same uid. With `check_conflict`, an
    /// `(id, type)` collision rejects the change and nothing is touched.
    pub fn on_change_element(&mut self, updated: RuntimeElement, check_conflict: bool) -> Result<()> {
        if check_conflict && conflict(&self.elements, &updated) {
            return Err(conflict_error(&updated));
        }
        let i = self.index_of(&updated.uid)?;
        self.elements[i] = updated;
        self.touch();
        Ok(())
    }

    /// Edit the persisted fields of one element and recompile its helpers.
    /// A script that does not compile rejects the edit.
    pub fn edit(&mut self, uid: &str, check_conflict: bool, f: impl FnOnce(&mut Element)) -> Result<()> {
        let i = self.index_of(uid)?;
        let mut element = self.elements[i].to_persisted();
        f(&mut element);
        let updated = RuntimeElement::from_persisted(&element)?;
        self.on_change_element(updated, check_conflict)
    }

    /// Append a new element; returns its uid.
    pub fn add_element(&mut self, element: Element) -> Result<String> {
        let rt = RuntimeElement::from_persisted(&element)?;
        if conflict(&self.elements, &rt) {
            return Err(conflict_error(&rt));
        }
        let uid = rt.uid.clone();
        self.elements.push(rt);
        self.touch();
        Ok(uid)
    }

    pub fn remove_element(&mut self, uid: &str) -> Result<()> {
        let i = self.index_of(uid)?;
        self.elements.remove(i);
        self.touch();
        Ok(())
    }

    pub fn move_element(&mut self, from: usize, to: usize) {
        if from < self.elements.len() && to < self.elements.len() && from != to {
            reorder(&mut self.elements, from, to);
            self.touch();
        }
    }

    pub fn add_section(&mut self, section: LayoutSection) -> Result<()> {
        if self.sections.iter().any(|s| s.id == section.id) {
            return Err(FormError::Conflict {
                id: section.id,
                kind: "section".into(),
            });
        }
        self.sections.push(section);
        self.touch();
        Ok(())
    }

    /// Rename a section in place; elements keep pointing at it by id.
    pub fn rename_section(&mut self, id: &str, name: impl Into<String>) -> Result<()> {
        let s = self
            .sections
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| FormError::UnknownElement(id.to_string()))?;
        s.name = name.into();
        self.touch();
        Ok(())
    }

    /// Drop a section; its elements become unassigned.
    pub fn remove_section(&mut self, id: &str) -> Result<()> {
        let before = self.sections.len();
        self.sections.retain(|s| s.id != id);
        if self.sections.len() == before {
            return Err(FormError::UnknownElement(id.to_string()));
        }
        for el in &mut self.elements {
            if el.element.section.as_deref() == Some(id) {
                el.element.section = None;
            }
        }
        self.touch();
        Ok(())
    }

    pub fn move_section(&mut self, from: usize, to: usize) {
        if from < self.sections.len() && to < self.sections.len() && from != to {
            reorder(&mut self.sections, from, to);
            self.touch();
        }
    }

    fn flush(&mut self) -> Result<()> {
        let persisted = Arc::new(to_persisted(&self.elements));
        (self.commit)(Arc::clone(&persisted), self.sections.clone())?;
        self.source = persisted;
        self.dirty = false;
        self.deadline = None;
        self.commits += 1;
        debug!(commits = self.commits, "editor state committed");
        Ok(())
    }

    /// Commit if the auto-save deadline has passed. Returns whether a commit
    /// happened.
    pub fn poll(&mut self, now: Instant) -> Result<bool> {
        match self.deadline {
            Some(due) if now >= due && self.dirty => {
                self.flush()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Manual save: commit immediately and cancel the pending auto-save.
    pub fn save_now(&mut self) -> Result<()> {
        self.deadline = None;
        self.flush()
    }

    /// Rebuild from an externally replaced persisted array. A different
    /// allocation than the last one seen discards local edits.
    pub fn sync_from(&mut self, persisted: Arc<Vec<Element>>, sections: Vec<LayoutSection>) -> bool {
        if Arc::ptr_eq(&self.source, &persisted) {
            return false;
        }
        debug!(dirty = self.dirty, "persisted elements replaced externally, resyncing");
        let (elements, _) = to_runtime_partial(&persisted);
        self.elements = elements;
        self.sections = sections;
        self.source = persisted;
        self.dirty = false;
        self.deadline = None;
        true
    }
}

impl Drop for ElementEditor {
    fn drop(&mut self) {
        if self.deadline.take().is_some() {
            debug!("editor dropped with a pending auto-save; cancelled");
        }
    }
}
