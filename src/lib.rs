//! Scriptable, data-bound form engine for dashboard panels.
//!
//! `engine` and `sandbox` hold the form semantics, `services` the I/O
//! collaborators, `app` the panel runtime loop; `ui` and `widgets` render it
//! in a terminal.

pub mod app;
pub mod engine;
pub mod error;
pub mod model;
pub mod sandbox;
pub mod services;
pub mod theme;
pub mod ui;
pub mod widgets;

pub use error::{FormError, HookKind, Result};
pub use model::{Element, ElementType, PanelConfig};
