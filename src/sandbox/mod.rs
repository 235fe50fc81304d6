//! Script hosting for user-authored hooks.
//!
//! Predicate hooks (`showIf`, `disableIf`, `getOptions`) run synchronously;
//! action and payload hooks run as async functions driven to completion. Each
//! invocation sees only the context object of its family.

pub mod context;
pub mod engine;
pub mod hooks;

pub use context::{
    ActionInput, ActionOutcome, HookEffect, HookEnv, LocationChange, NotifyLevel, PayloadInput,
    PredicateInput,
};
pub use hooks::{with_fallback, Evaluated, Helpers, Hook, HookCache};
