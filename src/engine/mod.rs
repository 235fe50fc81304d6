//! Form configuration engine: normalisation, options, payloads, editing and
//! document migration.

pub mod editor;
pub mod files;
pub mod migration;
pub mod normalize;
pub mod options;
pub mod payload;
pub mod rewrite;
pub mod variables;
pub mod version;

pub use editor::ElementEditor;
pub use normalize::{conflict, to_persisted, to_runtime, RuntimeElement};
pub use variables::Variables;
pub use version::Version;
