use thiserror::Error;

/// Which user-authored hook a script error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    ShowIf,
    DisableIf,
    GetOptions,
    InitialCode,
    UpdateCode,
    ResetCode,
    CustomButton,
    GetPayload,
}

impl HookKind {
    pub fn label(self) -> &'static str {
        match self {
            HookKind::ShowIf => "showIf",
            HookKind::DisableIf => "disableIf",
            HookKind::GetOptions => "getOptions",
            HookKind::InitialCode => "initial code",
            HookKind::UpdateCode => "update code",
            HookKind::ResetCode => "reset code",
            HookKind::CustomButton => "custom button code",
            HookKind::GetPayload => "getPayload",
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug)]
pub enum FormError {
    #[error("{hook} does not compile: {message}")]
    ScriptCompile { hook: HookKind, message: String },

    #[error("{hook} failed: {message}")]
    ScriptRuntime { hook: HookKind, message: String },

    #[error("Element with id '{id}' and type '{kind}' already exists")]
    Conflict { id: String, kind: String },

    #[error("Option with value '{value}' already exists")]
    OptionConflict { value: String },

    #[error("Element with uid '{0}' not found")]
    UnknownElement(String),

    #[error("{0}")]
    Request(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error ({context}): {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("YAML error ({context}): {source}")]
    Yaml {
        context: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl FormError {
    pub fn compile(hook: HookKind, message: impl Into<String>) -> Self {
        FormError::ScriptCompile {
            hook,
            message: message.into(),
        }
    }

    pub fn runtime(hook: HookKind, message: impl Into<String>) -> Self {
        FormError::ScriptRuntime {
            hook,
            message: message.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FormError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        FormError::Json {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, FormError>;
