use thiserror::Error;

/// Error categories for the task lifecycle, mirrored onto HTTP status codes
/// by the server surface and onto task `FAILED` records by the worker loop.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed submission: {0}")]
    ClientInput(String),

    #[error("task '{0}' already admitted and not terminal")]
    Conflict(String),

    #[error("pool is at capacity")]
    Capacity,

    #[error("unknown or expired task '{0}'")]
    NotFound(String),

    #[error("operation invalid in current task state: {0}")]
    State(String),

    #[error("bundle authentication failed (wrong password or tampered bundle)")]
    BundleAuth,

    #[error("bundle metadata missing or malformed: {0}")]
    BundleSchema(String),

    #[error("bundle audio member missing or misnamed: {0}")]
    BundleFormat(String),

    #[error("transcriber produced no output file")]
    NoOutput,

    #[error("transcriber produced more than one candidate output file")]
    AmbiguousOutput,

    #[error("transcriber exited with status {code}: {tail}")]
    Transcriber { code: i32, tail: String },

    #[error("transcriber was cancelled")]
    Cancelled,

    #[error("storage error on '{path}': {detail}")]
    Storage { path: String, detail: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskError {
    /// Short machine-readable code exposed to clients on a `FAILED` task,
    /// e.g. `"bundle.auth"`.
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::Io(_) => "io",
            TaskError::ClientInput(_) => "client_input",
            TaskError::Conflict(_) => "conflict",
            TaskError::Capacity => "capacity",
            TaskError::NotFound(_) => "not_found",
            TaskError::State(_) => "state",
            TaskError::BundleAuth => "bundle.auth",
            TaskError::BundleSchema(_) => "bundle.schema",
            TaskError::BundleFormat(_) => "bundle.format",
            TaskError::NoOutput => "transcriber.no_output",
            TaskError::AmbiguousOutput => "transcriber.ambiguous_output",
            TaskError::Transcriber { .. } => "transcriber.exit",
            TaskError::Cancelled => "transcriber.cancelled",
            TaskError::Storage { .. } => "storage",
            TaskError::Internal(_) => "internal",
        }
    }

    pub fn is_bundle_error(&self) -> bool {
        matches!(
            self,
            TaskError::BundleAuth | TaskError::BundleSchema(_) | TaskError::BundleFormat(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TaskError>;

/// Whisper models the server is willing to run. Unknown model names in a
/// submission are rejected rather than passed through (see Open Questions).
pub const MODEL_ALLOW_LIST: &[&str] = &["tiny", "base", "small", "medium", "large-v3"];

pub fn is_allowed_model(name: &str) -> bool {
    MODEL_ALLOW_LIST.contains(&name)
}

/// `task_id` syntax: non-empty, printable ASCII, length <= 128.
pub fn is_valid_task_id(task_id: &str) -> bool {
    !task_id.is_empty()
        && task_id.len() <= 128
        && task_id.chars().all(|c| c.is_ascii_graphic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(TaskError::BundleAuth.code(), "bundle.auth");
        assert_eq!(TaskError::Capacity.code(), "capacity");
        assert_eq!(
            TaskError::Transcriber {
                code: 1,
                tail: String::new()
            }
            .code(),
            "transcriber.exit"
        );
    }

    #[test]
    fn task_id_validation() {
        assert!(is_valid_task_id("abc-123"));
        assert!(!is_valid_task_id(""));
        assert!(!is_valid_task_id(&"a".repeat(129)));
        assert!(!is_valid_task_id("bad id with space"));
        assert!(!is_valid_task_id("bad\nid"));
    }

    #[test]
    fn model_allow_list() {
        assert!(is_allowed_model("small"));
        assert!(!is_allowed_model("gpt-4"));
    }
}
