use crate::state::{Operation, ProjectStatus};

/// Failures a caller may want to tell apart from plain I/O or provider errors.
///
/// These travel inside `anyhow::Error`; use `err.downcast_ref::<EngineError>()`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("cannot {op} while project is {status}")]
    IllegalState {
        op: Operation,
        status: ProjectStatus,
    },

    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: ProjectStatus,
        to: ProjectStatus,
    },

    #[error("a job is already running for project {0}")]
    JobAlreadyRunning(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True for failures caused by the caller's request rather than the engine.
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, Self::InvalidTransition { .. })
    }
}

/// Returns the engine error carried by `err`, if any.
pub fn engine_error(err: &anyhow::Error) -> Option<&EngineError> {
    err.downcast_ref::<EngineError>()
}
