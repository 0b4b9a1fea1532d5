use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{0}")]
    BadInput(String),

    #[error("student {student_id} is already enrolled in {course_id}")]
    AlreadyEnrolled {
        student_id: String,
        course_id: String,
    },

    #[error("max attempts reached ({allowed})")]
    MaxAttempts { allowed: i64 },

    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("stored record {id} is unreadable: {reason}")]
    Corrupt { id: String, reason: String },
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Protocol error code reported to the sidecar's caller.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::BadInput(_) => "bad_params",
            Self::AlreadyEnrolled { .. } => "already_enrolled",
            Self::MaxAttempts { .. } => "max_attempts",
            Self::Store(_) | Self::Json(_) | Self::Corrupt { .. } => "db_query_failed",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
