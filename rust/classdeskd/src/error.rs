use thiserror::Error;

/// Domain errors raised by the store, the calculators and the grade workflow.
/// IPC handlers map these onto wire error codes.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("score {score} for student {student_id} is outside 0..={max_score}")]
    InvalidScore {
        student_id: String,
        score: f64,
        max_score: f64,
    },

    #[error("{0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("malformed {table}.{column} value: {value:?}")]
    MalformedRow {
        table: &'static str,
        column: &'static str,
        value: String,
    },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn malformed(table: &'static str, column: &'static str, value: impl Into<String>) -> Self {
        Self::MalformedRow {
            table,
            column,
            value: value.into(),
        }
    }

    /// Wire code used in the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidScore { .. } | CoreError::Validation(_) => "bad_params",
            CoreError::NotFound { .. } => "not_found",
            CoreError::MalformedRow { .. } => "malformed_row",
            CoreError::Store(_) => "db_query_failed",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
