use std::path::PathBuf;

use thiserror::Error;

/// Fatal errors. Anything in here aborts the run before (or between) batches;
/// per-item failures never end up here, they become [`Failure`](crate::outcome::Failure)s.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Batch budget must be positive, got {0}")]
    InvalidBatchBudget(u64),

    #[error("Column `{column}` not found in {}", path.display())]
    MissingColumn { path: PathBuf, column: String },

    #[error("Invalid value in {} row {row}, column `{column}`: {value:?}", path.display())]
    InvalidValue {
        path: PathBuf,
        row: usize,
        column: String,
        value: String,
    },

    #[error(
        "Checkpoint {} has {found} rows but the filtered input has {expected}. \
         Delete it to start over.",
        path.display()
    )]
    CheckpointMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("Event {event} is not valid in state {state}")]
    IllegalTransition {
        state: crate::state_machine::RunState,
        event: String,
    },

    #[error("Backend error: {0}")]
    Backend(#[from] crate::backend::BackendError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
