/// Shared error type used across all Muster crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("invalid state: expected {expected}, was {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("guidance: {0}")]
    Guidance(String),

    #[error("adapter: {0}")]
    Adapter(String),

    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    #[error("injector already registered: {0}")]
    DuplicateInjector(String),

    #[error("invalid timezone: {0}")]
    Timezone(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build an `InvalidState` error from two displayable states.
    pub fn invalid_state(expected: impl std::fmt::Display, actual: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
