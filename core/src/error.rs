use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedbackError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{what} '{key}' not found")]
    NotFound { what: &'static str, key: String },

    #[error("Feedback code '{code}' has already been used")]
    AlreadyUsed { code: String },

    #[error("Customer number does not match the code")]
    NumberMismatch,

    #[error("Invalid rating {rating}: expected 1 to 5")]
    InvalidRating { rating: f64 },

    #[error("An employee with email '{email}' already exists")]
    DuplicateEmail { email: String },

    #[error("Invalid email address '{email}': {reason}")]
    InvalidEmail { email: String, reason: &'static str },

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("Employee '{requester}' does not own code '{code}'")]
    NotOwner { requester: String, code: String },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("New passwords do not match")]
    PasswordConfirmationMismatch,

    #[error("Missing required field '{field}'")]
    MissingField { field: &'static str },

    #[error("Invalid points settings: {reason}")]
    InvalidSettings { reason: String },

    #[error("Invalid store path '{path}'")]
    InvalidPath { path: String },

    #[error("Write conflict on '{path}' after {attempts} attempts")]
    Conflict { path: String, attempts: u32 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type FeedbackResult<T> = Result<T, FeedbackError>;

impl FeedbackError {
    pub(crate) fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound { what, key: key.into() }
    }

    pub(crate) fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden { reason: reason.into() }
    }
}
