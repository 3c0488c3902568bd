use crate::types::RecordRef;

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("No data for the first step of approval")]
    MissingFirstStep,
    #[error("A decision is required on all lines before saving")]
    UndecidedLines,
    #[error("Step order cannot be less than 1, got {0}")]
    InvalidStepIndex(u32),
    #[error("Route step {0} lists no approvers")]
    NoApprovers(u32),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to encode {key}: {message}")]
    Encode { key: String, message: String },
    #[error("failed to decode {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: minicbor::decode::Error,
    },
    #[error("{key} was changed by another writer")]
    Stale { key: String },
}

#[derive(thiserror::Error, Debug)]
pub enum AgreementError {
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Not permitted: {0}")]
    Permission(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("No handler registered for the model of record {record}")]
    UnknownModel { record: RecordRef },
    #[error(transparent)]
    Store(StoreError),
    #[error("related record callback failed: {0}")]
    Callback(#[source] anyhow::Error),
    #[error("failed to generate identifier: {0}")]
    Identifier(#[source] anyhow::Error),
    #[error("agreement write lock poisoned")]
    LockPoisoned,
}

// another writer got there first; the caller reloads and retries
impl From<StoreError> for AgreementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Stale { key } => AgreementError::Conflict(format!(
                "{key} was changed by another writer, reload and retry"
            )),
            err => AgreementError::Store(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgreementError>;
