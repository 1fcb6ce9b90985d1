mod store;

pub use store::*;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("transient store error: {0}")]
    Transient(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
