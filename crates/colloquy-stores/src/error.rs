use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("invalid slot settings for '{0}': {1}")]
    InvalidSlot(String, String),
    #[error("internal error: {0}")]
    Internal(String),
}
