//! Error types for the session and signal registries.

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("store error: {0}")]
    Store(#[from] taskstore::StoreError),

    #[error("no session registered for task '{0}'")]
    NotFound(String),

    #[error("signal file I/O error: {0}")]
    Signal(#[from] std::io::Error),
}
