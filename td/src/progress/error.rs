//! Error types for progress-log I/O.

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("failed to read progress file {path}: {source}")]
    Read { path: std::path::PathBuf, #[source] source: std::io::Error },

    #[error("failed to write progress file {path}: {source}")]
    Write { path: std::path::PathBuf, #[source] source: std::io::Error },
}
