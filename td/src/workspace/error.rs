//! Error taxonomy for workspace/worktree operations.

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("origin unreachable: {0}")]
    OriginUnreachable(String),

    #[error("branch not found: {0}")]
    BranchNotFound(String),

    #[error("origin mismatch: {0}")]
    OriginMismatch(String),

    #[error("insufficient disk space: {0}")]
    DiskFull(String),

    #[error("invalid origin url: {0}")]
    InvalidOrigin(String),

    #[error("workspace error: {0}")]
    Other(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
