use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Workspace not available: {0}")]
    WorkspaceNotAvailable(String),

    #[error("Command rejected: {0}")]
    ShellSecurity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Hydration failed: {0}")]
    Hydration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;
