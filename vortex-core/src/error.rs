use thiserror::Error;

/// Domain errors for the Vortex core engine.
#[derive(Error, Debug)]
pub enum VortexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open journal directory {path}: {source}")]
    JournalOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("peer link unavailable")]
    PeerUnavailable,
}

pub type Result<T> = std::result::Result<T, VortexError>;
