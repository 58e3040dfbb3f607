//! The error hierarchy, realized as one enum rather than separate named
//! kinds — `thiserror` gives us a real type per variant while keeping a
//! single `Result<T, Error>` at every call site.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{message} - {data}")]
    Rpc { code: i64, message: String, data: String },

    #[error("{message}")]
    Evaluation {
        name: String,
        message: String,
        stack: String,
    },

    #[error("not connected")]
    NotConnected,

    #[error(" failed to connect, please retry")]
    ConnectionExhausted,

    #[error("connection reset")]
    ConnectionReset,

    #[error("Target process: {0} doesn't exist.")]
    TargetNotFound(u32),

    #[error(
        "There was an internal error in cdbg. Please report this bug.\n{0}"
    )]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Maps an error kind to the process exit code.
    /// Kinds that never reach `main` directly (e.g. `Rpc`, `Evaluation`,
    /// which are caught and printed inline by the REPL) still get a
    /// sensible code so a caller that does propagate them to the top
    /// doesn't panic on an unmapped case.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Usage(_) => 1,
            Error::ConnectionExhausted => 1,
            Error::TargetNotFound(_) => 1,
            Error::Internal(_) => 1,
            Error::Protocol(_) => 1,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
