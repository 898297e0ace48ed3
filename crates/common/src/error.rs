use thiserror::Error;

use crate::CandidateSymbol;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication rejected (code {code}): {message}")]
    Auth { code: i64, message: String },

    #[error("Condition query '{condition_id}' timed out")]
    QueryTimeout { condition_id: String },

    #[error("Condition query '{condition_id}' failed (code {code}): {message}")]
    Query {
        condition_id: String,
        code: i64,
        message: String,
    },

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Cannot {operation} while client is {state}")]
    InvalidState {
        operation: &'static str,
        state: crate::ClientState,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Search aborted after reconnect attempt: {source}")]
    SearchAborted {
        source: Box<Error>,
        /// Candidates merged from the strategies that completed before the failure.
        partial: Vec<CandidateSymbol>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Per-strategy failures that a search round absorbs as an empty result.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::QueryTimeout { .. } | Error::Query { .. } | Error::Protocol(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
