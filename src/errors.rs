use serde::Serialize;
use thiserror::Error;

use crate::models::PlayQueue;

#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "type", content = "message")]
pub enum QueueError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Unauthorized(String),

    #[error("Play queue gone: {0}")]
    QueueGone(String),

    #[error("Invalid play queue snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Another queue operation is still in flight")]
    Busy,

    #[error("Response discarded: a newer play queue replaced it")]
    Superseded,

    #[error("No active play queue")]
    NoActiveQueue,

    /// A multi-request edit stopped partway. `snapshot` is the server's
    /// state after the requests that did go through.
    #[error("Edit only partly applied: {message}")]
    PartiallyApplied {
        message: String,
        snapshot: Box<PlayQueue>,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    /// The queue can no longer be used and must be re-created from a source.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueError::QueueGone(_) | QueueError::InvalidSnapshot(_)
        )
    }

    /// Local state is still accurate and the caller may issue the request
    /// again. Never true for a terminal error.
    ///
    /// `Superseded` is not retryable: the request targeted a queue that has
    /// since been replaced.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueueError::Network(_)
                | QueueError::Server { .. }
                | QueueError::Busy
                | QueueError::PartiallyApplied { .. }
        )
    }

    /// Server state the caller must adopt even though the request failed.
    pub fn server_snapshot(&self) -> Option<&PlayQueue> {
        match self {
            QueueError::PartiallyApplied { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for QueueError {
    fn from(e: reqwest::Error) -> Self {
        QueueError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(e: serde_json::Error) -> Self {
        QueueError::InvalidSnapshot(format!("Malformed response: {}", e))
    }
}

impl From<std::io::Error> for QueueError {
    fn from(e: std::io::Error) -> Self {
        QueueError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(QueueError::QueueGone("404".into()).is_terminal());
        assert!(QueueError::InvalidSnapshot("x".into()).is_terminal());
        assert!(!QueueError::Network("reset".into()).is_terminal());
        assert!(QueueError::Network("reset".into()).is_retryable());
        assert!(QueueError::Server {
            status: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!QueueError::Unauthorized("401".into()).is_terminal());
        assert!(!QueueError::Unauthorized("401".into()).is_retryable());
    }

    #[test]
    fn test_terminal_and_retryable_are_disjoint() {
        let all = vec![
            QueueError::Network("reset".into()),
            QueueError::Server {
                status: 500,
                message: String::new(),
            },
            QueueError::Unauthorized("401".into()),
            QueueError::QueueGone("404".into()),
            QueueError::InvalidSnapshot("x".into()),
            QueueError::Busy,
            QueueError::Superseded,
            QueueError::NoActiveQueue,
            QueueError::PartiallyApplied {
                message: "1 of 2".into(),
                snapshot: Box::new(crate::models::fixtures::queue(7, &[1], 1)),
            },
            QueueError::InvalidRequest("x".into()),
            QueueError::Config("x".into()),
            QueueError::Internal("x".into()),
        ];
        for err in &all {
            assert!(!(err.is_terminal() && err.is_retryable()), "{:?}", err);
        }
        assert!(!QueueError::Superseded.is_retryable());
        assert_eq!(all[8].server_snapshot().map(|q| q.id), Some(7));
        assert!(all[0].server_snapshot().is_none());
    }

    #[test]
    fn test_serializes_tagged() {
        let json = serde_json::to_value(QueueError::QueueGone("queue 7".into())).unwrap();
        assert_eq!(json["type"], "QueueGone");
        assert_eq!(json["message"], "queue 7");
    }
}
