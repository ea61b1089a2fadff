//! Request-level error taxonomy.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServeError {
    /// The prompt contained no byte present in the vocabulary.
    #[error("{0}")]
    InvalidInput(String),
    /// Tokenization, the forward pass, sampling or decoding failed.
    #[error("{0}")]
    Internal(String),
}

impl ServeError {
    /// HTTP status a transport should report for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServeError::InvalidInput(_) => 400,
            ServeError::Internal(_) => 500,
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
        }
    }
}

impl From<anyhow::Error> for ServeError {
    fn from(err: anyhow::Error) -> Self {
        ServeError::Internal(format!("{:#}", err))
    }
}

/// `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_error_class() {
        assert_eq!(ServeError::InvalidInput("x".into()).status_code(), 400);
        assert_eq!(ServeError::Internal("y".into()).status_code(), 500);
    }

    #[test]
    fn anyhow_chain_becomes_internal_message() {
        let err = anyhow::anyhow!("root cause").context("decoding failed");
        let serve: ServeError = err.into();
        assert_eq!(serve, ServeError::Internal("decoding failed: root cause".into()));
        assert_eq!(
            serde_json::to_string(&serve.body()).expect("json"),
            r#"{"error":"decoding failed: root cause"}"#
        );
    }
}
