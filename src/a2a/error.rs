//! A2A error taxonomy (spec.md §4.2, §7): `Transport`, `Protocol`, `Remote`,
//! `Timeout`, `Cancelled`. Classification here is structural (matched on
//! the enum variant), generalizing the reference service's string-sniffing
//! `classify_error` (grep for "timeout"/"503"/... inside an error message)
//! into a typed scheme driven by the actual failure site.

use thiserror::Error;

/// A2A transport/protocol failure.
#[derive(Debug, Error, Clone)]
pub enum A2aError {
    /// Connection refused, DNS failure, socket error.
    #[error("transport error contacting {endpoint}: {detail}")]
    Transport { endpoint: String, detail: String },

    /// Malformed JSON-RPC envelope or SSE framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote agent returned a JSON-RPC `error` field.
    #[error("remote error {code}: {message}")]
    Remote {
        code: i64,
        message: String,
        retryable: bool,
    },

    /// Per-call or per-node deadline exceeded.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The caller cancelled the in-flight call.
    #[error("cancelled")]
    Cancelled,
}

impl A2aError {
    /// Whether the A2A client's retry loop should attempt this call again.
    /// Transport, Timeout, and Remote-with-retryable-flag are retryable;
    /// Protocol and Cancelled are not (spec.md §4.2: "Retries apply to
    /// Transport, Timeout, and Remote with server-indicated retryable kind
    /// only").
    pub fn is_retryable(&self) -> bool {
        match self {
            A2aError::Transport { .. } => true,
            A2aError::Timeout(_) => true,
            A2aError::Remote { retryable, .. } => *retryable,
            A2aError::Protocol(_) => false,
            A2aError::Cancelled => false,
        }
    }
}

impl From<reqwest::Error> for A2aError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            A2aError::Timeout(std::time::Duration::from_secs(0))
        } else if e.is_connect() {
            A2aError::Transport {
                endpoint: e.url().map(|u| u.to_string()).unwrap_or_default(),
                detail: e.to_string(),
            }
        } else if let Some(status) = e.status() {
            A2aError::Remote {
                code: status.as_u16() as i64,
                message: e.to_string(),
                retryable: status.is_server_error(),
            }
        } else {
            A2aError::Transport {
                endpoint: e.url().map(|u| u.to_string()).unwrap_or_default(),
                detail: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_timeout_are_retryable() {
        assert!(A2aError::Transport {
            endpoint: "x".into(),
            detail: "refused".into()
        }
        .is_retryable());
        assert!(A2aError::Timeout(std::time::Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn protocol_and_cancelled_are_not_retryable() {
        assert!(!A2aError::Protocol("bad json".into()).is_retryable());
        assert!(!A2aError::Cancelled.is_retryable());
    }

    #[test]
    fn remote_retryable_depends_on_flag() {
        let retryable = A2aError::Remote {
            code: -32003,
            message: "quality failed".into(),
            retryable: true,
        };
        assert!(retryable.is_retryable());

        let not_retryable = A2aError::Remote {
            code: -32601,
            message: "method not found".into(),
            retryable: false,
        };
        assert!(!not_retryable.is_retryable());
    }
}
