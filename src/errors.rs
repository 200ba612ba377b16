use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SnapshotError {
    /// Unsupported chain or missing credentials. Fatal to the request, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed address, missing field or no bytecode at the address.
    #[error("validation error: {0}")]
    Validation(String),

    /// Source is not verified on the explorer.
    #[error("verification error: {0}")]
    Verification(String),

    /// Network failure, timeout, rate limit or malformed upstream payload.
    #[error("transient source error: {0}")]
    TransientSource(String),

    /// A single contract call reverted or its return data did not decode.
    #[error("call failed: {0}")]
    CallFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    Verification,
    TransientSource,
    CallFailed,
}

impl SnapshotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnapshotError::Configuration(_) => ErrorKind::Configuration,
            SnapshotError::Validation(_) => ErrorKind::Validation,
            SnapshotError::Verification(_) => ErrorKind::Verification,
            SnapshotError::TransientSource(_) => ErrorKind::TransientSource,
            SnapshotError::CallFailed(_) => ErrorKind::CallFailed,
        }
    }

    pub fn unsupported_chain(chain_id: u64) -> Self {
        SnapshotError::Configuration(format!("unsupported chain id {}", chain_id))
    }

    /// Recoverable errors move pricing to the next tier; the rest end the request.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SnapshotError::TransientSource(_) | SnapshotError::CallFailed(_)
        )
    }
}

impl From<reqwest::Error> for SnapshotError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SnapshotError::TransientSource(format!("request timed out: {}", e))
        } else {
            SnapshotError::TransientSource(format!("request failed: {}", e))
        }
    }
}

impl From<ethers::abi::Error> for SnapshotError {
    fn from(e: ethers::abi::Error) -> Self {
        SnapshotError::CallFailed(format!("abi: {}", e))
    }
}

pub type Result<T, E = SnapshotError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_tags() {
        let err = SnapshotError::unsupported_chain(999);
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.to_string(), "configuration error: unsupported chain id 999");
        assert_eq!(
            serde_json::to_string(&ErrorKind::TransientSource).unwrap(),
            "\"transient_source\""
        );
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(SnapshotError::TransientSource("timeout".into()).is_recoverable());
        assert!(SnapshotError::CallFailed("revert".into()).is_recoverable());
        assert!(!SnapshotError::Validation("bad address".into()).is_recoverable());
        assert!(!SnapshotError::Verification("not verified".into()).is_recoverable());
    }
}
