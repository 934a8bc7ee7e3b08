//! Error taxonomy of the repository client.

use std::sync::OnceLock;

use regex::Regex;

/// Conflict messages the target repository emits for transient lock
/// contention. This pattern is contractual; loosening or tightening it
/// changes which failures the ingesters retry.
const RETRYABLE_CONFLICT: &str = r"Resource \d+ locked|Transaction \d+ locked|Owned by other request|Lock not available|duplicate key value";

fn retryable_conflict() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(RETRYABLE_CONFLICT).expect("conflict pattern must compile"))
}

/// A failed repository operation.
///
/// Lookup misses are not errors; they are routed through
/// [`LookupResult`](super::LookupResult) instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    /// The repository rejected the request because of concurrent activity.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The request never produced a repository response.
    #[error("network error: {0}")]
    Network(String),
    /// Authentication or authorization failure.
    #[error("access denied: {0}")]
    Denied(String),
    /// The repository rejected the submitted metadata or payload.
    #[error("rejected by repository: {0}")]
    Validation(String),
    /// A response the client does not understand.
    #[error("unexpected repository response: {0}")]
    Protocol(String),
    /// A transaction-scoped call was made with no transaction open.
    #[error("no transaction is open")]
    NoTransaction,
}

impl RepoError {
    /// Whether re-submitting the same request may succeed.
    ///
    /// Network failures always qualify; conflicts qualify only when the
    /// message matches the repository's known lock-contention wordings.
    pub fn is_retryable(&self) -> bool {
        match self {
            RepoError::Network(_) => true,
            RepoError::Conflict(message) => retryable_conflict().is_match(message),
            _ => false,
        }
    }

    /// Whether this is a transport-level failure (drives post-chunk backoff).
    pub fn is_network(&self) -> bool {
        matches!(self, RepoError::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_conflicts_are_retryable() {
        for message in [
            "Resource 450 locked",
            "Transaction 8 locked",
            "Owned by other request",
            "Lock not available",
            "ERROR: duplicate key value violates unique constraint",
        ] {
            assert!(
                RepoError::Conflict(message.into()).is_retryable(),
                "{message}"
            );
        }
    }

    #[test]
    fn other_conflicts_are_fatal() {
        assert!(!RepoError::Conflict("parent does not exist".into()).is_retryable());
        assert!(!RepoError::Validation("label missing".into()).is_retryable());
        assert!(!RepoError::Denied("bad credentials".into()).is_retryable());
    }

    #[test]
    fn network_always_retryable() {
        let e = RepoError::Network("connection reset by peer".into());
        assert!(e.is_retryable());
        assert!(e.is_network());
    }
}
