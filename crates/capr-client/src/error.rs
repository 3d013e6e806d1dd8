//! Object store errors

use thiserror::Error;

/// Errors returned by object store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested object does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Optimistic concurrency conflict on write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A watch could not be established
    #[error("Watch error: {0}")]
    Watch(String),

    /// An object is missing fields required by the operation
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// The downstream cluster could not be reached
    #[error("Downstream cluster error: {0}")]
    Downstream(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Map an API error, turning 404 and 409 into their dedicated variants
    pub fn from_kube(err: kube::Error, kind: &str, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::not_found(kind, namespace, name),
            kube::Error::Api(ae) if ae.code == 409 => {
                Self::Conflict(format!("{kind} {namespace}/{name}: {}", ae.message))
            }
            other => Self::Kube(other),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates() {
        assert!(StoreError::not_found("Machine", "ns", "m1").is_not_found());
        assert!(StoreError::Conflict("stale".to_string()).is_conflict());
        assert!(!StoreError::Watch("closed".to_string()).is_not_found());
    }

    #[test]
    fn test_not_found_display() {
        let err = StoreError::not_found("Secret", "ns", "s1");
        assert_eq!(err.to_string(), "Secret ns/s1 not found");
    }
}
