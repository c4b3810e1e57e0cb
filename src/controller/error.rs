//! Error types for the controller.
//!
//! Every error at this layer is retryable: the controller runtime
//! re-invokes the whole pass later. The only classification kept is
//! not-found, which is benign after a spec object has been deleted.

use std::time::Duration;

use thiserror::Error;

/// Error type for reconciliation passes.
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// A child resource failed to converge to its desired state
    #[error("failed to converge {kind} {name} owned by {owner}: {source}")]
    Convergence {
        kind: String,
        name: String,
        owner: String,
        #[source]
        source: kube::Error,
    },

    /// The owning object's status could not be persisted
    #[error("failed to update status of {owner}: {source}")]
    StatusUpdate {
        owner: String,
        #[source]
        source: kube::Error,
    },

    /// A synthesized manifest was missing a required metadata key
    #[error("missing object key: {0}")]
    MissingObjectKey(&'static str),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Requeue delay applied by the error policy.
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "test".to_string(),
            code,
        })
    }

    #[test]
    fn test_not_found_classification() {
        assert!(Error::Kube(api_error(404)).is_not_found());
        assert!(!Error::Kube(api_error(500)).is_not_found());

        let convergence = Error::Convergence {
            kind: "Service".to_string(),
            name: "alpha-node".to_string(),
            owner: "ChiaNode default/alpha".to_string(),
            source: api_error(404),
        };
        assert!(!convergence.is_not_found());
    }

    #[test]
    fn test_convergence_error_identifies_resource_and_owner() {
        let error = Error::Convergence {
            kind: "Service".to_string(),
            name: "alpha-node-internal".to_string(),
            owner: "ChiaNode default/alpha".to_string(),
            source: api_error(500),
        };

        let message = error.to_string();
        assert!(message.contains("alpha-node-internal"));
        assert!(message.contains("ChiaNode default/alpha"));
    }
}
