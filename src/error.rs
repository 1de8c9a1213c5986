//! Error types for tag reconciliation, waiters and resource adapters.

use std::time::Duration;

use thiserror::Error;

use crate::waiter::State;

/// A boxed error from a remote collaborator, carried unchanged as a cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by [`wait`](crate::waiter::wait) and
/// [`wait_until`](crate::waiter::wait_until).
#[derive(Debug, Error)]
pub enum WaitError {
    /// The resource was absent and absence was not an acceptable outcome.
    #[error("resource ({identifier}) not found: {source}")]
    NotFound {
        /// Remote identifier of the resource.
        identifier: String,
        /// The not-found error reported by the fetcher.
        #[source]
        source: BoxError,
    },

    /// The remote API reported an explicit failure state.
    #[error(
        "resource ({identifier}) reached failure state {state}{}",
        display_reason(.state)
    )]
    RemoteFailureState {
        /// Remote identifier of the resource.
        identifier: String,
        /// The observed failure state.
        state: State,
    },

    /// Polling exceeded its time budget.
    #[error(
        "timeout after {elapsed:?} waiting for resource ({identifier}), last state: {}",
        display_last(.last)
    )]
    Timeout {
        /// Remote identifier of the resource.
        identifier: String,
        /// Time spent polling.
        elapsed: Duration,
        /// The last state observed, if any poll succeeded.
        last: Option<State>,
    },

    /// The wait was cancelled from outside.
    #[error("wait for resource ({identifier}) cancelled, last state: {}", display_last(.last))]
    Cancelled {
        /// Remote identifier of the resource.
        identifier: String,
        /// The last state observed, if any poll succeeded.
        last: Option<State>,
    },

    /// The fetcher failed with an error other than not-found.
    #[error("error reading resource ({identifier}): {source}")]
    Fetch {
        /// Remote identifier of the resource.
        identifier: String,
        /// The fetcher's error.
        #[source]
        source: BoxError,
        /// The last state observed before the failure.
        last: Option<State>,
    },
}

fn display_reason(state: &State) -> String {
    state
        .reason()
        .map(|reason| format!(": {}", reason))
        .unwrap_or_default()
}

fn display_last(last: &Option<State>) -> &str {
    last.as_ref().map(State::as_str).unwrap_or("none")
}

impl WaitError {
    /// The identifier of the resource being waited on.
    pub fn identifier(&self) -> &str {
        match self {
            Self::NotFound { identifier, .. }
            | Self::RemoteFailureState { identifier, .. }
            | Self::Timeout { identifier, .. }
            | Self::Cancelled { identifier, .. }
            | Self::Fetch { identifier, .. } => identifier,
        }
    }

    /// The last state observed before the wait failed, if any.
    pub fn last_state(&self) -> Option<&State> {
        match self {
            Self::NotFound { .. } => None,
            Self::RemoteFailureState { state, .. } => Some(state),
            Self::Timeout { last, .. } | Self::Cancelled { last, .. } | Self::Fetch { last, .. } => {
                last.as_ref()
            }
        }
    }

    /// Returns true for [`WaitError::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true for [`WaitError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Which half of a tag update failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagPhase {
    /// The batched removal call.
    Remove,
    /// The batched upsert call.
    Upsert,
}

impl std::fmt::Display for TagPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagPhase::Remove => write!(f, "untagging"),
            TagPhase::Upsert => write!(f, "tagging"),
        }
    }
}

/// A remote tagging call failed.
#[derive(Debug, Error)]
#[error("error {phase} resource ({identifier}): {source}")]
pub struct TagOperationError {
    /// Remote identifier of the tagged resource.
    pub identifier: String,
    /// The call that failed.
    pub phase: TagPhase,
    /// The mutator's error, unchanged.
    #[source]
    pub source: BoxError,
}

/// Errors surfaced by resource adapters to the lifecycle layer.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A remote API call failed.
    #[error("API error: {0}")]
    Api(String),

    /// Waiting for convergence failed.
    #[error(transparent)]
    Wait(#[from] WaitError),

    /// Applying a tag delta failed.
    #[error(transparent)]
    Tags(#[from] TagOperationError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// Get the error message as a string.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::Api(msg) => msg.clone(),
            Self::Wait(err) => err.to_string(),
            Self::Tags(err) => err.to_string(),
            Self::Serialization(err) => err.to_string(),
        }
    }

    /// Returns true if the error means the remote resource is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Wait(WaitError::NotFound { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_error_display() {
        let err = WaitError::RemoteFailureState {
            identifier: "ws-123".to_string(),
            state: State::new("CREATION_FAILED"),
        };
        assert_eq!(
            err.to_string(),
            "resource (ws-123) reached failure state CREATION_FAILED"
        );

        let err = WaitError::RemoteFailureState {
            identifier: "ws-123".to_string(),
            state: State::new("CREATION_FAILED").with_reason("log group does not exist"),
        };
        assert_eq!(
            err.to_string(),
            "resource (ws-123) reached failure state CREATION_FAILED: log group does not exist"
        );

        let err = WaitError::Timeout {
            identifier: "ws-123".to_string(),
            elapsed: Duration::from_secs(5),
            last: Some(State::new("CREATING")),
        };
        assert_eq!(
            err.to_string(),
            "timeout after 5s waiting for resource (ws-123), last state: CREATING"
        );

        let err = WaitError::Cancelled {
            identifier: "ws-123".to_string(),
            last: None,
        };
        assert_eq!(
            err.to_string(),
            "wait for resource (ws-123) cancelled, last state: none"
        );
    }

    #[test]
    fn test_wait_error_accessors() {
        let err = WaitError::Fetch {
            identifier: "arn:stream".to_string(),
            source: "throttled".into(),
            last: Some(State::new("UPDATING")),
        };
        assert_eq!(err.identifier(), "arn:stream");
        assert_eq!(err.last_state(), Some(&State::new("UPDATING")));
        assert!(!err.is_timeout());
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "error reading resource (arn:stream): throttled");
    }

    #[test]
    fn test_tag_operation_error_display() {
        let err = TagOperationError {
            identifier: "arn:aws:kinesisvideo:stream/a".to_string(),
            phase: TagPhase::Remove,
            source: "access denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "error untagging resource (arn:aws:kinesisvideo:stream/a): access denied"
        );

        let err = TagOperationError {
            identifier: "x".to_string(),
            phase: TagPhase::Upsert,
            source: "limit exceeded".into(),
        };
        assert_eq!(err.to_string(), "error tagging resource (x): limit exceeded");
    }

    #[test]
    fn test_provider_error_not_found() {
        assert!(ProviderError::NotFound("ws-1".to_string()).is_not_found());

        let err: ProviderError = WaitError::NotFound {
            identifier: "ws-1".to_string(),
            source: "gone".into(),
        }
        .into();
        assert!(err.is_not_found());

        assert!(!ProviderError::Api("boom".to_string()).is_not_found());
    }

    #[test]
    fn test_message_method() {
        let err = ProviderError::Validation("bad input".to_string());
        assert_eq!(err.message(), "bad input");
        assert_eq!(format!("{}", err), "Validation error: bad input");

        let err: ProviderError = WaitError::Cancelled {
            identifier: "ws-9".to_string(),
            last: None,
        }
        .into();
        assert_eq!(err.message(), err.to_string());
    }
}
