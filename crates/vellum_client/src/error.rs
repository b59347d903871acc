//! Error types for the document session.

use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur in document session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Document lookup miss.
    #[error("document not found: {key}")]
    NotFound {
        /// The key that was looked up.
        key: String,
    },

    /// A store resolved to a key already bound to a different entity.
    #[error("document key '{key}' is already bound to a different tracked entity")]
    DuplicateIdentity {
        /// The conflicting key.
        key: String,
    },

    /// The server withheld the document content by policy.
    #[error("read vetoed by {trigger}: {reason}")]
    ReadVetoed {
        /// What triggered the veto.
        trigger: String,
        /// Why the document was withheld.
        reason: String,
    },

    /// A non-authoritative snapshot was rejected by session configuration.
    #[error("non-authoritative read denied for '{key}'")]
    NonAuthoritativeDenied {
        /// The key whose snapshot was non-authoritative.
        key: String,
    },

    /// A type tag was present but no converter is registered for it.
    ///
    /// Callers fall back to the default conversion rather than failing.
    #[error("unresolvable type tag: {tag}")]
    UnresolvableType {
        /// The unresolved tag.
        tag: String,
    },

    /// A non-string identifier value has no registered converter.
    #[error("no identity converter registered for non-string value of '{property}'")]
    IdentityConversion {
        /// The identifier property that could not be converted.
        property: String,
    },

    /// Delete was called on an entity the session does not track.
    #[error("entity is not tracked by this session")]
    UntrackedEntity,

    /// The session's remote-call budget is exhausted.
    #[error("request budget exceeded: {used} of {ceiling} remote calls used")]
    BudgetExceeded {
        /// Calls already charged.
        used: u32,
        /// Configured ceiling.
        ceiling: u32,
    },

    /// A version token could not be parsed.
    #[error("malformed version token: {value}")]
    BadVersionToken {
        /// The unparsable token text.
        value: String,
    },

    /// A delete and a put targeted the same key within one save cycle.
    #[error("delete and put both target '{key}' within one save cycle")]
    ConflictingWrite {
        /// The doubly-targeted key.
        key: String,
    },

    /// Failure surfaced by a store collaborator.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// Failure surfaced by a registered listener.
    #[error("listener error: {message}")]
    Listener {
        /// Error message.
        message: String,
    },

    /// JSON codec error.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl SessionError {
    /// Creates a not-found error.
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a duplicate-identity error.
    pub fn duplicate_identity(key: impl Into<String>) -> Self {
        Self::DuplicateIdentity { key: key.into() }
    }

    /// Creates a read-vetoed error.
    pub fn read_vetoed(trigger: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ReadVetoed {
            trigger: trigger.into(),
            reason: reason.into(),
        }
    }

    /// Creates a non-authoritative-denied error.
    pub fn non_authoritative_denied(key: impl Into<String>) -> Self {
        Self::NonAuthoritativeDenied { key: key.into() }
    }

    /// Creates an unresolvable-type error.
    pub fn unresolvable_type(tag: impl Into<String>) -> Self {
        Self::UnresolvableType { tag: tag.into() }
    }

    /// Creates an identity-conversion error.
    pub fn identity_conversion(property: impl Into<String>) -> Self {
        Self::IdentityConversion {
            property: property.into(),
        }
    }

    /// Creates a bad-version-token error.
    pub fn bad_version_token(value: impl Into<String>) -> Self {
        Self::BadVersionToken {
            value: value.into(),
        }
    }

    /// Creates a conflicting-write error.
    pub fn conflicting_write(key: impl Into<String>) -> Self {
        Self::ConflictingWrite { key: key.into() }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a listener error.
    pub fn listener(message: impl Into<String>) -> Self {
        Self::Listener {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SessionError::not_found("users/1");
        assert_eq!(err.to_string(), "document not found: users/1");

        let err = SessionError::read_vetoed("auth-policy", "restricted");
        assert!(err.to_string().contains("auth-policy"));
        assert!(err.to_string().contains("restricted"));

        let err = SessionError::BudgetExceeded {
            used: 30,
            ceiling: 30,
        };
        assert!(err.to_string().contains("30"));
    }

    #[test]
    fn untracked_entity_display() {
        let err = SessionError::UntrackedEntity;
        assert_eq!(err.to_string(), "entity is not tracked by this session");
    }
}
