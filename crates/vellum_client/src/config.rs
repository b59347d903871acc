//! Session configuration.

use std::time::Duration;
use uuid::Uuid;

/// Configuration for opening a document session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Resource-manager identifier used for durable transaction enlistment.
    pub resource_manager_id: Uuid,

    /// Ceiling on remote calls per session.
    pub max_requests: u32,

    /// Whether to attach version tokens to persistence commands.
    pub use_optimistic_concurrency: bool,

    /// Whether hydrating a non-authoritative snapshot is allowed.
    pub allow_non_authoritative: bool,

    /// How long the surrounding load path may wait for an authoritative
    /// snapshot. The session itself only gates; it never waits.
    pub non_authoritative_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resource_manager_id: Uuid::nil(),
            max_requests: 30,
            use_optimistic_concurrency: false,
            allow_non_authoritative: true,
            non_authoritative_timeout: Duration::from_secs(15),
        }
    }
}

impl SessionConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the resource-manager identifier.
    #[must_use]
    pub const fn resource_manager_id(mut self, id: Uuid) -> Self {
        self.resource_manager_id = id;
        self
    }

    /// Sets the remote-call ceiling.
    #[must_use]
    pub const fn max_requests(mut self, ceiling: u32) -> Self {
        self.max_requests = ceiling;
        self
    }

    /// Sets whether version tokens are attached to commands.
    #[must_use]
    pub const fn use_optimistic_concurrency(mut self, value: bool) -> Self {
        self.use_optimistic_concurrency = value;
        self
    }

    /// Sets whether non-authoritative snapshots may be hydrated.
    #[must_use]
    pub const fn allow_non_authoritative(mut self, value: bool) -> Self {
        self.allow_non_authoritative = value;
        self
    }

    /// Sets the non-authoritative wait timeout exposed to the load path.
    #[must_use]
    pub const fn non_authoritative_timeout(mut self, timeout: Duration) -> Self {
        self.non_authoritative_timeout = timeout;
        self
    }
}
