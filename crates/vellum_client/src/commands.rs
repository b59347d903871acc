//! Wire model for persistence command batches.
//!
//! A save cycle produces an ordered list of commands; the batch-execution
//! collaborator returns a result list positionally matching the input.

use crate::types::Etag;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Method of a persistence command or its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandMethod {
    /// Insert or update a document.
    Put,
    /// Delete a document.
    Delete,
}

/// A single persistence command.
///
/// Version tokens are attached only when the session runs with optimistic
/// concurrency enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum Command {
    /// Insert or update a document.
    Put {
        /// Target key (possibly a prefix key for server-side assignment).
        key: String,
        /// Serialized document body.
        body: Value,
        /// Live metadata to persist with the document.
        metadata: Map<String, Value>,
        /// Expected version token.
        #[serde(skip_serializing_if = "Option::is_none")]
        etag: Option<Etag>,
    },
    /// Delete a document.
    Delete {
        /// Target key.
        key: String,
        /// Expected version token.
        #[serde(skip_serializing_if = "Option::is_none")]
        etag: Option<Etag>,
    },
}

impl Command {
    /// Returns the command's target key.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Command::Put { key, .. } | Command::Delete { key, .. } => key,
        }
    }

    /// Returns the command's method.
    #[must_use]
    pub fn method(&self) -> CommandMethod {
        match self {
            Command::Put { .. } => CommandMethod::Put,
            Command::Delete { .. } => CommandMethod::Delete,
        }
    }
}

/// Result of executing one command, positionally matching the batch input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Method of the executed command.
    pub method: CommandMethod,
    /// Final key (server-assigned for prefix keys).
    pub key: String,
    /// Version token of the persisted document, if any.
    pub etag: Option<Etag>,
    /// Metadata of the persisted document.
    pub metadata: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_accessors() {
        let put = Command::Put {
            key: "users/1".into(),
            body: json!({"name": "a"}),
            metadata: Map::new(),
            etag: None,
        };
        assert_eq!(put.key(), "users/1");
        assert_eq!(put.method(), CommandMethod::Put);

        let delete = Command::Delete {
            key: "users/2".into(),
            etag: None,
        };
        assert_eq!(delete.key(), "users/2");
        assert_eq!(delete.method(), CommandMethod::Delete);
    }

    #[test]
    fn absent_etag_is_omitted_from_wire_form() {
        let delete = Command::Delete {
            key: "users/2".into(),
            etag: None,
        };
        let wire = serde_json::to_value(&delete).unwrap();
        assert_eq!(wire, json!({"method": "Delete", "key": "users/2"}));
    }
}
