//! Store collaborator boundaries: fetch, batch execution, key generation.
//!
//! These traits abstract the remote store, allowing for different
//! implementations (HTTP, embedded, in-memory for testing). The session
//! never performs network I/O itself; it only drives these boundaries.

use crate::commands::{BatchResult, Command, CommandMethod};
use crate::error::{SessionError, SessionResult};
use crate::types::{DocumentKey, Etag};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// A document snapshot returned by the fetch collaborator.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// Document body.
    pub body: Value,
    /// Document metadata.
    pub metadata: Map<String, Value>,
    /// Version token of the snapshot, if any.
    pub etag: Option<Etag>,
    /// True when an uncommitted transactional write exists elsewhere.
    pub non_authoritative: bool,
}

/// Fetches single documents from the remote store.
pub trait DocumentFetcher {
    /// Gets a document by key, or `None` when it does not exist.
    fn get_document(&self, key: &str) -> SessionResult<Option<FetchedDocument>>;
}

/// Executes an ordered command batch against the remote store.
///
/// The result list positionally matches the command list.
pub trait BatchExecutor {
    /// Executes the batch.
    fn execute(&self, commands: &[Command]) -> SessionResult<Vec<BatchResult>>;
}

/// Generates keys for entities stored without an identifier.
pub trait KeyGenerator {
    /// Returns the next key for the given collection tag.
    fn next_key(&self, type_tag: &str) -> SessionResult<String>;
}

#[derive(Debug, Clone)]
struct StoredDocument {
    body: Value,
    metadata: Map<String, Value>,
    etag: Etag,
    non_authoritative: bool,
}

/// An in-memory store for testing.
///
/// Implements all three collaborator boundaries over a guarded map:
/// version tokens rotate on every put, prefix keys receive numbered
/// suffixes, and key generation is a per-tag counter.
#[derive(Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<DocumentKey, StoredDocument>>,
    counters: Mutex<HashMap<String, u64>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a document directly, returning its version token.
    pub fn seed(
        &self,
        key: impl Into<String>,
        body: Value,
        metadata: Map<String, Value>,
    ) -> Etag {
        let etag = Etag::new();
        self.documents.write().insert(
            DocumentKey::new(key),
            StoredDocument {
                body,
                metadata,
                etag,
                non_authoritative: false,
            },
        );
        etag
    }

    /// Flags a document as subject to an uncommitted write elsewhere.
    pub fn mark_non_authoritative(&self, key: &str) {
        if let Some(doc) = self.documents.write().get_mut(&DocumentKey::new(key)) {
            doc.non_authoritative = true;
        }
    }

    /// Returns a document's current body, if present.
    #[must_use]
    pub fn body_of(&self, key: &str) -> Option<Value> {
        self.documents
            .read()
            .get(&DocumentKey::new(key))
            .map(|doc| doc.body.clone())
    }

    /// Returns a document's current version token, if present.
    #[must_use]
    pub fn etag_of(&self, key: &str) -> Option<Etag> {
        self.documents
            .read()
            .get(&DocumentKey::new(key))
            .map(|doc| doc.etag)
    }

    /// Returns the number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Returns true when the store holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    fn next_suffix(&self, prefix: &str) -> u64 {
        let mut counters = self.counters.lock();
        let counter = counters.entry(prefix.to_owned()).or_insert(0);
        *counter += 1;
        *counter
    }

    fn check_etag(
        docs: &HashMap<DocumentKey, StoredDocument>,
        key: &DocumentKey,
        expected: Option<Etag>,
    ) -> SessionResult<()> {
        if let Some(expected) = expected {
            let current = docs.get(key).map(|doc| doc.etag);
            if current != Some(expected) {
                return Err(SessionError::transport(format!(
                    "version token mismatch on '{key}'"
                )));
            }
        }
        Ok(())
    }
}

impl DocumentFetcher for InMemoryStore {
    fn get_document(&self, key: &str) -> SessionResult<Option<FetchedDocument>> {
        Ok(self
            .documents
            .read()
            .get(&DocumentKey::new(key))
            .map(|doc| FetchedDocument {
                body: doc.body.clone(),
                metadata: doc.metadata.clone(),
                etag: Some(doc.etag),
                non_authoritative: doc.non_authoritative,
            }))
    }
}

impl BatchExecutor for InMemoryStore {
    fn execute(&self, commands: &[Command]) -> SessionResult<Vec<BatchResult>> {
        let mut docs = self.documents.write();
        let mut results = Vec::with_capacity(commands.len());
        for command in commands {
            match command {
                Command::Put {
                    key,
                    body,
                    metadata,
                    etag,
                } => {
                    let final_key = if key.ends_with('/') {
                        format!("{key}{}", self.next_suffix(key))
                    } else {
                        key.clone()
                    };
                    let dkey = DocumentKey::new(&final_key);
                    Self::check_etag(&docs, &dkey, *etag)?;
                    let new_etag = Etag::new();
                    docs.insert(
                        dkey,
                        StoredDocument {
                            body: body.clone(),
                            metadata: metadata.clone(),
                            etag: new_etag,
                            non_authoritative: false,
                        },
                    );
                    results.push(BatchResult {
                        method: CommandMethod::Put,
                        key: final_key,
                        etag: Some(new_etag),
                        metadata: metadata.clone(),
                    });
                }
                Command::Delete { key, etag } => {
                    let dkey = DocumentKey::new(key);
                    Self::check_etag(&docs, &dkey, *etag)?;
                    docs.remove(&dkey);
                    results.push(BatchResult {
                        method: CommandMethod::Delete,
                        key: key.clone(),
                        etag: None,
                        metadata: Map::new(),
                    });
                }
            }
        }
        Ok(results)
    }
}

impl KeyGenerator for InMemoryStore {
    fn next_key(&self, type_tag: &str) -> SessionResult<String> {
        let prefix = format!("{type_tag}/");
        let suffix = self.next_suffix(&prefix);
        Ok(format!("{prefix}{suffix}"))
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("documents", &self.len())
            .finish_non_exhaustive()
    }
}
