//! Document session: identity map, tracker, and unit-of-work state.
//!
//! A session confines one logical unit of work: entities hydrated from the
//! store or registered for insertion, their frozen baselines, pending
//! deletions, the remote-call budget, and the ambient-transaction latch.
//! Sessions are single-threaded by contract; only the enlistment latch and
//! the participant boundary tolerate other execution contexts.

mod save;

pub use save::SaveBatch;

use crate::changes::{structural_eq, structural_map_eq};
use crate::config::SessionConfig;
use crate::conventions::Conventions;
use crate::document::{self, metadata_keys, DocumentMetadata, DocumentRef, RefId};
use crate::error::{SessionError, SessionResult};
use crate::guards::{check_authoritative, RequestBudget};
use crate::listeners::ListenerRegistry;
use crate::transaction::{AmbientTransaction, Enlistment, TransactionParticipant};
use crate::transport::{DocumentFetcher, KeyGenerator};
use crate::types::{DocumentKey, Etag};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// A tracked entity and its metadata record.
pub(crate) struct TrackedDocument {
    pub(crate) entity: DocumentRef,
    pub(crate) meta: DocumentMetadata,
}

/// The client-side unit of work.
///
/// Tracks entities by reference identity, detects structural changes
/// against frozen baselines, and builds ordered command batches for the
/// batch-execution collaborator. The session itself performs no I/O.
pub struct DocumentSession {
    config: SessionConfig,
    conventions: Conventions,
    listeners: ListenerRegistry,
    entities: HashMap<RefId, TrackedDocument>,
    identity: HashMap<DocumentKey, DocumentRef>,
    deletions: Vec<RefId>,
    order: Vec<RefId>,
    budget: RequestBudget,
    enlistment: Enlistment,
    ambient: Option<Arc<dyn AmbientTransaction>>,
    participant: Option<Arc<dyn TransactionParticipant>>,
    key_generator: Option<Rc<dyn KeyGenerator>>,
}

impl DocumentSession {
    /// Opens a session with the given configuration.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        let budget = RequestBudget::new(config.max_requests);
        Self {
            config,
            conventions: Conventions::default(),
            listeners: ListenerRegistry::new(),
            entities: HashMap::new(),
            identity: HashMap::new(),
            deletions: Vec::new(),
            order: Vec::new(),
            budget,
            enlistment: Enlistment::new(),
            ambient: None,
            participant: None,
            key_generator: None,
        }
    }

    /// Returns the session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the session conventions.
    #[must_use]
    pub fn conventions(&self) -> &Conventions {
        &self.conventions
    }

    /// Mutably returns the session conventions.
    pub fn conventions_mut(&mut self) -> &mut Conventions {
        &mut self.conventions
    }

    /// Mutably returns the listener registry.
    pub fn listeners_mut(&mut self) -> &mut ListenerRegistry {
        &mut self.listeners
    }

    /// Hands the session an ambient transaction to join on its next save
    /// cycle, together with the store-side participant to enlist.
    pub fn set_transaction(
        &mut self,
        tx: Arc<dyn AmbientTransaction>,
        participant: Arc<dyn TransactionParticipant>,
    ) {
        self.ambient = Some(tx);
        self.participant = Some(participant);
    }

    /// Sets the key generator consulted for entities stored without an
    /// identifier.
    pub fn set_key_generator(&mut self, generator: Rc<dyn KeyGenerator>) {
        self.key_generator = Some(generator);
    }

    /// Registers a document under a key, hydrating it into a live entity.
    ///
    /// If the key is already tracked the existing entity is returned
    /// unchanged: in-memory edits always win over re-hydration attempts.
    pub fn track(
        &mut self,
        key: &str,
        body: Value,
        metadata: Map<String, Value>,
    ) -> SessionResult<DocumentRef> {
        self.track_inner(key, body, metadata, None)
    }

    fn track_inner(
        &mut self,
        key: &str,
        body: Value,
        metadata: Map<String, Value>,
        etag_hint: Option<Etag>,
    ) -> SessionResult<DocumentRef> {
        if let Some(existing) = self.identity.get(&DocumentKey::new(key)) {
            return Ok(existing.clone());
        }
        if let Some((trigger, reason)) = document::read_veto(&metadata) {
            return Err(SessionError::read_vetoed(trigger, reason));
        }
        let etag = match etag_hint {
            Some(etag) => Some(etag),
            None => document::etag_from_metadata(&metadata)?,
        };
        let tag = metadata
            .get(metadata_keys::TYPE_TAG)
            .and_then(Value::as_str)
            .map(str::to_owned);
        let mut entity_body = self
            .conventions
            .convert_to_entity(tag.as_deref(), key, body, &metadata)?;
        document::strip_internal_markers(&mut entity_body);
        self.conventions.inject_identifier(&mut entity_body, key);
        let meta = DocumentMetadata::hydrated(key, etag, tag, metadata, &entity_body);
        let entity = DocumentRef::new(entity_body);
        self.register(entity.clone(), meta);
        debug!(key, "tracking hydrated document");
        Ok(entity)
    }

    /// Registers an entity for insertion, resolving or generating its key.
    ///
    /// Storing the same instance twice is a no-op. A key already bound to a
    /// different instance is rejected unless it is a prefix key, whose
    /// final identifier the server assigns on save.
    pub fn store(&mut self, entity: &DocumentRef) -> SessionResult<String> {
        if let Some(tracked) = self.entities.get(&entity.ref_id()) {
            return Ok(tracked.meta.key().unwrap_or_default().to_owned());
        }
        let resolved = self.conventions.resolve_identifier(&entity.body())?;
        let tag = self.conventions.collection_tag(entity.type_hint());
        let key = match resolved {
            Some(key) => key,
            None => match &self.key_generator {
                Some(generator) => generator.next_key(&tag)?,
                None => self.conventions.default_key(&tag),
            },
        };
        let dkey = DocumentKey::new(&key);
        if !dkey.is_prefix() {
            if let Some(existing) = self.identity.get(&dkey) {
                if !existing.same_instance(entity) {
                    return Err(SessionError::duplicate_identity(key));
                }
                return Ok(key);
            }
        }
        self.conventions.inject_identifier(&mut entity.body_mut(), &key);
        let mut metadata = Map::new();
        metadata.insert(metadata_keys::TYPE_TAG.to_owned(), Value::String(tag.clone()));
        let meta = DocumentMetadata::fresh(key.clone(), Some(tag), metadata);
        self.register(entity.clone(), meta);
        debug!(key = %key, "registered new entity");
        Ok(key)
    }

    /// Marks a tracked entity for deletion at the next save cycle.
    pub fn delete(&mut self, entity: &DocumentRef) -> SessionResult<()> {
        let rid = entity.ref_id();
        if !self.entities.contains_key(&rid) {
            return Err(SessionError::UntrackedEntity);
        }
        if !self.deletions.contains(&rid) {
            self.deletions.push(rid);
        }
        Ok(())
    }

    /// Removes an entity from the session without persisting anything.
    pub fn evict(&mut self, entity: &DocumentRef) {
        let rid = entity.ref_id();
        if let Some(tracked) = self.entities.remove(&rid) {
            if let Some(key) = tracked.meta.key() {
                self.identity.remove(&DocumentKey::new(key));
            }
        }
        self.deletions.retain(|id| *id != rid);
        self.order.retain(|id| *id != rid);
    }

    /// Empties the session: all registries, the request counter, and the
    /// enlistment latch, so a reused session re-enlists for a new ambient
    /// transaction.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.identity.clear();
        self.deletions.clear();
        self.order.clear();
        self.budget.reset();
        self.enlistment.reset();
    }

    /// Returns the key a tracked entity is bound to.
    #[must_use]
    pub fn document_id(&self, entity: &DocumentRef) -> Option<String> {
        self.entities
            .get(&entity.ref_id())
            .and_then(|tracked| tracked.meta.key().map(str::to_owned))
    }

    /// Returns the version token of a tracked entity.
    #[must_use]
    pub fn etag_of(&self, entity: &DocumentRef) -> Option<Etag> {
        self.entities
            .get(&entity.ref_id())
            .and_then(|tracked| tracked.meta.etag())
    }

    /// Returns the live metadata of an entity.
    ///
    /// An untracked entity that exposes a resolvable identifier is lazily
    /// hydrated through the fetch collaborator; lookup fails with
    /// `NotFound` otherwise.
    pub fn metadata(
        &mut self,
        entity: &DocumentRef,
        fetcher: &dyn DocumentFetcher,
    ) -> SessionResult<Map<String, Value>> {
        if let Some(tracked) = self.entities.get(&entity.ref_id()) {
            return Ok(tracked.meta.metadata().clone());
        }
        let key = self
            .conventions
            .resolve_identifier(&entity.body())?
            .ok_or_else(|| SessionError::not_found("unidentified entity"))?;
        if self.identity.contains_key(&DocumentKey::new(&key)) {
            return Err(SessionError::duplicate_identity(key));
        }
        self.budget.charge()?;
        let Some(doc) = fetcher.get_document(&key)? else {
            return Err(SessionError::not_found(key));
        };
        check_authoritative(&self.config, &key, doc.non_authoritative)?;
        if let Some((trigger, reason)) = document::read_veto(&doc.metadata) {
            return Err(SessionError::read_vetoed(trigger, reason));
        }
        let etag = match doc.etag {
            Some(etag) => Some(etag),
            None => document::etag_from_metadata(&doc.metadata)?,
        };
        let tag = doc
            .metadata
            .get(metadata_keys::TYPE_TAG)
            .and_then(Value::as_str)
            .map(str::to_owned);
        let mut baseline = doc.body;
        document::strip_internal_markers(&mut baseline);
        let meta = DocumentMetadata::hydrated(key.as_str(), etag, tag, doc.metadata, &baseline);
        let result = meta.metadata().clone();
        self.register(entity.clone(), meta);
        debug!(key = %key, "lazily tracked entity for metadata access");
        Ok(result)
    }

    /// Mutably returns the live metadata of a tracked entity.
    pub fn metadata_mut(
        &mut self,
        entity: &DocumentRef,
    ) -> SessionResult<&mut Map<String, Value>> {
        self.entities
            .get_mut(&entity.ref_id())
            .map(|tracked| tracked.meta.metadata_mut())
            .ok_or(SessionError::UntrackedEntity)
    }

    /// Loads a document by key through the fetch collaborator.
    ///
    /// A key already tracked resolves to the existing entity without a
    /// remote call. A missing document resolves to `None`.
    pub fn load(
        &mut self,
        key: &str,
        fetcher: &dyn DocumentFetcher,
    ) -> SessionResult<Option<DocumentRef>> {
        if let Some(existing) = self.identity.get(&DocumentKey::new(key)) {
            return Ok(Some(existing.clone()));
        }
        self.budget.charge()?;
        let Some(doc) = fetcher.get_document(key)? else {
            return Ok(None);
        };
        check_authoritative(&self.config, key, doc.non_authoritative)?;
        let entity = self.track_inner(key, doc.body, doc.metadata, doc.etag)?;
        Ok(Some(entity))
    }

    /// Returns true if the entity differs structurally from its baseline.
    ///
    /// Entities without a baseline (freshly stored) are always changed;
    /// untracked entities never are.
    pub fn changed(&self, entity: &DocumentRef) -> SessionResult<bool> {
        match self.entities.get(&entity.ref_id()) {
            Some(tracked) => self.judge_changed(tracked),
            None => Ok(false),
        }
    }

    /// Returns true if any deletion is pending or any tracked entity
    /// changed.
    pub fn has_changes(&self) -> SessionResult<bool> {
        if !self.deletions.is_empty() {
            return Ok(true);
        }
        for tracked in self.entities.values() {
            if self.judge_changed(tracked)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns true if a key is currently tracked.
    #[must_use]
    pub fn is_loaded(&self, key: &str) -> bool {
        self.identity.contains_key(&DocumentKey::new(key))
    }

    /// Returns the number of tracked entities.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.entities.len()
    }

    /// Returns the number of remote calls charged so far.
    #[must_use]
    pub fn request_count(&self) -> u32 {
        self.budget.used()
    }

    /// Returns true once the session has joined an ambient transaction.
    #[must_use]
    pub fn is_enlisted(&self) -> bool {
        self.enlistment.is_enlisted()
    }

    /// Charges one remote call against the session budget.
    pub fn charge_request(&mut self) -> SessionResult<()> {
        self.budget.charge()
    }

    /// Refunds one remote call, compensating a logically undone call.
    pub fn refund_request(&mut self) {
        self.budget.refund();
    }

    pub(crate) fn try_enlist(&self) {
        let (Some(tx), Some(participant)) = (&self.ambient, &self.participant) else {
            return;
        };
        self.enlistment.ensure_enlisted(
            tx.as_ref(),
            self.config.resource_manager_id,
            Arc::clone(participant),
        );
    }

    fn judge_changed(&self, tracked: &TrackedDocument) -> SessionResult<bool> {
        let Some(original) = tracked.meta.original_value() else {
            return Ok(true);
        };
        let mut body = tracked.entity.body().clone();
        let mut metadata = tracked.meta.metadata().clone();
        self.listeners.convert(tracked.meta.key(), &mut body, &mut metadata)?;
        Ok(!structural_eq(&body, original)
            || !structural_map_eq(&metadata, tracked.meta.original_metadata()))
    }

    fn register(&mut self, entity: DocumentRef, meta: DocumentMetadata) {
        let rid = entity.ref_id();
        if let Some(key) = meta.key() {
            let dkey = DocumentKey::new(key);
            if !dkey.is_prefix() {
                self.identity.insert(dkey, entity.clone());
            }
        }
        self.order.push(rid);
        self.entities.insert(rid, TrackedDocument { entity, meta });
    }
}

impl fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSession")
            .field("tracked", &self.entities.len())
            .field("pending_deletions", &self.deletions.len())
            .field("requests", &self.budget.used())
            .field("enlisted", &self.enlistment.is_enlisted())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InMemoryStore;
    use serde_json::json;

    fn open_session() -> DocumentSession {
        DocumentSession::new(SessionConfig::default())
    }

    #[test]
    fn tracked_entity_starts_clean() {
        let mut session = open_session();
        let entity = session
            .track("users/1", json!({"name": "a"}), Map::new())
            .unwrap();

        assert!(!session.changed(&entity).unwrap());

        entity.body_mut()["name"] = json!("b");
        assert!(session.changed(&entity).unwrap());
    }

    #[test]
    fn track_is_case_insensitive() {
        let mut session = open_session();
        let entity = session
            .track("Orders/1", json!({"total": 5}), Map::new())
            .unwrap();

        assert!(session.is_loaded("orders/1"));
        let again = session
            .track("ORDERS/1", json!({"total": 99}), Map::new())
            .unwrap();
        assert!(entity.same_instance(&again));
    }

    #[test]
    fn track_existing_key_keeps_in_memory_edits() {
        let mut session = open_session();
        let entity = session
            .track("users/1", json!({"name": "a"}), Map::new())
            .unwrap();
        entity.body_mut()["name"] = json!("edited");

        let again = session
            .track("users/1", json!({"name": "fresh"}), Map::new())
            .unwrap();

        assert!(entity.same_instance(&again));
        assert_eq!(again.body()["name"], json!("edited"));
    }

    #[test]
    fn track_rejects_vetoed_documents() {
        let mut session = open_session();
        let mut metadata = Map::new();
        metadata.insert(
            metadata_keys::READ_VETO.into(),
            json!({"trigger": "auth-policy", "reason": "restricted"}),
        );

        let result = session.track("users/1", json!({}), metadata);
        assert!(matches!(result, Err(SessionError::ReadVetoed { .. })));
        assert_eq!(session.tracked_count(), 0);
    }

    #[test]
    fn track_rejects_malformed_version_token() {
        let mut session = open_session();
        let mut metadata = Map::new();
        metadata.insert(metadata_keys::ETAG.into(), json!("garbage"));

        let result = session.track("users/1", json!({}), metadata);
        assert!(matches!(result, Err(SessionError::BadVersionToken { .. })));
    }

    #[test]
    fn track_strips_markers_and_injects_identifier() {
        let mut session = open_session();
        let entity = session
            .track(
                "users/1",
                json!({"@etag": "x", "id": null, "name": "a"}),
                Map::new(),
            )
            .unwrap();

        let body = entity.body().clone();
        assert_eq!(body, json!({"id": "users/1", "name": "a"}));
        assert!(!session.changed(&entity).unwrap());
    }

    #[test]
    fn store_is_idempotent_per_instance() {
        let mut session = open_session();
        let entity = DocumentRef::new(json!({"id": "users/1", "name": "a"}));

        let first = session.store(&entity).unwrap();
        let second = session.store(&entity).unwrap();

        assert_eq!(first, "users/1");
        assert_eq!(second, "users/1");
        assert_eq!(session.tracked_count(), 1);
    }

    #[test]
    fn store_conflicting_key_fails() {
        let mut session = open_session();
        let first = DocumentRef::new(json!({"id": "users/1"}));
        let second = DocumentRef::new(json!({"id": "Users/1"}));

        session.store(&first).unwrap();
        let result = session.store(&second);
        assert!(matches!(result, Err(SessionError::DuplicateIdentity { .. })));
    }

    #[test]
    fn prefix_keys_are_exempt_from_conflicts() {
        let mut session = open_session();
        let first = DocumentRef::new(json!({"id": "users/"}));
        let second = DocumentRef::new(json!({"id": "users/"}));

        session.store(&first).unwrap();
        session.store(&second).unwrap();
        assert_eq!(session.tracked_count(), 2);
    }

    #[test]
    fn store_generates_key_when_missing() {
        let mut session = open_session();
        let generator = Rc::new(InMemoryStore::new());
        session.set_key_generator(generator);

        let entity = DocumentRef::new(json!({"name": "a"}));
        let key = session.store(&entity).unwrap();

        assert_eq!(key, "docs/1");
        assert!(session.is_loaded("docs/1"));
    }

    #[test]
    fn stored_entity_is_dirty_until_saved() {
        let mut session = open_session();
        let entity = DocumentRef::new(json!({"id": "users/1", "name": "a"}));
        session.store(&entity).unwrap();
        assert!(session.changed(&entity).unwrap());
    }

    #[test]
    fn delete_requires_tracking() {
        let mut session = open_session();
        let entity = DocumentRef::new(json!({"id": "users/1"}));

        assert!(matches!(
            session.delete(&entity),
            Err(SessionError::UntrackedEntity)
        ));

        session.store(&entity).unwrap();
        session.delete(&entity).unwrap();
        session.delete(&entity).unwrap();
        assert!(session.has_changes().unwrap());
    }

    #[test]
    fn evict_removes_all_traces() {
        let mut session = open_session();
        let entity = session
            .track("users/1", json!({"name": "a"}), Map::new())
            .unwrap();
        session.delete(&entity).unwrap();

        session.evict(&entity);

        assert!(!session.is_loaded("users/1"));
        assert_eq!(session.tracked_count(), 0);
        assert!(!session.has_changes().unwrap());
        assert!(matches!(
            session.delete(&entity),
            Err(SessionError::UntrackedEntity)
        ));
    }

    #[test]
    fn clear_empties_the_session() {
        let mut session = open_session();
        let entity = session
            .track("users/1", json!({"name": "a"}), Map::new())
            .unwrap();
        session.delete(&entity).unwrap();

        session.clear();

        assert_eq!(session.tracked_count(), 0);
        assert!(!session.is_loaded("users/1"));
        assert_eq!(session.request_count(), 0);
        assert!(!session.has_changes().unwrap());
    }

    #[test]
    fn identity_map_matches_metadata_keys() {
        let mut session = open_session();
        let hydrated = session
            .track("users/1", json!({"name": "a"}), Map::new())
            .unwrap();
        let stored = DocumentRef::new(json!({"id": "users/2"}));
        session.store(&stored).unwrap();

        for entity in [&hydrated, &stored] {
            let key = session.document_id(entity).unwrap();
            assert!(session.is_loaded(&key));
            let store = InMemoryStore::new();
            let resolved = session.load(&key, &store).unwrap().unwrap();
            assert!(resolved.same_instance(entity));
        }
        assert_eq!(session.request_count(), 0);
    }

    #[test]
    fn load_fetches_once_and_short_circuits() {
        let mut session = open_session();
        let store = InMemoryStore::new();
        store.seed("users/1", json!({"name": "a"}), Map::new());

        let first = session.load("users/1", &store).unwrap().unwrap();
        assert_eq!(session.request_count(), 1);

        let second = session.load("Users/1", &store).unwrap().unwrap();
        assert!(first.same_instance(&second));
        assert_eq!(session.request_count(), 1);
    }

    #[test]
    fn load_missing_document_resolves_to_none() {
        let mut session = open_session();
        let store = InMemoryStore::new();
        assert!(session.load("users/1", &store).unwrap().is_none());
        assert_eq!(session.request_count(), 1);
    }

    #[test]
    fn load_respects_budget_ceiling() {
        let mut session = DocumentSession::new(SessionConfig::new().max_requests(1));
        let store = InMemoryStore::new();

        session.load("users/1", &store).unwrap();
        let result = session.load("users/2", &store);
        assert!(matches!(result, Err(SessionError::BudgetExceeded { .. })));
    }

    #[test]
    fn load_gates_non_authoritative_snapshots() {
        let mut session =
            DocumentSession::new(SessionConfig::new().allow_non_authoritative(false));
        let store = InMemoryStore::new();
        store.seed("users/1", json!({"name": "a"}), Map::new());
        store.mark_non_authoritative("users/1");

        let result = session.load("users/1", &store);
        assert!(matches!(
            result,
            Err(SessionError::NonAuthoritativeDenied { .. })
        ));
    }

    #[test]
    fn metadata_lazily_tracks_identified_entities() {
        let mut session = open_session();
        let store = InMemoryStore::new();
        let mut stored_metadata = Map::new();
        stored_metadata.insert(metadata_keys::TYPE_TAG.into(), json!("users"));
        store.seed("users/9", json!({"name": "a"}), stored_metadata);

        let entity = DocumentRef::new(json!({"id": "users/9", "name": "b"}));
        let metadata = session.metadata(&entity, &store).unwrap();

        assert_eq!(metadata.get(metadata_keys::TYPE_TAG), Some(&json!("users")));
        assert_eq!(session.tracked_count(), 1);
        assert_eq!(session.request_count(), 1);

        // Second access is a pure lookup.
        session.metadata(&entity, &store).unwrap();
        assert_eq!(session.request_count(), 1);
    }

    #[test]
    fn metadata_fails_without_identifier() {
        let mut session = open_session();
        let store = InMemoryStore::new();
        let entity = DocumentRef::new(json!({"name": "a"}));

        let result = session.metadata(&entity, &store);
        assert!(matches!(result, Err(SessionError::NotFound { .. })));
    }

    #[test]
    fn metadata_mutation_marks_entity_dirty() {
        let mut session = open_session();
        let entity = session
            .track("users/1", json!({"name": "a"}), Map::new())
            .unwrap();

        session
            .metadata_mut(&entity)
            .unwrap()
            .insert("flag".into(), json!(true));

        assert!(session.changed(&entity).unwrap());
    }
}
