//! Live document handles and per-entity tracking metadata.

use crate::error::{SessionError, SessionResult};
use crate::types::Etag;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// Well-known metadata keys.
pub mod metadata_keys {
    /// Document key.
    pub const ID: &str = "@id";
    /// Version token.
    pub const ETAG: &str = "@etag";
    /// Type tag used for conversion and key generation.
    pub const TYPE_TAG: &str = "@type";
    /// Read-veto marker: an object `{ "trigger": .., "reason": .. }`.
    pub const READ_VETO: &str = "@veto";
}

/// Stable opaque identity of a tracked document instance.
///
/// Derived from the live handle's allocation, so two structurally equal
/// bodies held by distinct handles are distinct tracking subjects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefId(usize);

struct DocumentInner {
    body: RefCell<Value>,
    type_hint: Option<String>,
}

/// A handle to a live document body.
///
/// Cloning the handle yields the same instance: tracking identity is by
/// reference, never by value. The body is mutated in place through
/// [`DocumentRef::body_mut`]; the session picks up the edits at the next
/// change-detection pass.
#[derive(Clone)]
pub struct DocumentRef {
    inner: Rc<DocumentInner>,
}

impl DocumentRef {
    /// Creates a handle around a dynamically-shaped JSON body.
    #[must_use]
    pub fn new(body: Value) -> Self {
        Self {
            inner: Rc::new(DocumentInner {
                body: RefCell::new(body),
                type_hint: None,
            }),
        }
    }

    /// Creates a handle from a typed entity.
    ///
    /// The entity's type name is retained as a hint for deriving the
    /// document's type tag.
    pub fn from_entity<T: Serialize>(entity: &T) -> SessionResult<Self> {
        let body = serde_json::to_value(entity)?;
        let name = std::any::type_name::<T>();
        let short = name.rsplit("::").next().unwrap_or(name);
        Ok(Self {
            inner: Rc::new(DocumentInner {
                body: RefCell::new(body),
                type_hint: Some(short.to_owned()),
            }),
        })
    }

    /// Deserializes the current body into a typed entity.
    pub fn to_entity<T: DeserializeOwned>(&self) -> SessionResult<T> {
        let body = self.inner.body.borrow();
        Ok(serde_json::from_value(body.clone())?)
    }

    /// Borrows the live body.
    pub fn body(&self) -> Ref<'_, Value> {
        self.inner.body.borrow()
    }

    /// Mutably borrows the live body.
    pub fn body_mut(&self) -> RefMut<'_, Value> {
        self.inner.body.borrow_mut()
    }

    /// Returns the type hint captured at creation, if any.
    #[must_use]
    pub fn type_hint(&self) -> Option<&str> {
        self.inner.type_hint.as_deref()
    }

    /// Returns the stable tracking identity of this instance.
    #[must_use]
    pub fn ref_id(&self) -> RefId {
        RefId(Rc::as_ptr(&self.inner) as usize)
    }

    /// Returns true if both handles refer to the same instance.
    #[must_use]
    pub fn same_instance(&self, other: &DocumentRef) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentRef")
            .field("ref_id", &self.ref_id())
            .field("type_hint", &self.inner.type_hint)
            .finish_non_exhaustive()
    }
}

/// Per-entity tracking record.
///
/// One record exists per tracked instance. Baselines are installed only by
/// the tracker: at hydrate, at fresh store, and at post-commit
/// reconciliation.
#[derive(Debug, Clone)]
pub struct DocumentMetadata {
    key: Option<String>,
    etag: Option<Etag>,
    type_tag: Option<String>,
    metadata: Map<String, Value>,
    original_metadata: Map<String, Value>,
    original_value: Option<Value>,
}

impl DocumentMetadata {
    /// Creates a record for an entity hydrated from the store.
    ///
    /// The baseline is a deep copy of the converted body and metadata.
    pub(crate) fn hydrated(
        key: impl Into<String>,
        etag: Option<Etag>,
        type_tag: Option<String>,
        metadata: Map<String, Value>,
        baseline: &Value,
    ) -> Self {
        Self {
            key: Some(key.into()),
            etag,
            type_tag,
            original_metadata: metadata.clone(),
            metadata,
            original_value: Some(baseline.clone()),
        }
    }

    /// Creates a record for a freshly stored, not-yet-persisted entity.
    ///
    /// The baseline is empty, so the entity reports as changed until its
    /// first successful save.
    pub(crate) fn fresh(
        key: impl Into<String>,
        type_tag: Option<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            key: Some(key.into()),
            etag: None,
            type_tag,
            metadata,
            original_metadata: Map::new(),
            original_value: None,
        }
    }

    /// Returns the document key, if one is bound.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Returns the version token, if one is known.
    #[must_use]
    pub fn etag(&self) -> Option<Etag> {
        self.etag
    }

    /// Returns the type tag, if one is known.
    #[must_use]
    pub fn type_tag(&self) -> Option<&str> {
        self.type_tag.as_deref()
    }

    /// Returns the live metadata.
    #[must_use]
    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Mutably returns the live metadata.
    pub(crate) fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.metadata
    }

    /// Returns the frozen baseline metadata.
    #[must_use]
    pub fn original_metadata(&self) -> &Map<String, Value> {
        &self.original_metadata
    }

    /// Returns the frozen baseline body, if one has been installed.
    #[must_use]
    pub fn original_value(&self) -> Option<&Value> {
        self.original_value.as_ref()
    }

    /// Returns true once a baseline has been installed.
    #[must_use]
    pub fn has_baseline(&self) -> bool {
        self.original_value.is_some()
    }

    pub(crate) fn rebind(&mut self, key: String, etag: Option<Etag>, metadata: Map<String, Value>) {
        self.key = Some(key);
        self.etag = etag;
        self.metadata = metadata;
    }

    pub(crate) fn freeze_baseline(&mut self, body: Value, metadata: Map<String, Value>) {
        self.original_value = Some(body);
        self.original_metadata = metadata;
    }
}

/// Extracts the read-veto marker from metadata, if present.
pub(crate) fn read_veto(metadata: &Map<String, Value>) -> Option<(String, String)> {
    let veto = metadata.get(metadata_keys::READ_VETO)?;
    let trigger = veto
        .get("trigger")
        .and_then(Value::as_str)
        .unwrap_or("policy")
        .to_owned();
    let reason = veto
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("document withheld")
        .to_owned();
    Some((trigger, reason))
}

/// Resolves the version token carried in metadata.
pub(crate) fn etag_from_metadata(metadata: &Map<String, Value>) -> SessionResult<Option<Etag>> {
    match metadata.get(metadata_keys::ETAG) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Etag::parse(text)
            .map(Some)
            .map_err(|_| SessionError::bad_version_token(text)),
        Some(other) => Err(SessionError::bad_version_token(other.to_string())),
    }
}

/// Removes internal `@`-prefixed markers from a document body.
pub(crate) fn strip_internal_markers(body: &mut Value) {
    if let Value::Object(map) = body {
        map.retain(|key, _| !key.starts_with('@'));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: Option<String>,
        name: String,
    }

    #[test]
    fn clones_share_identity() {
        let doc = DocumentRef::new(json!({"name": "a"}));
        let other = doc.clone();
        assert!(doc.same_instance(&other));
        assert_eq!(doc.ref_id(), other.ref_id());
    }

    #[test]
    fn equal_bodies_are_distinct_instances() {
        let a = DocumentRef::new(json!({"name": "a"}));
        let b = DocumentRef::new(json!({"name": "a"}));
        assert!(!a.same_instance(&b));
        assert_ne!(a.ref_id(), b.ref_id());
    }

    #[test]
    fn typed_roundtrip_keeps_type_hint() {
        let user = User {
            id: None,
            name: "ada".into(),
        };
        let doc = DocumentRef::from_entity(&user).unwrap();
        assert_eq!(doc.type_hint(), Some("User"));
        assert_eq!(doc.to_entity::<User>().unwrap(), user);
    }

    #[test]
    fn fresh_record_has_no_baseline() {
        let meta = DocumentMetadata::fresh("users/1", Some("users".into()), Map::new());
        assert!(!meta.has_baseline());
        assert_eq!(meta.key(), Some("users/1"));
        assert_eq!(meta.etag(), None);
    }

    #[test]
    fn hydrated_record_freezes_deep_copies() {
        let mut metadata = Map::new();
        metadata.insert("@type".into(), json!("users"));
        let baseline = json!({"name": "a"});
        let mut meta =
            DocumentMetadata::hydrated("users/1", None, Some("users".into()), metadata, &baseline);

        meta.metadata_mut().insert("flag".into(), json!(true));
        assert!(meta.original_metadata().get("flag").is_none());
        assert_eq!(meta.original_value(), Some(&baseline));
    }

    #[test]
    fn read_veto_extraction() {
        let mut metadata = Map::new();
        metadata.insert(
            metadata_keys::READ_VETO.into(),
            json!({"trigger": "auth-policy", "reason": "restricted"}),
        );
        assert_eq!(
            read_veto(&metadata),
            Some(("auth-policy".into(), "restricted".into()))
        );
        assert_eq!(read_veto(&Map::new()), None);
    }

    #[test]
    fn etag_resolution_from_metadata() {
        let etag = Etag::new();
        let mut metadata = Map::new();
        metadata.insert(metadata_keys::ETAG.into(), json!(etag.to_string()));
        assert_eq!(etag_from_metadata(&metadata).unwrap(), Some(etag));
        assert_eq!(etag_from_metadata(&Map::new()).unwrap(), None);
    }

    #[test]
    fn malformed_etag_is_rejected() {
        let mut metadata = Map::new();
        metadata.insert(metadata_keys::ETAG.into(), json!("garbage"));
        assert!(matches!(
            etag_from_metadata(&metadata),
            Err(SessionError::BadVersionToken { .. })
        ));

        let mut metadata = Map::new();
        metadata.insert(metadata_keys::ETAG.into(), json!(42));
        assert!(etag_from_metadata(&metadata).is_err());
    }

    #[test]
    fn strip_markers_keeps_user_fields() {
        let mut body = json!({"@id": "users/1", "@etag": "x", "name": "a"});
        strip_internal_markers(&mut body);
        assert_eq!(body, json!({"name": "a"}));
    }
}
