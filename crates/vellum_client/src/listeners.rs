//! Session listener boundaries.
//!
//! Listeners are explicit ordered subscriber lists invoked synchronously at
//! defined points of the session lifecycle. Failures propagate to the
//! caller and abort the in-progress save cycle.

use crate::document::DocumentRef;
use crate::error::SessionResult;
use serde_json::{Map, Value};
use std::fmt;
use std::rc::Rc;

/// Observes entities about to be written and entities just persisted.
pub trait StoreListener {
    /// Invoked before a changed entity is turned into a put command.
    ///
    /// The listener may mutate the entity body through the handle.
    fn before_store(
        &self,
        key: &str,
        entity: &DocumentRef,
        metadata: &Map<String, Value>,
    ) -> SessionResult<()> {
        let _ = (key, entity, metadata);
        Ok(())
    }

    /// Invoked after a put result has been reconciled into the session.
    fn after_store(
        &self,
        key: &str,
        entity: &DocumentRef,
        metadata: &Map<String, Value>,
    ) -> SessionResult<()> {
        let _ = (key, entity, metadata);
        Ok(())
    }
}

/// Observes entities about to be deleted.
pub trait DeleteListener {
    /// Invoked before a pending deletion is turned into a delete command.
    fn before_delete(
        &self,
        key: &str,
        entity: &DocumentRef,
        metadata: &Map<String, Value>,
    ) -> SessionResult<()>;
}

/// Rewrites serialized documents during conversion.
///
/// The hook runs on every structural comparison, not only on persisting
/// ones, so it must be deterministic and idempotent; a non-idempotent hook
/// makes entities appear perpetually dirty.
pub trait ConversionListener {
    /// Invoked with the freshly serialized body and the live metadata.
    fn on_document_converted(
        &self,
        key: Option<&str>,
        body: &mut Value,
        metadata: &mut Map<String, Value>,
    ) -> SessionResult<()>;
}

/// Notified when a document has been persisted.
pub trait StoredNotification {
    /// Invoked after a put result has been reconciled, before the
    /// after-store listeners run.
    fn document_stored(&self, key: &str, entity: &DocumentRef);
}

/// Ordered listener lists for one session.
#[derive(Default)]
pub struct ListenerRegistry {
    store: Vec<Rc<dyn StoreListener>>,
    delete: Vec<Rc<dyn DeleteListener>>,
    conversion: Vec<Rc<dyn ConversionListener>>,
    stored: Vec<Rc<dyn StoredNotification>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a store listener.
    pub fn register_store(&mut self, listener: Rc<dyn StoreListener>) {
        self.store.push(listener);
    }

    /// Registers a delete listener.
    pub fn register_delete(&mut self, listener: Rc<dyn DeleteListener>) {
        self.delete.push(listener);
    }

    /// Registers a conversion listener.
    pub fn register_conversion(&mut self, listener: Rc<dyn ConversionListener>) {
        self.conversion.push(listener);
    }

    /// Registers a stored notification.
    pub fn register_stored(&mut self, listener: Rc<dyn StoredNotification>) {
        self.stored.push(listener);
    }

    pub(crate) fn notify_before_store(
        &self,
        key: &str,
        entity: &DocumentRef,
        metadata: &Map<String, Value>,
    ) -> SessionResult<()> {
        for listener in &self.store {
            listener.before_store(key, entity, metadata)?;
        }
        Ok(())
    }

    pub(crate) fn notify_after_store(
        &self,
        key: &str,
        entity: &DocumentRef,
        metadata: &Map<String, Value>,
    ) -> SessionResult<()> {
        for listener in &self.store {
            listener.after_store(key, entity, metadata)?;
        }
        Ok(())
    }

    pub(crate) fn notify_before_delete(
        &self,
        key: &str,
        entity: &DocumentRef,
        metadata: &Map<String, Value>,
    ) -> SessionResult<()> {
        for listener in &self.delete {
            listener.before_delete(key, entity, metadata)?;
        }
        Ok(())
    }

    pub(crate) fn notify_stored(&self, key: &str, entity: &DocumentRef) {
        for listener in &self.stored {
            listener.document_stored(key, entity);
        }
    }

    pub(crate) fn convert(
        &self,
        key: Option<&str>,
        body: &mut Value,
        metadata: &mut Map<String, Value>,
    ) -> SessionResult<()> {
        for listener in &self.conversion {
            listener.on_document_converted(key, body, metadata)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("store", &self.store.len())
            .field("delete", &self.delete.len())
            .field("conversion", &self.conversion.len())
            .field("stored", &self.stored.len())
            .finish()
    }
}
