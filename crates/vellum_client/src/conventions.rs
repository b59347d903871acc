//! Identifier and type-tag conventions.
//!
//! Conventions answer the questions the session cannot answer from a JSON
//! body alone: where an entity exposes its identifier, how a non-string
//! identifier becomes a key fragment, which collection tag a type maps to,
//! and how a tagged document converts into an entity.

use crate::error::{SessionError, SessionResult};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Converts a non-string identifier value into a key fragment.
pub type IdentityConverter = Box<dyn Fn(&Value) -> Option<String>>;

/// Converts a tagged document body into a live entity body.
pub type EntityConverter = Box<dyn Fn(&str, Value, &Map<String, Value>) -> SessionResult<Value>>;

/// How a live body exposes its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySlot {
    /// The body is an object carrying a declared identifier property.
    Declared {
        /// Name of the identifier property.
        property: String,
    },
    /// The body has no identifier slot; its key lives only in metadata.
    Dynamic,
}

/// Session conventions for identifiers and type tags.
pub struct Conventions {
    id_property: String,
    key_separator: char,
    identity_converters: Vec<IdentityConverter>,
    entity_converters: HashMap<String, EntityConverter>,
}

impl Default for Conventions {
    fn default() -> Self {
        Self {
            id_property: "id".to_owned(),
            key_separator: '/',
            identity_converters: Vec::new(),
            entity_converters: HashMap::new(),
        }
    }
}

impl Conventions {
    /// Creates conventions with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the identifier property name.
    #[must_use]
    pub fn id_property(&self) -> &str {
        &self.id_property
    }

    /// Sets the identifier property name.
    #[must_use]
    pub fn with_id_property(mut self, property: impl Into<String>) -> Self {
        self.id_property = property.into();
        self
    }

    /// Registers a converter for non-string identifier values.
    ///
    /// Converters are tried in registration order; the first to return
    /// `Some` wins.
    pub fn register_identity_converter(&mut self, converter: IdentityConverter) {
        self.identity_converters.push(converter);
    }

    /// Registers an entity converter for a type tag.
    pub fn register_entity_converter(&mut self, tag: impl Into<String>, converter: EntityConverter) {
        self.entity_converters.insert(tag.into(), converter);
    }

    /// Capability probe: how does this body expose an identifier?
    #[must_use]
    pub fn identity_slot(&self, body: &Value) -> IdentitySlot {
        match body.as_object() {
            Some(object) if object.contains_key(&self.id_property) => IdentitySlot::Declared {
                property: self.id_property.clone(),
            },
            _ => IdentitySlot::Dynamic,
        }
    }

    /// Resolves an identifier already present on the body, if any.
    ///
    /// A declared slot holding a non-string value is routed through the
    /// registered identity converters; with none matching the resolution
    /// fails rather than guessing a rendering.
    pub fn resolve_identifier(&self, body: &Value) -> SessionResult<Option<String>> {
        let property = match self.identity_slot(body) {
            IdentitySlot::Dynamic => return Ok(None),
            IdentitySlot::Declared { property } => property,
        };
        match body.get(&property) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) if text.is_empty() => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.clone())),
            Some(other) => match self.identity_converters.iter().find_map(|c| c(other)) {
                Some(key) => Ok(Some(key)),
                None => Err(SessionError::identity_conversion(property)),
            },
        }
    }

    /// Writes a resolved key back into the body's declared identifier slot.
    ///
    /// Bodies without a declared slot are left untouched; their key lives
    /// only in metadata.
    pub fn inject_identifier(&self, body: &mut Value, key: &str) {
        if let Some(object) = body.as_object_mut() {
            if object.contains_key(&self.id_property) {
                object.insert(self.id_property.clone(), Value::String(key.to_owned()));
            }
        }
    }

    /// Derives a collection tag from an entity's type hint.
    #[must_use]
    pub fn collection_tag(&self, type_hint: Option<&str>) -> String {
        match type_hint {
            None => "docs".to_owned(),
            Some(name) => {
                let mut tag = name.to_ascii_lowercase();
                if !tag.ends_with('s') {
                    tag.push('s');
                }
                tag
            }
        }
    }

    /// Produces a key for an entity with no identifier and no external
    /// generator.
    #[must_use]
    pub fn default_key(&self, tag: &str) -> String {
        format!("{tag}{}{}", self.key_separator, Uuid::new_v4())
    }

    /// Converts a document body into an entity body.
    ///
    /// A registered converter for the tag is applied when one exists; a tag
    /// with no converter falls back to the default conversion.
    pub fn convert_to_entity(
        &self,
        tag: Option<&str>,
        key: &str,
        body: Value,
        metadata: &Map<String, Value>,
    ) -> SessionResult<Value> {
        let converter = match tag {
            None => None,
            Some(tag) => match self.entity_converter(tag) {
                Ok(converter) => Some(converter),
                Err(err) => {
                    debug!(%err, "using default conversion");
                    None
                }
            },
        };
        match converter {
            Some(converter) => converter(key, body, metadata),
            None => Ok(body),
        }
    }

    fn entity_converter(&self, tag: &str) -> SessionResult<&EntityConverter> {
        self.entity_converters
            .get(tag)
            .ok_or_else(|| SessionError::unresolvable_type(tag))
    }
}

impl fmt::Debug for Conventions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conventions")
            .field("id_property", &self.id_property)
            .field("identity_converters", &self.identity_converters.len())
            .field("entity_converters", &self.entity_converters.len())
            .finish_non_exhaustive()
    }
}
