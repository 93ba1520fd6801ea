//! In-memory CouchDB document.
//!
//! A `Document` is a JSON object. Ordinary fields go through `set`/`get`;
//! the reserved metadata fields (`_id`, `_rev`, `_attachments`, `_deleted`)
//! can only be changed through their dedicated accessors, and `_id` can be
//! assigned only once.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{CouchError, Result};

pub const ID_FIELD: &str = "_id";
pub const REV_FIELD: &str = "_rev";
pub const ATTACHMENTS_FIELD: &str = "_attachments";
pub const DELETED_FIELD: &str = "_deleted";

/// Field names that `Document::set` refuses.
pub const RESERVED_FIELDS: [&str; 4] = [ID_FIELD, REV_FIELD, ATTACHMENTS_FIELD, DELETED_FIELD];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(ID_FIELD.to_string(), Value::String(id.into()));
        Self { fields }
    }

    /// Build a document from a decoded response body. Anything other than a
    /// JSON object is a deserialization error.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(CouchError::Deserialization(format!(
                "expected a JSON object for a document, got {other}"
            ))),
        }
    }

    pub fn is_reserved(name: &str) -> bool {
        RESERVED_FIELDS.contains(&name)
    }

    /// Set an ordinary field. Reserved names must go through their accessor.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        if Self::is_reserved(name) {
            return Err(CouchError::InvalidArgument(format!(
                "{name} is reserved, use its dedicated accessor"
            )));
        }
        self.fields.insert(name.to_string(), value.into());
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Remove an ordinary field, returning its old value.
    pub fn remove(&mut self, name: &str) -> Result<Option<Value>> {
        if Self::is_reserved(name) {
            return Err(CouchError::InvalidArgument(format!(
                "{name} is reserved, use its dedicated accessor"
            )));
        }
        Ok(self.fields.remove(name))
    }

    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(Value::as_str)
    }

    /// Assign the document id. Fails once an id is present.
    pub fn set_id(&mut self, id: impl Into<String>) -> Result<&mut Self> {
        if let Some(existing) = self.id() {
            return Err(CouchError::InvalidArgument(format!(
                "document id is immutable, already set to {existing}"
            )));
        }
        self.fields.insert(ID_FIELD.to_string(), Value::String(id.into()));
        Ok(self)
    }

    pub fn revision(&self) -> Option<&str> {
        self.fields.get(REV_FIELD).and_then(Value::as_str)
    }

    pub fn set_revision(&mut self, rev: impl Into<String>) -> &mut Self {
        self.fields.insert(REV_FIELD.to_string(), Value::String(rev.into()));
        self
    }

    pub fn clear_revision(&mut self) -> &mut Self {
        self.fields.remove(REV_FIELD);
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.fields
            .get(DELETED_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Store an inline attachment, replacing any attachment of the same name.
    pub fn set_attachment(&mut self, name: &str, content_type: &str, data: &[u8]) -> &mut Self {
        let attachments = self
            .fields
            .entry(ATTACHMENTS_FIELD)
            .or_insert_with(|| Value::Object(Map::new()));
        if !attachments.is_object() {
            *attachments = Value::Object(Map::new());
        }
        if let Value::Object(map) = attachments {
            map.insert(
                name.to_string(),
                json!({ "content_type": content_type, "data": BASE64.encode(data) }),
            );
        }
        self
    }

    /// Decoded bytes of an inline attachment. Stubs (attachments the server
    /// only describes) and undecodable data yield `None`.
    pub fn attachment(&self, name: &str) -> Option<Vec<u8>> {
        let attachment = self.fields.get(ATTACHMENTS_FIELD)?.get(name)?;
        if attachment.get("stub").and_then(Value::as_bool).unwrap_or(false) {
            return None;
        }
        let data = attachment.get("data")?.as_str()?;
        BASE64.decode(data).ok()
    }

    pub fn attachment_names(&self) -> Vec<&str> {
        match self.fields.get(ATTACHMENTS_FIELD) {
            Some(Value::Object(map)) => map.keys().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Drop an attachment from the in-memory copy. The `_attachments` field
    /// disappears with its last entry.
    pub fn remove_attachment(&mut self, name: &str) -> &mut Self {
        let now_empty = match self.fields.get_mut(ATTACHMENTS_FIELD) {
            Some(Value::Object(map)) => {
                map.remove(name);
                map.is_empty()
            }
            _ => false,
        };
        if now_empty {
            self.fields.remove(ATTACHMENTS_FIELD);
        }
        self
    }

    /// Bulk-load fields, overwriting existing ones of the same name. Reserved
    /// fields are accepted here since this is how server state comes in.
    pub fn populate_from(&mut self, fields: Map<String, Value>) -> &mut Self {
        self.fields.extend(fields);
        self
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.fields.clone()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// A fresh document with every non-underscore field of this one.
    pub fn duplicate(&self, id: Option<&str>) -> Self {
        let fields = self
            .fields
            .iter()
            .filter(|(k, _)| !k.starts_with('_'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut copy = Self { fields };
        if let Some(id) = id {
            copy.fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        }
        copy
    }
}

impl From<Map<String, Value>> for Document {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}
