//! Response envelope shared by every dispatcher operation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// `{ "store": {...}, "errors": {...}, "error": "..." }`. A non-empty `error` means the
/// operation failed; `store` may still carry partial data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub store: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ResponseEnvelope {
    /// Store a named value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.store.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.store.get(name)
    }

    /// Field-keyed error message (form validation).
    pub fn set_err(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.insert(field.into(), message.into());
    }

    pub fn api_error(&mut self, message: impl Into<String>) {
        self.error = message.into();
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}
