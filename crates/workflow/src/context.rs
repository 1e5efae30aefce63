//! Per-run scratch space shared by the steps of one run.
//!
//! Keys are case-insensitive. Values are a small tagged union instead of an
//! open object type; the keys written by the built-in steps are:
//!
//! | Key              | Value  | Written by            | Read by                 |
//! |------------------|--------|-----------------------|-------------------------|
//! | `ExtractedText`  | `Text` | `text.extract`        | diagnostics / tests     |
//! | `InvoiceExtract` | `Json` | `invoice.extract.v1`  | diagnostics / tests     |
//!
//! Job parameters are seeded into the context as `Text` values.

use std::collections::HashMap;

use docflow_core::{CorrelationId, CustomerId, DocumentId, JobParams, RunId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ContextValue {
    Text(String),
    Json(serde_json::Value),
}

impl ContextValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContextValue::Text(text) => Some(text),
            ContextValue::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ContextValue::Json(value) => Some(value),
            ContextValue::Text(_) => None,
        }
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Text(value)
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Text(value.to_string())
    }
}

impl From<serde_json::Value> for ContextValue {
    fn from(value: serde_json::Value) -> Self {
        ContextValue::Json(value)
    }
}

/// Case-insensitive key/value map. The first spelling of a key is kept for display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextItems {
    entries: HashMap<String, (String, ContextValue)>,
}

impl ContextItems {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Option<ContextValue> {
        let key = key.into();
        let folded = key.to_lowercase();
        match self.entries.get_mut(&folded) {
            Some((_, existing)) => Some(std::mem::replace(existing, value.into())),
            None => {
                self.entries.insert(folded, (key, value.into()));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.get(&key.to_lowercase()).map(|(_, v)| v)
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ContextValue::as_text)
    }

    pub fn get_json(&self, key: &str) -> Option<&serde_json::Value> {
        self.get(key).and_then(ContextValue::as_json)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.entries.remove(&key.to_lowercase()).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContextValue)> {
        self.entries.values().map(|(k, v)| (k.as_str(), v))
    }
}

impl From<&JobParams> for ContextItems {
    fn from(params: &JobParams) -> Self {
        let mut items = ContextItems::new();
        for (key, value) in params {
            items.insert(key.clone(), value.clone());
        }
        items
    }
}

/// Everything a step is invoked with.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub document_id: DocumentId,
    pub customer_id: CustomerId,
    pub workflow_name: String,
    pub workflow_version: String,
    pub correlation_id: CorrelationId,
    pub run_id: RunId,
    pub items: ContextItems,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_case_insensitive() {
        let mut items = ContextItems::new();
        items.insert("ExtractedText", "hello");
        assert_eq!(items.get_text("extractedtext"), Some("hello"));
        assert!(items.contains("EXTRACTEDTEXT"));

        let previous = items.insert("EXTRACTEDTEXT", "bye");
        assert_eq!(previous, Some(ContextValue::Text("hello".into())));
        assert_eq!(items.len(), 1);
        assert_eq!(items.iter().next().unwrap().0, "ExtractedText");
    }

    #[test]
    fn typed_accessors_check_the_tag() {
        let mut items = ContextItems::new();
        items.insert("InvoiceExtract", json!({ "total": 1 }));
        assert!(items.get_text("invoiceextract").is_none());
        assert_eq!(items.get_json("invoiceextract").unwrap()["total"], 1);
    }

    #[test]
    fn params_seed_text_values() {
        let mut params = JobParams::new();
        params.insert("Locale".into(), "de-DE".into());
        let items = ContextItems::from(&params);
        assert_eq!(items.get_text("locale"), Some("de-DE"));
    }

    #[test]
    fn values_serialize_with_a_tag() {
        let value = serde_json::to_value(ContextValue::Text("x".into())).unwrap();
        assert_eq!(value, json!({ "kind": "text", "value": "x" }));
    }
}
