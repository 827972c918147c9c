//! `VariableStore` — the mapping from variable name to value + metadata
//! that backs template interpolation (spec §3 "Variable", §4.1).
//!
//! Global and workflow-runtime variables share a single `HashMap`,
//! distinguished only by a key prefix (`workflow:` for runtime-scoped
//! variables). This is what keeps the two namespaces from ever colliding:
//! it's a property of the key space, not of separate storage.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

const WORKFLOW_PREFIX: &str = "workflow:";

/// Auto-detected value shape for a [`Variable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
    String,
    Number,
    Boolean,
    Json,
    Array,
}

impl VariableKind {
    /// Detect the kind from a raw string value.
    ///
    /// Order matters: boolean and numeric literals are also valid JSON, so
    /// they're checked first to get the more specific kind.
    pub fn detect(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed == "true" || trimmed == "false" {
            return Self::Boolean;
        }
        if trimmed.parse::<f64>().is_ok() {
            return Self::Number;
        }
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(serde_json::Value::Array(_)) => Self::Array,
            Ok(_) => Self::Json,
            Err(_) => Self::String,
        }
    }
}

/// One stored variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub kind: VariableKind,
    pub description: Option<String>,
    pub folder: Option<String>,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        let kind = VariableKind::detect(&value);
        Self { name: name.into(), value, kind, description: None, folder: None }
    }
}

fn workflow_key(name: &str) -> String {
    format!("{WORKFLOW_PREFIX}{name}")
}

/// The store itself: one map, two logical namespaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableStore {
    entries: HashMap<String, Variable>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `name`, preferring the workflow-scoped entry first, then
    /// falling back to the global one. This is the resolution order the
    /// `Interpolator` uses (spec §4.2).
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.entries
            .get(&workflow_key(name))
            .or_else(|| self.entries.get(name))
    }

    /// Insert or update a global variable, auto-detecting its kind.
    pub fn upsert_global(
        &mut self,
        name: &str,
        value: &str,
        description: Option<String>,
        folder: Option<String>,
    ) {
        self.upsert(name.to_string(), value, description, folder);
    }

    /// Insert or update a workflow-runtime variable.
    pub fn upsert_workflow(&mut self, name: &str, value: &str) {
        self.upsert(workflow_key(name), value, None, None);
    }

    fn upsert(
        &mut self,
        key: String,
        value: &str,
        description: Option<String>,
        folder: Option<String>,
    ) {
        let kind = VariableKind::detect(value);
        match self.entries.get_mut(&key) {
            Some(existing) => {
                existing.value = value.to_string();
                existing.kind = kind;
                if description.is_some() {
                    existing.description = description;
                }
                if folder.is_some() {
                    existing.folder = folder;
                }
            }
            None => {
                let name = key.strip_prefix(WORKFLOW_PREFIX).unwrap_or(&key).to_string();
                self.entries.insert(
                    key,
                    Variable { name, value: value.to_string(), kind, description, folder },
                );
            }
        }
    }

    /// Whether a global variable with this exact name already exists
    /// (used by `LLMChain`'s "update in place, keep folder" naming rule).
    pub fn has_global(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn global(&self, name: &str) -> Option<&Variable> {
        self.entries.get(name)
    }

    /// Purge every workflow-runtime variable (explicit reset / new run).
    pub fn clear_workflow_namespace(&mut self) {
        self.entries.retain(|k, _| !k.starts_with(WORKFLOW_PREFIX));
    }

    pub fn remove_global(&mut self, name: &str) -> Option<Variable> {
        self.entries.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_scoped_shadows_global() {
        let mut store = VariableStore::new();
        store.upsert_global("name", "Ada", None, None);
        store.upsert_workflow("name", "Grace");

        assert_eq!(store.get("name").unwrap().value, "Grace");
    }

    #[test]
    fn global_and_workflow_never_collide() {
        let mut store = VariableStore::new();
        store.upsert_global("x", "1", None, None);
        store.upsert_workflow("x", "2");

        assert_eq!(store.global("x").unwrap().value, "1");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn clear_workflow_namespace_leaves_globals() {
        let mut store = VariableStore::new();
        store.upsert_global("g", "1", None, None);
        store.upsert_workflow("r", "2");
        store.clear_workflow_namespace();

        assert!(store.has_global("g"));
        assert!(store.get("r").is_none());
    }

    #[test]
    fn kind_detection() {
        assert_eq!(VariableKind::detect("42"), VariableKind::Number);
        assert_eq!(VariableKind::detect("true"), VariableKind::Boolean);
        assert_eq!(VariableKind::detect("[1,2,3]"), VariableKind::Array);
        assert_eq!(VariableKind::detect(r#"{"a":1}"#), VariableKind::Json);
        assert_eq!(VariableKind::detect("hello"), VariableKind::String);
    }

    #[test]
    fn upsert_keeps_existing_folder_when_not_given() {
        let mut store = VariableStore::new();
        store.upsert_global("g", "1", None, Some("reports".into()));
        store.upsert_global("g", "2", None, None);

        assert_eq!(store.global("g").unwrap().folder.as_deref(), Some("reports"));
        assert_eq!(store.global("g").unwrap().value, "2");
    }
}
