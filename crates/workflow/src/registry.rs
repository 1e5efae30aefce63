//! Workflow definitions and their lookup table.
//!
//! The registry is an immutable value built once at process start (from the
//! built-in set or a JSON file) and shared by `Arc`. Lookups are
//! case-insensitive and never perform I/O.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version assumed when a caller does not name one.
pub const DEFAULT_VERSION: &str = "v1";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("workflow not found: {name} {version}")]
    NotFound { name: String, version: String },

    #[error("duplicate workflow definition: {name} {version}")]
    Duplicate { name: String, version: String },

    #[error("duplicate step registration: {0}")]
    DuplicateStep(String),

    #[error("invalid workflow definitions: {0}")]
    Load(String),
}

/// An ordered list of step names identified by name and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    name: String,
    version: String,
    steps: Vec<String>,
}

impl WorkflowDefinition {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        version: impl Into<String>,
        steps: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }
}

#[derive(Debug, Deserialize)]
struct DefinitionsFile {
    workflows: Vec<WorkflowDefinition>,
}

fn key(name: &str, version: &str) -> (String, String) {
    (name.trim().to_lowercase(), version.trim().to_lowercase())
}

fn effective_version(version: Option<&str>) -> &str {
    match version.map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => DEFAULT_VERSION,
    }
}

/// Immutable lookup from `(name, version)` to a workflow definition.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRegistry {
    definitions: HashMap<(String, String), Arc<WorkflowDefinition>>,
}

impl WorkflowRegistry {
    pub fn new(
        definitions: impl IntoIterator<Item = WorkflowDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut map = HashMap::new();
        for mut definition in definitions {
            if definition.version.trim().is_empty() {
                definition.version = DEFAULT_VERSION.to_string();
            }
            if definition.name.trim().is_empty() {
                return Err(RegistryError::Load("workflow name must not be empty".into()));
            }
            if definition.steps.is_empty() {
                return Err(RegistryError::Load(format!(
                    "workflow {} {} has no steps",
                    definition.name, definition.version
                )));
            }
            let k = key(&definition.name, effective_version(Some(&definition.version)));
            if map.contains_key(&k) {
                return Err(RegistryError::Duplicate {
                    name: definition.name,
                    version: definition.version,
                });
            }
            map.insert(k, Arc::new(definition));
        }
        Ok(Self { definitions: map })
    }

    /// The workflows shipped with the engine.
    pub fn builtin() -> Self {
        let definitions = [
            WorkflowDefinition::new("echo", "v1", ["echo"]),
            WorkflowDefinition::new(
                "invoice",
                "v1",
                ["text.extract", "invoice.extract.v1", "invoice.export.csv.v1"],
            ),
            WorkflowDefinition::new(
                "invoice",
                "v2",
                [
                    "text.extract",
                    "invoice.extract.v1",
                    "invoice.validate.v1",
                    "invoice.export.csv.v1",
                    "export.json",
                ],
            ),
        ];
        let definitions = definitions
            .into_iter()
            .map(|d| (key(&d.name, &d.version), Arc::new(d)))
            .collect();
        Self { definitions }
    }

    /// Parse `{"workflows": [{"name", "version", "steps": [...]}, ...]}`.
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        let file: DefinitionsFile =
            serde_json::from_str(json).map_err(|e| RegistryError::Load(e.to_string()))?;
        Self::new(file.workflows)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| RegistryError::Load(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Look up a definition. `version` defaults to [`DEFAULT_VERSION`].
    pub fn get(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Arc<WorkflowDefinition>, RegistryError> {
        let version = effective_version(version);
        self.definitions
            .get(&key(name, version))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound {
                name: name.to_string(),
                version: version.to_string(),
            })
    }

    pub fn definitions(&self) -> impl Iterator<Item = &WorkflowDefinition> {
        self.definitions.values().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
