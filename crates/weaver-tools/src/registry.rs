//! Capability registry and trait definitions
//!
//! Each capability is a self-contained module implementing the Capability
//! trait. The registry is a plain lookup table built once at process start
//! from the closed set in create_default_registry(); it is read-only
//! afterwards and safe to share across tasks without locking.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A capability's own failure. Recoverable: the conversation loop reports it
/// in-band as an error tool_output event and keeps going.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ExecutionError(pub String);

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<reqwest::Error> for ExecutionError {
    fn from(e: reqwest::Error) -> Self {
        Self(e.to_string())
    }
}

/// Metadata advertised to the model for one capability.
#[derive(Clone, Debug, Serialize)]
pub struct CapabilityMetadata {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// The Capability trait — implement this to add a new tool.
///
/// To add a capability: create a file in tools/, implement this trait,
/// register it in create_default_registry().
#[async_trait::async_trait]
pub trait Capability: Send + Sync {
    /// Unique, programmatic name (e.g. "web_search").
    fn name(&self) -> &str;

    /// Human-readable description sent to the LLM.
    fn description(&self) -> &str;

    /// JSON Schema for input parameters.
    fn input_schema(&self) -> Value;

    /// Execute with the given structured arguments, returning structured
    /// output.
    async fn execute(&self, args: Value) -> Result<Value, ExecutionError>;

    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata {
            name: self.name().to_string(),
            description: self.description().to_string(),
            schema: self.input_schema(),
        }
    }
}

pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    /// Register a capability. Replaces any existing one with the same name.
    pub fn register(&mut self, capability: impl Capability + 'static) {
        let name = capability.name().to_string();
        self.capabilities.insert(name, Arc::new(capability));
    }

    /// Look up a capability by name. An unknown name is not an error here —
    /// the caller emits a typed error event instead.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    /// Metadata for every registered capability, for prompt embedding.
    pub fn metadata(&self) -> Vec<CapabilityMetadata> {
        let mut all: Vec<CapabilityMetadata> =
            self.capabilities.values().map(|c| c.metadata()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn list(&self) -> Vec<&str> {
        self.capabilities.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}
