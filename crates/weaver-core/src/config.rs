//! Configuration snapshot shapes
//!
//! A version's configuration is write-once; these types are the snapshot an
//! agent run executes against.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tool configuration of a version: three independent collections.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolConfig {
    /// Built-in tool toggles, keyed by tool name.
    #[serde(default)]
    pub agentpress: Map<String, Value>,
    /// Declared external tool connections.
    #[serde(default)]
    pub mcp: Vec<Value>,
    /// Custom tool connections.
    #[serde(default)]
    pub custom_mcp: Vec<Value>,
}

/// The effective configuration a run executes against, resolved from the
/// agent's active version at dispatch time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub system_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: ToolConfig,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".to_string(),
            model: None,
            tools: ToolConfig::default(),
        }
    }
}
