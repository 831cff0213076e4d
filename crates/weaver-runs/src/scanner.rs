//! Incremental tool-call block detection
//!
//! The model signals a tool invocation with a single well-delimited block:
//!
//! ```text
//! <tool_code>
//! {"tool_name": "web_search", "parameters": {"query": "..."}}
//! </tool_code>
//! ```
//!
//! Fragments arrive incrementally and a marker may be split across two or
//! more of them, so the scanner keeps the accumulated text and attempts
//! extraction once both markers are present.

use serde::Deserialize;
use serde_json::Value;
use weaver_core::{Error, Result};

pub const TOOL_CODE_START: &str = "<tool_code>";
pub const TOOL_CODE_END: &str = "</tool_code>";

/// Scans an accumulating completion for one complete tool-call block.
#[derive(Debug, Default)]
pub struct ToolCallScanner {
    buffer: String,
}

impl ToolCallScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one streamed fragment. Returns the payload between the markers
    /// once a complete block is present; the caller stops consuming the
    /// turn at that point.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.buffer.push_str(fragment);
        let start = self.buffer.find(TOOL_CODE_START)?;
        let payload_start = start + TOOL_CODE_START.len();
        let end = self.buffer[payload_start..].find(TOOL_CODE_END)?;
        Some(self.buffer[payload_start..payload_start + end].trim().to_string())
    }
}

/// A parsed tool invocation.
#[derive(Clone, Debug, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    #[serde(default = "empty_object")]
    pub parameters: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

/// Parse the payload of a tool-call block. A payload that fails the
/// structured parse is `MalformedToolInvocation` — recoverable, the loop
/// reports it in-band and keeps going.
pub fn parse_invocation(payload: &str) -> Result<ToolInvocation> {
    serde_json::from_str(payload).map_err(|e| Error::MalformedToolInvocation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_complete_block() {
        let mut scanner = ToolCallScanner::new();
        let payload = scanner
            .push("text before <tool_code>{\"tool_name\":\"web_search\"}</tool_code> after")
            .expect("block present");
        assert_eq!(payload, "{\"tool_name\":\"web_search\"}");
    }

    #[test]
    fn tolerates_markers_split_across_fragments() {
        let mut scanner = ToolCallScanner::new();
        assert!(scanner.push("I will search. <tool_").is_none());
        assert!(scanner.push("code>\n{\"tool_name\": \"web_search\", ").is_none());
        assert!(scanner.push("\"parameters\": {\"query\": \"rust\"}}\n</tool_").is_none());
        let payload = scanner.push("code>").expect("block complete");
        let invocation = parse_invocation(&payload).expect("valid payload");
        assert_eq!(invocation.tool_name, "web_search");
        assert_eq!(invocation.parameters, json!({"query": "rust"}));
    }

    #[test]
    fn no_block_in_plain_text() {
        let mut scanner = ToolCallScanner::new();
        assert!(scanner.push("just a normal answer, no tools needed").is_none());
    }

    #[test]
    fn missing_parameters_defaults_to_empty_object() {
        let invocation = parse_invocation("{\"tool_name\": \"web_scraper\"}").expect("valid");
        assert_eq!(invocation.parameters, json!({}));
    }

    #[test]
    fn malformed_payload_is_typed_error() {
        let err = parse_invocation("{not valid json").unwrap_err();
        assert!(matches!(err, Error::MalformedToolInvocation(_)));
    }
}
