//! Compatibility transform for legacy stream consumers
//!
//! Older clients render some tool outputs with custom components and expect
//! the pre-restructure shape: `screenshot` spelled `image_url`, and the
//! whole output as a JSON string rather than a structured object. The
//! rewrite is pure and per-event, applied once at the log append boundary;
//! the rest of the pipeline never sees the legacy shape.

use serde_json::Value;
use tracing::debug;
use weaver_core::RunEvent;

/// Tools the legacy frontend has custom components for.
const LEGACY_SHAPED_TOOLS: &[&str] = &["web_search", "web_scraper"];

/// Rewrite a `tool_output` event into the legacy consumer shape. Every
/// other event passes through untouched; ordering is the caller's concern.
pub fn transform_tool_output(event: RunEvent) -> RunEvent {
    match event {
        RunEvent::ToolOutput {
            tool_name,
            output: Value::Object(mut output),
            is_error,
        } if LEGACY_SHAPED_TOOLS.contains(&tool_name.as_str()) => {
            debug!(tool = %tool_name, "transforming output for legacy consumers");
            if let Some(screenshot) = output.remove("screenshot") {
                output.insert("image_url".to_string(), screenshot);
            }
            let stringified = Value::Object(output).to_string();
            RunEvent::ToolOutput {
                tool_name,
                output: Value::String(stringified),
                is_error,
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weaver_core::EventStatus;

    #[test]
    fn renames_screenshot_and_stringifies() {
        let event = RunEvent::tool_output(
            "web_search",
            json!({"screenshot": "https://img.example/x.png", "answer": "42"}),
        );
        let RunEvent::ToolOutput { output, .. } = transform_tool_output(event) else {
            panic!("expected tool_output");
        };
        let text = output.as_str().expect("output stringified");
        let parsed: Value = serde_json::from_str(text).expect("valid JSON string");
        assert_eq!(parsed["image_url"], "https://img.example/x.png");
        assert_eq!(parsed["answer"], "42");
        assert!(parsed.get("screenshot").is_none());
    }

    #[test]
    fn untargeted_tools_pass_through() {
        let event = RunEvent::tool_output("calculator", json!({"result": 7}));
        let RunEvent::ToolOutput { output, .. } = transform_tool_output(event) else {
            panic!("expected tool_output");
        };
        assert_eq!(output, json!({"result": 7}));
    }

    #[test]
    fn non_tool_events_pass_through() {
        let event = RunEvent::status(EventStatus::Thinking);
        assert!(matches!(
            transform_tool_output(event),
            RunEvent::Status { status: EventStatus::Thinking, .. }
        ));
    }

    #[test]
    fn string_outputs_pass_through() {
        // Already-stringified output must not be double-encoded.
        let event = RunEvent::tool_error("web_search", json!("upstream error"));
        let RunEvent::ToolOutput { output, .. } = transform_tool_output(event) else {
            panic!("expected tool_output");
        };
        assert_eq!(output, json!("upstream error"));
    }
}
