//! Run events and control-channel signals
//!
//! Events are the append-only items of a run's log. The wire shape is one
//! JSON object per event, discriminated by `type`. Control signals are bare
//! strings on the notification channel.

use crate::types::RunStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status carried by a `status` event.
///
/// `Thinking` marks the start of a model call; the other three are terminal
/// and end the stream for every consumer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Thinking,
    Completed,
    Failed,
    Stopped,
}

impl EventStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventStatus::Thinking)
    }

    /// The run lifecycle status a terminal event maps to. `None` for
    /// non-terminal statuses.
    pub fn as_run_status(&self) -> Option<RunStatus> {
        match self {
            EventStatus::Thinking => None,
            EventStatus::Completed => Some(RunStatus::Completed),
            EventStatus::Failed => Some(RunStatus::Failed),
            EventStatus::Stopped => Some(RunStatus::Stopped),
        }
    }
}

impl From<RunStatus> for EventStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            // A `running` run has no terminal event yet; readers treat it as
            // still thinking.
            RunStatus::Running => EventStatus::Thinking,
            RunStatus::Completed => EventStatus::Completed,
            RunStatus::Failed => EventStatus::Failed,
            RunStatus::Stopped => EventStatus::Stopped,
        }
    }
}

/// One ordered item in a run's event log.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Status {
        status: EventStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    AssistantChunk {
        content: String,
    },
    ToolOutput {
        tool_name: String,
        output: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl RunEvent {
    pub fn status(status: EventStatus) -> Self {
        Self::Status {
            status,
            message: None,
        }
    }

    pub fn chunk(content: impl Into<String>) -> Self {
        Self::AssistantChunk {
            content: content.into(),
        }
    }

    pub fn tool_output(tool_name: impl Into<String>, output: Value) -> Self {
        Self::ToolOutput {
            tool_name: tool_name.into(),
            output,
            is_error: None,
        }
    }

    pub fn tool_error(tool_name: impl Into<String>, output: Value) -> Self {
        Self::ToolOutput {
            tool_name: tool_name.into(),
            output,
            is_error: Some(true),
        }
    }

    /// Whether this event ends the run's log.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Status { status, .. } if status.is_terminal())
    }

    pub fn terminal_status(&self) -> Option<RunStatus> {
        match self {
            RunEvent::Status { status, .. } => status.as_run_status(),
            _ => None,
        }
    }
}

/// Signal on a run's control channel.
///
/// `New` means entries were appended and tailing readers should re-read from
/// their last position; `Stop` means the run is ending and the terminal
/// status is already persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSignal {
    New,
    Stop,
}

impl ControlSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlSignal::New => "NEW",
            ControlSignal::Stop => "STOP",
        }
    }
}

impl std::fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
