//! Per-run event log and control channel
//!
//! An append-only, total-ordered sequence of serialized events per run,
//! paired with a broadcast channel carrying `NEW`/`STOP` signals. Appends
//! come from the run's single executor task, so the log order is the order
//! every reader observes. Entries are kept after the run finishes so
//! late-attaching readers can replay.

use dashmap::DashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, error};
use weaver_core::{ControlSignal, RunEvent, RunId};

const CONTROL_CHANNEL_CAPACITY: usize = 1024;

struct RunLogEntry {
    events: RwLock<Vec<String>>,
    control: broadcast::Sender<ControlSignal>,
}

impl RunLogEntry {
    fn new() -> Self {
        let (control, _) = broadcast::channel(CONTROL_CHANNEL_CAPACITY);
        Self {
            events: RwLock::new(Vec::new()),
            control,
        }
    }
}

pub struct RunLog {
    entries: DashMap<RunId, Arc<RunLogEntry>>,
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn entry(&self, run_id: &RunId) -> Arc<RunLogEntry> {
        self.entries
            .entry(run_id.clone())
            .or_insert_with(|| Arc::new(RunLogEntry::new()))
            .clone()
    }

    /// Append one serialized event and signal tailing readers.
    pub fn append(&self, run_id: &RunId, event_json: String) {
        let entry = self.entry(run_id);
        {
            let mut events = entry.events.write().unwrap_or_else(|e| e.into_inner());
            events.push(event_json);
        }
        // No receivers is fine: nobody is tailing yet.
        let _ = entry.control.send(ControlSignal::New);
    }

    /// Entries from `offset` (inclusive) to the end, in append order.
    pub fn read_from(&self, run_id: &RunId, offset: usize) -> Vec<String> {
        let entry = self.entry(run_id);
        let events = entry.events.read().unwrap_or_else(|e| e.into_inner());
        events.iter().skip(offset).cloned().collect()
    }

    pub fn len(&self, run_id: &RunId) -> usize {
        let entry = self.entry(run_id);
        let events = entry.events.read().unwrap_or_else(|e| e.into_inner());
        events.len()
    }

    pub fn is_empty(&self, run_id: &RunId) -> bool {
        self.len(run_id) == 0
    }

    /// Subscribe to the run's control channel. Subscribe before replaying:
    /// signals sent after this call are never missed.
    pub fn subscribe(&self, run_id: &RunId) -> broadcast::Receiver<ControlSignal> {
        self.entry(run_id).control.subscribe()
    }

    /// Signal end-of-stream. The caller persists the terminal status before
    /// calling this, so a reader observing `STOP` can always read a settled
    /// status.
    pub fn publish_stop(&self, run_id: &RunId) {
        debug!(run_id = %run_id, "broadcasting STOP");
        let _ = self.entry(run_id).control.send(ControlSignal::Stop);
    }
}

/// Serialize one event for the log.
pub(crate) fn encode_event(event: &RunEvent) -> String {
    serde_json::to_string(event).unwrap_or_else(|e| {
        error!("failed to encode run event: {}", e);
        r#"{"type":"status","status":"failed","message":"event encoding failed"}"#.to_string()
    })
}

/// Whether a stored entry is a terminal status event.
pub(crate) fn entry_is_terminal(entry: &str) -> bool {
    serde_json::from_str::<RunEvent>(entry)
        .map(|e| e.is_terminal())
        .unwrap_or(false)
}
