//! Run lifecycle records
//!
//! A run is created `running` and transitions to exactly one terminal
//! status. The terminal write is an atomic check-and-set on the record:
//! once terminal, later writes are no-ops that report the settled status.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use weaver_core::{AgentId, Error, Result, RunId, RunStatus, ThreadId, VersionId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub thread_id: ThreadId,
    pub agent_id: AgentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<VersionId>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: Value,
}

pub struct RunStore {
    runs: DashMap<RunId, RunRecord>,
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStore {
    pub fn new() -> Self {
        Self {
            runs: DashMap::new(),
        }
    }

    pub fn create(
        &self,
        thread_id: &ThreadId,
        agent_id: &AgentId,
        version_id: Option<VersionId>,
        metadata: Value,
    ) -> Result<RunRecord> {
        let record = RunRecord {
            run_id: RunId::generate(),
            thread_id: thread_id.clone(),
            agent_id: agent_id.clone(),
            version_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            metadata,
        };
        info!(run_id = %record.run_id, thread_id = %thread_id, "run created");
        self.runs.insert(record.run_id.clone(), record.clone());
        Ok(record)
    }

    pub fn get(&self, run_id: &RunId) -> Result<RunRecord> {
        self.runs
            .get(run_id)
            .map(|r| r.clone())
            .ok_or_else(|| Error::not_found(format!("run {}", run_id)))
    }

    /// Runs for a thread, newest first.
    pub fn list_for_thread(&self, thread_id: &ThreadId) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self
            .runs
            .iter()
            .filter(|r| &r.thread_id == thread_id)
            .map(|r| r.clone())
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }

    /// Write a terminal status exactly once. Returns the status the record
    /// settled on: if the run was already terminal the existing status wins
    /// and this call is a no-op.
    pub fn finish(&self, run_id: &RunId, status: RunStatus) -> Result<RunStatus> {
        if !status.is_terminal() {
            return Err(Error::Internal(format!(
                "finish called with non-terminal status {}",
                status
            )));
        }
        let mut record = self
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Error::persistence(format!("run {} missing on status write", run_id)))?;
        if record.status.is_terminal() {
            debug!(run_id = %run_id, status = %record.status, "run already terminal; ignoring write");
            return Ok(record.status);
        }
        record.status = status;
        record.completed_at = Some(Utc::now());
        info!(run_id = %run_id, status = %status, "run finished");
        Ok(status)
    }
}
