//! Run dispatcher and executor
//!
//! `start_run` resolves the agent's active configuration, creates the run's
//! lifecycle record, and hands the conversation loop to a spawned executor
//! task — the call returns without waiting for the run. The executor appends
//! every produced event to the run's log (through the compatibility
//! transform) and, in a cleanup step reached on every exit path, writes
//! exactly one terminal status and broadcasts end-of-stream.

use crate::compat::transform_tool_output;
use crate::engine::{run_agent, EngineContext};
use crate::log::{encode_event, RunLog};
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use weaver_core::{
    AgentId, ConfigSnapshot, Error, EventStatus, Result, RunEvent, RunId, RunStatus, ThreadId,
    VersionId,
};
use weaver_llm::LlmProvider;
use weaver_store::{AgentStore, MessageKind, RunRecord, RunStore, ThreadStore, VersionStore};
use weaver_tools::CapabilityRegistry;

/// Request to start a run.
#[derive(Clone, Debug)]
pub struct StartRun {
    pub thread_id: ThreadId,
    pub agent_id: AgentId,
    pub account_id: String,
    pub prompt: String,
    /// Overrides the version's model when set.
    pub model: Option<String>,
}

pub struct RunDispatcher {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<CapabilityRegistry>,
    agents: Arc<AgentStore>,
    versions: Arc<VersionStore>,
    threads: Arc<ThreadStore>,
    runs: Arc<RunStore>,
    log: Arc<RunLog>,
    /// Cancellation tokens for in-flight runs.
    active: Arc<DashMap<RunId, CancellationToken>>,
    default_model: String,
}

impl RunDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<CapabilityRegistry>,
        agents: Arc<AgentStore>,
        versions: Arc<VersionStore>,
        threads: Arc<ThreadStore>,
        runs: Arc<RunStore>,
        log: Arc<RunLog>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            registry,
            agents,
            versions,
            threads,
            runs,
            log,
            active: Arc::new(DashMap::new()),
            default_model: default_model.into(),
        }
    }

    pub fn runs(&self) -> &Arc<RunStore> {
        &self.runs
    }

    pub fn threads(&self) -> &Arc<ThreadStore> {
        &self.threads
    }

    pub fn log(&self) -> &Arc<RunLog> {
        &self.log
    }

    /// Start a run. Returns as soon as the lifecycle record exists; the
    /// executor runs independently and reports only through the event
    /// stream and the final status.
    pub fn start_run(&self, request: StartRun) -> Result<RunRecord> {
        self.threads
            .get_owned(&request.thread_id, &request.account_id)?;
        self.agents.owns(&request.agent_id, &request.account_id)?;

        let (version_id, snapshot): (Option<VersionId>, ConfigSnapshot) =
            match self.versions.active_version(&request.agent_id, &request.account_id) {
                Ok(version) => (Some(version.version_id.clone()), version.snapshot()),
                // An agent with no active version yet runs on defaults.
                Err(Error::NotFound(_)) => (None, ConfigSnapshot::default()),
                Err(e) => return Err(e),
            };

        let model = request
            .model
            .clone()
            .or_else(|| snapshot.model.clone())
            .unwrap_or_else(|| self.default_model.clone());
        debug!(thread_id = %request.thread_id, model = %model, "effective model for run");

        self.threads.append_message(
            &request.thread_id,
            MessageKind::User,
            json!({ "role": "user", "content": request.prompt }),
        )?;

        let record = self.runs.create(
            &request.thread_id,
            &request.agent_id,
            version_id,
            json!({ "model_name": model, "account_id": request.account_id }),
        )?;

        let cancel = CancellationToken::new();
        self.active.insert(record.run_id.clone(), cancel.clone());

        let ctx = EngineContext {
            thread_id: request.thread_id.clone(),
            model,
            config: snapshot,
            provider: self.provider.clone(),
            registry: self.registry.clone(),
            threads: self.threads.clone(),
            cancel,
        };

        tokio::spawn(execute_run(
            record.run_id.clone(),
            ctx,
            self.runs.clone(),
            self.log.clone(),
            self.active.clone(),
        ));

        info!(run_id = %record.run_id, thread_id = %request.thread_id, "run started");
        Ok(record)
    }

    /// Fetch a run, verifying the requester owns its thread.
    pub fn get_run(&self, run_id: &RunId, account_id: &str) -> Result<RunRecord> {
        let record = self.runs.get(run_id)?;
        self.threads.get_owned(&record.thread_id, account_id)?;
        Ok(record)
    }

    /// Stop a run. Idempotent: stopping an already-terminal run is a no-op.
    ///
    /// The terminal status is written before the `STOP` broadcast, so any
    /// reader observing the signal reads a settled status.
    pub fn stop_run(&self, run_id: &RunId, account_id: &str) -> Result<()> {
        let record = self.get_run(run_id, account_id)?;
        if record.status.is_terminal() {
            debug!(run_id = %run_id, status = %record.status, "stop requested for terminal run; no-op");
            return Ok(());
        }

        self.runs.finish(run_id, RunStatus::Stopped)?;
        if let Some((_, cancel)) = self.active.remove(run_id) {
            cancel.cancel();
        }
        self.log.publish_stop(run_id);
        info!(run_id = %run_id, "stop requested");
        Ok(())
    }
}

/// Drive one run's conversation loop to completion, cancellation, or error.
async fn execute_run(
    run_id: RunId,
    ctx: EngineContext,
    runs: Arc<RunStore>,
    log: Arc<RunLog>,
    active: Arc<DashMap<RunId, CancellationToken>>,
) {
    let mut events = run_agent(ctx);
    let mut final_status = RunStatus::Running;

    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                let event = transform_tool_output(event);
                let terminal = event.terminal_status();
                log.append(&run_id, encode_event(&event));
                if let Some(status) = terminal {
                    final_status = status;
                    break;
                }
            }
            Err(e) => {
                error!(run_id = %run_id, "error during agent execution: {}", e);
                final_status = RunStatus::Failed;
                let event = RunEvent::Status {
                    status: EventStatus::Failed,
                    message: Some(format!("An error occurred during agent execution: {}", e)),
                };
                log.append(&run_id, encode_event(&event));
                break;
            }
        }
    }

    if final_status == RunStatus::Running {
        // The engine ended without a terminal event; close the log ourselves.
        final_status = RunStatus::Completed;
        log.append(&run_id, encode_event(&RunEvent::status(EventStatus::Completed)));
    }

    // Cleanup runs on every exit path above: settle the durable status
    // (an earlier `stopped` wins), then signal end-of-stream.
    let settled = runs.finish(&run_id, final_status).unwrap_or(final_status);
    active.remove(&run_id);
    log.publish_stop(&run_id);
    info!(run_id = %run_id, status = %settled, "run concluded");
}
