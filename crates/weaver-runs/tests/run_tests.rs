//! Tests for weaver-runs: the conversation loop, dispatcher lifecycle,
//! event log, and stream readers, driven by a scripted provider

use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use weaver_core::{AgentId, ConfigSnapshot, Error, RunId, RunStatus, ThreadId};
use weaver_llm::{LlmError, LlmProvider, LlmRequest, LlmResult, LlmStream, StreamDelta};
use weaver_runs::{run_agent, stream_run, EngineContext, RunDispatcher, RunLog, StartRun};
use weaver_store::{AgentStore, CreateVersion, MessageKind, RunStore, ThreadStore, VersionStore};
use weaver_tools::{Capability, CapabilityRegistry, ExecutionError};

const OWNER: &str = "acct-1";

// ===========================================================================
// Scripted provider and test capabilities
// ===========================================================================

/// Replays a fixed script: one list of text fragments per model call.
struct ScriptedProvider {
    rounds: Mutex<VecDeque<Vec<String>>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedProvider {
    fn new(rounds: Vec<Vec<&str>>) -> Arc<Self> {
        Self::with_delay(rounds, Duration::ZERO)
    }

    fn with_delay(rounds: Vec<Vec<&str>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            rounds: Mutex::new(
                rounds
                    .into_iter()
                    .map(|r| r.into_iter().map(String::from).collect())
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete_stream(&self, _request: LlmRequest) -> LlmResult<LlmStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fragments = self.rounds.lock().unwrap().pop_front().unwrap_or_default();
        let delay = self.delay;
        let stream = async_stream::stream! {
            for fragment in fragments {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(StreamDelta::Text(fragment));
            }
            yield Ok(StreamDelta::Done { stop_reason: Some("end_turn".to_string()) });
        };
        Ok(Box::pin(stream))
    }
}

/// A provider whose call fails outright.
struct FailingProvider;

#[async_trait::async_trait]
impl LlmProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete_stream(&self, _request: LlmRequest) -> LlmResult<LlmStream> {
        Err(LlmError::RequestFailed("upstream is down".to_string()))
    }
}

/// Returns a fixed value.
struct StaticCapability {
    output: Value,
}

#[async_trait::async_trait]
impl Capability for StaticCapability {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Reports the weather."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _args: Value) -> Result<Value, ExecutionError> {
        Ok(self.output.clone())
    }
}

/// Always fails with an execution error.
struct FlakyCapability;

#[async_trait::async_trait]
impl Capability for FlakyCapability {
    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "Fails every time."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _args: Value) -> Result<Value, ExecutionError> {
        Err(ExecutionError::new("backend exploded"))
    }
}

/// Blocks until released, so a stop request can land mid-run.
struct PauseCapability {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait::async_trait]
impl Capability for PauseCapability {
    fn name(&self) -> &str {
        "pause"
    }

    fn description(&self) -> &str {
        "Waits until released."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _args: Value) -> Result<Value, ExecutionError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(json!({ "ok": true }))
    }
}

// ===========================================================================
// Harness
// ===========================================================================

struct Harness {
    agents: Arc<AgentStore>,
    versions: Arc<VersionStore>,
    threads: Arc<ThreadStore>,
    runs: Arc<RunStore>,
    log: Arc<RunLog>,
    dispatcher: RunDispatcher,
}

fn harness(provider: Arc<dyn LlmProvider>, registry: CapabilityRegistry) -> Harness {
    let agents = Arc::new(AgentStore::new());
    let versions = Arc::new(VersionStore::new(agents.clone()));
    let threads = Arc::new(ThreadStore::new());
    let runs = Arc::new(RunStore::new());
    let log = Arc::new(RunLog::new());
    let dispatcher = RunDispatcher::new(
        provider,
        Arc::new(registry),
        agents.clone(),
        versions.clone(),
        threads.clone(),
        runs.clone(),
        log.clone(),
        "test-model",
    );
    Harness {
        agents,
        versions,
        threads,
        runs,
        log,
        dispatcher,
    }
}

impl Harness {
    /// Create an agent with an activated v1 and an empty thread.
    fn setup_agent(&self) -> (AgentId, ThreadId) {
        let agent = self.agents.create(OWNER, "test-agent");
        let version = self
            .versions
            .create_version(
                &agent.agent_id,
                OWNER,
                CreateVersion {
                    system_prompt: "You are a test assistant.".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
        self.versions
            .activate_version(&agent.agent_id, &version.version_id, OWNER)
            .unwrap();
        let thread = self.threads.create(OWNER, None);
        (agent.agent_id, thread.thread_id)
    }

    fn start(&self, thread_id: &ThreadId, agent_id: &AgentId, prompt: &str) -> RunId {
        self.dispatcher
            .start_run(StartRun {
                thread_id: thread_id.clone(),
                agent_id: agent_id.clone(),
                account_id: OWNER.to_string(),
                prompt: prompt.to_string(),
                model: None,
            })
            .unwrap()
            .run_id
    }

    async fn collect_events(&self, run_id: &RunId) -> Vec<Value> {
        let stream = stream_run(
            self.runs.clone(),
            self.threads.clone(),
            self.log.clone(),
            run_id.clone(),
            OWNER,
            0,
        )
        .unwrap();
        let entries: Vec<String> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
            .await
            .expect("stream did not finish");
        entries
            .iter()
            .map(|e| serde_json::from_str(e).unwrap())
            .collect()
    }

    async fn wait_terminal(&self, run_id: &RunId) -> RunStatus {
        for _ in 0..500 {
            let status = self.runs.get(run_id).unwrap().status;
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run never reached a terminal status");
    }
}

fn tool_block(name: &str) -> String {
    format!(
        "Let me use a tool. <tool_code>{{\"tool_name\": \"{}\", \"parameters\": {{}}}}</tool_code>",
        name
    )
}

// ===========================================================================
// Conversation loop
// ===========================================================================

#[tokio::test]
async fn plain_completion_persists_one_assistant_message() {
    let provider = ScriptedProvider::new(vec![vec!["Hel", "lo"]]);
    let h = harness(provider.clone(), CapabilityRegistry::new());
    let (agent_id, thread_id) = h.setup_agent();

    let run_id = h.start(&thread_id, &agent_id, "Hi");
    let events = h.collect_events(&run_id).await;

    assert_eq!(events[0], json!({ "type": "status", "status": "thinking" }));
    assert_eq!(events[1], json!({ "type": "assistant_chunk", "content": "Hel" }));
    assert_eq!(events[2], json!({ "type": "assistant_chunk", "content": "lo" }));
    assert_eq!(
        events.last().unwrap(),
        &json!({ "type": "status", "status": "completed" })
    );

    assert_eq!(h.wait_terminal(&run_id).await, RunStatus::Completed);
    assert_eq!(provider.calls(), 1);

    let messages = h.threads.list_messages(&thread_id);
    let assistant: Vec<_> = messages
        .iter()
        .filter(|m| m.kind == MessageKind::Assistant)
        .collect();
    assert_eq!(assistant.len(), 1);
    assert_eq!(assistant[0].content["content"], "Hello");
}

#[tokio::test]
async fn unknown_tool_emits_error_and_loop_continues() {
    let block = tool_block("missing_tool");
    let provider = ScriptedProvider::new(vec![vec![block.as_str()], vec!["All done"]]);
    let h = harness(provider.clone(), CapabilityRegistry::new());
    let (agent_id, thread_id) = h.setup_agent();

    let run_id = h.start(&thread_id, &agent_id, "go");
    let events = h.collect_events(&run_id).await;

    let tool_event = events
        .iter()
        .find(|e| e["type"] == "tool_output")
        .expect("tool_output event present");
    assert_eq!(tool_event["tool_name"], "missing_tool");
    assert_eq!(tool_event["is_error"], true);

    // The run continued to a second model call rather than terminating.
    assert_eq!(provider.calls(), 2);
    assert_eq!(h.wait_terminal(&run_id).await, RunStatus::Completed);
    assert_eq!(
        events.last().unwrap(),
        &json!({ "type": "status", "status": "completed" })
    );
}

#[tokio::test]
async fn capability_error_is_recoverable() {
    let mut registry = CapabilityRegistry::new();
    registry.register(FlakyCapability);
    let block = tool_block("flaky");
    let provider = ScriptedProvider::new(vec![vec![block.as_str()], vec!["recovered"]]);
    let h = harness(provider.clone(), registry);
    let (agent_id, thread_id) = h.setup_agent();

    let run_id = h.start(&thread_id, &agent_id, "go");
    let events = h.collect_events(&run_id).await;

    let tool_event = events
        .iter()
        .find(|e| e["type"] == "tool_output")
        .expect("tool_output event present");
    assert_eq!(tool_event["is_error"], true);
    assert!(tool_event["output"]["error"]
        .as_str()
        .unwrap()
        .contains("backend exploded"));

    assert_eq!(provider.calls(), 2);
    assert_eq!(h.wait_terminal(&run_id).await, RunStatus::Completed);
}

#[tokio::test]
async fn successful_tool_output_streams_and_persists() {
    let mut registry = CapabilityRegistry::new();
    registry.register(StaticCapability {
        output: json!({ "forecast": "sunny" }),
    });
    let block = tool_block("weather");
    let provider = ScriptedProvider::new(vec![vec![block.as_str()], vec!["It is sunny."]]);
    let h = harness(provider.clone(), registry);
    let (agent_id, thread_id) = h.setup_agent();

    let run_id = h.start(&thread_id, &agent_id, "weather?");
    let events = h.collect_events(&run_id).await;

    let tool_event = events
        .iter()
        .find(|e| e["type"] == "tool_output")
        .expect("tool_output event present");
    assert_eq!(tool_event["tool_name"], "weather");
    assert!(tool_event.get("is_error").is_none());
    assert_eq!(tool_event["output"], json!({ "forecast": "sunny" }));

    let messages = h.threads.list_messages(&thread_id);
    let tool_rows: Vec<_> = messages
        .iter()
        .filter(|m| m.kind == MessageKind::Tool)
        .collect();
    assert_eq!(tool_rows.len(), 1);
    assert_eq!(tool_rows[0].content["tool_name"], "weather");
    assert_eq!(tool_rows[0].content["output"], json!({ "forecast": "sunny" }));

    assert_eq!(h.wait_terminal(&run_id).await, RunStatus::Completed);
}

#[tokio::test]
async fn model_failure_marks_run_failed() {
    let h = harness(Arc::new(FailingProvider), CapabilityRegistry::new());
    let (agent_id, thread_id) = h.setup_agent();

    let run_id = h.start(&thread_id, &agent_id, "go");
    assert_eq!(h.wait_terminal(&run_id).await, RunStatus::Failed);

    let events = h.collect_events(&run_id).await;
    let last = events.last().unwrap();
    assert_eq!(last["type"], "status");
    assert_eq!(last["status"], "failed");
    assert!(last["message"].as_str().unwrap().contains("upstream is down"));
}

#[tokio::test]
async fn cancellation_before_first_iteration_yields_stopped_only() {
    let provider = ScriptedProvider::new(vec![vec!["never streamed"]]);
    let threads = Arc::new(ThreadStore::new());
    let thread = threads.create(OWNER, None);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let events: Vec<_> = run_agent(EngineContext {
        thread_id: thread.thread_id.clone(),
        model: "test-model".to_string(),
        config: ConfigSnapshot::default(),
        provider,
        registry: Arc::new(CapabilityRegistry::new()),
        threads: threads.clone(),
        cancel,
    })
    .collect()
    .await;

    let events: Vec<Value> = events
        .into_iter()
        .map(|e| serde_json::to_value(e.unwrap()).unwrap())
        .collect();
    assert_eq!(events, vec![json!({ "type": "status", "status": "stopped" })]);
    assert!(threads.list_messages(&thread.thread_id).is_empty());
}

// ===========================================================================
// Stop semantics
// ===========================================================================

#[tokio::test]
async fn stop_during_run_settles_stopped_with_one_terminal_event() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut registry = CapabilityRegistry::new();
    registry.register(PauseCapability {
        started: started.clone(),
        release: release.clone(),
    });

    let block = tool_block("pause");
    let provider = ScriptedProvider::new(vec![
        vec![block.as_str()],
        vec!["should never be requested"],
    ]);
    let h = harness(provider.clone(), registry);
    let (agent_id, thread_id) = h.setup_agent();

    let run_id = h.start(&thread_id, &agent_id, "go");

    // The run is inside the tool call; stop it now.
    started.notified().await;
    h.dispatcher.stop_run(&run_id, OWNER).unwrap();
    assert_eq!(h.runs.get(&run_id).unwrap().status, RunStatus::Stopped);

    // Stopping again is a no-op, not an error.
    h.dispatcher.stop_run(&run_id, OWNER).unwrap();
    assert_eq!(h.runs.get(&run_id).unwrap().status, RunStatus::Stopped);

    // Let the in-flight step finish; the next boundary observes the stop.
    release.notify_one();
    let mut entries = Vec::new();
    for _ in 0..500 {
        entries = h.log.read_from(&run_id, 0);
        if entries.iter().any(|e| {
            serde_json::from_str::<Value>(e)
                .map(|v| v["status"] == "stopped")
                .unwrap_or(false)
        }) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // No second model call, and exactly one terminal event in the log.
    assert_eq!(provider.calls(), 1);
    let terminal: Vec<Value> = entries
        .iter()
        .map(|e| serde_json::from_str::<Value>(e).unwrap())
        .filter(|e| {
            e["type"] == "status"
                && matches!(e["status"].as_str(), Some("completed" | "failed" | "stopped"))
        })
        .collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0]["status"], "stopped");
}

#[tokio::test]
async fn stop_after_completion_is_a_no_op() {
    let provider = ScriptedProvider::new(vec![vec!["done"]]);
    let h = harness(provider, CapabilityRegistry::new());
    let (agent_id, thread_id) = h.setup_agent();

    let run_id = h.start(&thread_id, &agent_id, "go");
    assert_eq!(h.wait_terminal(&run_id).await, RunStatus::Completed);

    h.dispatcher.stop_run(&run_id, OWNER).unwrap();
    assert_eq!(h.runs.get(&run_id).unwrap().status, RunStatus::Completed);
}

// ===========================================================================
// Stream readers
// ===========================================================================

#[tokio::test]
async fn live_tail_equals_later_replay() {
    let provider = ScriptedProvider::with_delay(
        vec![vec!["one ", "two ", "three"]],
        Duration::from_millis(5),
    );
    let h = harness(provider, CapabilityRegistry::new());
    let (agent_id, thread_id) = h.setup_agent();

    let run_id = h.start(&thread_id, &agent_id, "count");

    // Attached while the run is live: replays whatever exists, then tails.
    let tailed = h.collect_events(&run_id).await;
    assert_eq!(h.wait_terminal(&run_id).await, RunStatus::Completed);

    // Attached after the run finished: pure replay.
    let replayed = h.collect_events(&run_id).await;

    assert_eq!(tailed, replayed);
    assert_eq!(
        replayed.last().unwrap(),
        &json!({ "type": "status", "status": "completed" })
    );
}

#[tokio::test]
async fn many_concurrent_readers_observe_the_same_order() {
    let provider = ScriptedProvider::with_delay(
        vec![vec!["a", "b", "c", "d"]],
        Duration::from_millis(3),
    );
    let h = harness(provider, CapabilityRegistry::new());
    let (agent_id, thread_id) = h.setup_agent();

    let run_id = h.start(&thread_id, &agent_id, "go");

    let mut readers = Vec::new();
    for _ in 0..8 {
        let stream = stream_run(
            h.runs.clone(),
            h.threads.clone(),
            h.log.clone(),
            run_id.clone(),
            OWNER,
            0,
        )
        .unwrap();
        readers.push(tokio::spawn(async move {
            let entries: Vec<String> = stream.collect().await;
            entries
        }));
    }

    let mut sequences = Vec::new();
    for reader in readers {
        let entries = tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .unwrap()
            .unwrap();
        sequences.push(entries);
    }
    for sequence in &sequences[1..] {
        assert_eq!(sequence, &sequences[0]);
    }
}

#[tokio::test]
async fn reader_honors_supplied_offset() {
    let provider = ScriptedProvider::new(vec![vec!["x", "y"]]);
    let h = harness(provider, CapabilityRegistry::new());
    let (agent_id, thread_id) = h.setup_agent();

    let run_id = h.start(&thread_id, &agent_id, "go");
    let full = h.collect_events(&run_id).await;
    assert_eq!(h.wait_terminal(&run_id).await, RunStatus::Completed);

    let stream = stream_run(
        h.runs.clone(),
        h.threads.clone(),
        h.log.clone(),
        run_id.clone(),
        OWNER,
        1,
    )
    .unwrap();
    let entries: Vec<String> = stream.collect().await;
    let from_offset: Vec<Value> = entries
        .iter()
        .map(|e| serde_json::from_str(e).unwrap())
        .collect();
    assert_eq!(from_offset, full[1..].to_vec());
}

#[tokio::test]
async fn reader_access_checks_surface_synchronously() {
    let provider = ScriptedProvider::new(vec![vec!["hi"]]);
    let h = harness(provider, CapabilityRegistry::new());
    let (agent_id, thread_id) = h.setup_agent();
    let run_id = h.start(&thread_id, &agent_id, "go");

    let err = stream_run(
        h.runs.clone(),
        h.threads.clone(),
        h.log.clone(),
        run_id.clone(),
        "someone-else",
        0,
    )
    .map(|_| ())
    .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));

    let err = stream_run(
        h.runs.clone(),
        h.threads.clone(),
        h.log.clone(),
        RunId::new("no-such-run"),
        OWNER,
        0,
    )
    .map(|_| ())
    .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

// ===========================================================================
// Dispatcher boundaries
// ===========================================================================

#[tokio::test]
async fn start_run_rejects_foreign_thread() {
    let provider = ScriptedProvider::new(vec![vec!["hi"]]);
    let h = harness(provider, CapabilityRegistry::new());
    let (agent_id, _) = h.setup_agent();
    let foreign_thread = h.threads.create("someone-else", None);

    let err = h
        .dispatcher
        .start_run(StartRun {
            thread_id: foreign_thread.thread_id,
            agent_id,
            account_id: OWNER.to_string(),
            prompt: "hi".to_string(),
            model: None,
        })
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}

#[tokio::test]
async fn model_override_wins_over_version_model() {
    let provider = ScriptedProvider::new(vec![vec!["ok"]]);
    let h = harness(provider, CapabilityRegistry::new());
    let agent = h.agents.create(OWNER, "modeled");
    let version = h
        .versions
        .create_version(
            &agent.agent_id,
            OWNER,
            CreateVersion {
                system_prompt: "p".to_string(),
                model: Some("version-model".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    h.versions
        .activate_version(&agent.agent_id, &version.version_id, OWNER)
        .unwrap();
    let thread = h.threads.create(OWNER, None);

    let record = h
        .dispatcher
        .start_run(StartRun {
            thread_id: thread.thread_id.clone(),
            agent_id: agent.agent_id.clone(),
            account_id: OWNER.to_string(),
            prompt: "hi".to_string(),
            model: Some("override-model".to_string()),
        })
        .unwrap();
    assert_eq!(record.metadata["model_name"], "override-model");

    // Without an override the version's model applies.
    let record = h
        .dispatcher
        .start_run(StartRun {
            thread_id: thread.thread_id,
            agent_id: agent.agent_id,
            account_id: OWNER.to_string(),
            prompt: "hi again".to_string(),
            model: None,
        })
        .unwrap();
    assert_eq!(record.metadata["model_name"], "version-model");
}
