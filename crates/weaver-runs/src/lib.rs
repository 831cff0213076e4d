//! Weaver Runs — the agent-run execution and event-streaming pipeline
//!
//! A run is one execution of an agent against a thread: the conversation
//! loop engine drives model-call / tool-call rounds and produces a lazy
//! ordered stream of events; the dispatcher hands the work to a spawned
//! executor that appends every event to the run's log and settles the
//! lifecycle record; any number of stream readers replay and tail the same
//! log concurrently.

pub mod compat;
pub mod dispatcher;
pub mod engine;
pub mod log;
pub mod scanner;
pub mod stream;

pub use compat::transform_tool_output;
pub use dispatcher::{RunDispatcher, StartRun};
pub use engine::{build_system_prompt, run_agent, EngineContext};
pub use log::RunLog;
pub use scanner::{parse_invocation, ToolCallScanner, ToolInvocation};
pub use stream::stream_run;
