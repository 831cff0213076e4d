//! Stream reader — replay plus live tail of one run's event log
//!
//! Any number of readers may attach at any point in a run's lifetime. Each
//! reader replays the log from the beginning (or a supplied offset) and
//! then follows the control channel: `NEW` means read past the last
//! position, `STOP` means the run is over and the terminal status is
//! settled. A terminal status event ends the stream — the log never grows
//! past one, so every reader sees it exactly once.

use crate::log::{encode_event, entry_is_terminal, RunLog};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use weaver_core::{ControlSignal, EventStatus, Result, RunEvent, RunId, RunStatus};
use weaver_store::{RunStore, ThreadStore};

/// Open a reader over a run's event log.
///
/// Access is checked synchronously: `NotFound` / `Unauthorized` surface to
/// the caller before any event is produced. Each yielded item is one
/// serialized event, in log order.
pub fn stream_run(
    runs: Arc<RunStore>,
    threads: Arc<ThreadStore>,
    log: Arc<RunLog>,
    run_id: RunId,
    account_id: &str,
    offset: usize,
) -> Result<Pin<Box<dyn Stream<Item = String> + Send>>> {
    let record = runs.get(&run_id)?;
    threads.get_owned(&record.thread_id, account_id)?;

    Ok(Box::pin(async_stream::stream! {
        debug!(run_id = %run_id, offset, "streaming responses");

        // Subscribe before replaying, then re-read the status: the terminal
        // write precedes the STOP broadcast, so a signal sent after this
        // point is never missed and a missed signal means the status check
        // below already sees the terminal state.
        let mut control = log.subscribe(&run_id);
        let status = runs.get(&run_id).map(|r| r.status).unwrap_or(record.status);

        let mut position = offset;
        let mut terminal_seen = false;

        for entry in log.read_from(&run_id, position) {
            position += 1;
            let is_terminal = entry_is_terminal(&entry);
            yield entry;
            if is_terminal {
                terminal_seen = true;
                break;
            }
        }

        if !terminal_seen {
            if status.is_terminal() {
                // Finished run whose log carries no terminal event (stopped
                // before the loop could observe it): close the stream with
                // the settled status.
                yield encode_event(&RunEvent::status(EventStatus::from(status)));
            } else {
                'tail: loop {
                    match control.recv().await {
                        Ok(ControlSignal::New) => {
                            for entry in log.read_from(&run_id, position) {
                                position += 1;
                                let is_terminal = entry_is_terminal(&entry);
                                yield entry;
                                if is_terminal {
                                    break 'tail;
                                }
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            // NEW signals are only re-read prompts; catching
                            // up from the last position loses nothing.
                            warn!(run_id = %run_id, lagged = n, "control channel lagged");
                            for entry in log.read_from(&run_id, position) {
                                position += 1;
                                let is_terminal = entry_is_terminal(&entry);
                                yield entry;
                                if is_terminal {
                                    break 'tail;
                                }
                            }
                        }
                        Ok(ControlSignal::Stop) | Err(RecvError::Closed) => {
                            for entry in log.read_from(&run_id, position) {
                                position += 1;
                                let is_terminal = entry_is_terminal(&entry);
                                yield entry;
                                if is_terminal {
                                    break 'tail;
                                }
                            }
                            let settled = runs
                                .get(&run_id)
                                .map(|r| r.status)
                                .unwrap_or(RunStatus::Stopped);
                            yield encode_event(&RunEvent::status(EventStatus::from(settled)));
                            break 'tail;
                        }
                    }
                }
            }
        }

        debug!(run_id = %run_id, position, "stream reader finished");
    }))
}
