//! Threads and ordered message history

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use weaver_core::{Error, Result, ThreadId};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: ThreadId,
    pub account_id: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub message_id: String,
    pub thread_id: ThreadId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: Value,
    pub created_at: DateTime<Utc>,
}

pub struct ThreadStore {
    threads: DashMap<ThreadId, Thread>,
    messages: DashMap<ThreadId, Vec<ThreadMessage>>,
}

impl Default for ThreadStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadStore {
    pub fn new() -> Self {
        Self {
            threads: DashMap::new(),
            messages: DashMap::new(),
        }
    }

    pub fn create(&self, account_id: impl Into<String>, metadata: Option<Value>) -> Thread {
        let thread = Thread {
            thread_id: ThreadId::generate(),
            account_id: account_id.into(),
            metadata: metadata.unwrap_or_else(|| Value::Object(Default::default())),
            created_at: Utc::now(),
        };
        info!(thread_id = %thread.thread_id, account_id = %thread.account_id, "thread created");
        self.threads.insert(thread.thread_id.clone(), thread.clone());
        thread
    }

    pub fn get(&self, thread_id: &ThreadId) -> Result<Thread> {
        self.threads
            .get(thread_id)
            .map(|t| t.clone())
            .ok_or_else(|| Error::not_found(format!("thread {}", thread_id)))
    }

    /// Fetch a thread, verifying the requester owns it.
    pub fn get_owned(&self, thread_id: &ThreadId, account_id: &str) -> Result<Thread> {
        let thread = self.get(thread_id)?;
        if thread.account_id != account_id {
            return Err(Error::unauthorized(format!(
                "account {} does not own thread {}",
                account_id, thread_id
            )));
        }
        Ok(thread)
    }

    pub fn list_for_account(&self, account_id: &str) -> Vec<Thread> {
        let mut threads: Vec<Thread> = self
            .threads
            .iter()
            .filter(|t| t.account_id == account_id)
            .map(|t| t.clone())
            .collect();
        threads.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        threads
    }

    /// Append one message to a thread's ordered history.
    pub fn append_message(
        &self,
        thread_id: &ThreadId,
        kind: MessageKind,
        content: Value,
    ) -> Result<ThreadMessage> {
        if !self.threads.contains_key(thread_id) {
            return Err(Error::not_found(format!("thread {}", thread_id)));
        }
        let message = ThreadMessage {
            message_id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.clone(),
            kind,
            content,
            created_at: Utc::now(),
        };
        self.messages
            .entry(thread_id.clone())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    /// Messages in append order.
    pub fn list_messages(&self, thread_id: &ThreadId) -> Vec<ThreadMessage> {
        self.messages
            .get(thread_id)
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}
