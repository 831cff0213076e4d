//! Agent records and the single active-version pointer
//!
//! The pointer on the agent record is the sole source of truth for which
//! version services new runs; versions themselves carry no active flag.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use weaver_core::{AgentId, Error, Result, VersionId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: AgentId,
    pub account_id: String,
    pub name: String,
    pub icon_name: String,
    pub icon_color: String,
    pub icon_background: String,
    pub is_default: bool,
    pub version_count: u32,
    pub active_version_id: Option<VersionId>,
    pub created_at: DateTime<Utc>,
}

/// Cosmetic fields an update may touch directly. Configuration changes go
/// through the version store instead.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub icon_name: Option<String>,
    pub icon_color: Option<String>,
    pub icon_background: Option<String>,
    pub is_default: Option<bool>,
}

pub struct AgentStore {
    agents: DashMap<AgentId, Agent>,
}

impl Default for AgentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStore {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    pub fn create(&self, account_id: impl Into<String>, name: impl Into<String>) -> Agent {
        let agent = Agent {
            agent_id: AgentId::generate(),
            account_id: account_id.into(),
            name: name.into(),
            icon_name: "bot".to_string(),
            icon_color: "#000000".to_string(),
            icon_background: "#F3F4F6".to_string(),
            is_default: false,
            version_count: 0,
            active_version_id: None,
            created_at: Utc::now(),
        };
        info!(agent_id = %agent.agent_id, account_id = %agent.account_id, "agent created");
        self.agents.insert(agent.agent_id.clone(), agent.clone());
        agent
    }

    pub fn get(&self, agent_id: &AgentId) -> Result<Agent> {
        self.agents
            .get(agent_id)
            .map(|a| a.clone())
            .ok_or_else(|| Error::not_found(format!("agent {}", agent_id)))
    }

    /// Fetch an agent, verifying the requester owns it.
    pub fn get_owned(&self, agent_id: &AgentId, account_id: &str) -> Result<Agent> {
        let agent = self.get(agent_id)?;
        if agent.account_id != account_id {
            return Err(Error::unauthorized(format!(
                "account {} does not own agent {}",
                account_id, agent_id
            )));
        }
        Ok(agent)
    }

    pub fn owns(&self, agent_id: &AgentId, account_id: &str) -> Result<()> {
        self.get_owned(agent_id, account_id).map(|_| ())
    }

    pub fn list_for_account(&self, account_id: &str) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .agents
            .iter()
            .filter(|a| a.account_id == account_id)
            .map(|a| a.clone())
            .collect();
        agents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        agents
    }

    /// Atomically rewrite the active pointer. Last writer wins; the pointer
    /// always equals one of the requested versions.
    pub fn set_active_version(
        &self,
        agent_id: &AgentId,
        version_id: &VersionId,
        version_number: u32,
    ) -> Result<()> {
        let mut agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| Error::persistence(format!("agent {} missing on pointer update", agent_id)))?;
        agent.active_version_id = Some(version_id.clone());
        agent.version_count = agent.version_count.max(version_number);
        info!(agent_id = %agent_id, version_id = %version_id, "active version updated");
        Ok(())
    }

    pub fn update(&self, agent_id: &AgentId, account_id: &str, update: AgentUpdate) -> Result<Agent> {
        self.owns(agent_id, account_id)?;

        // Only one default agent per account.
        if update.is_default == Some(true) {
            for mut other in self.agents.iter_mut() {
                if other.account_id == account_id && &other.agent_id != agent_id {
                    other.is_default = false;
                }
            }
        }

        let mut agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| Error::not_found(format!("agent {}", agent_id)))?;
        if let Some(name) = update.name {
            agent.name = name;
        }
        if let Some(icon_name) = update.icon_name {
            agent.icon_name = icon_name;
        }
        if let Some(icon_color) = update.icon_color {
            agent.icon_color = icon_color;
        }
        if let Some(icon_background) = update.icon_background {
            agent.icon_background = icon_background;
        }
        if let Some(is_default) = update.is_default {
            agent.is_default = is_default;
        }
        Ok(agent.clone())
    }

    /// Remove an agent. Default agents are protected.
    pub fn delete(&self, agent_id: &AgentId, account_id: &str) -> Result<()> {
        let agent = self.get_owned(agent_id, account_id)?;
        if agent.is_default {
            return Err(Error::unauthorized("the default agent cannot be deleted"));
        }
        self.agents.remove(agent_id);
        info!(agent_id = %agent_id, "agent deleted");
        Ok(())
    }

    /// Remove an agent record unconditionally. Used to roll back a creation
    /// whose initial version failed, before the agent is ever reachable.
    pub fn remove_unchecked(&self, agent_id: &AgentId) {
        self.agents.remove(agent_id);
    }
}
