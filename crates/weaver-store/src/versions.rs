//! Version store — immutable, numbered configuration snapshots
//!
//! Version numbers are assigned under the store's exclusive control inside a
//! per-agent critical section: concurrent creates for one agent serialize on
//! that agent's index entry, so numbers are contiguous with no duplicates.
//! Creating never activates; activation is a separate atomic pointer rewrite
//! on the agent record.

use crate::agents::AgentStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use weaver_core::{AgentId, ConfigSnapshot, Error, Result, ToolConfig, VersionId};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Version {
    pub version_id: VersionId,
    pub agent_id: AgentId,
    pub version_number: u32,
    pub version_name: String,
    pub system_prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub tools: ToolConfig,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Version {
    /// The configuration snapshot a run executes against.
    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            system_prompt: self.system_prompt.clone(),
            model: self.model.clone(),
            tools: self.tools.clone(),
        }
    }
}

/// Parameters for creating a new version.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CreateVersion {
    pub system_prompt: String,
    pub model: Option<String>,
    #[serde(default)]
    pub tools: ToolConfig,
    pub version_name: Option<String>,
    pub change_description: Option<String>,
}

pub struct VersionStore {
    agents: Arc<AgentStore>,
    versions: DashMap<VersionId, Version>,
    /// Per-agent ordered index; also the critical section for numbering.
    by_agent: DashMap<AgentId, Vec<VersionId>>,
}

impl VersionStore {
    pub fn new(agents: Arc<AgentStore>) -> Self {
        Self {
            agents,
            versions: DashMap::new(),
            by_agent: DashMap::new(),
        }
    }

    /// Create a new immutable version for an agent. Does not activate it.
    pub fn create_version(
        &self,
        agent_id: &AgentId,
        created_by: &str,
        params: CreateVersion,
    ) -> Result<Version> {
        self.agents.owns(agent_id, created_by)?;
        debug!(agent_id = %agent_id, created_by, "creating new version");

        // Entry guard held until insert completes: numbering and index update
        // are one atomic step per agent.
        let mut index = self.by_agent.entry(agent_id.clone()).or_default();
        let version_number = index
            .last()
            .and_then(|id| self.versions.get(id))
            .map(|v| v.version_number + 1)
            .unwrap_or(1);

        let version = Version {
            version_id: VersionId::generate(),
            agent_id: agent_id.clone(),
            version_number,
            version_name: params
                .version_name
                .unwrap_or_else(|| format!("v{}", version_number)),
            system_prompt: params.system_prompt,
            model: params.model,
            tools: params.tools,
            created_by: created_by.to_string(),
            change_description: params.change_description,
            created_at: Utc::now(),
        };

        self.versions
            .insert(version.version_id.clone(), version.clone());
        index.push(version.version_id.clone());
        drop(index);

        info!(
            agent_id = %agent_id,
            version_id = %version.version_id,
            version_number,
            "version created"
        );
        Ok(version)
    }

    pub fn get_version(&self, version_id: &VersionId, requester: &str) -> Result<Version> {
        let version = self
            .versions
            .get(version_id)
            .map(|v| v.clone())
            .ok_or_else(|| Error::not_found(format!("version {}", version_id)))?;
        self.agents.owns(&version.agent_id, requester)?;
        Ok(version)
    }

    /// All versions of an agent, newest first.
    pub fn list_versions(&self, agent_id: &AgentId, requester: &str) -> Result<Vec<Version>> {
        self.agents.owns(agent_id, requester)?;
        let mut versions: Vec<Version> = self
            .by_agent
            .get(agent_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.versions.get(id).map(|v| v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        versions.sort_by(|a, b| b.version_number.cmp(&a.version_number));
        Ok(versions)
    }

    /// Point the agent at an existing version of it. Idempotent; with
    /// concurrent callers the pointer ends equal to one of the requested
    /// versions (last writer wins).
    pub fn activate_version(
        &self,
        agent_id: &AgentId,
        version_id: &VersionId,
        requester: &str,
    ) -> Result<()> {
        self.agents.owns(agent_id, requester)?;

        let version = self
            .versions
            .get(version_id)
            .map(|v| v.clone())
            .filter(|v| &v.agent_id == agent_id)
            .ok_or_else(|| {
                Error::not_found(format!("version {} for agent {}", version_id, agent_id))
            })?;

        self.agents
            .set_active_version(agent_id, version_id, version.version_number)?;
        info!(agent_id = %agent_id, version_id = %version_id, "version activated");
        Ok(())
    }

    /// Mutate cosmetic metadata only; configuration fields are write-once.
    pub fn update_version_metadata(
        &self,
        version_id: &VersionId,
        requester: &str,
        version_name: Option<String>,
        change_description: Option<String>,
    ) -> Result<Version> {
        if version_name.is_none() && change_description.is_none() {
            return Err(Error::Internal("no details provided to update".to_string()));
        }

        let agent_id = self
            .versions
            .get(version_id)
            .map(|v| v.agent_id.clone())
            .ok_or_else(|| Error::not_found(format!("version {}", version_id)))?;
        self.agents.owns(&agent_id, requester)?;

        let mut version = self
            .versions
            .get_mut(version_id)
            .ok_or_else(|| Error::not_found(format!("version {}", version_id)))?;
        if let Some(name) = version_name {
            version.version_name = name;
        }
        if let Some(description) = change_description {
            version.change_description = Some(description);
        }
        Ok(version.clone())
    }

    /// Resolve the agent's active version. `NotFound` when the agent has no
    /// active pointer yet.
    pub fn active_version(&self, agent_id: &AgentId, requester: &str) -> Result<Version> {
        let agent = self.agents.get_owned(agent_id, requester)?;
        let version_id = agent
            .active_version_id
            .ok_or_else(|| Error::not_found(format!("active version for agent {}", agent_id)))?;
        self.get_version(&version_id, requester)
    }
}
