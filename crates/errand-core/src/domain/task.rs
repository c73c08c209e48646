use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ErrandError;
use super::ids::TaskId;
use super::state::TaskStatus;

fn default_loop_count() -> u32 {
    1
}

/// One unit of automation work: a site to operate on and an instruction for the agent.
///
/// Position is not stored here; it is the index in the store's ordered list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub target: String,
    pub query: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Number of executor invocations per run.
    #[serde(default = "default_loop_count")]
    pub loop_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Build a fresh `Pending` task from a validated payload.
    pub fn from_new(id: TaskId, new: NewTask, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            target: new.target,
            query: new.query,
            status: TaskStatus::Pending,
            loop_count: new.loop_count,
            created_at,
        }
    }

    /// Return a copy with the patch applied. `id` and `status` are never touched.
    pub fn patched(&self, patch: &TaskPatch) -> Self {
        let mut next = self.clone();
        if let Some(target) = &patch.target {
            next.target = target.clone();
        }
        if let Some(query) = &patch.query {
            next.query = query.clone();
        }
        if let Some(loop_count) = patch.loop_count {
            next.loop_count = loop_count;
        }
        next
    }

    pub fn validate(&self) -> Result<(), ErrandError> {
        validate_fields(&self.target, &self.query, self.loop_count)
    }
}

/// Payload for adding a task. The backend mints the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub target: String,
    pub query: String,
    #[serde(default = "default_loop_count")]
    pub loop_count: u32,
}

impl NewTask {
    pub fn new(target: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            query: query.into(),
            loop_count: 1,
        }
    }

    pub fn with_loop_count(mut self, loop_count: u32) -> Self {
        self.loop_count = loop_count;
        self
    }

    pub fn validate(&self) -> Result<(), ErrandError> {
        validate_fields(&self.target, &self.query, self.loop_count)
    }
}

/// Partial update. Has no status field: status only moves through a run or a reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_count: Option<u32>,
}

impl TaskPatch {
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn loop_count(mut self, loop_count: u32) -> Self {
        self.loop_count = Some(loop_count);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_none() && self.query.is_none() && self.loop_count.is_none()
    }
}

fn validate_fields(target: &str, query: &str, loop_count: u32) -> Result<(), ErrandError> {
    if target.trim().is_empty() {
        return Err(ErrandError::validation("target must not be empty"));
    }
    if query.trim().is_empty() {
        return Err(ErrandError::validation("query must not be empty"));
    }
    if loop_count == 0 {
        return Err(ErrandError::validation("loop_count must be at least 1"));
    }
    Ok(())
}
