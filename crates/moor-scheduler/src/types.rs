use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::{AgentId, ExecutorId, OfferId, TaskId};

/// The identity a framework presents to the master during registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkInfo {
    pub user: String,
    pub name: String,
    pub executor: ExecutorInfo,
}

/// Describes the executor that runs the framework's tasks on agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorInfo {
    pub executor_id: ExecutorId,
    pub command: String,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl ExecutorInfo {
    pub fn new(executor_id: ExecutorId, command: impl Into<String>) -> Self {
        Self {
            executor_id,
            command: command.into(),
            data: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterInfo {
    pub hostname: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub value: ResourceValue,
}

impl Resource {
    pub fn scalar(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: ResourceValue::Scalar(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResourceValue {
    Scalar(f64),
    Ranges(Vec<ResourceRange>),
    Set(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRange {
    pub begin: u64,
    pub end: u64,
}

/// A request for resources, optionally pinned to a specific agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub agent_id: Option<AgentId>,
    pub resources: Vec<Resource>,
}

/// A unit of resource availability proposed by the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: OfferId,
    pub agent_id: AgentId,
    pub hostname: String,
    pub resources: Vec<Resource>,
}

/// A task to launch against an offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescription {
    pub task_id: TaskId,
    pub agent_id: AgentId,
    pub name: String,
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub data: Vec<u8>,
}

/// Offer filtering hints attached to a task launch. The default value
/// requests no filtering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    pub refuse_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Starting,
    Running,
    Finished,
    Failed,
    Killed,
    Lost,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Starting => write!(f, "STARTING"),
            TaskState::Running => write!(f, "RUNNING"),
            TaskState::Finished => write!(f, "FINISHED"),
            TaskState::Failed => write!(f, "FAILED"),
            TaskState::Killed => write!(f, "KILLED"),
            TaskState::Lost => write!(f, "LOST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: TaskId,
    pub state: TaskState,
    pub message: Option<String>,
}

/// A status update as produced by the transport, wrapping the task status
/// with the bookkeeping needed for acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: TaskStatus,
    /// The agent that originated the update, or [None] for updates
    /// synthesized by the driver itself. Synthetic updates are never
    /// acknowledged.
    pub agent_id: Option<AgentId>,
    pub timestamp: f64,
    pub uuid: Vec<u8>,
}

impl StatusUpdate {
    pub fn new(status: TaskStatus, agent_id: Option<AgentId>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            status,
            agent_id,
            timestamp,
            uuid: Uuid::new_v4().as_bytes().to_vec(),
        }
    }
}
