mod local;

pub use local::LocalMaster;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::SchedulerResult;
use crate::id::{AgentId, ExecutorId, OfferId, SessionId, TaskId};
use crate::types::{
    Filters, FrameworkInfo, MasterInfo, Offer, ResourceRequest, StatusUpdate, TaskDescription,
};

/// A request to establish (or resume) a framework session with a master.
#[derive(Debug, Clone)]
pub struct Registration {
    pub framework: FrameworkInfo,
    pub master_url: String,
    /// A carried-over session identity. When present, the transport resumes
    /// the existing session instead of registering fresh.
    pub session_id: Option<SessionId>,
}

/// An established master session: the command sink half plus the inbound
/// event stream the driver dispatcher drains.
pub struct Connection {
    pub session: Box<dyn MasterSession>,
    pub events: mpsc::Receiver<SessionEvent>,
}

/// Creates master sessions for a particular class of master URLs.
#[async_trait]
pub trait MasterConnector: Send + Sync + 'static {
    async fn connect(&self, registration: Registration) -> SchedulerResult<Connection>;
}

/// The command sink half of an established session.
#[async_trait]
pub trait MasterSession: Send + 'static {
    /// Hand one outbound command to the master.
    async fn send(&mut self, command: Command) -> SchedulerResult<()>;

    /// Tear the session down. Without `failover` the session is
    /// unregistered from the master; with `failover` the registration is
    /// left in place so a successor driver instance can resume it.
    async fn disconnect(&mut self, failover: bool) -> SchedulerResult<()>;
}

/// An outbound request from the framework to the master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    RequestResources {
        requests: Vec<ResourceRequest>,
    },
    LaunchTasks {
        offer_id: OfferId,
        tasks: Vec<TaskDescription>,
        filters: Filters,
    },
    KillTask {
        task_id: TaskId,
    },
    ReviveOffers,
    FrameworkMessage {
        agent_id: AgentId,
        executor_id: ExecutorId,
        data: Vec<u8>,
    },
    AcknowledgeStatusUpdate {
        agent_id: AgentId,
        task_id: TaskId,
        uuid: Vec<u8>,
    },
    DeactivateFramework,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::RequestResources { .. } => "RequestResources",
            Command::LaunchTasks { .. } => "LaunchTasks",
            Command::KillTask { .. } => "KillTask",
            Command::ReviveOffers => "ReviveOffers",
            Command::FrameworkMessage { .. } => "FrameworkMessage",
            Command::AcknowledgeStatusUpdate { .. } => "AcknowledgeStatusUpdate",
            Command::DeactivateFramework => "DeactivateFramework",
        }
    }
}

/// An inbound protocol event produced by the transport, in the order the
/// master emitted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    Registered {
        session_id: SessionId,
        master: MasterInfo,
    },
    Reregistered {
        master: MasterInfo,
    },
    RegistrationFailed {
        message: String,
    },
    Disconnected,
    ResourceOffers {
        offers: Vec<Offer>,
    },
    OfferRescinded {
        offer_id: OfferId,
    },
    StatusUpdate {
        update: StatusUpdate,
    },
    FrameworkMessage {
        executor_id: ExecutorId,
        agent_id: AgentId,
        data: Vec<u8>,
    },
    AgentLost {
        agent_id: AgentId,
    },
    Error {
        message: String,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Registered { .. } => "Registered",
            SessionEvent::Reregistered { .. } => "Reregistered",
            SessionEvent::RegistrationFailed { .. } => "RegistrationFailed",
            SessionEvent::Disconnected => "Disconnected",
            SessionEvent::ResourceOffers { .. } => "ResourceOffers",
            SessionEvent::OfferRescinded { .. } => "OfferRescinded",
            SessionEvent::StatusUpdate { .. } => "StatusUpdate",
            SessionEvent::FrameworkMessage { .. } => "FrameworkMessage",
            SessionEvent::AgentLost { .. } => "AgentLost",
            SessionEvent::Error { .. } => "Error",
        }
    }
}

/// Connectors keyed by master URL scheme.
pub struct ConnectorRegistry {
    connectors: Mutex<HashMap<String, Arc<dyn MasterConnector>>>,
}

impl ConnectorRegistry {
    fn new() -> Self {
        Self {
            connectors: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, scheme: impl Into<String>, connector: Arc<dyn MasterConnector>) {
        self.connectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(scheme.into(), connector);
    }

    pub fn resolve(&self, scheme: &str) -> Option<Arc<dyn MasterConnector>> {
        self.connectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scheme)
            .cloned()
    }
}

lazy_static! {
    static ref CONNECTORS: ConnectorRegistry = {
        let registry = ConnectorRegistry::new();
        registry.register("local", Arc::new(LocalMaster::new()));
        registry
    };
}

/// The process-wide connector registry, created on first use. Concurrent
/// first use from multiple threads initializes it exactly once. The `local`
/// scheme is pre-registered with a process-wide in-process master.
pub fn connectors() -> &'static ConnectorRegistry {
    &CONNECTORS
}
