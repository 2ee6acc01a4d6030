use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use moor_actor::actor::ActorHandle;
use tokio::sync::watch;

use crate::driver::actor::DriverActor;
use crate::error::{SchedulerError, SchedulerResult};
use crate::id::SessionId;
use crate::transport::MasterConnector;

/// The driver lifecycle. Exactly one state holds at any instant.
/// Transitions are monotonic except that `Running` forks into the graceful
/// (`Stopping` then `Stopped`) and the aborted shutdown paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    New,
    Initialized,
    Running,
    Stopping,
    Aborted,
    Stopped,
}

impl Lifecycle {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Lifecycle::Stopped | Lifecycle::Aborted)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifecycle::New => write!(f, "NEW"),
            Lifecycle::Initialized => write!(f, "INITIALIZED"),
            Lifecycle::Running => write!(f, "RUNNING"),
            Lifecycle::Stopping => write!(f, "STOPPING"),
            Lifecycle::Aborted => write!(f, "ABORTED"),
            Lifecycle::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// The outcome of a driver call. Expected protocol-level conditions are
/// reported through this value rather than through errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    /// A local precondition was violated (e.g. the driver was never
    /// initialized).
    Error,
    /// The call was attempted outside the `Running` state.
    NotRunning,
    /// `start` was called on a driver that is already running.
    AlreadyRunning,
    /// The driver has been stopped.
    Stopped,
    /// The driver has been aborted.
    Aborted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "OK"),
            Status::Error => write!(f, "ERROR"),
            Status::NotRunning => write!(f, "NOT_RUNNING"),
            Status::AlreadyRunning => write!(f, "ALREADY_RUNNING"),
            Status::Stopped => write!(f, "STOPPED"),
            Status::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// The state shared between the command surface and the dispatcher.
///
/// Every transition and every command-side state check happens under the
/// single mutex here; terminal transitions are additionally broadcast on a
/// watch channel so that any number of `join` waiters are released by the
/// same transition.
pub(crate) struct DriverShared {
    state: Mutex<SharedState>,
    lifecycle_tx: watch::Sender<Lifecycle>,
}

struct SharedState {
    lifecycle: Lifecycle,
    session_id: Option<SessionId>,
    connector: Option<Arc<dyn MasterConnector>>,
    actor: Option<ActorHandle<DriverActor>>,
}

impl DriverShared {
    pub fn new(session_id: Option<SessionId>) -> Self {
        let (lifecycle_tx, _) = watch::channel(Lifecycle::New);
        Self {
            state: Mutex::new(SharedState {
                lifecycle: Lifecycle::New,
                session_id,
                connector: None,
                actor: None,
            }),
            lifecycle_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    pub fn is_running(&self) -> bool {
        self.lock().lifecycle == Lifecycle::Running
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.lock().session_id.clone()
    }

    pub fn set_session_id(&self, session_id: SessionId) {
        self.lock().session_id = Some(session_id);
    }

    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle_tx.subscribe()
    }

    pub fn connector(&self) -> Option<Arc<dyn MasterConnector>> {
        self.lock().connector.clone()
    }

    pub fn actor(&self) -> Option<ActorHandle<DriverActor>> {
        self.lock().actor.clone()
    }

    /// `New` to `Initialized`, attaching the transport collaborator.
    pub fn initialize(&self, connector: Arc<dyn MasterConnector>) -> SchedulerResult<()> {
        let mut state = self.lock();
        if state.lifecycle != Lifecycle::New {
            return Err(SchedulerError::InternalError(format!(
                "cannot initialize the driver in state {}",
                state.lifecycle
            )));
        }
        state.connector = Some(connector);
        state.lifecycle = Lifecycle::Initialized;
        self.lifecycle_tx.send_replace(Lifecycle::Initialized);
        Ok(())
    }

    /// `Initialized` to `Running`. The dispatcher is spawned under the same
    /// lock, so no command call can ever observe `Running` without a
    /// dispatcher to hand its request to.
    pub fn start(&self, spawn: impl FnOnce() -> ActorHandle<DriverActor>) -> Status {
        let mut state = self.lock();
        match state.lifecycle {
            Lifecycle::Initialized => {
                state.actor = Some(spawn());
                state.lifecycle = Lifecycle::Running;
                self.lifecycle_tx.send_replace(Lifecycle::Running);
                Status::Ok
            }
            Lifecycle::New => Status::Error,
            Lifecycle::Running => Status::AlreadyRunning,
            Lifecycle::Stopping => Status::NotRunning,
            Lifecycle::Stopped => Status::Stopped,
            Lifecycle::Aborted => Status::Aborted,
        }
    }

    /// Begin graceful shutdown. Returns the dispatcher handle when the
    /// caller must deliver the shutdown event; redundant requests from
    /// other tasks get a status only.
    pub fn request_stop(&self) -> (Status, Option<ActorHandle<DriverActor>>) {
        let mut state = self.lock();
        match state.lifecycle {
            Lifecycle::Running => {
                state.lifecycle = Lifecycle::Stopping;
                self.lifecycle_tx.send_replace(Lifecycle::Stopping);
                (Status::Ok, state.actor.clone())
            }
            Lifecycle::Stopping => (Status::Ok, None),
            Lifecycle::Stopped => (Status::Stopped, None),
            Lifecycle::Aborted => (Status::Aborted, None),
            Lifecycle::New | Lifecycle::Initialized => (Status::NotRunning, None),
        }
    }

    /// `Running` to `Aborted`. The transition is immediate: command calls
    /// observe `Aborted` before the dispatcher has processed the abort.
    pub fn request_abort(&self) -> (Status, Option<ActorHandle<DriverActor>>) {
        let mut state = self.lock();
        match state.lifecycle {
            Lifecycle::Running => {
                state.lifecycle = Lifecycle::Aborted;
                self.lifecycle_tx.send_replace(Lifecycle::Aborted);
                (Status::Ok, state.actor.clone())
            }
            Lifecycle::Stopping => (Status::NotRunning, None),
            Lifecycle::Stopped => (Status::Stopped, None),
            Lifecycle::Aborted => (Status::Aborted, None),
            Lifecycle::New | Lifecycle::Initialized => (Status::NotRunning, None),
        }
    }

    /// Dispatcher-side: graceful shutdown finished tearing down the
    /// transport session.
    pub fn mark_stopped(&self) {
        let mut state = self.lock();
        if state.lifecycle == Lifecycle::Stopping {
            state.lifecycle = Lifecycle::Stopped;
            self.lifecycle_tx.send_replace(Lifecycle::Stopped);
        }
    }

    /// Dispatcher-side: a fatal transport fault aborts the driver. Returns
    /// whether this call performed the transition; a concurrent stop or
    /// abort wins otherwise.
    pub fn mark_aborted(&self) -> bool {
        let mut state = self.lock();
        if state.lifecycle == Lifecycle::Running {
            state.lifecycle = Lifecycle::Aborted;
            self.lifecycle_tx.send_replace(Lifecycle::Aborted);
            true
        } else {
            false
        }
    }

    /// The command-call gate: a dispatcher handle is produced only while
    /// `Running`.
    pub fn command_handle(&self) -> Result<ActorHandle<DriverActor>, Status> {
        let state = self.lock();
        if state.lifecycle != Lifecycle::Running {
            return Err(Status::NotRunning);
        }
        match state.actor.clone() {
            Some(actor) => Ok(actor),
            None => Err(Status::Error),
        }
    }
}
