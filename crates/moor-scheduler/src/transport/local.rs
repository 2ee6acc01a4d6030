use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{SchedulerError, SchedulerResult};
use crate::id::SessionId;
use crate::transport::{
    Command, Connection, MasterConnector, MasterSession, Registration, SessionEvent,
};
use crate::types::{MasterInfo, Offer};

const SESSION_EVENT_BUFFER: usize = 16;

/// An in-process master. It accepts registrations, records every command it
/// receives, and lets embedding code publish events into the live session.
/// This is the master behind `local` URLs; the integration tests drive it
/// directly.
#[derive(Clone)]
pub struct LocalMaster {
    inner: Arc<LocalMasterInner>,
}

struct LocalMasterInner {
    info: MasterInfo,
    state: Mutex<LocalMasterState>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Command>>,
    reject_resume: AtomicBool,
}

#[derive(Default)]
struct LocalMasterState {
    events: Option<mpsc::Sender<SessionEvent>>,
    disconnects: Vec<bool>,
}

impl LocalMaster {
    pub fn new() -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(LocalMasterInner {
                info: MasterInfo {
                    hostname: "localhost".to_string(),
                    port: 5050,
                },
                state: Mutex::new(LocalMasterState::default()),
                commands_tx,
                commands_rx: tokio::sync::Mutex::new(commands_rx),
                reject_resume: AtomicBool::new(false),
            }),
        }
    }

    pub fn connector(&self) -> Arc<dyn MasterConnector> {
        Arc::new(self.clone())
    }

    /// Make subsequent resume attempts fail as superseded.
    pub fn reject_resume(&self, reject: bool) {
        self.inner.reject_resume.store(reject, Ordering::SeqCst);
    }

    /// Publish an event into the live session. Fails when no framework is
    /// connected.
    pub async fn publish(&self, event: SessionEvent) -> SchedulerResult<()> {
        let sender = self.lock_state().events.clone();
        let Some(sender) = sender else {
            return Err(SchedulerError::TransportError(
                "no connected framework".to_string(),
            ));
        };
        sender.send(event).await.map_err(|_| {
            SchedulerError::TransportError("the framework connection is closed".to_string())
        })
    }

    pub async fn offer(&self, offers: Vec<Offer>) -> SchedulerResult<()> {
        self.publish(SessionEvent::ResourceOffers { offers }).await
    }

    /// The next command received from the framework, in arrival order.
    pub async fn recv_command(&self) -> Option<Command> {
        self.inner.commands_rx.lock().await.recv().await
    }

    /// Drain the commands received so far without waiting.
    pub fn drain_commands(&self) -> Vec<Command> {
        let mut out = vec![];
        let Ok(mut rx) = self.inner.commands_rx.try_lock() else {
            return out;
        };
        while let Ok(command) = rx.try_recv() {
            out.push(command);
        }
        out
    }

    /// The failover flags of the session teardowns observed so far.
    pub fn disconnects(&self) -> Vec<bool> {
        self.lock_state().disconnects.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, LocalMasterState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LocalMaster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MasterConnector for LocalMaster {
    async fn connect(&self, registration: Registration) -> SchedulerResult<Connection> {
        let (events_tx, events_rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        let reject_resume = self.inner.reject_resume.load(Ordering::SeqCst);
        let mut state = self.lock_state();
        let event = match registration.session_id {
            None => {
                let session_id = SessionId::from(Uuid::new_v4().to_string());
                debug!(
                    "registering framework '{}' with session {session_id}",
                    registration.framework.name
                );
                SessionEvent::Registered {
                    session_id,
                    master: self.inner.info.clone(),
                }
            }
            Some(session_id) if reject_resume => {
                debug!("rejecting resume of session {session_id}");
                SessionEvent::RegistrationFailed {
                    message: format!("session {session_id} has been superseded"),
                }
            }
            Some(session_id) => {
                debug!(
                    "framework '{}' resumed session {session_id}",
                    registration.framework.name
                );
                SessionEvent::Reregistered {
                    master: self.inner.info.clone(),
                }
            }
        };
        // The channel is freshly created, so the registration outcome always
        // fits in the buffer.
        let _ = events_tx.try_send(event);
        state.events = Some(events_tx);
        Ok(Connection {
            session: Box::new(LocalSession {
                master: self.clone(),
            }),
            events: events_rx,
        })
    }
}

struct LocalSession {
    master: LocalMaster,
}

#[async_trait]
impl MasterSession for LocalSession {
    async fn send(&mut self, command: Command) -> SchedulerResult<()> {
        self.master
            .inner
            .commands_tx
            .send(command)
            .map_err(|_| SchedulerError::TransportError("the local master is gone".to_string()))
    }

    async fn disconnect(&mut self, failover: bool) -> SchedulerResult<()> {
        let mut state = self.master.lock_state();
        state.events = None;
        state.disconnects.push(failover);
        Ok(())
    }
}
