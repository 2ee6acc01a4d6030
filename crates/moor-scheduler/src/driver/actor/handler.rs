use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use log::{debug, error, info, warn};
use moor_actor::actor::ActorAction;

use crate::driver::actor::DriverActor;
use crate::transport::{Command, MasterSession, SessionEvent};
use crate::types::{StatusUpdate, TaskState, TaskStatus};

/// Deliver one callback, isolating application faults from the dispatcher:
/// a panicking callback is logged and dispatch continues with the next
/// event.
async fn deliver(name: &'static str, callback: impl Future<Output = ()>) {
    if AssertUnwindSafe(callback).catch_unwind().await.is_err() {
        error!("scheduler callback '{name}' panicked; continuing with the next event");
    }
}

impl DriverActor {
    pub(super) fn handle_connected(&mut self, session: Box<dyn MasterSession>) -> ActorAction {
        info!(
            "connected to master at {}",
            self.driver.options().master_url
        );
        self.session = Some(session);
        ActorAction::Continue
    }

    pub(super) async fn handle_connect_failed(&mut self, message: String) -> ActorAction {
        error!("giving up connecting to the master: {message}");
        self.fail(message).await
    }

    pub(super) async fn handle_session_event(&mut self, event: SessionEvent) -> ActorAction {
        // Fast path without the lock is fine for logging, but the
        // authoritative check must be re-taken here: events that arrive
        // after a stop or abort began are not delivered.
        if !self.driver.shared().is_running() {
            debug!(
                "dropping {} event because the driver is shutting down",
                event.name()
            );
            return ActorAction::Continue;
        }
        match event {
            SessionEvent::Registered { session_id, master } => {
                info!("framework registered with session {session_id}");
                self.registered = true;
                self.driver.shared().set_session_id(session_id.clone());
                deliver(
                    "registered",
                    self.driver
                        .scheduler()
                        .registered(&self.driver, session_id, master),
                )
                .await;
                ActorAction::Continue
            }
            SessionEvent::Reregistered { master } => {
                info!("framework re-registered with the master");
                self.registered = true;
                deliver(
                    "reregistered",
                    self.driver.scheduler().reregistered(&self.driver, master),
                )
                .await;
                ActorAction::Continue
            }
            SessionEvent::RegistrationFailed { message } => {
                warn!("registration failed: {message}");
                self.fail(message).await
            }
            SessionEvent::Disconnected => {
                info!("disconnected from the master");
                self.registered = false;
                deliver(
                    "disconnected",
                    self.driver.scheduler().disconnected(&self.driver),
                )
                .await;
                ActorAction::Continue
            }
            SessionEvent::ResourceOffers { offers } => {
                debug!("received {} resource offers", offers.len());
                deliver(
                    "resource_offers",
                    self.driver
                        .scheduler()
                        .resource_offers(&self.driver, offers),
                )
                .await;
                ActorAction::Continue
            }
            SessionEvent::OfferRescinded { offer_id } => {
                debug!("offer {offer_id} rescinded");
                deliver(
                    "offer_rescinded",
                    self.driver
                        .scheduler()
                        .offer_rescinded(&self.driver, offer_id),
                )
                .await;
                ActorAction::Continue
            }
            SessionEvent::StatusUpdate { update } => {
                self.handle_status_update(update).await;
                ActorAction::Continue
            }
            SessionEvent::FrameworkMessage {
                executor_id,
                agent_id,
                data,
            } => {
                deliver(
                    "framework_message",
                    self.driver.scheduler().framework_message(
                        &self.driver,
                        executor_id,
                        agent_id,
                        data,
                    ),
                )
                .await;
                ActorAction::Continue
            }
            SessionEvent::AgentLost { agent_id } => {
                info!("agent {agent_id} lost");
                deliver(
                    "agent_lost",
                    self.driver.scheduler().agent_lost(&self.driver, agent_id),
                )
                .await;
                ActorAction::Continue
            }
            SessionEvent::Error { message } => {
                warn!("the master reported a framework error: {message}");
                self.fail(message).await
            }
        }
    }

    async fn handle_status_update(&mut self, update: StatusUpdate) {
        debug!(
            "status update: task {} is now in state {}",
            update.status.task_id, update.status.state
        );
        let StatusUpdate {
            status,
            agent_id,
            uuid,
            ..
        } = update;
        let task_id = status.task_id.clone();
        deliver(
            "status_update",
            self.driver.scheduler().status_update(&self.driver, status),
        )
        .await;
        // Acknowledge last, and only if the callback did not shut the
        // driver down, so an unacknowledged update is redelivered to a
        // healthy successor instead of being lost.
        let Some(agent_id) = agent_id else {
            return;
        };
        if !self.driver.shared().is_running() {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            let ack = Command::AcknowledgeStatusUpdate {
                agent_id,
                task_id,
                uuid,
            };
            if let Err(e) = session.send(ack).await {
                warn!("failed to acknowledge a status update: {e}");
            }
        }
    }

    pub(super) async fn handle_command(&mut self, command: Command) -> ActorAction {
        // Commands that raced past the state check and landed here after a
        // shutdown began are dropped; callers were promised at-most-once
        // dispatch, not delivery.
        if !self.driver.shared().is_running() {
            debug!(
                "dropping {} command because the driver is shutting down",
                command.name()
            );
            return ActorAction::Continue;
        }
        match self.session.as_mut() {
            Some(session) if self.registered => {
                if let Err(e) = session.send(command).await {
                    warn!("failed to send a command to the master: {e}");
                }
            }
            _ => self.handle_command_disconnected(command).await,
        }
        ActorAction::Continue
    }

    /// The master is unreachable. Most commands are dropped; task launches
    /// are answered with synthetic lost updates so the tasks do not appear
    /// pending forever.
    async fn handle_command_disconnected(&mut self, command: Command) {
        match command {
            Command::LaunchTasks { tasks, .. } => {
                warn!(
                    "cannot launch {} tasks while disconnected from the master",
                    tasks.len()
                );
                for task in tasks {
                    let status = TaskStatus {
                        task_id: task.task_id,
                        state: TaskState::Lost,
                        message: Some("master disconnected".to_string()),
                    };
                    self.handle_status_update(StatusUpdate::new(status, None))
                        .await;
                }
            }
            command => {
                warn!(
                    "ignoring {} command while disconnected from the master",
                    command.name()
                );
            }
        }
    }

    pub(super) async fn handle_shutdown(&mut self, failover: bool) -> ActorAction {
        info!("stopping the framework (failover: {failover})");
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.disconnect(failover).await {
                warn!("failed to disconnect from the master: {e}");
            }
        }
        self.driver.shared().mark_stopped();
        ActorAction::Stop
    }

    pub(super) async fn handle_abort(&mut self) -> ActorAction {
        info!("aborting the framework");
        if let Some(mut session) = self.session.take() {
            if self.registered {
                if let Err(e) = session.send(Command::DeactivateFramework).await {
                    warn!("failed to deactivate the framework: {e}");
                }
            }
            if let Err(e) = session.disconnect(true).await {
                warn!("failed to disconnect from the master: {e}");
            }
        }
        ActorAction::Stop
    }

    /// A fatal transport fault: abort the driver, tell the scheduler, and
    /// stop dispatching.
    async fn fail(&mut self, message: String) -> ActorAction {
        if !self.driver.shared().mark_aborted() {
            // A stop or abort raced ahead of the fault; the shutdown event
            // already in the mailbox finishes the teardown.
            return ActorAction::Continue;
        }
        deliver(
            "error",
            self.driver.scheduler().error(&self.driver, message),
        )
        .await;
        self.handle_abort().await
    }
}
