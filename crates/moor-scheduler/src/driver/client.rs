use std::sync::Arc;

use log::debug;
use moor_actor::actor::ActorHandle;
use url::Url;

use crate::driver::state::{DriverShared, Lifecycle, Status};
use crate::driver::{DriverActor, DriverEvent};
use crate::error::{SchedulerError, SchedulerResult};
use crate::id::{AgentId, ExecutorId, OfferId, SessionId, TaskId};
use crate::scheduler::Scheduler;
use crate::transport::{self, Command, MasterConnector};
use crate::types::{Filters, FrameworkInfo, ResourceRequest, TaskDescription};

use super::options::DriverOptions;

/// The driver connecting a [Scheduler] with a cluster master.
///
/// The driver is thread-safe: clones share one underlying instance, every
/// method takes `&self`, and any number of tasks may issue commands while
/// callbacks are delivered concurrently on the dispatch task. Command calls
/// return as soon as the request has been handed to the dispatcher; they
/// never wait for a network round trip. Waiting in [`SchedulerDriver::join`]
/// does not affect callback delivery. `start` must be called within a tokio
/// runtime, since it spawns the dispatch task.
///
/// After registration the driver may fail over to a new process by
/// constructing a new driver with the session identity given to
/// [`Scheduler::registered`].
#[derive(Clone)]
pub struct SchedulerDriver {
    scheduler: Arc<dyn Scheduler>,
    options: Arc<DriverOptions>,
    shared: Arc<DriverShared>,
}

impl SchedulerDriver {
    /// Create a driver in the `New` state. Fails on locally invalid
    /// arguments: an empty framework name or an unparseable master URL.
    pub fn new(scheduler: Arc<dyn Scheduler>, options: DriverOptions) -> SchedulerResult<Self> {
        if options.framework_name.is_empty() {
            return Err(SchedulerError::InvalidArgument(
                "the framework name must not be empty".to_string(),
            ));
        }
        master_scheme(&options.master_url)?;
        let session_id = options.session_id.clone();
        Ok(Self {
            scheduler,
            options: Arc::new(options),
            shared: Arc::new(DriverShared::new(session_id)),
        })
    }

    /// Resolve the transport collaborator and move to `Initialized`.
    /// An unknown master URL scheme is a fatal fault reported here rather
    /// than through a status value.
    pub fn initialize(&self) -> SchedulerResult<()> {
        let connector = match self.options.connector.clone() {
            Some(connector) => connector,
            None => {
                let scheme = master_scheme(&self.options.master_url)?;
                transport::connectors().resolve(&scheme).ok_or_else(|| {
                    SchedulerError::InvalidArgument(format!(
                        "no transport is registered for master URLs with scheme '{scheme}'"
                    ))
                })?
            }
        };
        self.shared.initialize(connector)
    }

    /// Start the driver, spawning the dispatcher and initiating the
    /// connection to the master. Returns promptly; registration completes
    /// asynchronously and is reported through the scheduler callbacks.
    pub fn start(&self) -> Status {
        let status = self.shared.start(|| ActorHandle::new(self.clone()));
        if status == Status::Ok {
            debug!(
                "started the scheduler driver for framework '{}'",
                self.options.framework_name
            );
        }
        status
    }

    /// Stop the driver gracefully, unregistering the session from the
    /// master.
    pub fn stop(&self) -> Status {
        self.stop_with_failover(false)
    }

    /// Stop the driver gracefully. With `failover` the session registration
    /// is left in place so a successor driver instance can resume it.
    pub fn stop_with_failover(&self, failover: bool) -> Status {
        let (status, actor) = self.shared.request_stop();
        if let Some(actor) = actor {
            if actor.send(DriverEvent::Shutdown { failover }).is_err() {
                // The dispatcher is already gone; finish the transition here
                // so join waiters are released.
                self.shared.mark_stopped();
            }
        }
        status
    }

    /// Abort the driver immediately. Queued events and commands are
    /// abandoned; the master is asked to stop sending events for this
    /// framework but the registration is kept.
    pub fn abort(&self) -> Status {
        let (status, actor) = self.shared.request_abort();
        if let Some(actor) = actor {
            let _ = actor.send(DriverEvent::Abort);
        }
        status
    }

    /// Wait until the driver reaches a terminal state and the dispatcher
    /// has fully quiesced. Any number of tasks may wait concurrently; they
    /// are all released by the same terminal transition and observe the
    /// same status.
    pub async fn join(&self) -> Status {
        let mut lifecycle = self.shared.subscribe();
        let terminal = {
            let Ok(terminal) = lifecycle.wait_for(|state| state.is_terminal()).await else {
                return Status::Error;
            };
            *terminal
        };
        if let Some(actor) = self.shared.actor() {
            actor.wait_for_stop().await;
        }
        match terminal {
            Lifecycle::Aborted => Status::Aborted,
            _ => Status::Ok,
        }
    }

    /// Start the driver and wait until it is shut down. Returns the start
    /// status unchanged when starting fails.
    pub async fn run(&self) -> Status {
        let status = self.start();
        if status != Status::Ok {
            return status;
        }
        self.join().await
    }

    pub fn request_resources(&self, requests: Vec<ResourceRequest>) -> Status {
        self.send_command(Command::RequestResources { requests })
    }

    /// Launch tasks against an offer with no filtering hints.
    pub fn launch_tasks(&self, offer_id: OfferId, tasks: Vec<TaskDescription>) -> Status {
        self.launch_tasks_with_filters(offer_id, tasks, Filters::default())
    }

    pub fn launch_tasks_with_filters(
        &self,
        offer_id: OfferId,
        tasks: Vec<TaskDescription>,
        filters: Filters,
    ) -> Status {
        self.send_command(Command::LaunchTasks {
            offer_id,
            tasks,
            filters,
        })
    }

    pub fn kill_task(&self, task_id: TaskId) -> Status {
        self.send_command(Command::KillTask { task_id })
    }

    pub fn revive_offers(&self) -> Status {
        self.send_command(Command::ReviveOffers)
    }

    pub fn send_framework_message(
        &self,
        executor_id: ExecutorId,
        agent_id: AgentId,
        data: Vec<u8>,
    ) -> Status {
        self.send_command(Command::FrameworkMessage {
            agent_id,
            executor_id,
            data,
        })
    }

    /// The current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    /// The session identity: the one carried over at construction, or the
    /// one assigned by the master once registration has completed.
    pub fn session_id(&self) -> Option<SessionId> {
        self.shared.session_id()
    }

    fn send_command(&self, command: Command) -> Status {
        let actor = match self.shared.command_handle() {
            Ok(actor) => actor,
            Err(status) => return status,
        };
        match actor.send(DriverEvent::Command { command }) {
            Ok(()) => Status::Ok,
            // The dispatcher went away between the state check and the
            // handoff; report it like any other non-running state.
            Err(_) => Status::NotRunning,
        }
    }

    pub(crate) fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub(crate) fn options(&self) -> &DriverOptions {
        &self.options
    }

    pub(crate) fn shared(&self) -> &DriverShared {
        &self.shared
    }

    pub(crate) fn connector(&self) -> Option<Arc<dyn MasterConnector>> {
        self.shared.connector()
    }

    pub(crate) fn framework_info(&self) -> FrameworkInfo {
        FrameworkInfo {
            user: self.options.user.clone(),
            name: self.options.framework_name.clone(),
            executor: self.options.executor.clone(),
        }
    }
}

fn master_scheme(url: &str) -> SchedulerResult<String> {
    // A bare "local" selects the in-process master, mirroring the special
    // form accepted by the configuration defaults.
    if url == "local" {
        return Ok("local".to_string());
    }
    let parsed = Url::parse(url)
        .map_err(|e| SchedulerError::InvalidArgument(format!("invalid master URL '{url}': {e}")))?;
    Ok(parsed.scheme().to_string())
}
