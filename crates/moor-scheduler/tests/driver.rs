use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moor_common::config::AppConfig;
use moor_scheduler::id::{AgentId, ExecutorId, OfferId, SessionId, TaskId};
use moor_scheduler::transport::{Command, LocalMaster, SessionEvent};
use moor_scheduler::types::{
    ExecutorInfo, Filters, MasterInfo, Offer, Resource, StatusUpdate, TaskDescription, TaskState,
    TaskStatus,
};
use moor_scheduler::{DriverOptions, Lifecycle, Scheduler, SchedulerDriver, Status};
use tokio::sync::mpsc;
use tokio::time::timeout;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
enum Callback {
    Registered { session_id: SessionId },
    Reregistered,
    Disconnected,
    ResourceOffers { offers: Vec<Offer> },
    OfferRescinded { offer_id: OfferId },
    StatusUpdate { status: TaskStatus },
    FrameworkMessage { data: Vec<u8> },
    AgentLost { agent_id: AgentId },
    Error { message: String },
}

struct RecordingScheduler {
    callbacks: mpsc::UnboundedSender<Callback>,
    panic_once_on_offers: AtomicBool,
}

impl RecordingScheduler {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Callback>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            callbacks: tx,
            panic_once_on_offers: AtomicBool::new(false),
        });
        (scheduler, rx)
    }

    fn panicking() -> (Arc<Self>, mpsc::UnboundedReceiver<Callback>) {
        let (scheduler, rx) = Self::new();
        scheduler.panic_once_on_offers.store(true, Ordering::SeqCst);
        (scheduler, rx)
    }
}

#[async_trait]
impl Scheduler for RecordingScheduler {
    async fn registered(
        &self,
        _driver: &SchedulerDriver,
        session_id: SessionId,
        _master: MasterInfo,
    ) {
        let _ = self.callbacks.send(Callback::Registered { session_id });
    }

    async fn reregistered(&self, _driver: &SchedulerDriver, _master: MasterInfo) {
        let _ = self.callbacks.send(Callback::Reregistered);
    }

    async fn disconnected(&self, _driver: &SchedulerDriver) {
        let _ = self.callbacks.send(Callback::Disconnected);
    }

    async fn resource_offers(&self, _driver: &SchedulerDriver, offers: Vec<Offer>) {
        if self.panic_once_on_offers.swap(false, Ordering::SeqCst) {
            panic!("offer handling failed");
        }
        let _ = self.callbacks.send(Callback::ResourceOffers { offers });
    }

    async fn offer_rescinded(&self, _driver: &SchedulerDriver, offer_id: OfferId) {
        let _ = self.callbacks.send(Callback::OfferRescinded { offer_id });
    }

    async fn status_update(&self, _driver: &SchedulerDriver, status: TaskStatus) {
        let _ = self.callbacks.send(Callback::StatusUpdate { status });
    }

    async fn framework_message(
        &self,
        _driver: &SchedulerDriver,
        _executor_id: ExecutorId,
        _agent_id: AgentId,
        data: Vec<u8>,
    ) {
        let _ = self.callbacks.send(Callback::FrameworkMessage { data });
    }

    async fn agent_lost(&self, _driver: &SchedulerDriver, agent_id: AgentId) {
        let _ = self.callbacks.send(Callback::AgentLost { agent_id });
    }

    async fn error(&self, _driver: &SchedulerDriver, message: String) {
        let _ = self.callbacks.send(Callback::Error { message });
    }
}

fn test_options(master: &LocalMaster) -> DriverOptions {
    let config = AppConfig::load().unwrap();
    let executor = ExecutorInfo::new(ExecutorId::from("default"), "./executor");
    DriverOptions::new(&config, "test-framework", executor).with_connector(master.connector())
}

fn test_offer(n: usize) -> Offer {
    Offer {
        offer_id: OfferId::from(format!("offer-{n}")),
        agent_id: AgentId::from("agent-0"),
        hostname: "localhost".to_string(),
        resources: vec![Resource::scalar("cpus", 2.0), Resource::scalar("mem", 512.0)],
    }
}

fn test_task(name: &str) -> TaskDescription {
    TaskDescription {
        task_id: TaskId::from(name),
        agent_id: AgentId::from("agent-0"),
        name: name.to_string(),
        resources: vec![Resource::scalar("cpus", 1.0)],
        data: vec![],
    }
}

async fn recv_callback(rx: &mut mpsc::UnboundedReceiver<Callback>) -> Callback {
    timeout(CALLBACK_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a callback")
        .expect("the callback channel is closed")
}

async fn start_registered(
    master: &LocalMaster,
    scheduler: Arc<RecordingScheduler>,
    rx: &mut mpsc::UnboundedReceiver<Callback>,
) -> SchedulerDriver {
    let driver = SchedulerDriver::new(scheduler, test_options(master)).unwrap();
    driver.initialize().unwrap();
    assert_eq!(driver.start(), Status::Ok);
    let callback = recv_callback(rx).await;
    assert!(matches!(callback, Callback::Registered { .. }));
    driver
}

#[tokio::test]
async fn test_commands_outside_running_have_no_transport_side_effect() {
    let master = LocalMaster::new();
    let (scheduler, _rx) = RecordingScheduler::new();
    let driver = SchedulerDriver::new(scheduler, test_options(&master)).unwrap();
    driver.initialize().unwrap();

    assert_eq!(driver.kill_task(TaskId::from("task-1")), Status::NotRunning);
    assert_eq!(driver.revive_offers(), Status::NotRunning);
    assert_eq!(
        driver.launch_tasks(OfferId::from("offer-1"), vec![test_task("task-1")]),
        Status::NotRunning
    );
    assert_eq!(driver.request_resources(vec![]), Status::NotRunning);
    assert_eq!(
        driver.send_framework_message(
            ExecutorId::from("default"),
            AgentId::from("agent-0"),
            b"ping".to_vec(),
        ),
        Status::NotRunning
    );

    assert!(master.drain_commands().is_empty());
    assert_eq!(driver.lifecycle(), Lifecycle::Initialized);
}

#[tokio::test]
async fn test_start_requires_initialization() {
    let master = LocalMaster::new();
    let (scheduler, _rx) = RecordingScheduler::new();
    let driver = SchedulerDriver::new(scheduler, test_options(&master)).unwrap();

    assert_eq!(driver.start(), Status::Error);
    assert_eq!(driver.lifecycle(), Lifecycle::New);
}

#[tokio::test]
async fn test_start_is_not_reentrant() {
    let master = LocalMaster::new();
    let (scheduler, mut rx) = RecordingScheduler::new();
    let driver = start_registered(&master, scheduler, &mut rx).await;

    // The second start must not disturb the running driver.
    assert_eq!(driver.start(), Status::AlreadyRunning);
    assert_eq!(driver.lifecycle(), Lifecycle::Running);

    assert_eq!(driver.stop(), Status::Ok);
    assert_eq!(driver.join().await, Status::Ok);
    assert_eq!(driver.start(), Status::Stopped);
}

#[tokio::test]
async fn test_stop_and_abort_outside_running_are_no_ops() {
    let master = LocalMaster::new();
    let (scheduler, _rx) = RecordingScheduler::new();
    let driver = SchedulerDriver::new(scheduler, test_options(&master)).unwrap();
    driver.initialize().unwrap();

    assert_eq!(driver.stop(), Status::NotRunning);
    assert_eq!(driver.abort(), Status::NotRunning);
    assert_eq!(driver.lifecycle(), Lifecycle::Initialized);
}

#[tokio::test]
async fn test_redundant_shutdown_requests_are_safe() {
    let master = LocalMaster::new();
    let (scheduler, mut rx) = RecordingScheduler::new();
    let driver = start_registered(&master, scheduler, &mut rx).await;

    assert_eq!(driver.stop(), Status::Ok);
    assert_eq!(driver.join().await, Status::Ok);

    assert_eq!(driver.stop(), Status::Stopped);
    assert_eq!(driver.abort(), Status::Stopped);
    assert_eq!(driver.lifecycle(), Lifecycle::Stopped);
}

#[tokio::test]
async fn test_registration_assigns_session_identity() {
    let master = LocalMaster::new();
    let (scheduler, mut rx) = RecordingScheduler::new();
    let driver = SchedulerDriver::new(scheduler, test_options(&master)).unwrap();
    driver.initialize().unwrap();
    assert!(driver.session_id().is_none());
    assert_eq!(driver.start(), Status::Ok);

    let Callback::Registered { session_id } = recv_callback(&mut rx).await else {
        panic!("expected a registered callback");
    };
    assert_eq!(driver.session_id(), Some(session_id));

    driver.stop();
    driver.join().await;
}

#[tokio::test]
async fn test_failover_resume_yields_reregistered() {
    let master = LocalMaster::new();
    let (scheduler, mut rx) = RecordingScheduler::new();
    let options = test_options(&master).with_session_id(SessionId::from("session-0"));
    let driver = SchedulerDriver::new(scheduler, options).unwrap();
    driver.initialize().unwrap();
    assert_eq!(driver.start(), Status::Ok);

    assert_eq!(recv_callback(&mut rx).await, Callback::Reregistered);
    // A successful resume keeps the carried-over identity.
    assert_eq!(driver.session_id(), Some(SessionId::from("session-0")));

    driver.stop();
    driver.join().await;
}

#[tokio::test]
async fn test_rejected_failover_surfaces_error_and_aborts() {
    let master = LocalMaster::new();
    master.reject_resume(true);
    let (scheduler, mut rx) = RecordingScheduler::new();
    let options = test_options(&master).with_session_id(SessionId::from("session-0"));
    let driver = SchedulerDriver::new(scheduler, options).unwrap();
    driver.initialize().unwrap();
    assert_eq!(driver.start(), Status::Ok);

    let Callback::Error { message } = recv_callback(&mut rx).await else {
        panic!("expected an error callback");
    };
    assert!(message.contains("superseded"));

    assert_eq!(driver.join().await, Status::Aborted);
    assert_eq!(driver.lifecycle(), Lifecycle::Aborted);
}

#[tokio::test]
async fn test_run_blocks_until_stopped() {
    let master = LocalMaster::new();
    let (scheduler, mut rx) = RecordingScheduler::new();
    let driver = SchedulerDriver::new(scheduler, test_options(&master)).unwrap();
    driver.initialize().unwrap();

    let runner = {
        let driver = driver.clone();
        tokio::spawn(async move { driver.run().await })
    };

    let callback = recv_callback(&mut rx).await;
    assert!(matches!(callback, Callback::Registered { .. }));

    // The driver is registered and running, but run() must not return until
    // an explicit shutdown.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!runner.is_finished());

    assert_eq!(driver.stop(), Status::Ok);
    let status = timeout(CALLBACK_TIMEOUT, runner)
        .await
        .expect("run() did not return after stop")
        .unwrap();
    assert_eq!(status, Status::Ok);
}

#[tokio::test]
async fn test_launch_tasks_forwards_one_request() {
    let master = LocalMaster::new();
    let (scheduler, mut rx) = RecordingScheduler::new();
    let driver = start_registered(&master, scheduler, &mut rx).await;

    let task = test_task("task-1");
    let status = driver.launch_tasks(OfferId::from("offer-1"), vec![task.clone()]);
    assert_eq!(status, Status::Ok);

    let command = timeout(CALLBACK_TIMEOUT, master.recv_command())
        .await
        .expect("timed out waiting for the launch request")
        .expect("the command channel is closed");
    assert_eq!(
        command,
        Command::LaunchTasks {
            offer_id: OfferId::from("offer-1"),
            tasks: vec![task],
            filters: Filters::default(),
        }
    );
    assert!(master.drain_commands().is_empty());

    driver.stop();
    driver.join().await;
}

#[tokio::test]
async fn test_events_are_delivered_in_arrival_order() {
    let master = LocalMaster::new();
    let (scheduler, mut rx) = RecordingScheduler::new();
    let driver = start_registered(&master, scheduler, &mut rx).await;

    let offer = test_offer(1);
    master.offer(vec![offer.clone()]).await.unwrap();
    master
        .publish(SessionEvent::OfferRescinded {
            offer_id: offer.offer_id.clone(),
        })
        .await
        .unwrap();
    master
        .publish(SessionEvent::FrameworkMessage {
            executor_id: ExecutorId::from("default"),
            agent_id: AgentId::from("agent-0"),
            data: b"pong".to_vec(),
        })
        .await
        .unwrap();
    master
        .publish(SessionEvent::AgentLost {
            agent_id: AgentId::from("agent-0"),
        })
        .await
        .unwrap();

    assert_eq!(
        recv_callback(&mut rx).await,
        Callback::ResourceOffers {
            offers: vec![offer.clone()]
        }
    );
    assert_eq!(
        recv_callback(&mut rx).await,
        Callback::OfferRescinded {
            offer_id: offer.offer_id
        }
    );
    assert_eq!(
        recv_callback(&mut rx).await,
        Callback::FrameworkMessage {
            data: b"pong".to_vec()
        }
    );
    assert_eq!(
        recv_callback(&mut rx).await,
        Callback::AgentLost {
            agent_id: AgentId::from("agent-0")
        }
    );

    driver.stop();
    driver.join().await;
}

#[tokio::test]
async fn test_no_events_are_delivered_after_stop() {
    let master = LocalMaster::new();
    let (scheduler, mut rx) = RecordingScheduler::new();
    let driver = start_registered(&master, scheduler, &mut rx).await;

    assert_eq!(driver.stop(), Status::Ok);
    assert_eq!(driver.join().await, Status::Ok);

    // The session is torn down, so the master has nobody to publish to.
    let result = master.offer(vec![test_offer(1)]).await;
    assert!(result.is_err());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_concurrent_joins_observe_the_same_status() {
    let master = LocalMaster::new();
    let (scheduler, mut rx) = RecordingScheduler::new();
    let driver = start_registered(&master, scheduler, &mut rx).await;

    let joiners: Vec<_> = (0..3)
        .map(|_| {
            let driver = driver.clone();
            tokio::spawn(async move { driver.join().await })
        })
        .collect();

    assert_eq!(driver.stop(), Status::Ok);
    for joiner in joiners {
        let status = timeout(CALLBACK_TIMEOUT, joiner)
            .await
            .expect("a join waiter was not released")
            .unwrap();
        assert_eq!(status, Status::Ok);
    }
}

#[tokio::test]
async fn test_abort_releases_joiners_with_aborted() {
    let master = LocalMaster::new();
    let (scheduler, mut rx) = RecordingScheduler::new();
    let driver = start_registered(&master, scheduler, &mut rx).await;
    master.drain_commands();

    let joiner = {
        let driver = driver.clone();
        tokio::spawn(async move { driver.join().await })
    };

    assert_eq!(driver.abort(), Status::Ok);
    let status = timeout(CALLBACK_TIMEOUT, joiner)
        .await
        .expect("the join waiter was not released")
        .unwrap();
    assert_eq!(status, Status::Aborted);

    // Aborting deactivates the framework but keeps the registration.
    let commands = master.drain_commands();
    assert_eq!(commands, vec![Command::DeactivateFramework]);
    assert_eq!(master.disconnects(), vec![true]);
}

#[tokio::test]
async fn test_stop_with_failover_preserves_the_session() {
    let master = LocalMaster::new();
    let (scheduler, mut rx) = RecordingScheduler::new();

    let driver = start_registered(&master, scheduler, &mut rx).await;
    assert_eq!(driver.stop_with_failover(true), Status::Ok);
    assert_eq!(driver.join().await, Status::Ok);
    assert_eq!(master.disconnects(), vec![true]);

    let (scheduler, mut rx) = RecordingScheduler::new();
    let driver = start_registered(&master, scheduler, &mut rx).await;
    assert_eq!(driver.stop(), Status::Ok);
    assert_eq!(driver.join().await, Status::Ok);
    assert_eq!(master.disconnects(), vec![true, false]);
}

#[tokio::test]
async fn test_status_updates_are_acknowledged() {
    let master = LocalMaster::new();
    let (scheduler, mut rx) = RecordingScheduler::new();
    let driver = start_registered(&master, scheduler, &mut rx).await;

    let status = TaskStatus {
        task_id: TaskId::from("task-1"),
        state: TaskState::Running,
        message: None,
    };
    let update = StatusUpdate::new(status.clone(), Some(AgentId::from("agent-0")));
    let uuid = update.uuid.clone();
    master
        .publish(SessionEvent::StatusUpdate { update })
        .await
        .unwrap();

    assert_eq!(
        recv_callback(&mut rx).await,
        Callback::StatusUpdate { status }
    );

    let command = timeout(CALLBACK_TIMEOUT, master.recv_command())
        .await
        .expect("timed out waiting for the acknowledgement")
        .expect("the command channel is closed");
    assert_eq!(
        command,
        Command::AcknowledgeStatusUpdate {
            agent_id: AgentId::from("agent-0"),
            task_id: TaskId::from("task-1"),
            uuid,
        }
    );

    driver.stop();
    driver.join().await;
}

#[tokio::test]
async fn test_launching_while_disconnected_synthesizes_lost_updates() {
    let master = LocalMaster::new();
    let (scheduler, mut rx) = RecordingScheduler::new();
    let driver = start_registered(&master, scheduler, &mut rx).await;

    master.publish(SessionEvent::Disconnected).await.unwrap();
    assert_eq!(recv_callback(&mut rx).await, Callback::Disconnected);

    let status = driver.launch_tasks(OfferId::from("offer-1"), vec![test_task("task-1")]);
    assert_eq!(status, Status::Ok);

    let Callback::StatusUpdate { status } = recv_callback(&mut rx).await else {
        panic!("expected a synthesized status update");
    };
    assert_eq!(status.task_id, TaskId::from("task-1"));
    assert_eq!(status.state, TaskState::Lost);
    // Nothing reached the master.
    assert!(master.drain_commands().is_empty());

    driver.stop();
    driver.join().await;
}

#[tokio::test]
async fn test_callback_panics_are_isolated() {
    let master = LocalMaster::new();
    let (scheduler, mut rx) = RecordingScheduler::panicking();
    let driver = start_registered(&master, scheduler, &mut rx).await;

    // The first offer delivery panics inside the callback.
    master.offer(vec![test_offer(1)]).await.unwrap();
    // Subsequent events must still be delivered.
    master
        .publish(SessionEvent::OfferRescinded {
            offer_id: OfferId::from("offer-1"),
        })
        .await
        .unwrap();

    assert_eq!(
        recv_callback(&mut rx).await,
        Callback::OfferRescinded {
            offer_id: OfferId::from("offer-1")
        }
    );

    driver.stop();
    driver.join().await;
}

#[tokio::test]
async fn test_unknown_master_scheme_fails_initialize() {
    let config = AppConfig::load().unwrap();
    let executor = ExecutorInfo::new(ExecutorId::from("default"), "./executor");
    let options = DriverOptions::new(&config, "test-framework", executor)
        .with_master_url("ftp://master.example.com:5050");
    let (scheduler, _rx) = RecordingScheduler::new();
    let driver = SchedulerDriver::new(scheduler, options).unwrap();

    assert!(driver.initialize().is_err());
    assert_eq!(driver.lifecycle(), Lifecycle::New);
}

#[tokio::test]
async fn test_local_scheme_resolves_from_the_registry() {
    let config = AppConfig::load().unwrap();
    let executor = ExecutorInfo::new(ExecutorId::from("default"), "./executor");
    let options = DriverOptions::new(&config, "test-framework", executor);
    let (scheduler, mut rx) = RecordingScheduler::new();
    let driver = SchedulerDriver::new(scheduler, options).unwrap();

    driver.initialize().unwrap();
    assert_eq!(driver.start(), Status::Ok);
    let callback = recv_callback(&mut rx).await;
    assert!(matches!(callback, Callback::Registered { .. }));

    driver.stop();
    driver.join().await;
}
