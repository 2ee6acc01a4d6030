//! A self-contained framework run against the in-process master: the
//! example plays both sides, publishing offers and completing launched
//! tasks with synthetic status updates until the framework has seen all of
//! its tasks finish and stops the driver.
//!
//! Run with `RUST_LOG=info cargo run --example local_framework`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info};
use moor_common::config::AppConfig;
use moor_scheduler::id::{AgentId, ExecutorId, OfferId, SessionId, TaskId};
use moor_scheduler::transport::{Command, LocalMaster, SessionEvent};
use moor_scheduler::types::{
    ExecutorInfo, MasterInfo, Offer, Resource, StatusUpdate, TaskDescription, TaskState,
    TaskStatus,
};
use moor_scheduler::{DriverOptions, Scheduler, SchedulerDriver};

const TOTAL_TASKS: usize = 5;

struct TestFramework {
    launched: AtomicUsize,
    finished: AtomicUsize,
}

#[async_trait]
impl Scheduler for TestFramework {
    async fn registered(
        &self,
        _driver: &SchedulerDriver,
        session_id: SessionId,
        master: MasterInfo,
    ) {
        info!(
            "registered with {}:{} as session {session_id}",
            master.hostname, master.port
        );
    }

    async fn reregistered(&self, _driver: &SchedulerDriver, _master: MasterInfo) {}

    async fn disconnected(&self, _driver: &SchedulerDriver) {}

    async fn resource_offers(&self, driver: &SchedulerDriver, offers: Vec<Offer>) {
        for offer in offers {
            let launched = self.launched.load(Ordering::SeqCst);
            if launched >= TOTAL_TASKS {
                return;
            }
            self.launched.fetch_add(1, Ordering::SeqCst);
            let task = TaskDescription {
                task_id: TaskId::from(format!("task-{launched}")),
                agent_id: offer.agent_id.clone(),
                name: format!("task {launched}"),
                resources: vec![Resource::scalar("cpus", 1.0)],
                data: vec![],
            };
            info!("launching {} on offer {}", task.name, offer.offer_id);
            let _ = driver.launch_tasks(offer.offer_id.clone(), vec![task]);
        }
    }

    async fn offer_rescinded(&self, _driver: &SchedulerDriver, _offer_id: OfferId) {}

    async fn status_update(&self, driver: &SchedulerDriver, status: TaskStatus) {
        info!("task {} is {}", status.task_id, status.state);
        if status.state == TaskState::Finished {
            let finished = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
            if finished == TOTAL_TASKS {
                info!("all {TOTAL_TASKS} tasks finished, stopping the driver");
                driver.stop();
            }
        }
    }

    async fn framework_message(
        &self,
        _driver: &SchedulerDriver,
        _executor_id: ExecutorId,
        _agent_id: AgentId,
        _data: Vec<u8>,
    ) {
    }

    async fn agent_lost(&self, _driver: &SchedulerDriver, _agent_id: AgentId) {}

    async fn error(&self, _driver: &SchedulerDriver, message: String) {
        error!("framework error: {message}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let master = LocalMaster::new();
    let config = AppConfig::load()?;
    let executor = ExecutorInfo::new(ExecutorId::from("default"), "./task-executor");
    let options = DriverOptions::new(&config, "local-framework", executor)
        .with_connector(master.connector());
    let scheduler = Arc::new(TestFramework {
        launched: AtomicUsize::new(0),
        finished: AtomicUsize::new(0),
    });
    let driver = SchedulerDriver::new(scheduler, options)?;
    driver.initialize()?;

    // Play the master side: keep one offer outstanding and complete every
    // launched task.
    let cluster = {
        let master = master.clone();
        tokio::spawn(async move {
            let agent_id = AgentId::from("agent-0");
            for round in 0..TOTAL_TASKS {
                let offer = Offer {
                    offer_id: OfferId::from(format!("offer-{round}")),
                    agent_id: agent_id.clone(),
                    hostname: "localhost".to_string(),
                    resources: vec![
                        Resource::scalar("cpus", 2.0),
                        Resource::scalar("mem", 1024.0),
                    ],
                };
                if master.offer(vec![offer]).await.is_err() {
                    return;
                }
                let tasks = loop {
                    match master.recv_command().await {
                        Some(Command::LaunchTasks { tasks, .. }) => break tasks,
                        Some(_) => continue,
                        None => return,
                    }
                };
                for task in tasks {
                    for state in [TaskState::Running, TaskState::Finished] {
                        let status = TaskStatus {
                            task_id: task.task_id.clone(),
                            state,
                            message: None,
                        };
                        let update = StatusUpdate::new(status, Some(agent_id.clone()));
                        if master
                            .publish(SessionEvent::StatusUpdate { update })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
        })
    };

    let status = driver.run().await;
    info!("the driver terminated with status {status}");
    cluster.abort();
    Ok(())
}
