use async_trait::async_trait;

use crate::driver::SchedulerDriver;
use crate::id::{AgentId, ExecutorId, OfferId, SessionId};
use crate::types::{MasterInfo, Offer, TaskStatus};

/// The callbacks the driver invokes as it communicates with the master.
///
/// All callbacks run on the driver's dispatch task, one at a time and in
/// event arrival order. Blocking in a callback delays subsequent events but
/// never blocks command calls or tasks waiting in
/// [`SchedulerDriver::join`]. Each callback receives a driver handle so
/// policy code can issue commands from within it.
#[async_trait]
pub trait Scheduler: Send + Sync + 'static {
    /// The driver registered a fresh session with the master.
    async fn registered(
        &self,
        driver: &SchedulerDriver,
        session_id: SessionId,
        master: MasterInfo,
    );

    /// The driver resumed a previously registered session.
    async fn reregistered(&self, driver: &SchedulerDriver, master: MasterInfo);

    /// The connection to the master was lost. The driver stays running; it
    /// is up to the scheduler to stop or abort if the outage is fatal for
    /// the application.
    async fn disconnected(&self, driver: &SchedulerDriver);

    async fn resource_offers(&self, driver: &SchedulerDriver, offers: Vec<Offer>);

    async fn offer_rescinded(&self, driver: &SchedulerDriver, offer_id: OfferId);

    async fn status_update(&self, driver: &SchedulerDriver, status: TaskStatus);

    async fn framework_message(
        &self,
        driver: &SchedulerDriver,
        executor_id: ExecutorId,
        agent_id: AgentId,
        data: Vec<u8>,
    );

    async fn agent_lost(&self, driver: &SchedulerDriver, agent_id: AgentId);

    /// An unrecoverable framework error. The driver aborts itself before
    /// delivering this callback.
    async fn error(&self, driver: &SchedulerDriver, message: String);
}
