mod core;
mod handler;

use crate::driver::client::SchedulerDriver;
use crate::transport::MasterSession;

/// The dispatcher: owns the transport session and delivers protocol events
/// to the scheduler callbacks, strictly serialized with respect to itself.
pub(crate) struct DriverActor {
    driver: SchedulerDriver,
    session: Option<Box<dyn MasterSession>>,
    /// Whether the framework is currently registered with the master.
    registered: bool,
}
