pub mod driver;
pub mod error;
pub mod id;
pub mod scheduler;
pub mod transport;
pub mod types;

pub use driver::{DriverOptions, Lifecycle, SchedulerDriver, Status};
pub use scheduler::Scheduler;
