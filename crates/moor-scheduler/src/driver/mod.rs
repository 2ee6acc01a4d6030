mod actor;
mod client;
mod event;
mod options;
pub(crate) mod state;

pub(crate) use actor::DriverActor;
pub(crate) use event::DriverEvent;

pub use client::SchedulerDriver;
pub use options::DriverOptions;
pub use state::{Lifecycle, Status};
