use crate::transport::{Command, MasterSession, SessionEvent};

/// The messages processed by the driver dispatcher, one at a time.
pub(crate) enum DriverEvent {
    /// The transport session has been established.
    Connected { session: Box<dyn MasterSession> },
    /// Connection bring-up failed after exhausting the retry budget.
    ConnectFailed { message: String },
    /// An inbound protocol event pulled from the transport stream.
    Session { event: SessionEvent },
    /// An outbound command issued through the command surface.
    Command { command: Command },
    /// Graceful shutdown requested through `stop`.
    Shutdown { failover: bool },
    /// Immediate shutdown requested through `abort`.
    Abort,
}
