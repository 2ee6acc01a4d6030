use async_trait::async_trait;
use log::debug;
use moor_actor::actor::{Actor, ActorAction, ActorHandle};

use crate::driver::actor::DriverActor;
use crate::driver::client::SchedulerDriver;
use crate::driver::DriverEvent;
use crate::error::SchedulerError;
use crate::transport::{Connection, Registration, SessionEvent};

#[async_trait]
impl Actor for DriverActor {
    type Message = DriverEvent;
    type Options = SchedulerDriver;
    type Error = SchedulerError;

    fn new(driver: SchedulerDriver) -> Self {
        Self {
            driver,
            session: None,
            registered: false,
        }
    }

    /// Initiate the connection to the master. The connection attempt runs
    /// on its own task under the configured retry strategy, and reports
    /// back through the mailbox; the same task then pumps inbound events
    /// into the mailbox for the lifetime of the session.
    async fn start(&mut self, handle: &ActorHandle<Self>) -> Result<(), SchedulerError> {
        let Some(connector) = self.driver.connector() else {
            return Err(SchedulerError::InternalError(
                "the driver has no transport connector".to_string(),
            ));
        };
        let registration = Registration {
            framework: self.driver.framework_info(),
            master_url: self.driver.options().master_url.clone(),
            session_id: self.driver.session_id(),
        };
        let retry = self.driver.options().connect_retry_strategy.clone();
        let mailbox = handle.clone();
        tokio::spawn(async move {
            let result = retry
                .run(|| {
                    let connector = connector.clone();
                    let registration = registration.clone();
                    async move { connector.connect(registration).await }
                })
                .await;
            match result {
                Ok(Connection {
                    session,
                    mut events,
                }) => {
                    if mailbox.send(DriverEvent::Connected { session }).is_err() {
                        return;
                    }
                    while let Some(event) = events.recv().await {
                        if mailbox.send(DriverEvent::Session { event }).is_err() {
                            return;
                        }
                    }
                    // The master closed the event stream.
                    let _ = mailbox.send(DriverEvent::Session {
                        event: SessionEvent::Disconnected,
                    });
                }
                Err(e) => {
                    let _ = mailbox.send(DriverEvent::ConnectFailed {
                        message: e.to_string(),
                    });
                }
            }
        });
        Ok(())
    }

    async fn receive(
        &mut self,
        message: DriverEvent,
        _handle: &ActorHandle<Self>,
    ) -> Result<ActorAction, SchedulerError> {
        let action = match message {
            DriverEvent::Connected { session } => self.handle_connected(session),
            DriverEvent::ConnectFailed { message } => self.handle_connect_failed(message).await,
            DriverEvent::Session { event } => self.handle_session_event(event).await,
            DriverEvent::Command { command } => self.handle_command(command).await,
            DriverEvent::Shutdown { failover } => self.handle_shutdown(failover).await,
            DriverEvent::Abort => self.handle_abort().await,
        };
        Ok(action)
    }

    async fn stop(self) -> Result<(), SchedulerError> {
        // Whatever path ended dispatch, a pending graceful shutdown must
        // land on a terminal state so join waiters are released.
        self.driver.shared().mark_stopped();
        debug!("the scheduler driver dispatcher has stopped");
        Ok(())
    }
}
