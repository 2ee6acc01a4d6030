use async_trait::async_trait;
use log::error;
use tokio::sync::{mpsc, watch};

/// A state machine driven by messages delivered one at a time on a
/// dedicated task. Messages are processed strictly in the order they are
/// sent, and no two `receive` calls ever run concurrently.
#[async_trait]
pub trait Actor: Sized + Send + 'static {
    type Message: Send + 'static;
    type Options;
    type Error: From<mpsc::error::SendError<Self::Message>> + std::fmt::Display + Send;

    fn new(options: Self::Options) -> Self;
    async fn start(&mut self, handle: &ActorHandle<Self>) -> Result<(), Self::Error>;
    async fn receive(
        &mut self,
        message: Self::Message,
        handle: &ActorHandle<Self>,
    ) -> Result<ActorAction, Self::Error>;
    async fn stop(self) -> Result<(), Self::Error>;
}

pub enum ActorAction {
    Continue,
    Stop,
}

pub struct ActorHandle<T>
where
    T: Actor,
{
    sender: mpsc::UnboundedSender<T::Message>,
    stopped: watch::Receiver<bool>,
}

impl<T> Clone for ActorHandle<T>
where
    T: Actor,
{
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            stopped: self.stopped.clone(),
        }
    }
}

impl<T: Actor> ActorHandle<T> {
    pub fn new(options: T::Options) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (stopped_tx, stopped_rx) = watch::channel::<bool>(false);
        let mut actor = T::new(options);
        let out = Self {
            sender: tx,
            stopped: stopped_rx,
        };
        let handle = out.clone();
        tokio::spawn(async move {
            let result = async {
                actor.start(&handle).await?;
                while let Some(message) = rx.recv().await {
                    let action = actor.receive(message, &handle).await?;
                    match action {
                        ActorAction::Continue => {}
                        ActorAction::Stop => {
                            break;
                        }
                    }
                }
                actor.stop().await
            }
            .await;
            if let Err(e) = result {
                error!("actor terminated abnormally: {e}");
            }
            let _ = stopped_tx.send(true);
        });
        out
    }

    /// Enqueue a message for the actor. The mailbox is unbounded, so a
    /// message handler may send to its own actor without deadlocking.
    pub fn send(&self, message: T::Message) -> Result<(), T::Error> {
        self.sender.send(message).map_err(T::Error::from)
    }

    pub async fn wait_for_stop(mut self) {
        // We ignore the receiver error since the sender must have been dropped in this case,
        // which means the actor has stopped.
        let _ = self.stopped.wait_for(|x| *x).await;
    }
}
