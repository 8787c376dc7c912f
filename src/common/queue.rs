//! Broadcast messaging for inter-component communication.

use std::sync::Arc;

use tokio::sync::broadcast;

/// Broadcast queue for one-to-many message distribution.
///
/// Used to fan cache change sets out to asynchronous listeners.
/// Backed by tokio's broadcast channel.
#[derive(Clone)]
pub struct BroadcastQueue<T> {
    sender: Arc<broadcast::Sender<T>>,
}

impl<T: Clone> BroadcastQueue<T> {
    /// create a new broadcast queue
    pub fn new(cap: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(cap);

        Arc::new(Self {
            sender: Arc::new(tx),
        })
    }

    /// send a message to every current subscriber, returning how many received it
    pub fn send(
        &self,
        msg: T,
    ) -> usize {
        // no subscribers is not a failure for a change feed
        self.sender.send(msg).unwrap_or(0)
    }

    /// subscribe to the queue
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }
}
