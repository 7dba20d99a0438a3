//! Bus abstraction.
//!
//! A pub/sub transport with consumer groups: every group sees every
//! message on a topic, and within a group each message reaches exactly one
//! subscriber. Delivery is at-least-once; ordering holds per topic
//! partition only.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A subscription bound to one (topic, group) pair.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<Vec<u8>>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<Vec<u8>>) -> Self {
        Self { receiver }
    }

    /// Next raw payload, or `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }
}

/// Transport-agnostic bus capability.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn produce(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error>;

    fn subscribe(&self, topic: &str, group: &str) -> Subscription;
}

#[async_trait]
impl<B> MessageBus for Arc<B>
where
    B: MessageBus + ?Sized,
{
    type Error = B::Error;

    async fn produce(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        (**self).produce(topic, payload).await
    }

    fn subscribe(&self, topic: &str, group: &str) -> Subscription {
        (**self).subscribe(topic, group)
    }
}
