//! In-memory bus for tests/dev.
//!
//! Faithful to the production contract where it matters: consumer groups
//! load-balance round-robin, distinct groups each get a copy, and delivery
//! is at-least-once from the subscriber's perspective.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::bus::{MessageBus, Subscription};

const SUBSCRIPTION_BUFFER: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    /// Publish failed due to internal lock poisoning.
    #[error("bus lock poisoned")]
    Poisoned,
}

#[derive(Debug, Default)]
struct Group {
    senders: Vec<mpsc::Sender<Vec<u8>>>,
    /// Round-robin cursor within the group.
    next: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryBus {
    topics: Mutex<HashMap<String, HashMap<String, Group>>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    type Error = InMemoryBusError;

    async fn produce(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        let mut topics = self.topics.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        let Some(groups) = topics.get_mut(topic) else {
            // No subscribers yet; the message is lost, as it would be on a
            // stream nobody has a group on.
            return Ok(());
        };

        for group in groups.values_mut() {
            // Drop dead subscribers, then hand the message to one live one.
            group.senders.retain(|tx| !tx.is_closed());
            if group.senders.is_empty() {
                continue;
            }
            let pick = group.next % group.senders.len();
            group.next = group.next.wrapping_add(1);
            let _ = group.senders[pick].try_send(payload.clone());
        }

        Ok(())
    }

    fn subscribe(&self, topic: &str, group: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);

        if let Ok(mut topics) = self.topics.lock() {
            topics
                .entry(topic.to_string())
                .or_default()
                .entry(group.to_string())
                .or_default()
                .senders
                .push(tx);
        }

        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn each_group_gets_a_copy() {
        let bus = Arc::new(InMemoryBus::new());
        let mut a = bus.subscribe("orders", "group-a");
        let mut b = bus.subscribe("orders", "group-b");

        bus.produce("orders", b"hello".to_vec()).await.unwrap();

        assert_eq!(a.recv().await.unwrap(), b"hello");
        assert_eq!(b.recv().await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn within_a_group_messages_load_balance() {
        let bus = Arc::new(InMemoryBus::new());
        let mut first = bus.subscribe("orders", "workers");
        let mut second = bus.subscribe("orders", "workers");

        bus.produce("orders", b"one".to_vec()).await.unwrap();
        bus.produce("orders", b"two".to_vec()).await.unwrap();

        let got_first = first.recv().await.unwrap();
        let got_second = second.recv().await.unwrap();
        let mut got = vec![got_first, got_second];
        got.sort();
        assert_eq!(got, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = Arc::new(InMemoryBus::new());
        let mut payments = bus.subscribe("payments", "g");
        bus.produce("stock_changes", b"x".to_vec()).await.unwrap();
        bus.produce("payments", b"y".to_vec()).await.unwrap();

        assert_eq!(payments.recv().await.unwrap(), b"y");
    }
}
