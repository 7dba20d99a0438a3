//! Processor runtime: consumer and producer task pairs.
//!
//! Each processor owns a bounded outbound queue (capacity 256). Handlers
//! push completed messages into it; a drain task serializes and publishes
//! them, logging publish failures. On shutdown the consumer loop exits
//! first, then the producer drains whatever is queued and closes.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use async_trait::async_trait;
use mercato_core::Shutdown;

use crate::bus::MessageBus;

/// Outbound queue capacity per processor.
pub const QUEUE_CAPACITY: usize = 256;

/// Handler side of a processor. Must be idempotent: the bus may redeliver.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Incoming: DeserializeOwned + Send + 'static;

    async fn handle(&self, msg: Self::Incoming);
}

/// Clonable sender half of a processor's outbound queue.
#[derive(Debug)]
pub struct Outbound<M> {
    tx: mpsc::Sender<M>,
}

impl<M> Clone for Outbound<M> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<M: Send + 'static> Outbound<M> {
    /// Enqueue a message, waiting if the queue is full. A closed queue
    /// means the producer task is gone (shutdown); the message is dropped
    /// and will be re-derived from redelivery after restart.
    pub async fn push(&self, msg: M) {
        if self.tx.send(msg).await.is_err() {
            warn!("outbound queue closed; dropping message");
        }
    }
}

pub fn outbound_queue<M>(capacity: usize) -> (Outbound<M>, mpsc::Receiver<M>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Outbound { tx }, rx)
}

/// Spawn the consumer half: subscribe, decode, dispatch.
///
/// Malformed payloads are logged and dropped (the message is acked either
/// way; only valid-but-unprocessable work is retried via status routing).
pub fn spawn_consumer<B, H>(
    name: &'static str,
    bus: B,
    topic: &'static str,
    group: &'static str,
    handler: H,
    shutdown: Shutdown,
) -> JoinHandle<()>
where
    B: MessageBus,
    H: MessageHandler,
{
    let mut sub = bus.subscribe(topic, group);
    tokio::spawn(async move {
        info!(processor = name, topic, group, "consumer started");
        loop {
            tokio::select! {
                received = sub.recv() => match received {
                    Some(payload) => {
                        let msg: H::Incoming = match serde_json::from_slice(&payload) {
                            Ok(msg) => msg,
                            Err(err) => {
                                warn!(processor = name, topic, %err, "dropping malformed message");
                                continue;
                            }
                        };
                        handler.handle(msg).await;
                    }
                    None => {
                        info!(processor = name, topic, "message channel was closed");
                        break;
                    }
                },
                _ = shutdown.triggered() => {
                    info!(processor = name, topic, "terminating: shutdown signal");
                    break;
                }
            }
        }
    })
}

/// Spawn the producer half: drain the outbound queue onto `topic`.
pub fn spawn_producer<B, M>(
    name: &'static str,
    bus: B,
    topic: &'static str,
    mut rx: mpsc::Receiver<M>,
    shutdown: Shutdown,
) -> JoinHandle<()>
where
    B: MessageBus,
    M: Serialize + Send + Sync + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                queued = rx.recv() => match queued {
                    Some(msg) => publish(name, &bus, topic, &msg).await,
                    None => break,
                },
                _ = shutdown.triggered() => {
                    // Drain once, then close the producer.
                    while let Ok(msg) = rx.try_recv() {
                        publish(name, &bus, topic, &msg).await;
                    }
                    info!(processor = name, topic, "producer closed");
                    break;
                }
            }
        }
    })
}

async fn publish<B: MessageBus, M: Serialize>(name: &str, bus: &B, topic: &str, msg: &M) {
    let bytes = match serde_json::to_vec(msg) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(processor = name, topic, %err, "failed to marshal message");
            return;
        }
    };

    if let Ok(text) = std::str::from_utf8(&bytes) {
        info!(processor = name, topic, message = text, "producing message");
    }

    if let Err(err) = bus.produce(topic, bytes).await {
        error!(processor = name, topic, %err, "failed to produce message");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use mercato_core::shutdown_channel;

    use super::*;
    use crate::memory::InMemoryBus;

    #[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq, Clone)]
    struct Ping {
        n: u32,
    }

    struct Recorder {
        seen: Mutex<Vec<Ping>>,
    }

    #[async_trait]
    impl MessageHandler for Arc<Recorder> {
        type Incoming = Ping;

        async fn handle(&self, msg: Ping) {
            self.seen.lock().unwrap().push(msg);
        }
    }

    #[tokio::test]
    async fn consumer_dispatches_and_skips_malformed() {
        let bus = Arc::new(InMemoryBus::new());
        let recorder = Arc::new(Recorder { seen: Mutex::new(Vec::new()) });
        let (_handle, shutdown) = shutdown_channel();

        let task = spawn_consumer(
            "test",
            bus.clone(),
            "pings",
            "g",
            recorder.clone(),
            shutdown,
        );

        bus.produce("pings", b"not json".to_vec()).await.unwrap();
        bus.produce("pings", serde_json::to_vec(&Ping { n: 1 }).unwrap())
            .await
            .unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            loop {
                if !recorder.seen.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(recorder.seen.lock().unwrap().as_slice(), &[Ping { n: 1 }]);
        task.abort();
    }

    #[tokio::test]
    async fn producer_drains_queue_on_shutdown() {
        let bus = Arc::new(InMemoryBus::new());
        let mut status = bus.subscribe("out", "watcher");
        let (handle, shutdown) = shutdown_channel();

        let (out, rx) = outbound_queue::<Ping>(QUEUE_CAPACITY);
        let task = spawn_producer("test", bus.clone(), "out", rx, shutdown);

        out.push(Ping { n: 7 }).await;
        handle.trigger();
        task.await.unwrap();

        let payload = status.recv().await.unwrap();
        let got: Ping = serde_json::from_slice(&payload).unwrap();
        assert_eq!(got, Ping { n: 7 });
    }
}
