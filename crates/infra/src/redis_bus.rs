//! Redis Streams-backed message bus.
//!
//! One stream per topic; XADD to produce, XREADGROUP to consume with
//! consumer-group load balancing, XACK after handing the payload to the
//! subscription channel. Delivery is durable and at-least-once: a
//! consumer that dies before acking leaves the entry pending, and the
//! replacement consumer picks its own history up first (`0`) before
//! switching to new entries (`>`).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use mercato_messaging::bus::{MessageBus, Subscription};

const READ_COUNT: usize = 10;
const BLOCK_MS: u64 = 1000;
const SUBSCRIPTION_BUFFER: usize = 256;
const PAYLOAD_FIELD: &str = "payload";

#[derive(Debug, thiserror::Error)]
pub enum RedisBusError {
    #[error("redis connection error: {0}")]
    Connection(String),

    #[error("redis command error: {0}")]
    Command(String),
}

#[derive(Debug, Clone)]
pub struct RedisStreamsBus {
    client: Arc<redis::Client>,
}

impl RedisStreamsBus {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisBusError::Connection(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Verify the server is reachable; startup fails otherwise.
    pub fn ping(&self) -> Result<(), RedisBusError> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Connection(e.to_string()))?;
        redis::cmd("PING")
            .query::<String>(&mut conn)
            .map_err(|e| RedisBusError::Command(e.to_string()))?;
        Ok(())
    }

    /// Idempotently create the consumer group (MKSTREAM creates the
    /// stream too; BUSYGROUP from an earlier run is ignored).
    fn ensure_consumer_group(
        conn: &mut redis::Connection,
        topic: &str,
        group: &str,
    ) -> Result<(), RedisBusError> {
        let created: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query(conn);

        match created {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("BUSYGROUP") => Ok(()),
            Err(err) => Err(RedisBusError::Command(format!("XGROUP CREATE: {err}"))),
        }
    }

    fn read_group(
        conn: &mut redis::Connection,
        topic: &str,
        group: &str,
        consumer: &str,
        cursor: &str,
    ) -> Result<Vec<(String, Vec<u8>)>, RedisBusError> {
        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(READ_COUNT)
            .arg("BLOCK")
            .arg(BLOCK_MS)
            .arg("STREAMS")
            .arg(topic)
            .arg(cursor)
            .query(conn)
            .map_err(|e| RedisBusError::Command(format!("XREADGROUP: {e}")))?;

        Ok(parse_stream_reply(reply))
    }

    fn acknowledge(
        conn: &mut redis::Connection,
        topic: &str,
        group: &str,
        ids: &[String],
    ) -> Result<(), RedisBusError> {
        if ids.is_empty() {
            return Ok(());
        }
        redis::cmd("XACK")
            .arg(topic)
            .arg(group)
            .arg(ids)
            .query::<u64>(conn)
            .map_err(|e| RedisBusError::Command(format!("XACK: {e}")))?;
        Ok(())
    }
}

/// Reply shape: [[stream, [[id, [field, value, ...]], ...]]]. A nil reply
/// (blocking timeout) parses to an empty batch.
fn parse_stream_reply(reply: redis::Value) -> Vec<(String, Vec<u8>)> {
    let mut messages = Vec::new();

    let redis::Value::Bulk(streams) = reply else {
        return messages;
    };
    for stream in streams {
        let redis::Value::Bulk(stream_parts) = stream else {
            continue;
        };
        let Some(redis::Value::Bulk(entries)) = stream_parts.get(1) else {
            continue;
        };
        for entry in entries {
            let redis::Value::Bulk(entry_parts) = entry else {
                continue;
            };
            let Some(redis::Value::Data(id)) = entry_parts.first() else {
                continue;
            };
            let Some(redis::Value::Bulk(fields)) = entry_parts.get(1) else {
                continue;
            };

            let mut payload = None;
            for pair in fields.chunks(2) {
                if let [redis::Value::Data(key), redis::Value::Data(value)] = pair {
                    if key.as_slice() == PAYLOAD_FIELD.as_bytes() {
                        payload = Some(value.clone());
                    }
                }
            }

            if let Some(payload) = payload {
                messages.push((String::from_utf8_lossy(id).to_string(), payload));
            }
        }
    }

    messages
}

#[async_trait]
impl MessageBus for RedisStreamsBus {
    type Error = RedisBusError;

    async fn produce(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        let client = self.client.clone();
        let topic = topic.to_string();

        tokio::task::spawn_blocking(move || {
            let mut conn = client
                .get_connection()
                .map_err(|e| RedisBusError::Connection(e.to_string()))?;
            redis::cmd("XADD")
                .arg(&topic)
                .arg("*")
                .arg(PAYLOAD_FIELD)
                .arg(payload)
                .query::<String>(&mut conn)
                .map_err(|e| RedisBusError::Command(format!("XADD: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| RedisBusError::Command(format!("produce task: {e}")))?
    }

    fn subscribe(&self, topic: &str, group: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let client = self.client.clone();
        let topic = topic.to_string();
        let group = group.to_string();
        let consumer = format!("consumer-{}", Uuid::now_v7());

        // Dedicated polling thread; it dies with the subscription.
        std::thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(conn) => conn,
                Err(err) => {
                    error!(%topic, %group, %err, "failed to connect subscription");
                    return;
                }
            };
            if let Err(err) = RedisStreamsBus::ensure_consumer_group(&mut conn, &topic, &group) {
                error!(%topic, %group, %err, "failed to create consumer group");
                return;
            }
            info!(%topic, %group, %consumer, "consumer group subscription up");

            // Own pending history first, then new entries.
            let mut cursor = "0".to_string();
            loop {
                let batch =
                    match RedisStreamsBus::read_group(&mut conn, &topic, &group, &consumer, &cursor)
                    {
                        Ok(batch) => batch,
                        Err(err) => {
                            warn!(%topic, %group, %err, "stream read failed");
                            std::thread::sleep(std::time::Duration::from_millis(BLOCK_MS));
                            continue;
                        }
                    };

                if cursor == "0" && batch.is_empty() {
                    cursor = ">".to_string();
                    continue;
                }

                let mut delivered = Vec::with_capacity(batch.len());
                for (id, payload) in batch {
                    if tx.blocking_send(payload).is_err() {
                        // Receiver gone; leave the rest pending for the
                        // next consumer.
                        return;
                    }
                    delivered.push(id);
                }

                if let Err(err) =
                    RedisStreamsBus::acknowledge(&mut conn, &topic, &group, &delivered)
                {
                    warn!(%topic, %group, %err, "failed to acknowledge messages");
                }
            }
        });

        Subscription::new(rx)
    }
}
