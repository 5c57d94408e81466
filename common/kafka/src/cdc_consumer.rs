use std::sync::{Arc, Weak};

use rdkafka::{
    consumer::{Consumer, StreamConsumer},
    error::KafkaError,
    ClientConfig, Message,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::config::KafkaConfig;

/// Consumer for one table's change-data-capture topic.
///
/// The consumer-group identity is randomized per process start: the cache
/// built from the stream is process-local, so every instance must receive
/// the full topic instead of sharing partitions with its peers.
#[derive(Clone)]
pub struct CdcConsumer {
    inner: Arc<Inner>,
}

struct Inner {
    consumer: StreamConsumer,
    topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecvErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Received empty payload")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetErr {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("Consumer gone")]
    Gone,
}

pub(crate) fn random_group_id(group_prefix: &str) -> String {
    format!("{group_prefix}_{}", Uuid::new_v4())
}

impl CdcConsumer {
    pub fn new(
        common_config: &KafkaConfig,
        group_prefix: &str,
        topic: &str,
    ) -> Result<Self, KafkaError> {
        let mut client_config = ClientConfig::from(common_config);
        client_config
            .set("group.id", random_group_id(group_prefix))
            .set("auto.offset.reset", &common_config.kafka_consumer_offset_reset)
            .set("enable.auto.commit", "true")
            .set(
                "auto.commit.interval.ms",
                common_config
                    .kafka_consumer_auto_commit_interval_ms
                    .to_string(),
            )
            .set("enable.auto.offset.store", "false");

        let consumer: StreamConsumer = client_config.create()?;
        consumer.subscribe(&[topic])?;

        let inner = Inner {
            consumer,
            topic: topic.to_string(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub async fn json_recv<T>(&self) -> Result<(T, Offset), RecvErr>
    where
        T: DeserializeOwned,
    {
        let message = self.inner.consumer.recv().await?;

        let offset = Offset {
            handle: Arc::downgrade(&self.inner),
            partition: message.partition(),
            offset: message.offset(),
        };

        let Some(payload) = message.payload() else {
            // We auto-store poison pills, panicking on failure
            offset.store().unwrap();
            return Err(RecvErr::Empty);
        };

        let payload = match serde_json::from_slice(payload) {
            Ok(p) => p,
            Err(e) => {
                // We auto-store poison pills, panicking on failure
                offset.store().unwrap();
                return Err(RecvErr::Serde(e));
            }
        };

        Ok((payload, offset))
    }
}

pub struct Offset {
    handle: Weak<Inner>,
    partition: i32,
    offset: i64,
}

impl Offset {
    pub fn store(self) -> Result<(), OffsetErr> {
        let inner = self.handle.upgrade().ok_or(OffsetErr::Gone)?;
        inner
            .consumer
            .store_offset(&inner.topic, self.partition, self.offset)?;
        Ok(())
    }
}
