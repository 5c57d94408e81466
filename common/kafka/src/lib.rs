pub mod cdc_consumer;
pub mod config;

pub use cdc_consumer::{CdcConsumer, Offset, OffsetErr, RecvErr};
pub use config::KafkaConfig;
