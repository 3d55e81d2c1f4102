//! Kafka source backed by rdkafka.

mod source;

pub use source::{KafkaSource, KafkaSourceBuilder};
