//! Domain model (messages, config, payload decode).

pub mod codec;
pub mod config;
pub mod message;

pub use codec::decode;
pub use config::{OverlapPolicy, WorkerConfig, WorkerOptions, get_options};
pub use message::{BoxedMessage, BrokerProperties, Payload, RawMessage};
