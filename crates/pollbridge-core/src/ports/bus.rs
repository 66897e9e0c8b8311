//! BusClient port - メッセージバスへの最小インターフェース

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::RawMessage;

pub use crate::domain::config::ReceiveOptions;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Nothing to receive right now. Not a failure.
    #[error("no messages available")]
    NoMessages,

    #[error("subscription {subscriber:?} does not exist on topic {topic:?}")]
    UnknownSubscription { topic: String, subscriber: String },

    /// The lock behind a delete was missing, unknown or already expired.
    #[error("message lock lost: {0}")]
    LockLost(String),

    #[error("{0}")]
    Transport(String),
}

/// A topic/subscription bus with peek-lock semantics.
///
/// - `receive_one` は 1 件だけ取る。空なら `Err(BusError::NoMessages)`
///   （`Ok(None)` を返す実装もあり得るので、どちらも「何もない」として扱う）
/// - `delete_message` は peek-lock で受け取ったメッセージを確定させる
#[async_trait]
pub trait BusClient: Send + Sync {
    async fn receive_one(
        &self,
        topic: &str,
        subscriber: &str,
        options: ReceiveOptions,
    ) -> Result<Option<RawMessage>, BusError>;

    async fn delete_message(&self, message: &RawMessage) -> Result<(), BusError>;
}
