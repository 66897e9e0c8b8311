use thiserror::Error;

use crate::ports::{BusError, HandlerError, SchedulerError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("topic must not be empty")]
    EmptyTopic,

    #[error("subscriber name must not be empty")]
    EmptySubscriber,

    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Why a receive cycle ended without a successful delivery.
///
/// `EmptyPoll` は正常系（bus に何もなかった）。それ以外は log に残すだけで、
/// 次の tick まで再試行しない。
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("no messages available")]
    EmptyPoll,

    #[error("receive failed: {0}")]
    ReceiveFailure(#[source] BusError),

    #[error("handler failed for message {message_id:?}: {source}")]
    CallbackFailure {
        message_id: Option<String>,
        #[source]
        source: HandlerError,
    },

    #[error("acknowledge failed for message {message_id:?}: {source}")]
    AckFailure {
        message_id: Option<String>,
        #[source]
        source: BusError,
    },
}

impl CycleError {
    /// `false` only for the empty-poll case.
    pub fn is_failure(&self) -> bool {
        !matches!(self, CycleError::EmptyPoll)
    }
}

/// Lifecycle errors. Registration failure is the only one that stops a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("timer registration failed after {attempts} attempts: {source}")]
    RegistrationFailure {
        attempts: u32,
        #[source]
        source: SchedulerError,
    },
}
