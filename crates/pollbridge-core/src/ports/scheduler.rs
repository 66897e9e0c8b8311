//! Scheduler port - 定期 tick の登録
//!
//! 登録そのものが失敗し得る（runtime がない等）ので `Result` を返す。
//! Worker はこの失敗に対してだけ bounded restart を行う。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Callback fired on every tick. Must not block.
pub type Tick = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("no async runtime available to drive the timer")]
    NoRuntime,

    #[error("timer period must be greater than zero")]
    ZeroPeriod,

    #[error("{0}")]
    Other(String),
}

/// Registers recurring ticks.
pub trait Scheduler: Send + Sync {
    /// The first tick fires one `period` after registration.
    fn schedule(&self, period: Duration, tick: Tick) -> Result<TimerHandle, SchedulerError>;
}

/// A registered timer. Cancelled on [`TimerHandle::cancel`] or drop.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        self.fire();
    }

    fn fire(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.fire();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
