//! TokioScheduler - tokio::time::interval ベースの Scheduler

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::ports::{Scheduler, SchedulerError, Tick, TimerHandle};

/// Drives ticks from a spawned task on a tokio runtime.
///
/// Without an explicit handle the runtime of the calling context is used;
/// registering outside of any runtime fails with [`SchedulerError::NoRuntime`].
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler {
    handle: Option<Handle>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self { handle: None }
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, period: Duration, tick: Tick) -> Result<TimerHandle, SchedulerError> {
        // interval() は period=0 で panic するので先に弾く
        if period.is_zero() {
            return Err(SchedulerError::ZeroPeriod);
        }
        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?,
        };

        let join = handle.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick();
            }
        });

        Ok(TimerHandle::new(move || join.abort()))
    }
}
