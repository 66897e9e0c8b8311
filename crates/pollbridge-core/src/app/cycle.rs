//! Receive cycle - 1 tick 分の処理
//!
//! # フロー
//! 1. BusClient::receive_one() で 1 件取得（空なら EmptyPoll で終了）
//! 2. BoxedMessage を作る（body を decode、broker properties を引き継ぐ）
//! 3. MessageHandler::handle() を実行
//! 4. 成功 && peek-lock なら BusClient::delete_message() で確定
//!
//! どの失敗もここで log に落とし、Worker のライフサイクルには波及させない。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use tokio::runtime::Handle;
use tracing::{debug, error, trace};

use super::status::WorkerStats;
use crate::domain::{BoxedMessage, OverlapPolicy, WorkerConfig};
use crate::error::CycleError;
use crate::ports::{BusClient, BusError, HandlerError, MessageHandler};

/// How a cycle that did not fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The bus answered without a message (`Ok(None)`).
    NoMessage,
    /// Handler succeeded; peek-lock is off so nothing was deleted.
    Processed,
    /// Handler succeeded and the message was deleted.
    Acknowledged,
}

/// Everything one cycle needs; shared between the worker and spawned cycles.
pub(crate) struct CycleContext {
    pub(crate) config: WorkerConfig,
    bus: Arc<dyn BusClient>,
    handler: Arc<dyn MessageHandler>,
    pub(crate) stats: WorkerStats,
    in_flight: AtomicBool,
}

impl CycleContext {
    pub(crate) fn new(
        config: WorkerConfig,
        bus: Arc<dyn BusClient>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            config,
            bus,
            handler,
            stats: WorkerStats::default(),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Timer callback. Spawns a cycle without waiting for it.
    pub(crate) fn on_tick(self: &Arc<Self>) {
        self.stats.tick();

        let Ok(runtime) = Handle::try_current() else {
            error!(
                topic = self.config.topic(),
                subscriber = self.config.subscriber(),
                "tick fired outside of a tokio runtime; cycle not started"
            );
            return;
        };

        let guard = match self.config.overlap() {
            OverlapPolicy::Allow => None,
            OverlapPolicy::Skip => match InFlightGuard::acquire(self) {
                Some(guard) => Some(guard),
                None => {
                    self.stats.skipped_tick();
                    debug!(
                        topic = self.config.topic(),
                        subscriber = self.config.subscriber(),
                        "previous cycle still in flight; skipping tick"
                    );
                    return;
                }
            },
        };

        let ctx = Arc::clone(self);
        runtime.spawn(async move {
            let _guard = guard;
            // 結果は report 済み
            let _ = ctx.run_and_report().await;
        });
    }

    pub(crate) async fn run_and_report(&self) -> Result<CycleOutcome, CycleError> {
        let result = self.run().await;
        self.report(&result);
        result
    }

    async fn run(&self) -> Result<CycleOutcome, CycleError> {
        let received = self
            .bus
            .receive_one(
                self.config.topic(),
                self.config.subscriber(),
                self.config.receive_options(),
            )
            .await;

        let raw = match received {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(CycleOutcome::NoMessage),
            Err(BusError::NoMessages) => return Err(CycleError::EmptyPoll),
            Err(err) => return Err(CycleError::ReceiveFailure(err)),
        };

        let message_id = raw.message_id().map(str::to_owned);
        self.stats.delivered();
        // handler の panic も CallbackFailure として扱う（delete しない）
        let handled = AssertUnwindSafe(self.handler.handle(BoxedMessage::from_raw(&raw)))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(HandlerError::from(format!(
                    "handler panicked: {}",
                    panic_message(panic.as_ref())
                )))
            });
        handled.map_err(|source| CycleError::CallbackFailure {
            message_id: message_id.clone(),
            source,
        })?;

        if !self.config.peek_lock() {
            return Ok(CycleOutcome::Processed);
        }

        self.bus
            .delete_message(&raw)
            .await
            .map_err(|source| CycleError::AckFailure { message_id, source })?;
        Ok(CycleOutcome::Acknowledged)
    }

    fn report(&self, result: &Result<CycleOutcome, CycleError>) {
        let topic = self.config.topic();
        let subscriber = self.config.subscriber();

        match result {
            Ok(CycleOutcome::NoMessage) => {
                trace!(topic, subscriber, "receive returned no message");
            }
            Ok(CycleOutcome::Processed) => {
                debug!(topic, subscriber, "message processed");
            }
            Ok(CycleOutcome::Acknowledged) => {
                self.stats.acknowledged();
                debug!(topic, subscriber, "message processed and deleted");
            }
            Err(CycleError::EmptyPoll) => {
                self.stats.empty_poll();
                trace!(topic, subscriber, "no messages available");
            }
            Err(CycleError::ReceiveFailure(err)) => {
                self.stats.receive_failure();
                error!(topic, subscriber, error = %err, "failed to receive message");
            }
            Err(CycleError::CallbackFailure { message_id, source }) => {
                self.stats.callback_failure();
                error!(
                    topic,
                    subscriber,
                    message_id = message_id.as_deref().unwrap_or("-"),
                    error = %source,
                    "message handler failed; message left for redelivery"
                );
            }
            Err(CycleError::AckFailure { message_id, source }) => {
                self.stats.ack_failure();
                error!(
                    topic,
                    subscriber,
                    message_id = message_id.as_deref().unwrap_or("-"),
                    error = %source,
                    "failed to delete processed message; it may be redelivered"
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Marks a cycle as in flight for [`OverlapPolicy::Skip`]; cleared on drop.
struct InFlightGuard {
    ctx: Arc<CycleContext>,
}

impl InFlightGuard {
    fn acquire(ctx: &Arc<CycleContext>) -> Option<Self> {
        if ctx.in_flight.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Self {
            ctx: Arc::clone(ctx),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.ctx.in_flight.store(false, Ordering::Release);
    }
}
