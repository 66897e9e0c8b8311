//! Worker - 1 つの (topic, subscriber) ペアを担当する polling worker
//!
//! # 状態遷移
//! `Idle` → start() → `Running` → stop() → `Stopped` → start() → `Running` ...
//!
//! - tick は fire-and-forget。前の cycle の完了を待たずに次の cycle が始まる
//!   （`OverlapPolicy::Skip` で前の cycle が終わるまで tick を捨てられる）
//! - stop() は以降の tick を止めるだけで、実行中の cycle はキャンセルしない
//! - cycle 内の失敗は log のみ。timer 登録の失敗だけが bounded restart の対象

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::cycle::{CycleContext, CycleOutcome};
use super::status::WorkerStatsView;
use crate::domain::WorkerConfig;
use crate::error::{CycleError, WorkerError};
use crate::impls::TokioScheduler;
use crate::ports::{BusClient, MessageHandler, Scheduler, Tick, TimerHandle};

/// Registration attempts before a worker gives up for good.
///
/// The budget covers the whole life of a [`Worker`], not each `start()` call:
/// failures from earlier starts count against it too.
pub const MAX_RESTART_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Running,
    Stopped,
}

/// Invariant: `timer.is_some()` iff `state == Running`.
struct Lifecycle {
    state: WorkerState,
    timer: Option<TimerHandle>,
    restart_attempts: u32,
}

/// Polls one subscription and feeds messages to a handler.
///
/// The bus client is injected per worker; workers share no mutable state.
pub struct Worker {
    ctx: Arc<CycleContext>,
    scheduler: Arc<dyn Scheduler>,
    lifecycle: Mutex<Lifecycle>,
}

impl Worker {
    /// Worker driven by [`TokioScheduler`] on the caller's runtime.
    pub fn new(
        config: WorkerConfig,
        bus: Arc<dyn BusClient>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self::with_scheduler(config, bus, handler, Arc::new(TokioScheduler::new()))
    }

    pub fn with_scheduler(
        config: WorkerConfig,
        bus: Arc<dyn BusClient>,
        handler: Arc<dyn MessageHandler>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            ctx: Arc::new(CycleContext::new(config, bus, handler)),
            scheduler,
            lifecycle: Mutex::new(Lifecycle {
                state: WorkerState::Idle,
                timer: None,
                restart_attempts: 0,
            }),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.ctx.config
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle().state
    }

    pub fn restart_attempts(&self) -> u32 {
        self.lifecycle().restart_attempts
    }

    pub fn stats(&self) -> WorkerStatsView {
        self.ctx.stats.snapshot()
    }

    /// Register the poll timer.
    ///
    /// Registration failures are retried on the same instance until
    /// [`MAX_RESTART_ATTEMPTS`] is reached; the attempt counter is kept for
    /// the lifetime of the worker. After that the worker stays `Stopped` and
    /// the last error is returned. Calling `start` while running is a no-op.
    pub fn start(&self) -> Result<(), WorkerError> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.timer.is_some() {
            debug!(
                topic = self.config().topic(),
                subscriber = self.config().subscriber(),
                "worker already running"
            );
            return Ok(());
        }

        loop {
            let ctx = Arc::clone(&self.ctx);
            let tick: Tick = Arc::new(move || ctx.on_tick());

            match self.scheduler.schedule(self.config().poll_interval(), tick) {
                Ok(timer) => {
                    lifecycle.timer = Some(timer);
                    lifecycle.state = WorkerState::Running;
                    info!(
                        topic = self.config().topic(),
                        subscriber = self.config().subscriber(),
                        poll_interval_ms = self.config().poll_interval().as_millis() as u64,
                        "worker started"
                    );
                    return Ok(());
                }
                Err(err) => {
                    lifecycle.restart_attempts += 1;
                    let attempts = lifecycle.restart_attempts;
                    if attempts < MAX_RESTART_ATTEMPTS {
                        warn!(
                            topic = self.config().topic(),
                            subscriber = self.config().subscriber(),
                            attempt = attempts,
                            error = %err,
                            "failed to register poll timer; restarting worker"
                        );
                        continue;
                    }

                    lifecycle.state = WorkerState::Stopped;
                    error!(
                        topic = self.config().topic(),
                        subscriber = self.config().subscriber(),
                        attempts,
                        error = %err,
                        "failed to register poll timer; giving up, worker stays stopped"
                    );
                    return Err(WorkerError::RegistrationFailure {
                        attempts,
                        source: err,
                    });
                }
            }
        }
    }

    /// Cancel the timer. In-flight cycles keep running. No-op unless running.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle();
        let Some(timer) = lifecycle.timer.take() else {
            return;
        };
        timer.cancel();
        lifecycle.state = WorkerState::Stopped;
        info!(
            topic = self.config().topic(),
            subscriber = self.config().subscriber(),
            "worker stopped"
        );
    }

    /// Run one receive cycle now, outside the timer, and wait for it.
    pub async fn receive(&self) -> Result<CycleOutcome, CycleError> {
        self.ctx.run_and_report().await
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        // lock 中に panic しても状態自体は壊れないので poison は無視する
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.lifecycle();
        f.debug_struct("Worker")
            .field("config", self.config())
            .field("state", &lifecycle.state)
            .field("restart_attempts", &lifecycle.restart_attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        BoxedMessage, BrokerProperties, OverlapPolicy, Payload, RawMessage, WorkerOptions,
    };
    use crate::ports::{BusError, HandlerError, ReceiveOptions, SchedulerError};
    use async_trait::async_trait;
    use rstest::rstest;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    // ---- test doubles ----

    /// Bus that replays scripted receive results, then reports `NoMessages`.
    #[derive(Default)]
    struct ScriptedBus {
        script: Mutex<VecDeque<Result<Option<RawMessage>, BusError>>>,
        deletes: Mutex<Vec<RawMessage>>,
        delete_error: Mutex<Option<BusError>>,
        receives: AtomicUsize,
    }

    impl ScriptedBus {
        fn with(results: Vec<Result<Option<RawMessage>, BusError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(results.into()),
                ..Default::default()
            })
        }

        fn failing_deletes(self: Arc<Self>, err: BusError) -> Arc<Self> {
            *self.delete_error.lock().unwrap() = Some(err);
            self
        }

        fn deletes(&self) -> Vec<RawMessage> {
            self.deletes.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BusClient for ScriptedBus {
        async fn receive_one(
            &self,
            _topic: &str,
            _subscriber: &str,
            _options: ReceiveOptions,
        ) -> Result<Option<RawMessage>, BusError> {
            self.receives.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(BusError::NoMessages))
        }

        async fn delete_message(&self, message: &RawMessage) -> Result<(), BusError> {
            self.deletes.lock().unwrap().push(message.clone());
            match self.delete_error.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<BoxedMessage>>,
        fail: bool,
    }

    impl RecordingHandler {
        fn ok() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                ..Default::default()
            })
        }

        fn seen(&self) -> Vec<BoxedMessage> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, message: BoxedMessage) -> Result<(), HandlerError> {
            self.seen.lock().unwrap().push(message);
            if self.fail {
                return Err("handler rejected".into());
            }
            Ok(())
        }
    }

    /// Handler that blocks until released.
    #[derive(Default)]
    struct GatedHandler {
        entered: AtomicUsize,
        release: Notify,
    }

    #[async_trait]
    impl MessageHandler for GatedHandler {
        async fn handle(&self, _message: BoxedMessage) -> Result<(), HandlerError> {
            let released = self.release.notified();
            self.entered.fetch_add(1, Ordering::SeqCst);
            released.await;
            Ok(())
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl MessageHandler for PanickingHandler {
        async fn handle(&self, _message: BoxedMessage) -> Result<(), HandlerError> {
            panic!("handler blew up");
        }
    }

    /// Scheduler failing the first `failures` registrations; keeps the tick.
    #[derive(Default)]
    struct ManualScheduler {
        failures: AtomicU32,
        calls: AtomicU32,
        tick: Mutex<Option<Tick>>,
        cancelled: Arc<AtomicBool>,
    }

    impl ManualScheduler {
        fn failing(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(failures),
                ..Default::default()
            })
        }

        fn fire(&self) {
            let tick = self.tick.lock().unwrap().clone().expect("timer registered");
            tick();
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Scheduler for ManualScheduler {
        fn schedule(&self, _period: Duration, tick: Tick) -> Result<TimerHandle, SchedulerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(SchedulerError::Other("timer table full".to_string()));
            }
            *self.tick.lock().unwrap() = Some(tick);
            self.cancelled.store(false, Ordering::SeqCst);
            let cancelled = self.cancelled.clone();
            Ok(TimerHandle::new(move || cancelled.store(true, Ordering::SeqCst)))
        }
    }

    /// Counts events of one level on the current thread.
    struct LevelCounter {
        level: tracing::Level,
        count: Arc<AtomicUsize>,
    }

    impl<S: tracing::Subscriber> Layer<S> for LevelCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == self.level {
                self.count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn count_errors() -> (Arc<AtomicUsize>, tracing::subscriber::DefaultGuard) {
        let (errors, _warnings, guard) = count_errors_and_warnings();
        (errors, guard)
    }

    fn count_errors_and_warnings() -> (
        Arc<AtomicUsize>,
        Arc<AtomicUsize>,
        tracing::subscriber::DefaultGuard,
    ) {
        let errors = Arc::new(AtomicUsize::new(0));
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry()
            .with(LevelCounter {
                level: tracing::Level::ERROR,
                count: errors.clone(),
            })
            .with(LevelCounter {
                level: tracing::Level::WARN,
                count: warnings.clone(),
            });
        let guard = tracing::subscriber::set_default(subscriber);
        (errors, warnings, guard)
    }

    // ---- helpers ----

    fn config(peek_lock: bool) -> WorkerConfig {
        let options = WorkerOptions {
            non_repeatable: Some(peek_lock),
            ..Default::default()
        };
        WorkerConfig::resolve_with("orders", "billing", &options, |_| None)
            .unwrap()
            .with_poll_interval(Duration::from_millis(100))
            .unwrap()
    }

    fn message(body: &str, id: &str) -> RawMessage {
        let mut props = BrokerProperties::new();
        props.insert("id".to_string(), json!(id));
        RawMessage::new(body, props)
    }

    fn worker(
        config: WorkerConfig,
        bus: Arc<ScriptedBus>,
        handler: Arc<dyn MessageHandler>,
        scheduler: Arc<ManualScheduler>,
    ) -> Worker {
        Worker::with_scheduler(config, bus, handler, scheduler)
    }

    async fn eventually(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    // ---- receive cycle ----

    #[tokio::test]
    async fn successful_handler_deletes_original_message_once() {
        let raw = message(r#"{"a":1}"#, "m1");
        let bus = ScriptedBus::with(vec![Ok(Some(raw.clone()))]);
        let handler = RecordingHandler::ok();
        let w = worker(config(true), bus.clone(), handler.clone(), ManualScheduler::failing(0));

        let outcome = w.receive().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Acknowledged);
        assert_eq!(bus.deletes(), vec![raw]);
        assert_eq!(bus.deletes()[0].broker_properties()["id"], json!("m1"));

        let seen = handler.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].payload(), &Payload::Structured(json!({ "a": 1 })));
        assert_eq!(w.stats().acknowledged, 1);
    }

    #[tokio::test]
    async fn plain_text_body_reaches_handler_unchanged() {
        let bus = ScriptedBus::with(vec![Ok(Some(message("plain-text", "m2")))]);
        let handler = RecordingHandler::ok();
        let w = worker(config(true), bus, handler.clone(), ManualScheduler::failing(0));

        w.receive().await.unwrap();
        assert_eq!(handler.seen()[0].payload().as_raw(), Some("plain-text"));
    }

    #[tokio::test]
    async fn rejected_handler_never_deletes() {
        let bus = ScriptedBus::with(vec![Ok(Some(message("{}", "m1")))]);
        let handler = RecordingHandler::failing();
        let w = worker(config(true), bus.clone(), handler.clone(), ManualScheduler::failing(0));

        let (errors, _guard) = count_errors();
        let err = w.receive().await.unwrap_err();

        assert!(matches!(
            err,
            CycleError::CallbackFailure { message_id: None, .. }
        ));
        assert!(bus.deletes().is_empty());
        assert_eq!(handler.seen().len(), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(w.stats().callback_failures, 1);
    }

    #[rstest]
    #[case::handler_ok(false)]
    #[case::handler_fails(true)]
    #[tokio::test]
    async fn peek_lock_disabled_never_deletes(#[case] fail: bool) {
        let bus = ScriptedBus::with(vec![Ok(Some(message("{}", "m1")))]);
        let handler = Arc::new(RecordingHandler {
            fail,
            ..Default::default()
        });
        let w = worker(config(false), bus.clone(), handler, ManualScheduler::failing(0));

        let result = w.receive().await;

        assert!(bus.deletes().is_empty());
        assert_eq!(result.is_ok(), !fail);
        if !fail {
            assert_eq!(result.unwrap(), CycleOutcome::Processed);
        }
    }

    #[tokio::test]
    async fn empty_poll_is_silent() {
        let bus = ScriptedBus::with(vec![Err(BusError::NoMessages)]);
        let handler = RecordingHandler::ok();
        let w = worker(config(true), bus.clone(), handler.clone(), ManualScheduler::failing(0));

        let (errors, _guard) = count_errors();
        let err = w.receive().await.unwrap_err();

        assert!(matches!(err, CycleError::EmptyPoll));
        assert!(!err.is_failure());
        assert!(handler.seen().is_empty());
        assert_eq!(errors.load(Ordering::SeqCst), 0);
        assert_eq!(w.stats().empty_polls, 1);
    }

    #[tokio::test]
    async fn receive_failure_is_logged_and_skips_handler() {
        let bus = ScriptedBus::with(vec![Err(BusError::Transport("connection reset".into()))]);
        let handler = RecordingHandler::ok();
        let w = worker(config(true), bus, handler.clone(), ManualScheduler::failing(0));

        let (errors, _guard) = count_errors();
        let err = w.receive().await.unwrap_err();

        assert!(matches!(err, CycleError::ReceiveFailure(BusError::Transport(_))));
        assert!(handler.seen().is_empty());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(w.stats().receive_failures, 1);
    }

    #[tokio::test]
    async fn missing_message_is_a_no_op() {
        let bus = ScriptedBus::with(vec![Ok(None)]);
        let handler = RecordingHandler::ok();
        let w = worker(config(true), bus.clone(), handler.clone(), ManualScheduler::failing(0));

        assert_eq!(w.receive().await.unwrap(), CycleOutcome::NoMessage);
        assert!(handler.seen().is_empty());
        assert!(bus.deletes().is_empty());
    }

    #[tokio::test]
    async fn delete_failure_is_logged_without_undoing_processing() {
        let bus = ScriptedBus::with(vec![Ok(Some(message("{}", "m1")))])
            .failing_deletes(BusError::LockLost("m1".into()));
        let handler = RecordingHandler::ok();
        let w = worker(config(true), bus.clone(), handler.clone(), ManualScheduler::failing(0));

        let (errors, _guard) = count_errors();
        let err = w.receive().await.unwrap_err();

        assert!(matches!(err, CycleError::AckFailure { source: BusError::LockLost(_), .. }));
        assert_eq!(handler.seen().len(), 1);
        assert_eq!(bus.deletes().len(), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(w.stats().ack_failures, 1);
    }

    #[tokio::test]
    async fn panicking_handler_is_reported_as_callback_failure() {
        let bus = ScriptedBus::with(vec![Ok(Some(message("{}", "m1")))]);
        let w = worker(
            config(true),
            bus.clone(),
            Arc::new(PanickingHandler),
            ManualScheduler::failing(0),
        );

        let (errors, _guard) = count_errors();
        let err = w.receive().await.unwrap_err();

        match err {
            CycleError::CallbackFailure { source, .. } => {
                assert!(source.to_string().contains("handler blew up"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(bus.deletes().is_empty());
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(w.stats().callback_failures, 1);
    }

    #[tokio::test]
    async fn panic_on_tick_is_logged_and_worker_keeps_polling() {
        let scheduler = ManualScheduler::failing(0);
        let bus = ScriptedBus::with(vec![
            Ok(Some(message("{}", "m1"))),
            Ok(Some(message("{}", "m2"))),
        ]);
        let w = worker(
            config(true).with_overlap(OverlapPolicy::Skip),
            bus.clone(),
            Arc::new(PanickingHandler),
            scheduler.clone(),
        );
        w.start().unwrap();

        let (errors, _guard) = count_errors();
        scheduler.fire();
        eventually(|| w.stats().callback_failures == 1).await;
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        // in-flight guard は panic 後も解放される
        scheduler.fire();
        eventually(|| w.stats().callback_failures == 2).await;

        assert!(bus.deletes().is_empty());
        assert_eq!(w.stats().skipped_ticks, 0);
        assert_eq!(errors.load(Ordering::SeqCst), 2);
        assert_eq!(w.state(), WorkerState::Running);
    }

    // ---- lifecycle ----

    #[test]
    fn new_worker_is_idle() {
        let w = worker(
            config(true),
            ScriptedBus::with(vec![]),
            RecordingHandler::ok(),
            ManualScheduler::failing(0),
        );
        assert_eq!(w.state(), WorkerState::Idle);
        assert_eq!(w.restart_attempts(), 0);
    }

    #[test]
    fn registration_gives_up_after_max_attempts() {
        let scheduler = ManualScheduler::failing(u32::MAX);
        let w = worker(
            config(true),
            ScriptedBus::with(vec![]),
            RecordingHandler::ok(),
            scheduler.clone(),
        );

        let (errors, warnings, _guard) = count_errors_and_warnings();
        let err = w.start().unwrap_err();

        assert!(matches!(
            err,
            WorkerError::RegistrationFailure { attempts: MAX_RESTART_ATTEMPTS, .. }
        ));
        assert_eq!(scheduler.calls(), MAX_RESTART_ATTEMPTS);
        assert_eq!(w.restart_attempts(), MAX_RESTART_ATTEMPTS);
        assert_eq!(w.state(), WorkerState::Stopped);
        // 途中の失敗は warn、諦めた時だけ error を 1 回
        assert_eq!(warnings.load(Ordering::SeqCst), (MAX_RESTART_ATTEMPTS - 1) as usize);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registration_recovers_within_the_cap() {
        let scheduler = ManualScheduler::failing(MAX_RESTART_ATTEMPTS - 1);
        let w = worker(
            config(true),
            ScriptedBus::with(vec![]),
            RecordingHandler::ok(),
            scheduler.clone(),
        );

        let (errors, _guard) = count_errors();
        w.start().unwrap();

        assert_eq!(scheduler.calls(), MAX_RESTART_ATTEMPTS);
        assert_eq!(w.restart_attempts(), MAX_RESTART_ATTEMPTS - 1);
        assert_eq!(w.state(), WorkerState::Running);
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_is_idempotent_and_worker_restarts() {
        let scheduler = ManualScheduler::failing(0);
        let w = worker(
            config(true),
            ScriptedBus::with(vec![]),
            RecordingHandler::ok(),
            scheduler.clone(),
        );

        w.stop();
        assert_eq!(w.state(), WorkerState::Idle);

        w.start().unwrap();
        w.start().unwrap();
        assert_eq!(scheduler.calls(), 1);

        w.stop();
        assert_eq!(w.state(), WorkerState::Stopped);
        assert!(scheduler.cancelled.load(Ordering::SeqCst));
        w.stop();
        assert_eq!(w.state(), WorkerState::Stopped);

        w.start().unwrap();
        assert_eq!(w.state(), WorkerState::Running);
        assert_eq!(scheduler.calls(), 2);
    }

    #[tokio::test]
    async fn tick_spawns_a_cycle() {
        let scheduler = ManualScheduler::failing(0);
        let bus = ScriptedBus::with(vec![Ok(Some(message("{}", "m1")))]);
        let handler = RecordingHandler::ok();
        let w = worker(config(true), bus.clone(), handler.clone(), scheduler.clone());
        w.start().unwrap();

        scheduler.fire();
        eventually(|| bus.deletes().len() == 1).await;

        assert_eq!(handler.seen().len(), 1);
        assert_eq!(w.stats().ticks, 1);
    }

    #[tokio::test]
    async fn overlapping_cycles_run_concurrently_by_default() {
        let scheduler = ManualScheduler::failing(0);
        let bus = ScriptedBus::with(vec![
            Ok(Some(message("1", "m1"))),
            Ok(Some(message("2", "m2"))),
        ]);
        let handler = Arc::new(GatedHandler::default());
        let w = worker(config(true), bus.clone(), handler.clone(), scheduler.clone());
        w.start().unwrap();

        scheduler.fire();
        scheduler.fire();
        eventually(|| handler.entered.load(Ordering::SeqCst) == 2).await;

        handler.release.notify_waiters();
        eventually(|| bus.deletes().len() == 2).await;
        assert_eq!(w.stats().skipped_ticks, 0);
    }

    #[tokio::test]
    async fn skip_policy_drops_ticks_while_a_cycle_is_in_flight() {
        let scheduler = ManualScheduler::failing(0);
        let bus = ScriptedBus::with(vec![
            Ok(Some(message("1", "m1"))),
            Ok(Some(message("2", "m2"))),
        ]);
        let handler = Arc::new(GatedHandler::default());
        let w = worker(
            config(true).with_overlap(OverlapPolicy::Skip),
            bus.clone(),
            handler.clone(),
            scheduler.clone(),
        );
        w.start().unwrap();

        scheduler.fire();
        scheduler.fire();
        eventually(|| handler.entered.load(Ordering::SeqCst) == 1).await;
        assert_eq!(w.stats().skipped_ticks, 1);
        assert_eq!(bus.receives.load(Ordering::SeqCst), 1);

        handler.release.notify_waiters();
        eventually(|| bus.deletes().len() == 1).await;

        // guard が外れた後の tick は通常どおり走る
        eventually(|| {
            scheduler.fire();
            handler.entered.load(Ordering::SeqCst) == 2
        })
        .await;
        handler.release.notify_waiters();
        eventually(|| bus.deletes().len() == 2).await;
    }

    #[tokio::test]
    async fn stop_does_not_cancel_in_flight_cycle() {
        let scheduler = ManualScheduler::failing(0);
        let bus = ScriptedBus::with(vec![Ok(Some(message("1", "m1")))]);
        let handler = Arc::new(GatedHandler::default());
        let w = worker(config(true), bus.clone(), handler.clone(), scheduler.clone());
        w.start().unwrap();

        scheduler.fire();
        eventually(|| handler.entered.load(Ordering::SeqCst) == 1).await;
        w.stop();

        handler.release.notify_waiters();
        eventually(|| bus.deletes().len() == 1).await;
        assert_eq!(w.state(), WorkerState::Stopped);
    }
}
