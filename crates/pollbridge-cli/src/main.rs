use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, sleep};

use pollbridge_core::domain::config::{POLL_INTERVAL_ENV, RECEIVE_TIMEOUT_ENV};
use pollbridge_core::impls::InMemoryBus;
use pollbridge_core::observability::init_tracing;
use pollbridge_core::ports::{HandlerError, MessageHandler};
use pollbridge_core::{BoxedMessage, Worker, WorkerConfig, WorkerOptions};

const TOPIC: &str = "orders";
const SUBSCRIBER: &str = "billing";

/// 最初の n 回だけわざと失敗する handler（peek-lock の再配信を見るため）
struct FlakyHandler {
    remaining_failures: AtomicU32,
}

impl FlakyHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl MessageHandler for FlakyHandler {
    async fn handle(&self, message: BoxedMessage) -> Result<(), HandlerError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(format!("intentional failure (left={left})").into());
        }

        tracing::info!(payload = ?message.payload(), "handled message");
        Ok(())
    }
}

/// Shorter interval and timeout for the demo unless the environment sets them.
fn demo_config() -> Result<WorkerConfig, Box<dyn std::error::Error>> {
    let mut config = WorkerConfig::from_env(TOPIC, SUBSCRIBER, &WorkerOptions::default())?;
    if std::env::var_os(POLL_INTERVAL_ENV).is_none() {
        config = config.with_poll_interval(Duration::from_millis(200))?;
    }
    if std::env::var_os(RECEIVE_TIMEOUT_ENV).is_none() {
        config = config.with_receive_timeout(Duration::from_secs(1));
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // (A) bus と subscription を用意（ロックは短めにして再配信を早く見る）
    let bus = Arc::new(InMemoryBus::with_lock_duration(Duration::from_secs(2)));
    bus.create_subscription(TOPIC, SUBSCRIBER).await;

    // (B) worker を起動
    let config = demo_config()?;
    let run_for = config.poll_interval() * 20 + Duration::from_secs(2);
    let worker = Worker::new(config, bus.clone(), Arc::new(FlakyHandler::new(2)));
    worker.start()?;

    // (C) メッセージ投入（JSON と plain text）
    for body in [
        serde_json::json!({ "order_id": 1, "amount": 1200 }).to_string(),
        serde_json::json!({ "order_id": 2, "amount": 300 }).to_string(),
        "ping".to_string(),
    ] {
        let id = bus.send(TOPIC, body).await;
        println!("sent message: {id}");
    }

    // (D) しばらく流してから止める
    sleep(run_for).await;
    worker.stop();

    println!("stats: {}", serde_json::to_string_pretty(&worker.stats())?);
    println!(
        "pending={} locked={}",
        bus.pending(TOPIC, SUBSCRIBER).await,
        bus.locked().await
    );
    Ok(())
}
