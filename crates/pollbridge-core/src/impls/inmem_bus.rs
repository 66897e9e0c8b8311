//! InMemoryBus - 開発・テスト用の topic/subscription バス
//!
//! # 実装詳細
//! - topic → subscription → VecDeque で ready メッセージを管理
//! - send は topic の全 subscription に fan-out
//! - peek-lock: receive でロックを発行し、delete で確定。ロック期限切れは
//!   subscription の先頭に戻して再配信（DeliveryCount が増える）
//! - receive-and-delete: receive の時点で取り除く
//! - 空のときは receive timeout まで待ち、それでも空なら `BusError::NoMessages`

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use ulid::Ulid;

use crate::domain::message::props;
use crate::domain::{BrokerProperties, RawMessage};
use crate::ports::{BusClient, BusError, ReceiveOptions};

pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: Ulid,
    sequence_number: u64,
    body: String,
    enqueued_at: DateTime<Utc>,
    delivery_count: u32,
}

impl StoredMessage {
    fn properties(&self, lock: Option<(Ulid, DateTime<Utc>)>) -> BrokerProperties {
        let mut p = BrokerProperties::new();
        p.insert(props::MESSAGE_ID.to_string(), json!(self.message_id.to_string()));
        p.insert(props::SEQUENCE_NUMBER.to_string(), json!(self.sequence_number));
        p.insert(props::DELIVERY_COUNT.to_string(), json!(self.delivery_count));
        p.insert(
            props::ENQUEUED_TIME_UTC.to_string(),
            json!(self.enqueued_at.to_rfc3339()),
        );
        if let Some((token, locked_until)) = lock {
            p.insert(props::LOCK_TOKEN.to_string(), json!(token.to_string()));
            p.insert(
                props::LOCKED_UNTIL_UTC.to_string(),
                json!(locked_until.to_rfc3339()),
            );
        }
        p
    }
}

#[derive(Debug)]
struct LockedMessage {
    topic: String,
    subscriber: String,
    message: StoredMessage,
    locked_until: Instant,
}

#[derive(Debug, Default)]
struct BusState {
    /// topic -> subscriber -> ready messages
    topics: HashMap<String, HashMap<String, VecDeque<StoredMessage>>>,
    /// lock token -> locked message
    locked: HashMap<Ulid, LockedMessage>,
    next_sequence: u64,
}

impl BusState {
    /// Return expired locks to the front of their subscription.
    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<Ulid> = self
            .locked
            .iter()
            .filter(|(_, m)| m.locked_until <= now)
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            if let Some(locked) = self.locked.remove(&token) {
                self.requeue(locked);
            }
        }
    }

    fn requeue(&mut self, locked: LockedMessage) {
        // subscription が消えていたら捨てる
        if let Some(queue) = self
            .topics
            .get_mut(&locked.topic)
            .and_then(|subs| subs.get_mut(&locked.subscriber))
        {
            queue.push_front(locked.message);
        }
    }

    fn next_lock_expiry(&self) -> Option<Instant> {
        self.locked.values().map(|m| m.locked_until).min()
    }
}

/// `now + d`, saturating far in the future instead of overflowing.
fn instant_after(d: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(d)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
}

/// In-process bus implementing [`BusClient`].
#[derive(Debug)]
pub struct InMemoryBus {
    state: Mutex<BusState>,
    notify: Notify,
    lock_duration: Duration,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::with_lock_duration(DEFAULT_LOCK_DURATION)
    }

    pub fn with_lock_duration(lock_duration: Duration) -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            notify: Notify::new(),
            lock_duration,
        }
    }

    /// Create (or keep) a subscription. The topic is created implicitly.
    pub async fn create_subscription(&self, topic: &str, subscriber: &str) {
        let mut state = self.state.lock().await;
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .entry(subscriber.to_string())
            .or_default();
    }

    /// Publish to every subscription of `topic`; returns the message id.
    ///
    /// A topic without subscriptions accepts the message and drops it.
    pub async fn send(&self, topic: &str, body: impl Into<String>) -> Ulid {
        let body = body.into();
        let message_id = Ulid::new();
        {
            let mut state = self.state.lock().await;
            state.next_sequence += 1;
            let message = StoredMessage {
                message_id,
                sequence_number: state.next_sequence,
                body,
                enqueued_at: Utc::now(),
                delivery_count: 0,
            };
            if let Some(subs) = state.topics.get_mut(topic) {
                for queue in subs.values_mut() {
                    queue.push_back(message.clone());
                }
            }
        }
        self.notify.notify_waiters();
        message_id
    }

    /// Messages ready for delivery on one subscription (locked ones excluded).
    pub async fn pending(&self, topic: &str, subscriber: &str) -> usize {
        let state = self.state.lock().await;
        state
            .topics
            .get(topic)
            .and_then(|subs| subs.get(subscriber))
            .map_or(0, VecDeque::len)
    }

    /// Messages currently held under a peek-lock.
    pub async fn locked(&self) -> usize {
        self.state.lock().await.locked.len()
    }

    fn try_receive(
        &self,
        state: &mut BusState,
        topic: &str,
        subscriber: &str,
        peek_lock: bool,
    ) -> Result<Option<RawMessage>, BusError> {
        state.release_expired(Instant::now());

        let queue = state
            .topics
            .get_mut(topic)
            .and_then(|subs| subs.get_mut(subscriber))
            .ok_or_else(|| BusError::UnknownSubscription {
                topic: topic.to_string(),
                subscriber: subscriber.to_string(),
            })?;

        let Some(mut message) = queue.pop_front() else {
            return Ok(None);
        };
        message.delivery_count += 1;

        if !peek_lock {
            let properties = message.properties(None);
            return Ok(Some(RawMessage::new(message.body, properties)));
        }

        let token = Ulid::new();
        let locked_until_utc = chrono::Duration::from_std(self.lock_duration)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let raw = RawMessage::new(
            message.body.clone(),
            message.properties(Some((token, locked_until_utc))),
        );
        state.locked.insert(
            token,
            LockedMessage {
                topic: topic.to_string(),
                subscriber: subscriber.to_string(),
                message,
                locked_until: instant_after(self.lock_duration),
            },
        );
        Ok(Some(raw))
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BusClient for InMemoryBus {
    async fn receive_one(
        &self,
        topic: &str,
        subscriber: &str,
        options: ReceiveOptions,
    ) -> Result<Option<RawMessage>, BusError> {
        let deadline = instant_after(options.timeout);
        loop {
            // notified() は状態を見る前に作る（send との競合で通知を取りこぼさない）
            let notified = self.notify.notified();
            let wake_at = {
                let mut state = self.state.lock().await;
                if let Some(raw) = self.try_receive(&mut state, topic, subscriber, options.peek_lock)? {
                    return Ok(Some(raw));
                }
                match state.next_lock_expiry() {
                    Some(expiry) if expiry < deadline => expiry,
                    _ => deadline,
                }
            };

            if Instant::now() >= deadline {
                return Err(BusError::NoMessages);
            }
            // timeout はタイムアウトしても次のループで再確認するので結果は見ない
            let _ = tokio::time::timeout_at(wake_at, notified).await;
        }
    }

    async fn delete_message(&self, message: &RawMessage) -> Result<(), BusError> {
        let describe = || message.message_id().unwrap_or("<unknown>").to_string();
        let token = message
            .lock_token()
            .and_then(|t| Ulid::from_string(t).ok())
            .ok_or_else(|| BusError::LockLost(describe()))?;

        let mut state = self.state.lock().await;
        let Some(locked) = state.locked.remove(&token) else {
            return Err(BusError::LockLost(describe()));
        };
        if locked.locked_until <= Instant::now() {
            // 期限切れのロックでは確定できない。再配信に回す
            state.requeue(locked);
            drop(state);
            self.notify.notify_waiters();
            return Err(BusError::LockLost(describe()));
        }
        Ok(())
    }
}
