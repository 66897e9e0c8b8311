//! pollbridge-core
//!
//! Polling subscriber worker: bus の topic/subscription から 1 件ずつメッセージを取り、
//! callback に渡し、成功時のみ (peek-lock 有効なら) delete で確定させる。
//!
//! # モジュール構成
//! - **domain**: メッセージ・設定・decode（RawMessage, BoxedMessage, WorkerConfig）
//! - **ports**: 抽象化レイヤー（BusClient, MessageHandler, Scheduler）
//! - **app**: Worker のライフサイクルと receive cycle、統計
//! - **impls**: 実装（InMemoryBus, TokioScheduler）
//! - **error**: エラー型（CycleError, WorkerError, ConfigError）
//! - **observability**: tracing の初期化

pub mod app;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{CycleOutcome, Worker, WorkerState, WorkerStatsView};
pub use domain::{BoxedMessage, Payload, RawMessage, WorkerConfig, WorkerOptions};
pub use error::{ConfigError, CycleError, WorkerError};
