//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryBus**: 開発・テスト用の topic/subscription バス（peek-lock 対応）
//! - **TokioScheduler**: tokio の interval で tick を駆動する Scheduler
//!
//! 本番用の BusClient（Azure Service Bus 等）は別クレートに置く想定。

pub mod inmem_bus;
pub mod tokio_scheduler;

pub use self::inmem_bus::InMemoryBus;
pub use self::tokio_scheduler::TokioScheduler;
