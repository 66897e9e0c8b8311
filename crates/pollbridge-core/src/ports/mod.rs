//! Ports - 抽象化レイヤー
//!
//! Worker が外部に要求する能力だけを trait にしている。
//! - **BusClient**: receive-one / delete（transport は問わない）
//! - **MessageHandler**: ユーザーの callback
//! - **Scheduler**: 定期 tick の登録

pub mod bus;
pub mod handler;
pub mod scheduler;

pub use self::bus::{BusClient, BusError, ReceiveOptions};
pub use self::handler::{FnHandler, HandlerError, MessageHandler, handler_fn};
pub use self::scheduler::{Scheduler, SchedulerError, Tick, TimerHandle};
