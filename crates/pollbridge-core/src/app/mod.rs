//! App - Worker のライフサイクルと receive cycle
//!
//! # 主要コンポーネント
//! - **Worker**: start / stop / bounded restart（timer 登録失敗時のみ）
//! - **cycle**: 1 回の poll（receive → decode → callback → 条件付き delete）
//! - **status**: カウンタと snapshot

pub mod cycle;
pub mod status;
pub mod worker;

pub use self::cycle::CycleOutcome;
pub use self::status::{WorkerStats, WorkerStatsView};
pub use self::worker::{MAX_RESTART_ATTEMPTS, Worker, WorkerState};
