//! 存储模块 - 消息日志与已读账本
//! Storage module - message log and read ledger
//!
//! 两者是本引擎仅有的持久共享状态；房间之间相互独立，不需要跨房间锁。
//! These two are the only durable shared state in the engine; rooms are
//! independent, so no cross-room locking exists.

pub mod message_log;
pub mod read_ledger;

pub use message_log::{MessageLog, Page, PageDirection};
pub use read_ledger::ReadLedger;
