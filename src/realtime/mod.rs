//! 实时事件规范化与回声去重
//! Realtime event normalization and echo dedup

pub mod dedup;
pub mod normalize;

pub use dedup::{fingerprint, EchoGuard};
pub use normalize::{normalize, CanonicalEvent, EventKind, ReadSignals};
