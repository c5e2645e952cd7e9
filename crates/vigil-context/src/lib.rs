//! # vigil-context
//!
//! Keeps a session's conversation bounded and protocol-correct.
//!
//! - **Compactor**: keeps system messages, the original instruction and the
//!   last K assistant/tool segments
//! - **Snapshot manager**: at most one page snapshot resident, each truncated
//!   to a character budget
//!
//! Both preserve call/result pairing: an assistant message with tool calls
//! is always followed by exactly its tool results.

#![deny(unsafe_code)]

pub mod compactor;
pub mod snapshot;

pub use compactor::{CompactionResult, compact};
pub use snapshot::{PruneStats, SnapshotBudget, SnapshotManager, SnapshotPolicy, truncate_snapshot};
