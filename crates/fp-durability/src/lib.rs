//! The durable write path: WAL segments, their wire record format, and
//! the cohort lock that enforces single-writer ownership.
//!
//! `fp-engine` is the only consumer of this crate — it owns the
//! cache/pending ledger and decides *when* to append or rotate;
//! everything here is mechanism, not policy.

pub mod error;
pub mod lock;
pub mod record;
pub mod wal;

pub use error::{LockError, WalError};
pub use lock::{CohortLock, FRESH_LOCK_THRESHOLD};
pub use record::WalRecord;
pub use wal::{replay_all, AppendOutcome, ReplayStats, WalConfig, WalConfigError, WalWriter};
