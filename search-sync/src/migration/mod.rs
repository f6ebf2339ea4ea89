//! Index initialisation and online mapping migrations.

mod coordinator;
mod lock;

pub use coordinator::{MigrationCoordinator, MigrationOutcome};
pub use lock::{AdvisoryLock, InProcessLock, LockGuard, PostgresAdvisoryLock};
