//! Advisory-lock based migration locking

use crate::database::{Database, LockSession};
use crate::migration::MigrationError;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lock key shared by every process migrating `database` with ledger `ledger_table`.
///
/// The first eight bytes of `SHA-256("tidemark:<database>:<ledger_table>")`, big endian.
#[must_use]
pub fn lock_key(database: &str, ledger_table: &str) -> i64 {
    let digest = Sha256::digest(format!("tidemark:{database}:{ledger_table}").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// Lock guard that releases the migration lock when dropped
///
/// The lock lives on its own session, so it survives the engine dropping and
/// recreating the target database while it is held.
pub struct MigrationLockGuard {
    session: Box<dyn LockSession>,
    key: i64,
}

impl MigrationLockGuard {
    /// Acquire the migration lock for `db`, polling until `timeout_seconds` elapse.
    ///
    /// A timeout of zero makes a single attempt.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LockTimeout` if the lock is still held elsewhere when
    /// the timeout expires, `MigrationError::Database` if the session fails.
    pub fn acquire<D: Database + ?Sized>(
        db: &D,
        ledger_table: &str,
        timeout_seconds: u64,
    ) -> Result<Self, MigrationError> {
        let key = lock_key(db.target_name(), ledger_table);
        let mut session = db.lock_session()?;
        let start = Instant::now();
        let timeout = Duration::from_secs(timeout_seconds);

        loop {
            if session.try_acquire(key)? {
                log::debug!("acquired migration lock {}", key);
                return Ok(Self { session, key });
            }

            if start.elapsed() >= timeout {
                return Err(MigrationError::LockTimeout(format!(
                    "could not acquire migration lock for database '{}' within {} seconds",
                    db.target_name(),
                    timeout_seconds
                )));
            }

            log::debug!("migration lock {} is held elsewhere; waiting", key);
            // Parks the coroutine when called from one, the thread otherwise
            may::coroutine::sleep(POLL_INTERVAL);
        }
    }

    /// Key of the held lock
    pub fn key(&self) -> i64 {
        self.key
    }
}

impl Drop for MigrationLockGuard {
    fn drop(&mut self) {
        // Errors can't propagate out of drop; the session closing frees the lock anyway
        match self.session.release(self.key) {
            Ok(()) => log::debug!("released migration lock {}", self.key),
            Err(e) => log::warn!("failed to release migration lock {}: {}", self.key, e),
        }
    }
}
