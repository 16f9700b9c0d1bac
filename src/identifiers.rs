// 🔢 Sequential ID Allocator - human-readable display identifiers
//
// "1001", "1002", ... per entity class. Houses and members have independent
// sequences. The read-increment-write runs under SQLite's write lock
// (BEGIN IMMEDIATE), so two concurrent creations never see the same value.
//
// The next value is max(sequence row, highest stored display id, 1000) + 1:
// - the sequence row remembers ids that were reserved but never persisted
//   (those become gaps, never duplicates)
// - the stored maximum covers rows imported without going through the allocator

use crate::db;
use crate::entities::EntityClass;
use crate::error::{RegistryError, Result};
use rusqlite::{Connection, TransactionBehavior};
use tracing::debug;

/// First identifier issued for an empty class
pub const FIRST_ID: i64 = 1001;

pub struct SequentialIdAllocator;

impl SequentialIdAllocator {
    pub fn new() -> Self {
        SequentialIdAllocator
    }

    /// Reserve the next display identifier in its own immediate transaction.
    ///
    /// Fails with `AllocationConflict` when the write lock cannot be taken
    /// within the connection's busy timeout; callers may retry.
    pub fn allocate(&self, conn: &mut Connection, class: EntityClass) -> Result<String> {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| conflict_or(class, e.into()))?;

        let id = self.allocate_in(&tx, class)?;

        tx.commit().map_err(|e| conflict_or(class, e.into()))?;
        Ok(id)
    }

    /// Same step inside a transaction the caller already holds (it must be
    /// an immediate one, or the caller must accept a busy error on write).
    pub fn allocate_in(&self, conn: &Connection, class: EntityClass) -> Result<String> {
        if class.identifier_column().is_none() {
            return Err(RegistryError::Validation(format!(
                "{} records have no display identifier",
                class
            )));
        }

        let last_issued = db::get_sequence_value(conn, class).map_err(|e| conflict_or(class, e))?;
        let stored_max = db::max_display_id(conn, class)
            .map_err(|e| conflict_or(class, e))?
            .and_then(|v| v.parse::<i64>().ok());

        let next = last_issued
            .into_iter()
            .chain(stored_max)
            .fold(FIRST_ID - 1, i64::max)
            + 1;

        db::set_sequence_value(conn, class, next).map_err(|e| conflict_or(class, e))?;

        debug!(class = %class, id = next, "Display identifier allocated");
        Ok(next.to_string())
    }
}

impl Default for SequentialIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Busy/locked store errors become the retryable conflict
fn conflict_or(class: EntityClass, err: RegistryError) -> RegistryError {
    match err {
        RegistryError::Database(ref e) if db::is_busy(e) => RegistryError::AllocationConflict {
            class: class.to_string(),
        },
        other => other,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::entities::House;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_first_id_is_1001() {
        let mut conn = db::open_in_memory().unwrap();
        let allocator = SequentialIdAllocator::new();

        assert_eq!(allocator.allocate(&mut conn, EntityClass::Member).unwrap(), "1001");
        assert_eq!(allocator.allocate(&mut conn, EntityClass::Member).unwrap(), "1002");
    }

    #[test]
    fn test_classes_have_independent_sequences() {
        let mut conn = db::open_in_memory().unwrap();
        let allocator = SequentialIdAllocator::new();

        allocator.allocate(&mut conn, EntityClass::Member).unwrap();
        allocator.allocate(&mut conn, EntityClass::Member).unwrap();

        assert_eq!(allocator.allocate(&mut conn, EntityClass::House).unwrap(), "1001");
    }

    #[test]
    fn test_respects_stored_legacy_ids() {
        let mut conn = db::open_in_memory().unwrap();
        let mut house = House::new("Legacy", "Family", 1);
        house.home_id = "9999".to_string();
        db::insert_house(&conn, &house).unwrap();

        let allocator = SequentialIdAllocator::new();
        assert_eq!(allocator.allocate(&mut conn, EntityClass::House).unwrap(), "10000");
        assert_eq!(allocator.allocate(&mut conn, EntityClass::House).unwrap(), "10001");
    }

    #[test]
    fn test_unused_reservation_leaves_gap() {
        let mut conn = db::open_in_memory().unwrap();
        let allocator = SequentialIdAllocator::new();

        // reserved, never persisted
        allocator.allocate(&mut conn, EntityClass::House).unwrap();
        assert_eq!(allocator.allocate(&mut conn, EntityClass::House).unwrap(), "1002");
    }

    #[test]
    fn test_obligations_have_no_sequence() {
        let mut conn = db::open_in_memory().unwrap();
        let err = SequentialIdAllocator::new()
            .allocate(&mut conn, EntityClass::Obligation)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
    }

    #[test]
    fn test_concurrent_allocations_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("registry.db"),
            busy_timeout_ms: 5000,
        };
        db::open_database(&config).unwrap();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let config = config.clone();
                thread::spawn(move || {
                    let mut conn = db::open_database(&config).unwrap();
                    let allocator = SequentialIdAllocator::new();
                    let mut ids = Vec::new();
                    while ids.len() < 25 {
                        match allocator.allocate(&mut conn, EntityClass::Member) {
                            Ok(id) => ids.push(id),
                            Err(e) if e.is_retryable() => continue,
                            Err(e) => panic!("allocation failed: {}", e),
                        }
                    }
                    ids
                })
            })
            .collect();

        let mut all = Vec::new();
        for worker in workers {
            all.extend(worker.join().unwrap());
        }

        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 200);
        assert_eq!(unique.len(), 200);

        let max = all.iter().map(|id| id.parse::<i64>().unwrap()).max().unwrap();
        assert_eq!(max, FIRST_ID + 199);

        println!("✅ 200 concurrent allocations, no duplicates");
    }
}
