use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use tokio::time;
use tracing::{debug, info, warn};

use super::model::SecretRecord;
use crate::lifecycle::RecordStore;

const SECRETS: TableDefinition<&str, &[u8]> = TableDefinition::new("secrets");

/// Thread-safe handle to the redb store.
///
/// Every mutation runs inside a single redb write transaction, which is what
/// makes `decrement_views` the indivisible check-and-decrement the lifecycle
/// manager relies on: two racing consumers serialize on the transaction, and
/// the loser re-reads a counter the winner already lowered.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        let write_txn = db.begin_write()?;
        write_txn.open_table(SECRETS)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Remove all records that are expired at `now` or have no views left.
    /// Returns the handles removed.
    pub fn prune(&self, now: i64) -> Result<Vec<String>> {
        // Collect dead handles in a read pass first.
        let dead: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(SECRETS)?;
            let mut handles = Vec::new();
            for item in table.iter()? {
                let (k, v) = item?;
                let record = decode(v.value())?;
                if record.is_expired(now) || record.is_exhausted() {
                    handles.push(k.value().to_owned());
                }
            }
            handles
        };

        if dead.is_empty() {
            return Ok(vec![]);
        }

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SECRETS)?;
            for handle in &dead {
                // A consumer may have deleted the record since the read pass;
                // remove is a no-op then.
                table.remove(handle.as_str())?;
            }
        }
        write_txn.commit()?;

        info!(removed = dead.len(), "pruned dead secrets");
        Ok(dead)
    }

    /// Spawn a background Tokio task that calls `prune()` every `interval`.
    /// Eager eviction only; correctness never depends on the sweep because
    /// every consume re-checks expiry and views.
    pub fn spawn_sweep(self, interval: Duration, clock: Arc<dyn crate::lifecycle::Clock>) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                if let Err(e) = self.prune(clock.now_millis()) {
                    warn!(error = %e, "background sweep error");
                }
            }
        });
    }
}

impl RecordStore for Store {
    /// Insert a new record. All-or-nothing: a failed commit leaves no row.
    fn insert(&self, handle: &str, record: &SecretRecord) -> Result<()> {
        let bytes = encode(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SECRETS)?;
            table.insert(handle, bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!(%handle, "stored secret");
        Ok(())
    }

    fn get(&self, handle: &str) -> Result<Option<SecretRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SECRETS)?;

        let raw: Option<Vec<u8>> = table.get(handle)?.map(|guard| guard.value().to_vec());
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    /// Decrement `remaining_views` by one iff its stored value is > 0, inside
    /// one write transaction. Returns the post-decrement value, or `None` if
    /// the precondition failed (counter already zero, or no such row).
    fn decrement_views(&self, handle: &str) -> Result<Option<u32>> {
        let write_txn = self.db.begin_write()?;
        let applied = {
            let mut table = write_txn.open_table(SECRETS)?;

            // Clone the raw bytes so the AccessGuard (which borrows `table`)
            // is dropped before the re-insert.
            let raw: Option<Vec<u8>> = table.get(handle)?.map(|guard| guard.value().to_vec());

            match raw {
                None => None,
                Some(bytes) => {
                    let mut record = decode(&bytes)?;
                    if record.remaining_views == 0 {
                        None
                    } else {
                        record.remaining_views -= 1;
                        let updated = encode(&record)?;
                        table.insert(handle, updated.as_slice())?;
                        Some(record.remaining_views)
                    }
                }
            }
        };
        write_txn.commit()?;
        Ok(applied)
    }

    /// Delete a record by handle. Idempotent: an absent handle is not an error.
    fn delete(&self, handle: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let existed = {
            let mut table = write_txn.open_table(SECRETS)?;
            // Clone the guard result immediately so the borrow ends before commit.
            let existed = table.remove(handle)?.is_some();
            existed
        };
        write_txn.commit()?;
        Ok(existed)
    }
}

fn encode(record: &SecretRecord) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::standard()).context("bincode encode")
}

fn decode(bytes: &[u8]) -> Result<SecretRecord> {
    let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .context("bincode decode")?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_store() -> (Store, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        (store, dir)
    }

    fn record(expires_at: i64, views: u32) -> SecretRecord {
        SecretRecord {
            payload: "hi".into(),
            created_at: 0,
            expires_at,
            remaining_views: views,
        }
    }

    #[test]
    fn insert_get_delete_roundtrip() {
        let (s, _dir) = make_store();
        s.insert("h1", &record(60_000, 2)).unwrap();

        let got = s.get("h1").unwrap().unwrap();
        assert_eq!(got.payload, "hi");
        assert_eq!(got.remaining_views, 2);

        assert!(s.delete("h1").unwrap());
        assert!(s.get("h1").unwrap().is_none());
        // Idempotent delete.
        assert!(!s.delete("h1").unwrap());
    }

    #[test]
    fn decrement_applies_until_zero() {
        let (s, _dir) = make_store();
        s.insert("h", &record(60_000, 2)).unwrap();

        assert_eq!(s.decrement_views("h").unwrap(), Some(1));
        assert_eq!(s.decrement_views("h").unwrap(), Some(0));
        // Counter at zero: precondition fails, value never goes negative.
        assert_eq!(s.decrement_views("h").unwrap(), None);
        assert_eq!(s.get("h").unwrap().unwrap().remaining_views, 0);
    }

    #[test]
    fn decrement_on_absent_handle_does_not_apply() {
        let (s, _dir) = make_store();
        assert_eq!(s.decrement_views("nope").unwrap(), None);
    }

    #[test]
    fn concurrent_decrements_never_exceed_budget() {
        let (s, _dir) = make_store();
        s.insert("race", &record(i64::MAX, 5)).unwrap();

        let mut joins = Vec::new();
        for _ in 0..32 {
            let s = s.clone();
            joins.push(std::thread::spawn(move || {
                s.decrement_views("race").unwrap().is_some()
            }));
        }
        let wins = joins
            .into_iter()
            .map(|j| j.join().unwrap())
            .filter(|applied| *applied)
            .count();

        assert_eq!(wins, 5);
        assert_eq!(s.get("race").unwrap().unwrap().remaining_views, 0);
    }

    #[test]
    fn lifecycle_over_redb_spends_each_view_exactly_once() {
        use crate::lifecycle::{Lifecycle, LifecycleError, SystemClock};
        use std::sync::{Arc, Barrier};

        let (s, _dir) = make_store();
        let m = Lifecycle::new(s, Arc::new(SystemClock));
        let r = m.create("token".into(), 60.0, 3).unwrap();

        let barrier = Arc::new(Barrier::new(16));
        let mut joins = Vec::new();
        for _ in 0..16 {
            let m = m.clone();
            let handle = r.handle.clone();
            let barrier = barrier.clone();
            joins.push(std::thread::spawn(move || {
                barrier.wait();
                m.consume(&handle).is_ok()
            }));
        }
        let wins = joins
            .into_iter()
            .map(|j| j.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(wins, 3);
        // Final view deleted the record.
        assert!(matches!(m.consume(&r.handle), Err(LifecycleError::NotFound)));
    }

    #[test]
    fn prune_removes_expired_and_exhausted() {
        let (s, _dir) = make_store();
        s.insert("live", &record(60_000, 1)).unwrap();
        s.insert("expired", &record(1_000, 1)).unwrap();
        s.insert("spent", &record(60_000, 0)).unwrap();

        let removed = s.prune(2_000).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(s.get("live").unwrap().is_some());
        assert!(s.get("expired").unwrap().is_none());
        assert!(s.get("spent").unwrap().is_none());
    }
}
