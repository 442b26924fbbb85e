mod core;
mod file;
mod row;

pub use row::{Row, RowCtl};

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

use self::core::Core;
use self::file::TableFile;
use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::errinput;
use crate::field::Value;
use crate::schema::Schema;

/// A persistent table of fixed-width rows in a single file, addressed by
/// its key column.
///
/// All access goes through transactions: [`Table::entry`] validates and
/// normalizes a key, and the returned [`Entry`] runs a body against the
/// row's current snapshot. Transactions on the same key are serialized in
/// submission order; transactions on different keys run concurrently, with
/// all file I/O funneled through one global lock. Bodies never hold the
/// file lock.
#[derive(Clone)]
pub struct Table {
    inner: Arc<Inner>,
}

struct Inner {
    schema: Arc<Schema>,
    /// The global file lock. None once the table is closed.
    core: Mutex<Option<Core>>,
    /// Per-key serialization locks, reference-counted so the map does not
    /// grow with the key space.
    keys: StdMutex<HashMap<Value, KeyLock>>,
}

struct KeyLock {
    mutex: Arc<Mutex<()>>,
    refs: usize,
}

impl Table {
    /// Opens or creates the table file at `path` for the configured
    /// schema. Configuration errors and schema mismatches fail here.
    pub fn open(path: impl AsRef<Path>, config: TableConfig) -> Result<Table> {
        let path = path.as_ref();
        let schema = Arc::new(Schema::resolve(&config)?);
        let file = TableFile::open(path, &schema)?;
        tracing::debug!(path = %path.display(), rows = file.row_count(), "opened table");

        let core = Core::new(schema.clone(), file, config.index_cache, config.index_data);
        Ok(Table {
            inner: Arc::new(Inner {
                schema,
                core: Mutex::new(Some(core)),
                keys: StdMutex::new(HashMap::new()),
            }),
        })
    }

    /// Addresses the row with the given key. The key is validated against
    /// the key column and normalized: strings are kept as-is, integer keys
    /// given as text are parsed.
    pub fn entry(&self, key: impl Into<Value>) -> Result<Entry> {
        let key = self.inner.schema.normalize_key(key.into())?;
        Ok(Entry {
            inner: self.inner.clone(),
            key,
        })
    }

    /// The current number of rows.
    pub async fn size(&self) -> Result<usize> {
        let core = self.inner.core.lock().await;
        let core = core.as_ref().ok_or(Error::Closed)?;
        Ok(core.row_count() as usize)
    }

    /// Flushes every cached row to disk and releases the file handle.
    /// Subsequent operations fail with [`Error::Closed`]; closing again is
    /// a no-op.
    pub async fn close(&self) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        if let Some(mut core) = core.take() {
            core.flush()?;
            tracing::debug!("closed table");
        }
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Last-resort flush for tables dropped without an explicit close.
        if let Some(core) = self.core.get_mut().as_mut() {
            if let Err(e) = core.flush() {
                tracing::warn!(error = %e, "failed to flush table on drop");
            }
        }
    }
}

/// A table row addressed by key, ready to run transactions.
#[derive(Clone)]
pub struct Entry {
    inner: Arc<Inner>,
    key: Value,
}

impl Entry {
    /// Runs a transaction body against this row and persists the outcome.
    ///
    /// The body receives the row snapshot and a control handle. When it
    /// returns, the snapshot is validated and written back if it changed
    /// (or if the handle confirmed a new row), and the row is deleted if
    /// the handle marked it removed. The body's own error aborts the
    /// transaction without touching the file.
    pub async fn update<F, R>(&self, body: F) -> Result<R>
    where
        F: FnOnce(&mut Row, &mut RowCtl) -> Result<R>,
    {
        self.update_async(|mut row, mut ctl| async move {
            let out = body(&mut row, &mut ctl)?;
            Ok((row, ctl, out))
        })
        .await
    }

    /// Like [`Entry::update`] for bodies that need to suspend. The body
    /// takes the snapshot and handle by value and returns them together
    /// with its result; the per-key lock is held across the whole body, so
    /// a body that never completes blocks its key (and only its key)
    /// forever.
    pub async fn update_async<F, Fut, R>(&self, body: F) -> Result<R>
    where
        F: FnOnce(Row, RowCtl) -> Fut,
        Fut: Future<Output = Result<(Row, RowCtl, R)>>,
    {
        let _key_guard = KeyGuard::acquire(&self.inner, &self.key).await?;

        let (row, exists) = {
            let mut core = self.inner.core.lock().await;
            let core = core.as_mut().ok_or(Error::Closed)?;
            core.load(&self.key)?
        };
        let old = row.clone();

        let (row, ctl, out) = body(row, RowCtl::new(exists)).await?;

        if ctl.removed() {
            if exists {
                let mut core = self.inner.core.lock().await;
                let core = core.as_mut().ok_or(Error::Closed)?;
                core.remove(&self.key)?;
            }
            return Ok(out);
        }

        for column in self.inner.schema.non_key() {
            if let Some(value) = row.get(&column.name).or(column.default.as_ref()) {
                if let Err(e) = column.ty.validate(column.width, value) {
                    let msg = match e {
                        Error::InvalidInput(msg) | Error::InvalidData(msg) => msg,
                        e => e.to_string(),
                    };
                    return errinput!("column {:?}: {msg}", column.name);
                }
            }
        }

        let dirty = self
            .inner
            .schema
            .non_key()
            .iter()
            .any(|column| row.get(&column.name) != old.get(&column.name));
        if dirty || (!exists && ctl.confirmed()) {
            let mut core = self.inner.core.lock().await;
            let core = core.as_mut().ok_or(Error::Closed)?;
            core.write_back(self.key.clone(), row)?;
        }
        Ok(out)
    }

    pub fn key(&self) -> &Value {
        &self.key
    }
}

/// Holds this key's serialization lock and keeps its refcount alive; the
/// map entry is pruned when the last guard drops.
struct KeyGuard<'a> {
    inner: &'a Inner,
    key: Value,
    _permit: OwnedMutexGuard<()>,
}

impl<'a> KeyGuard<'a> {
    async fn acquire(inner: &'a Inner, key: &Value) -> Result<KeyGuard<'a>> {
        let mutex = {
            let mut keys = inner.keys.lock()?;
            let lock = keys.entry(key.clone()).or_insert_with(|| KeyLock {
                mutex: Arc::new(Mutex::new(())),
                refs: 0,
            });
            lock.refs += 1;
            lock.mutex.clone()
        };
        let permit = mutex.lock_owned().await;
        Ok(KeyGuard {
            inner,
            key: key.clone(),
            _permit: permit,
        })
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut keys) = self.inner.keys.lock() {
            if let Some(lock) = keys.get_mut(&self.key) {
                lock.refs -= 1;
                if lock.refs == 0 {
                    keys.remove(&self.key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnSpec;
    use crate::field::FieldType;
    use tempfile::NamedTempFile;

    fn bank_config() -> TableConfig {
        TableConfig::new("userId")
            .column(ColumnSpec::new("userId").max_length(10))
            .column(
                ColumnSpec::new("money")
                    .ty(FieldType::Int32)
                    .default_value(0),
            )
    }

    #[tokio::test]
    async fn test_create_then_read_back() -> Result<()> {
        let temp = NamedTempFile::new().expect("Failed to create temporary file");

        let table = Table::open(temp.path(), bank_config())?;
        table
            .entry("bank")?
            .update(|row, _| {
                row.set("money", 10_000_000);
                Ok(())
            })
            .await?;
        table.close().await?;

        // Reopen with the same schema and read the balance back.
        let table = Table::open(temp.path(), bank_config())?;
        assert_eq!(table.size().await?, 1);
        let money = table
            .entry("bank")?
            .update(|row, _| Ok(row.get_int("money")))
            .await?;
        assert_eq!(money, Some(10_000_000));
        Ok(())
    }

    #[tokio::test]
    async fn test_transfer() -> Result<()> {
        let temp = NamedTempFile::new().expect("Failed to create temporary file");
        let table = Table::open(temp.path(), bank_config())?;

        table
            .entry("bank")?
            .update(|row, _| {
                row.set("money", 10_000_000);
                Ok(())
            })
            .await?;
        table
            .entry("alice")?
            .update(|row, ctl| {
                ctl.confirm();
                row.set("money", 100);
                Ok(())
            })
            .await?;

        // Transfer 100 from the bank to alice.
        table
            .entry("bank")?
            .update(|row, _| {
                let money = row.get_int("money").unwrap_or(0);
                row.set("money", money - 100);
                Ok(())
            })
            .await?;
        table
            .entry("alice")?
            .update(|row, _| {
                let money = row.get_int("money").unwrap_or(0);
                row.set("money", money + 100);
                Ok(())
            })
            .await?;

        let bank = table
            .entry("bank")?
            .update(|row, _| Ok(row.get_int("money")))
            .await?;
        let alice = table
            .entry("alice")?
            .update(|row, _| Ok(row.get_int("money")))
            .await?;
        assert_eq!(bank, Some(9_999_900));
        assert_eq!(alice, Some(200));
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_compaction() -> Result<()> {
        let temp = NamedTempFile::new().expect("Failed to create temporary file");
        let config = TableConfig::new("id")
            .column(ColumnSpec::new("id").max_length(4))
            .column(ColumnSpec::new("n").ty(FieldType::Uint8).default_value(0u8));
        let schema = Schema::resolve(&config)?;
        let table = Table::open(temp.path(), config)?;

        for (key, n) in [("a", 1), ("b", 2), ("c", 3)] {
            table
                .entry(key)?
                .update(move |row, _| {
                    row.set("n", n);
                    Ok(())
                })
                .await?;
        }
        assert_eq!(table.size().await?, 3);
        table
            .entry("b")?
            .update(|_, ctl| {
                ctl.remove();
                Ok(())
            })
            .await?;

        // The removal is visible immediately, not just after a close.
        assert_eq!(table.size().await?, 2);
        let expected_len = schema.data_offset() + 2 * schema.row_length() as u64;
        assert_eq!(
            std::fs::metadata(temp.path()).expect("metadata").len(),
            expected_len
        );

        let a = table.entry("a")?.update(|row, _| Ok(row.get_int("n"))).await?;
        let c = table.entry("c")?.update(|row, _| Ok(row.get_int("n"))).await?;
        assert_eq!(a, Some(1));
        assert_eq!(c, Some(3));
        let (b, b_exists) = table
            .entry("b")?
            .update(|row, ctl| Ok((row.get_int("n"), ctl.exists())))
            .await?;
        assert_eq!(b, Some(0));
        assert!(!b_exists);

        // Flushing the caches leaves the at-rest length unchanged.
        table.close().await?;
        assert_eq!(
            std::fs::metadata(temp.path()).expect("metadata").len(),
            expected_len
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_schema_mismatch_on_reopen() -> Result<()> {
        let temp = NamedTempFile::new().expect("Failed to create temporary file");
        let config = TableConfig::new("k")
            .column(ColumnSpec::new("k").max_length(4))
            .column(ColumnSpec::new("v").ty(FieldType::Uint16));
        let table = Table::open(temp.path(), config)?;
        table.close().await?;
        let before = std::fs::read(temp.path()).expect("read file");

        let config = TableConfig::new("k")
            .column(ColumnSpec::new("k").max_length(4))
            .column(ColumnSpec::new("v").ty(FieldType::Uint32));
        match Table::open(temp.path(), config) {
            Err(Error::SchemaMismatch(_)) => {}
            other => panic!("expected schema mismatch, got {:?}", other.map(|_| ())),
        }

        // The failed open left the file untouched.
        let after = std::fs::read(temp.path()).expect("read file");
        assert_eq!(before, after);
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_increments_on_one_key() -> Result<()> {
        let temp = NamedTempFile::new().expect("Failed to create temporary file");
        let config = TableConfig::new("id")
            .column(ColumnSpec::new("id").max_length(10))
            .column(ColumnSpec::new("n").ty(FieldType::Uint32).default_value(0u32));
        let table = Table::open(temp.path(), config)?;

        let mut handles = Vec::new();
        for _ in 0..100 {
            let entry = table.entry("counter")?;
            handles.push(tokio::spawn(async move {
                entry
                    .update(|row, _| {
                        let n = row.get_int("n").unwrap_or(0);
                        row.set("n", n + 1);
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("task panicked")?;
        }

        let n = table
            .entry("counter")?
            .update(|row, _| Ok(row.get_int("n")))
            .await?;
        assert_eq!(n, Some(100));
        Ok(())
    }

    #[tokio::test]
    async fn test_read_without_confirm_does_no_io() -> Result<()> {
        let temp = NamedTempFile::new().expect("Failed to create temporary file");
        let table = Table::open(temp.path(), bank_config())?;
        let initial = std::fs::metadata(temp.path()).expect("metadata").len();

        let (money, exists) = table
            .entry("ghost")?
            .update(|row, ctl| Ok((row.get_int("money"), ctl.exists())))
            .await?;
        assert_eq!(money, Some(0));
        assert!(!exists);

        // No allocation, no write.
        assert_eq!(table.size().await?, 0);
        assert_eq!(
            std::fs::metadata(temp.path()).expect("metadata").len(),
            initial
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_confirm_materializes_default_row() -> Result<()> {
        let temp = NamedTempFile::new().expect("Failed to create temporary file");
        let table = Table::open(temp.path(), bank_config())?;

        let created = table.entry("bob")?.update(|_, ctl| Ok(ctl.confirm())).await?;
        assert!(created);
        // Confirming an existing row reports false.
        let created = table.entry("bob")?.update(|_, ctl| Ok(ctl.confirm())).await?;
        assert!(!created);

        assert_eq!(table.size().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unchanged_row_keeps_file_content() -> Result<()> {
        let temp = NamedTempFile::new().expect("Failed to create temporary file");
        let config = bank_config().index_data(0);
        let table = Table::open(temp.path(), config)?;

        table
            .entry("bank")?
            .update(|row, _| {
                row.set("money", 42);
                Ok(())
            })
            .await?;
        let before = std::fs::read(temp.path()).expect("read file");

        // Reading without mutating leaves the snapshot equal to old, and
        // setting a field to the value it already holds stays clean too.
        table
            .entry("bank")?
            .update(|row, _| {
                row.set("money", 42);
                Ok(())
            })
            .await?;
        assert_eq!(std::fs::read(temp.path()).expect("read file"), before);
        Ok(())
    }

    #[tokio::test]
    async fn test_validation_failure_aborts() -> Result<()> {
        let temp = NamedTempFile::new().expect("Failed to create temporary file");
        let table = Table::open(temp.path(), bank_config())?;

        let result = table
            .entry("bank")?
            .update(|row, _| {
                row.set("money", i64::from(i32::MAX) + 1);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        // The failed transaction wrote nothing, and the key is not wedged.
        assert_eq!(table.size().await?, 0);
        table
            .entry("bank")?
            .update(|row, _| {
                row.set("money", 1);
                Ok(())
            })
            .await?;
        assert_eq!(table.size().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_body_error_skips_persistence() -> Result<()> {
        let temp = NamedTempFile::new().expect("Failed to create temporary file");
        let table = Table::open(temp.path(), bank_config())?;

        let result: Result<()> = table
            .entry("bank")?
            .update(|row, _| {
                row.set("money", 123);
                Err(Error::InvalidInput("nope".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(table.size().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_async_body_suspends() -> Result<()> {
        let temp = NamedTempFile::new().expect("Failed to create temporary file");
        let table = Table::open(temp.path(), bank_config())?;

        table
            .entry("bank")?
            .update_async(|mut row, ctl| async move {
                tokio::task::yield_now().await;
                row.set("money", 7);
                Ok((row, ctl, ()))
            })
            .await?;

        let money = table
            .entry("bank")?
            .update(|row, _| Ok(row.get_int("money")))
            .await?;
        assert_eq!(money, Some(7));
        Ok(())
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() -> Result<()> {
        let temp = NamedTempFile::new().expect("Failed to create temporary file");
        let table = Table::open(temp.path(), bank_config())?;

        table
            .entry("bank")?
            .update(|row, _| {
                row.set("money", 5);
                Ok(())
            })
            .await?;
        table.close().await?;
        table.close().await?;

        assert!(matches!(table.size().await, Err(Error::Closed)));
        assert!(matches!(
            table.entry("bank")?.update(|_, _| Ok(())).await,
            Err(Error::Closed)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_drop_flushes_cached_rows() -> Result<()> {
        let temp = NamedTempFile::new().expect("Failed to create temporary file");
        {
            let table = Table::open(temp.path(), bank_config())?;
            table
                .entry("bank")?
                .update(|row, _| {
                    row.set("money", 321);
                    Ok(())
                })
                .await?;
            // Dropped without close: the row lives only in the row cache.
        }

        let table = Table::open(temp.path(), bank_config())?;
        let money = table
            .entry("bank")?
            .update(|row, _| Ok(row.get_int("money")))
            .await?;
        assert_eq!(money, Some(321));
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_keys_are_rejected() -> Result<()> {
        let temp = NamedTempFile::new().expect("Failed to create temporary file");
        let table = Table::open(temp.path(), bank_config())?;

        assert!(table.entry("this key is far too long").is_err());
        assert!(table.entry(5).is_err());
        Ok(())
    }
}
