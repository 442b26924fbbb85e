use std::sync::Arc;

use crate::cache::Mru;
use crate::error::Result;
use crate::field::Value;
use crate::schema::Schema;

use super::file::TableFile;
use super::row::Row;

/// The synchronous engine core: the table file plus the two bounded
/// caches. Every method here touches the file or cache membership, so the
/// controller only calls in while holding the global file lock.
pub struct Core {
    schema: Arc<Schema>,
    file: TableFile,
    /// key -> row index, consulted before the linear key scan.
    index: Mru<Value, u32>,
    /// key -> materialized row. Resident entries are treated as dirty;
    /// eviction and close write them back.
    rows: Mru<Value, Row>,
}

impl Core {
    pub fn new(schema: Arc<Schema>, file: TableFile, index_cache: usize, index_data: usize) -> Self {
        Core {
            schema,
            file,
            index: Mru::new(index_cache),
            rows: Mru::new(index_data),
        }
    }

    pub fn row_count(&self) -> u32 {
        self.file.row_count()
    }

    /// Resolves a key to its row index: index cache first, then a linear
    /// scan of the key column. A scan hit is cached.
    fn locate(&mut self, key: &Value) -> Result<Option<u32>> {
        if let Some(idx) = self.index.get(key) {
            return Ok(Some(*idx));
        }
        let target = self.schema.encode_key(key)?;
        let mut slot = vec![0u8; self.schema.key_width()];
        for i in 0..self.file.row_count() {
            self.file.read_key(i, &mut slot)?;
            if slot == target {
                self.index.insert(key.clone(), i);
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Like `locate`, but on a miss appends a fresh row slot by bumping
    /// the persisted row count. The row bytes at the new index are written
    /// by the caller.
    fn locate_or_allocate(&mut self, key: &Value) -> Result<u32> {
        if let Some(idx) = self.locate(key)? {
            return Ok(idx);
        }
        let idx = self.file.row_count();
        self.file.set_row_count(idx + 1)?;
        self.index.insert(key.clone(), idx);
        Ok(idx)
    }

    /// Loads the row for `key`, returning the snapshot and whether the row
    /// exists. A missing row yields a snapshot populated with the column
    /// defaults.
    pub fn load(&mut self, key: &Value) -> Result<(Row, bool)> {
        if let Some(row) = self.rows.get(key) {
            return Ok((row.clone(), true));
        }
        let Some(idx) = self.locate(key)? else {
            return Ok((self.default_row(), false));
        };

        let mut buf = vec![0u8; self.schema.row_length()];
        self.file.read_row(idx, &mut buf)?;
        let mut row = Row::new();
        for column in self.schema.non_key() {
            row.set(
                column.name.clone(),
                column.ty.read(&buf, column.offset, column.width)?,
            );
        }
        if let Some((evicted_key, evicted_row)) = self.rows.insert(key.clone(), row.clone()) {
            self.save(&evicted_key, &evicted_row)?;
        }
        Ok((row, true))
    }

    /// Materializes and writes the row for `key`, allocating its slot if
    /// needed. Absent fields fall back to the column default, or zeroes.
    pub fn save(&mut self, key: &Value, row: &Row) -> Result<()> {
        let mut buf = vec![0u8; self.schema.row_length()];
        self.schema.key().ty.write(&mut buf, 0, key)?;
        for column in self.schema.non_key() {
            if let Some(value) = row.get(&column.name).or(column.default.as_ref()) {
                column.ty.write(&mut buf, column.offset, value)?;
            }
        }
        let idx = self.locate_or_allocate(key)?;
        self.file.write_row(idx, &buf)
    }

    /// Front-inserts the row into the row cache; an evicted tail entry is
    /// flushed to disk.
    ///
    /// A key with no row yet is allocated and written through immediately:
    /// the row count, key scans and removal all walk the file, and a scan
    /// must never find an allocated slot without key bytes. Updates to a
    /// row that already has its slot stay in the cache until eviction or
    /// flush.
    pub fn write_back(&mut self, key: Value, row: Row) -> Result<()> {
        if self.locate(&key)?.is_none() {
            self.save(&key, &row)?;
        }
        if let Some((evicted_key, evicted_row)) = self.rows.insert(key, row) {
            self.save(&evicted_key, &evicted_row)?;
        }
        Ok(())
    }

    /// Removes the row for `key` via swap-with-last compaction: the last
    /// row overwrites the removed one and the file shrinks by one row.
    /// A no-op if the key has no row.
    pub fn remove(&mut self, key: &Value) -> Result<()> {
        self.rows.remove(key);
        self.index.remove(key);
        let Some(idx) = self.locate(key)? else {
            return Ok(());
        };

        let count = self.file.row_count();
        if count == 1 {
            self.file.set_row_count(0)?;
            self.file.truncate(self.file.data_offset())?;
        } else {
            let last = count - 1;
            let mut buf = vec![0u8; self.schema.row_length()];
            self.file.read_row(last, &mut buf)?;
            self.file.write_row(idx, &buf)?;
            self.file.truncate(self.file.row_offset(last))?;
            self.file.set_row_count(last)?;
            // The moved row's old mapping is stale now.
            self.index.retain(|_, i| *i != last);
        }
        self.index.remove(key);
        Ok(())
    }

    /// Writes every cached row back to disk, least recently used first.
    pub fn flush(&mut self) -> Result<()> {
        while let Some((key, row)) = self.rows.pop_back() {
            self.save(&key, &row)?;
        }
        Ok(())
    }

    /// Builds the snapshot returned for keys that have no row.
    fn default_row(&self) -> Row {
        let mut row = Row::new();
        for column in self.schema.non_key() {
            if let Some(default) = &column.default {
                row.set(column.name.clone(), default.clone());
            }
        }
        row
    }
}
