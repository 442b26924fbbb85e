use std::path::Path;

use crate::config::{ColumnSpec, SetConfig, TableConfig};
use crate::error::Result;
use crate::errinput;
use crate::field::Value;
use crate::table::Table;

/// A persistent set of values, presented over a single-column table whose
/// `value` column is also the key. Membership, insertion and removal map
/// onto key transactions; the engine's caches and per-key serialization
/// apply unchanged.
pub struct Set {
    table: Table,
}

impl Set {
    /// Opens or creates the set file at `path`. At least one of the type
    /// and the maximum length must be configured.
    pub fn open(path: impl AsRef<Path>, config: SetConfig) -> Result<Set> {
        if config.ty.is_none() && config.max_length.is_none() {
            return errinput!("set requires a type or a max_length");
        }
        let mut spec = ColumnSpec::new("value");
        if let Some(ty) = config.ty {
            spec = spec.ty(ty);
        }
        if let Some(max_length) = config.max_length {
            spec = spec.max_length(max_length);
        }
        let table_config = TableConfig::new("value")
            .column(spec)
            .index_cache(config.index_cache)
            .index_data(config.index_data);
        Ok(Set {
            table: Table::open(path, table_config)?,
        })
    }

    /// Whether the value is in the set.
    pub async fn has(&self, value: impl Into<Value>) -> Result<bool> {
        self.table
            .entry(value)?
            .update(|_, ctl| Ok(ctl.exists()))
            .await
    }

    /// Adds the value. Returns true iff it was not already present.
    pub async fn add(&self, value: impl Into<Value>) -> Result<bool> {
        self.table
            .entry(value)?
            .update(|_, ctl| Ok(ctl.confirm()))
            .await
    }

    /// Removes the value. Returns true iff it was present.
    pub async fn remove(&self, value: impl Into<Value>) -> Result<bool> {
        self.table
            .entry(value)?
            .update(|_, ctl| Ok(ctl.remove()))
            .await
    }

    /// The current number of values.
    pub async fn size(&self) -> Result<usize> {
        self.table.size().await
    }

    /// Flushes and releases the backing file.
    pub async fn close(&self) -> Result<()> {
        self.table.close().await
    }
}
