use crate::field::{FieldType, Value};

/// Default capacity of the key-to-row-index cache.
pub const DEFAULT_INDEX_CACHE: usize = 1024;

/// Default capacity of the materialized row cache.
pub const DEFAULT_INDEX_DATA: usize = 64;

/// Declaration of a single table column.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    /// Column name, unique within the table.
    pub name: String,

    /// Field type (default: string).
    pub ty: Option<FieldType>,

    /// Maximum on-disk width in bytes. Only string columns may declare
    /// one; for strings it includes the two length-prefix bytes.
    pub max_length: Option<usize>,

    /// Default value for rows that never set this column. The key column
    /// must not declare one.
    pub default: Option<Value>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: None,
            max_length: None,
            default: None,
        }
    }

    /// Set the field type
    pub fn ty(mut self, ty: FieldType) -> Self {
        self.ty = Some(ty);
        self
    }

    /// Set the maximum on-disk width
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Set the default value
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Configuration for a table.
#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Name of the key column; must match one declared column.
    pub key: String,

    /// Ordered column declarations.
    pub values: Vec<ColumnSpec>,

    /// Capacity of the key-to-row-index cache (default: 1024). Zero
    /// disables index caching without affecting correctness.
    pub index_cache: usize,

    /// Capacity of the materialized row cache (default: 64). Evictions
    /// write the evicted row back to disk.
    pub index_data: usize,
}

impl TableConfig {
    /// Create a new config with the given key column name
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            values: Vec::new(),
            index_cache: DEFAULT_INDEX_CACHE,
            index_data: DEFAULT_INDEX_DATA,
        }
    }

    /// Append a column declaration
    pub fn column(mut self, spec: ColumnSpec) -> Self {
        self.values.push(spec);
        self
    }

    /// Set the index cache capacity
    pub fn index_cache(mut self, capacity: usize) -> Self {
        self.index_cache = capacity;
        self
    }

    /// Set the row cache capacity
    pub fn index_data(mut self, capacity: usize) -> Self {
        self.index_data = capacity;
        self
    }
}

/// Configuration for a set facade. At least one of `ty` and `max_length`
/// is required; both describe the single stored value.
#[derive(Debug, Clone)]
pub struct SetConfig {
    /// Field type of the stored value (default: string).
    pub ty: Option<FieldType>,

    /// Maximum on-disk width of the stored value.
    pub max_length: Option<usize>,

    /// Capacity of the key-to-row-index cache (default: 1024).
    pub index_cache: usize,

    /// Capacity of the materialized row cache (default: 64).
    pub index_data: usize,
}

impl SetConfig {
    pub fn new() -> Self {
        Self {
            ty: None,
            max_length: None,
            index_cache: DEFAULT_INDEX_CACHE,
            index_data: DEFAULT_INDEX_DATA,
        }
    }

    /// Set the field type of the stored value
    pub fn ty(mut self, ty: FieldType) -> Self {
        self.ty = Some(ty);
        self
    }

    /// Set the maximum on-disk width of the stored value
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Set the index cache capacity
    pub fn index_cache(mut self, capacity: usize) -> Self {
        self.index_cache = capacity;
        self
    }

    /// Set the row cache capacity
    pub fn index_data(mut self, capacity: usize) -> Self {
        self.index_data = capacity;
        self
    }
}

impl Default for SetConfig {
    fn default() -> Self {
        Self::new()
    }
}
