use byteorder::{ByteOrder, LittleEndian};
use itertools::Itertools;

use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::errinput;
use crate::field::{FieldType, Value};

/// A resolved table column: declaration plus its computed on-disk width
/// and byte offset within a row.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ty: FieldType,
    pub width: usize,
    pub offset: usize,
    pub default: Option<Value>,
}

/// A resolved table schema.
///
/// Columns are held in on-disk order: the key column first, then the
/// remaining columns in declaration order. Offsets and the preamble byte
/// blocks are frozen here; resolving the same configuration twice yields
/// byte-identical blocks, which is what makes the reopen compatibility
/// check a plain byte comparison.
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<Column>,
    row_length: usize,
    names_block: Vec<u8>,
    header_block: Vec<u8>,
    defaults_block: Vec<u8>,
}

impl Schema {
    /// Resolves a table configuration into a schema, validating every
    /// column declaration.
    pub fn resolve(config: &TableConfig) -> Result<Schema> {
        if config.values.is_empty() {
            return errinput!("table declares no columns");
        }
        for spec in &config.values {
            if spec.name.is_empty() {
                return errinput!("column names must not be empty");
            }
            if spec.name.contains('\0') {
                return errinput!("column {:?}: name must not contain NUL", spec.name);
            }
        }
        if let Some(name) = config
            .values
            .iter()
            .map(|spec| spec.name.as_str())
            .duplicates()
            .next()
        {
            return errinput!("column {name:?} is declared more than once");
        }
        let key_pos = match config.values.iter().position(|spec| spec.name == config.key) {
            Some(pos) => pos,
            None => return errinput!("key column {:?} is not declared", config.key),
        };

        // On-disk order: key first, then declaration order.
        let mut specs = Vec::with_capacity(config.values.len());
        specs.push(&config.values[key_pos]);
        specs.extend(
            config
                .values
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != key_pos)
                .map(|(_, spec)| spec),
        );

        let mut columns = Vec::with_capacity(specs.len());
        let mut offset = 0;
        for (pos, spec) in specs.iter().enumerate() {
            let name = &spec.name;
            let ty = spec.ty.unwrap_or(FieldType::Str);
            if pos == 0 && spec.default.is_some() {
                return errinput!("key column {name:?} must not declare a default");
            }

            let width = match ty.fixed_width() {
                Some(width) => {
                    if spec.max_length.is_some() {
                        return errinput!(
                            "column {name:?}: fixed-width type {ty} must not declare max_length"
                        );
                    }
                    width
                }
                None => match (&spec.max_length, &spec.default) {
                    (Some(max_length), _) => {
                        if *max_length < 2 {
                            return errinput!("column {name:?}: max_length must be at least 2");
                        }
                        *max_length
                    }
                    (None, Some(Value::Str(s))) => s.len() + 2,
                    (None, Some(default)) => {
                        return errinput!(
                            "column {name:?}: default {default} is not a string value"
                        );
                    }
                    (None, None) => {
                        return errinput!(
                            "column {name:?}: string columns need a max_length or a default"
                        );
                    }
                },
            };
            if width > u16::MAX as usize {
                return errinput!("column {name:?}: width {width} exceeds {}", u16::MAX);
            }

            if let Some(default) = &spec.default {
                if let Err(e) = ty.validate(width, default) {
                    let msg = match e {
                        Error::InvalidInput(msg) | Error::InvalidData(msg) => msg,
                        e => e.to_string(),
                    };
                    return errinput!("column {name:?}: invalid default: {msg}");
                }
            }

            columns.push(Column {
                name: name.clone(),
                ty,
                width,
                offset,
                default: spec.default.clone(),
            });
            offset += width;
        }
        let row_length = offset;

        let (names_block, header_block, defaults_block) = Self::build_blocks(&columns)?;

        Ok(Schema {
            columns,
            row_length,
            names_block,
            header_block,
            defaults_block,
        })
    }

    /// Materializes the three preamble blocks: names (u16le payload length,
    /// then NUL-terminated names), header (u32le payload length, then per
    /// column a type id byte and a u16le width), and defaults (non-key
    /// default bytes at their declared widths).
    fn build_blocks(columns: &[Column]) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        let mut names_payload = Vec::new();
        for column in columns {
            names_payload.extend_from_slice(column.name.as_bytes());
            names_payload.push(0);
        }
        if names_payload.len() > u16::MAX as usize {
            return errinput!("column names exceed {} bytes", u16::MAX);
        }
        let mut names_block = vec![0u8; 2];
        LittleEndian::write_u16(&mut names_block, names_payload.len() as u16);
        names_block.extend_from_slice(&names_payload);

        let mut header_payload = Vec::with_capacity(columns.len() * 3);
        for column in columns {
            header_payload.push(column.ty.id());
            let mut width = [0u8; 2];
            LittleEndian::write_u16(&mut width, column.width as u16);
            header_payload.extend_from_slice(&width);
        }
        let mut header_block = vec![0u8; 4];
        LittleEndian::write_u32(&mut header_block, header_payload.len() as u32);
        header_block.extend_from_slice(&header_payload);

        let mut defaults_block = Vec::new();
        for column in &columns[1..] {
            let mut slot = vec![0u8; column.width];
            if let Some(default) = &column.default {
                column.ty.write(&mut slot, 0, default)?;
            }
            defaults_block.extend_from_slice(&slot);
        }

        Ok((names_block, header_block, defaults_block))
    }

    /// All columns in on-disk order, key first.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// The key column.
    pub fn key(&self) -> &Column {
        &self.columns[0]
    }

    /// The non-key columns in on-disk order.
    pub fn non_key(&self) -> &[Column] {
        &self.columns[1..]
    }

    pub fn row_length(&self) -> usize {
        self.row_length
    }

    pub fn key_width(&self) -> usize {
        self.columns[0].width
    }

    pub fn names_block(&self) -> &[u8] {
        &self.names_block
    }

    pub fn header_block(&self) -> &[u8] {
        &self.header_block
    }

    pub fn defaults_block(&self) -> &[u8] {
        &self.defaults_block
    }

    /// Byte offset of the first row: magic, the three preamble blocks, and
    /// the four row-count bytes.
    pub fn data_offset(&self) -> u64 {
        (4 + self.names_block.len() + self.header_block.len() + self.defaults_block.len() + 4)
            as u64
    }

    /// Encodes a key value into a zero-padded key-width buffer. Rows are
    /// matched by comparing the full slot, so the padding must be
    /// deterministic.
    pub fn encode_key(&self, key: &Value) -> Result<Vec<u8>> {
        let column = self.key();
        let mut buf = vec![0u8; column.width];
        column.ty.write(&mut buf, 0, key)?;
        Ok(buf)
    }

    /// Validates a caller-supplied key against the key column and
    /// normalizes it: strings are left as-is, integer keys given as text
    /// are parsed.
    pub fn normalize_key(&self, key: Value) -> Result<Value> {
        let column = self.key();
        let key = match (column.ty, key) {
            (FieldType::Str, key @ Value::Str(_)) => key,
            (FieldType::Str, key) => {
                return errinput!("key {key} does not fit string column {:?}", column.name)
            }
            (_, Value::Str(s)) => match s.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => {
                    return errinput!("key {s:?} is not an integer for column {:?}", column.name)
                }
            },
            (_, key) => key,
        };
        column.ty.validate(column.width, &key)?;
        Ok(key)
    }
}
