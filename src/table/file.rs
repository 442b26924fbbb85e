use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::flock;
use crate::schema::Schema;

/// Magic bytes identifying a table file.
pub const MAGIC: [u8; 4] = [0x0b, 0x0a, 0x0d, 0x0b];

/// The layout manager for a single table file.
///
/// Owns the file handle and the persisted row count, and translates row
/// indices into absolute byte offsets. The preamble (magic, names, header,
/// defaults) is written once at creation and byte-compared on every
/// reopen; a mismatch is fatal and releases the handle.
#[derive(Debug)]
pub struct TableFile {
    file: File,
    path: PathBuf,
    data_offset: u64,
    row_length: usize,
    key_width: usize,
    row_count: u32,
}

impl TableFile {
    /// Opens or creates the table file for the given schema. A missing or
    /// empty file is initialized with the schema's preamble and a zero row
    /// count; an existing file must match the preamble byte for byte.
    pub fn open(path: &Path, schema: &Schema) -> Result<Self> {
        let mut file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        flock::lock_exclusive(&file)?;

        let data_offset = schema.data_offset();
        let row_length = schema.row_length();
        let key_width = schema.key_width();

        let row_count = if file.metadata()?.len() == 0 {
            file.write_all(&MAGIC)?;
            file.write_all(schema.names_block())?;
            file.write_all(schema.header_block())?;
            file.write_all(schema.defaults_block())?;
            file.write_u32::<LittleEndian>(0)?;
            file.flush()?;
            tracing::info!(path = %path.display(), "created table file");
            0
        } else {
            Self::verify_preamble(&mut file, schema)?;
            let row_count = file.read_u32::<LittleEndian>()?;
            let expected = data_offset + row_count as u64 * row_length as u64;
            let actual = file.metadata()?.len();
            if actual != expected {
                tracing::warn!(
                    path = %path.display(),
                    expected,
                    actual,
                    "table file length does not match its row count"
                );
            }
            row_count
        };

        Ok(Self {
            file,
            path: path.to_path_buf(),
            data_offset,
            row_length,
            key_width,
            row_count,
        })
    }

    /// Byte-compares the magic and the three preamble blocks against the
    /// schema. Leaves the cursor at the row-count field.
    fn verify_preamble(file: &mut File, schema: &Schema) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::SchemaMismatch(format!(
                "bad magic {magic:02x?}, not a table file"
            )));
        }

        for (name, expected) in [
            ("names", schema.names_block()),
            ("header", schema.header_block()),
            ("defaults", schema.defaults_block()),
        ] {
            let mut block = vec![0u8; expected.len()];
            file.read_exact(&mut block)?;
            if block != expected {
                return Err(Error::SchemaMismatch(format!(
                    "{name} block does not match the configured schema"
                )));
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }

    pub fn row_length(&self) -> usize {
        self.row_length
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// Absolute byte offset of row `i`.
    pub fn row_offset(&self, i: u32) -> u64 {
        self.data_offset + i as u64 * self.row_length as u64
    }

    /// Reads row `i` into `buf`, which must be `row_length` bytes.
    pub fn read_row(&mut self, i: u32, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.row_offset(i)))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes row `i` from `buf`, which must be `row_length` bytes.
    pub fn write_row(&mut self, i: u32, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.row_offset(i)))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Reads only the key field of row `i` into `buf`, which must be
    /// `key_width` bytes.
    pub fn read_key(&mut self, i: u32, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.key_width);
        self.file.seek(SeekFrom::Start(self.row_offset(i)))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Updates the row count and persists the four-byte counter.
    pub fn set_row_count(&mut self, n: u32) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.data_offset - 4))?;
        self.file.write_u32::<LittleEndian>(n)?;
        self.row_count = n;
        Ok(())
    }

    /// Truncates the file to `len` bytes.
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }
}
