//! Data-cell controllers: byte-stream views over rows.
//!
//! A read cell bounds its reader to the row's `filled` region. A mutable
//! cell adds a positional writer that grows the backing row transparently:
//! when a write runs past `capacity` the live bytes are copied into a fresh
//! larger row, the old row is freed and the owning record's pointer is
//! rewritten. Every change to `filled` is mirrored to disk immediately.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use byteorder::{BigEndian, WriteBytesExt};
use md5::{Digest, Md5};

use crate::error::{Error, Result};
use crate::record::{FileRecord, FolderRecord, Record, RowRecord, HEADER_EXTENT, MD5_LEN};
use crate::store::Store;

/// Pass as the writer offset to continue at the end of the filled region.
pub const APPEND: i64 = -1;

/// The record whose pointer field references the row.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CellOwner {
  FileContent { file_offset: u64 },
  FolderChildren { folder_offset: u64 },
}

/// Read view over a row's filled payload.
pub struct DataCell {
  store: Arc<Store>,
  row: RowRecord,
}

impl DataCell {
  pub(crate) fn new(store: Arc<Store>, row: RowRecord) -> Self {
    Self { store, row }
  }

  pub fn row(&self) -> &RowRecord {
    &self.row
  }

  pub fn len(&self) -> u64 {
    self.row.filled
  }

  pub fn is_empty(&self) -> bool {
    self.row.filled == 0
  }

  /// A reader bounded to the first `filled` bytes of the row.
  pub fn input(&self) -> Result<RowReader> {
    RowReader::open(&self.store, &self.row)
  }

  pub fn read_to_vec(&self) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(self.row.filled as usize);
    self.input()?.read_to_end(&mut bytes)?;
    Ok(bytes)
  }

  /// MD5 of the filled region, computed by streaming.
  pub fn digest(&self) -> Result<[u8; MD5_LEN]> {
    let mut reader = self.input()?;
    let mut hasher = Md5::new();
    let mut buf = [0u8; 8192];

    loop {
      let n = reader.read(&mut buf)?;
      if n == 0 {
        break;
      }
      hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize().into())
  }
}

/// Length-bounded reader over a row payload; owns its file handle.
pub struct RowReader {
  inner: std::io::Take<std::fs::File>,
}

impl RowReader {
  fn open(store: &Store, row: &RowRecord) -> Result<Self> {
    let mut file = store.open_read()?;
    file.seek(SeekFrom::Start(row.payload_offset()))?;

    Ok(Self {
      inner: file.take(row.filled),
    })
  }
}

impl Read for RowReader {
  fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
    self.inner.read(buf)
  }
}

/// Mutable view over a row; grows the backing row on demand.
pub struct MutableDataCell {
  store: Arc<Store>,
  row: RowRecord,
  owner: CellOwner,
}

impl MutableDataCell {
  pub(crate) fn new(store: Arc<Store>, row: RowRecord, owner: CellOwner) -> Self {
    Self { store, row, owner }
  }

  pub fn row(&self) -> &RowRecord {
    &self.row
  }

  pub fn len(&self) -> u64 {
    self.row.filled
  }

  pub fn is_empty(&self) -> bool {
    self.row.filled == 0
  }

  pub fn capacity(&self) -> u64 {
    self.row.capacity
  }

  pub fn input(&self) -> Result<RowReader> {
    RowReader::open(&self.store, &self.row)
  }

  /// Sets `filled` to zero. Capacity is kept.
  pub fn clear(&mut self) -> Result<()> {
    self.set_filled(0)
  }

  /// A positional writer starting at `offset`.
  ///
  /// [`APPEND`] resolves to the current end of the filled region; positive
  /// offsets are clamped into `[0, filled]`.
  pub fn writer(self, offset: i64) -> Result<RowWriter> {
    let position = if offset < 0 {
      self.row.filled
    } else {
      (offset as u64).min(self.row.filled)
    };

    Ok(RowWriter {
      cell: self,
      position,
    })
  }

  /// Releases the backing row.
  pub fn free(self) -> Result<()> {
    self.store.make_free(self.row.offset)
  }

  /// Mirrors a new `filled` value to the on-disk row.
  fn set_filled(&mut self, filled: u64) -> Result<()> {
    let mut file = self.store.open_rw()?;
    file.seek(SeekFrom::Start(self.row.offset + HEADER_EXTENT))?;
    file.write_i64::<BigEndian>(filled as i64)?;
    self.row.filled = filled;
    Ok(())
  }

  /// Moves the cell onto a fresh row of at least `min_payload` capacity,
  /// carrying the filled bytes over and rewriting the owner's pointer.
  fn grow_to(&mut self, min_payload: u64) -> Result<()> {
    let fresh = self.store.fresh_row(min_payload)?;

    {
      let mut src = self.store.open_read()?;
      src.seek(SeekFrom::Start(self.row.payload_offset()))?;
      let mut src = src.take(self.row.filled);

      let mut dst = self.store.open_rw()?;
      dst.seek(SeekFrom::Start(fresh.payload_offset()))?;

      std::io::copy(&mut src, &mut dst)?;
    }

    let old = self.row;
    self.row = fresh;
    self.set_filled(old.filled)?;

    self.store.make_free(old.offset)?;

    match self.owner {
      CellOwner::FileContent { file_offset } => {
        let file = self.read_owner_file(file_offset)?;
        self.store.write_record(&Record::File(FileRecord {
          content: self.row.offset as i64,
          ..file
        }))?;
      }
      CellOwner::FolderChildren { folder_offset } => {
        let folder = self.read_owner_folder(folder_offset)?;
        self.store.write_record(&Record::Folder(FolderRecord {
          children: self.row.offset as i64,
          ..folder
        }))?;
      }
    }

    log::debug!(
      "row at offset {} grown into offset {} ({} -> {} bytes)",
      old.offset,
      self.row.offset,
      old.capacity,
      self.row.capacity
    );

    Ok(())
  }

  fn read_owner_file(&self, offset: u64) -> Result<FileRecord> {
    match self.store.read_record(offset)? {
      Record::File(file) => Ok(file),
      _ => Err(Error::Parse(format!(
        "cell owner at offset {offset} is not a file record"
      ))),
    }
  }

  fn read_owner_folder(&self, offset: u64) -> Result<FolderRecord> {
    match self.store.read_record(offset)? {
      Record::Folder(folder) => Ok(folder),
      _ => Err(Error::Parse(format!(
        "cell owner at offset {offset} is not a folder record"
      ))),
    }
  }
}

/// Positional writer over a mutable cell.
///
/// `filled` grows monotonically to the furthest byte written; writes inside
/// the existing region leave the length untouched.
pub struct RowWriter {
  cell: MutableDataCell,
  position: u64,
}

impl RowWriter {
  pub fn position(&self) -> u64 {
    self.position
  }

  pub fn into_cell(self) -> MutableDataCell {
    self.cell
  }
}

impl Write for RowWriter {
  fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
    if buf.is_empty() {
      return Ok(0);
    }

    let end = self.position + buf.len() as u64;

    if end > self.cell.row.capacity {
      self.cell.grow_to(end).map_err(into_io)?;
    }

    let mut file = self.cell.store.open_rw().map_err(into_io)?;
    file.seek(SeekFrom::Start(self.cell.row.payload_offset() + self.position))?;
    file.write_all(buf)?;

    self.position = end;

    if end > self.cell.row.filled {
      self.cell.set_filled(end).map_err(into_io)?;
    }

    Ok(buf.len())
  }

  fn flush(&mut self) -> std::io::Result<()> {
    Ok(())
  }
}

fn into_io(e: Error) -> std::io::Error {
  match e {
    Error::Io(io) => io,
    other => std::io::Error::other(other),
  }
}
