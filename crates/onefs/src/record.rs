//! Typed records of the container stream.
//!
//! Every record starts with a one-byte type tag and a big-endian `i64`
//! payload size; the four record kinds and their exact layouts are fixed
//! here. Offsets stored in pointer fields are absolute container offsets,
//! `-1` meaning null.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::path::{check_name, NameString};

/// Type tag plus payload size.
pub const HEADER_EXTENT: u64 = 1 + 8;
/// `filled` and `capacity` fields preceding a row's payload bytes.
pub const ROW_PREFIX: u64 = 8 + 8;
/// name[30], parent, content, created, modified, digest length, digest.
pub const FILE_PAYLOAD: i64 = 30 + 8 + 8 + 8 + 8 + 4 + 16;
/// name[30], parent, children.
pub const FOLDER_PAYLOAD: i64 = 30 + 8 + 8;

pub const NAME_FIELD: usize = 30;
pub const MD5_LEN: usize = 16;
pub const NULL_PTR: i64 = -1;

const TYPE_FREE: u8 = 0;
const TYPE_ROW: u8 = 1;
const TYPE_FILE: u8 = 2;
const TYPE_FOLDER: u8 = 3;

/// An unused hole; `capacity` is the payload size its header advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRecord {
  pub offset: u64,
  pub capacity: u64,
}

/// A raw data cell. The first `filled` of `capacity` payload bytes are live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRecord {
  pub offset: u64,
  pub filled: u64,
  pub capacity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
  pub offset: u64,
  pub name: NameString,
  pub parent: i64,
  pub content: i64,
  pub created: i64,
  pub modified: i64,
  pub md5: [u8; MD5_LEN],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRecord {
  pub offset: u64,
  pub name: NameString,
  pub parent: i64,
  pub children: i64,
}

impl FreeRecord {
  pub fn extent(&self) -> u64 {
    HEADER_EXTENT + self.capacity
  }
}

impl RowRecord {
  pub fn extent(&self) -> u64 {
    HEADER_EXTENT + ROW_PREFIX + self.capacity
  }

  /// Container offset of the first payload byte.
  pub fn payload_offset(&self) -> u64 {
    self.offset + HEADER_EXTENT + ROW_PREFIX
  }
}

impl FileRecord {
  pub fn extent(&self) -> u64 {
    HEADER_EXTENT + FILE_PAYLOAD as u64
  }
}

impl FolderRecord {
  pub fn extent(&self) -> u64 {
    HEADER_EXTENT + FOLDER_PAYLOAD as u64
  }

  pub fn is_root(&self) -> bool {
    self.parent == NULL_PTR
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
  Free(FreeRecord),
  Row(RowRecord),
  File(FileRecord),
  Folder(FolderRecord),
}

impl Record {
  pub fn offset(&self) -> u64 {
    match self {
      Record::Free(r) => r.offset,
      Record::Row(r) => r.offset,
      Record::File(r) => r.offset,
      Record::Folder(r) => r.offset,
    }
  }

  /// Total on-disk size of the record, header included.
  pub fn extent(&self) -> u64 {
    match self {
      Record::Free(r) => r.extent(),
      Record::Row(r) => r.extent(),
      Record::File(r) => r.extent(),
      Record::Folder(r) => r.extent(),
    }
  }

  pub fn name(&self) -> &str {
    match self {
      Record::File(r) => r.name.as_str(),
      Record::Folder(r) => r.name.as_str(),
      _ => "",
    }
  }

  pub fn as_file(&self) -> Option<&FileRecord> {
    match self {
      Record::File(r) => Some(r),
      _ => None,
    }
  }

  pub fn as_folder(&self) -> Option<&FolderRecord> {
    match self {
      Record::Folder(r) => Some(r),
      _ => None,
    }
  }

  pub fn as_row(&self) -> Option<&RowRecord> {
    match self {
      Record::Row(r) => Some(r),
      _ => None,
    }
  }

  /// Parses the record starting at container offset `position`.
  ///
  /// Returns `None` at a clean end of stream. Row and free payloads are
  /// consumed but not retained; row payload bytes are read through data
  /// cells instead.
  pub fn parse_next<R: Read>(input: &mut R, position: u64) -> Result<Option<Record>> {
    let mut tag = [0u8; 1];

    match input.read_exact(&mut tag) {
      Ok(()) => {}
      Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
      Err(e) => return Err(e.into()),
    }

    let data_size = input
      .read_i64::<BigEndian>()
      .map_err(|e| map_eof(e, position))?;

    if data_size < 0 {
      return Err(Error::Parse(format!(
        "negative payload size {data_size} at offset {position}"
      )));
    }

    let record = match tag[0] {
      TYPE_FREE => {
        skip(input, data_size as u64, position)?;

        Record::Free(FreeRecord {
          offset: position,
          capacity: data_size as u64,
        })
      }
      TYPE_ROW => {
        if (data_size as u64) < ROW_PREFIX {
          return Err(Error::Parse(format!(
            "row payload of {data_size} bytes at offset {position} cannot hold its prefix"
          )));
        }

        let filled = input
          .read_i64::<BigEndian>()
          .map_err(|e| map_eof(e, position))?;
        let capacity = input
          .read_i64::<BigEndian>()
          .map_err(|e| map_eof(e, position))?;

        if capacity != data_size - ROW_PREFIX as i64 {
          return Err(Error::Parse(format!(
            "row at offset {position} claims capacity {capacity} inside {data_size} payload bytes"
          )));
        }

        if filled < 0 || filled > capacity {
          return Err(Error::Parse(format!(
            "row at offset {position} has filled {filled} out of capacity {capacity}"
          )));
        }

        skip(input, capacity as u64, position)?;

        Record::Row(RowRecord {
          offset: position,
          filled: filled as u64,
          capacity: capacity as u64,
        })
      }
      TYPE_FILE => {
        if data_size != FILE_PAYLOAD {
          return Err(Error::Parse(format!(
            "file record at offset {position} has payload {data_size}, expected {FILE_PAYLOAD}"
          )));
        }

        let name = read_name(input, position)?;
        let parent = input
          .read_i64::<BigEndian>()
          .map_err(|e| map_eof(e, position))?;
        let content = input
          .read_i64::<BigEndian>()
          .map_err(|e| map_eof(e, position))?;
        let created = input
          .read_i64::<BigEndian>()
          .map_err(|e| map_eof(e, position))?;
        let modified = input
          .read_i64::<BigEndian>()
          .map_err(|e| map_eof(e, position))?;

        let digest_len = input
          .read_i32::<BigEndian>()
          .map_err(|e| map_eof(e, position))?;
        if digest_len != MD5_LEN as i32 {
          return Err(Error::Parse(format!(
            "file record at offset {position} carries a {digest_len}-byte digest"
          )));
        }

        let mut md5 = [0u8; MD5_LEN];
        input.read_exact(&mut md5).map_err(|e| map_eof(e, position))?;

        Record::File(FileRecord {
          offset: position,
          name,
          parent,
          content,
          created,
          modified,
          md5,
        })
      }
      TYPE_FOLDER => {
        if data_size != FOLDER_PAYLOAD {
          return Err(Error::Parse(format!(
            "folder record at offset {position} has payload {data_size}, expected {FOLDER_PAYLOAD}"
          )));
        }

        let name = read_name(input, position)?;
        let parent = input
          .read_i64::<BigEndian>()
          .map_err(|e| map_eof(e, position))?;
        let children = input
          .read_i64::<BigEndian>()
          .map_err(|e| map_eof(e, position))?;

        Record::Folder(FolderRecord {
          offset: position,
          name,
          parent,
          children,
        })
      }
      other => {
        return Err(Error::Parse(format!(
          "unknown record type {other} at offset {position}"
        )));
      }
    };

    Ok(Some(record))
  }

  /// Emits the header and fixed payload.
  ///
  /// Free and row payload bytes are not touched; a freshly allocated row is
  /// emitted with [`write_row_with`] instead.
  pub fn write_to<W: Write>(&self, output: &mut W) -> Result<()> {
    match self {
      Record::Free(r) => {
        output.write_u8(TYPE_FREE)?;
        output.write_i64::<BigEndian>(r.capacity as i64)?;
      }
      Record::Row(r) => {
        output.write_u8(TYPE_ROW)?;
        output.write_i64::<BigEndian>((ROW_PREFIX + r.capacity) as i64)?;
        output.write_i64::<BigEndian>(r.filled as i64)?;
        output.write_i64::<BigEndian>(r.capacity as i64)?;
      }
      Record::File(r) => {
        output.write_u8(TYPE_FILE)?;
        output.write_i64::<BigEndian>(FILE_PAYLOAD)?;
        output.write_all(&encode_name(&r.name))?;
        output.write_i64::<BigEndian>(r.parent)?;
        output.write_i64::<BigEndian>(r.content)?;
        output.write_i64::<BigEndian>(r.created)?;
        output.write_i64::<BigEndian>(r.modified)?;
        output.write_i32::<BigEndian>(MD5_LEN as i32)?;
        output.write_all(&r.md5)?;
      }
      Record::Folder(r) => {
        output.write_u8(TYPE_FOLDER)?;
        output.write_i64::<BigEndian>(FOLDER_PAYLOAD)?;
        output.write_all(&encode_name(&r.name))?;
        output.write_i64::<BigEndian>(r.parent)?;
        output.write_i64::<BigEndian>(r.children)?;
      }
    }

    Ok(())
  }
}

/// Emits a complete row: header, prefix, `filled` bytes of `data`, then
/// zero padding up to `capacity`.
pub fn write_row_with<W: Write>(output: &mut W, row: &RowRecord, data: &[u8]) -> Result<()> {
  Record::Row(*row).write_to(output)?;

  let live = data.len().min(row.filled as usize);
  output.write_all(&data[..live])?;

  let mut padding = row.capacity - live as u64;
  let zeros = [0u8; 4096];

  while padding > 0 {
    let chunk = padding.min(zeros.len() as u64) as usize;
    output.write_all(&zeros[..chunk])?;
    padding -= chunk as u64;
  }

  Ok(())
}

fn encode_name(name: &NameString) -> [u8; NAME_FIELD] {
  let mut field = [0u8; NAME_FIELD];
  let bytes = name.as_bytes();
  field[..bytes.len()].copy_from_slice(bytes);
  field
}

fn read_name<R: Read>(input: &mut R, position: u64) -> Result<NameString> {
  let mut field = [0u8; NAME_FIELD];
  input
    .read_exact(&mut field)
    .map_err(|e| map_eof(e, position))?;

  let end = field.iter().position(|&b| b == 0).unwrap_or(NAME_FIELD);

  let name = std::str::from_utf8(&field[..end])
    .map_err(|_| Error::Parse(format!("non-UTF-8 name at offset {position}")))?;

  if name.is_empty() {
    return Ok(NameString::default());
  }

  check_name(name).map_err(|_| Error::Parse(format!("invalid name at offset {position}")))
}

fn skip<R: Read>(input: &mut R, count: u64, position: u64) -> Result<()> {
  let copied = std::io::copy(&mut input.take(count), &mut std::io::sink())?;

  if copied != count {
    return Err(Error::Parse(format!(
      "record at offset {position} is cut short by {} bytes",
      count - copied
    )));
  }

  Ok(())
}

fn map_eof(e: std::io::Error, position: u64) -> Error {
  if e.kind() == std::io::ErrorKind::UnexpectedEof {
    Error::Parse(format!("truncated record at offset {position}"))
  } else {
    Error::Io(e)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  fn name(s: &str) -> NameString {
    check_name(s).unwrap()
  }

  #[test]
  fn file_record_round_trips() {
    let record = Record::File(FileRecord {
      offset: 0,
      name: name("notes.txt"),
      parent: 128,
      content: 512,
      created: 1_700_000_000_000,
      modified: 1_700_000_000_321,
      md5: [7; MD5_LEN],
    });

    let mut buf = vec![];
    record.write_to(&mut buf).unwrap();
    assert_eq!(buf.len() as u64, record.extent());

    let parsed = Record::parse_next(&mut Cursor::new(buf), 0).unwrap().unwrap();
    assert_eq!(parsed, record);
  }

  #[test]
  fn folder_record_round_trips() {
    let record = Record::Folder(FolderRecord {
      offset: 64,
      name: name("stuff"),
      parent: NULL_PTR,
      children: 200,
    });

    let mut buf = vec![];
    record.write_to(&mut buf).unwrap();
    assert_eq!(buf.len() as u64, record.extent());

    let parsed = Record::parse_next(&mut Cursor::new(buf), 64)
      .unwrap()
      .unwrap();
    assert_eq!(parsed, record);
  }

  #[test]
  fn row_round_trips_with_padding() {
    let row = RowRecord {
      offset: 0,
      filled: 5,
      capacity: 32,
    };

    let mut buf = vec![];
    write_row_with(&mut buf, &row, b"hello").unwrap();
    assert_eq!(buf.len() as u64, row.extent());
    // Payload beyond `filled` is zeroed.
    assert_eq!(&buf[buf.len() - 27..], &[0u8; 27][..]);

    let parsed = Record::parse_next(&mut Cursor::new(buf), 0).unwrap().unwrap();
    assert_eq!(parsed, Record::Row(row));
  }

  #[test]
  fn empty_stream_is_none() {
    assert!(Record::parse_next(&mut Cursor::new(vec![]), 0)
      .unwrap()
      .is_none());
  }

  #[test]
  fn rejects_unknown_type() {
    let buf = vec![9u8, 0, 0, 0, 0, 0, 0, 0, 0];
    assert!(matches!(
      Record::parse_next(&mut Cursor::new(buf), 0),
      Err(Error::Parse(_))
    ));
  }

  #[test]
  fn rejects_truncated_header() {
    let buf = vec![TYPE_FILE, 0, 0];
    assert!(matches!(
      Record::parse_next(&mut Cursor::new(buf), 0),
      Err(Error::Parse(_))
    ));
  }

  #[test]
  fn rejects_overfilled_row() {
    let row = RowRecord {
      offset: 0,
      filled: 4,
      capacity: 4,
    };

    let mut buf = vec![];
    write_row_with(&mut buf, &row, b"data").unwrap();
    // Corrupt `filled` beyond `capacity`.
    buf[9..17].copy_from_slice(&100i64.to_be_bytes());

    assert!(matches!(
      Record::parse_next(&mut Cursor::new(buf), 0),
      Err(Error::Parse(_))
    ));
  }

  #[test]
  fn rejects_wrong_digest_length() {
    let record = Record::File(FileRecord {
      offset: 0,
      name: name("f"),
      parent: 0,
      content: 0,
      created: 0,
      modified: 0,
      md5: [0; MD5_LEN],
    });

    let mut buf = vec![];
    record.write_to(&mut buf).unwrap();
    // digest_len sits right before the digest bytes.
    let at = buf.len() - MD5_LEN - 4;
    buf[at..at + 4].copy_from_slice(&20i32.to_be_bytes());

    assert!(matches!(
      Record::parse_next(&mut Cursor::new(buf), 0),
      Err(Error::Parse(_))
    ));
  }
}
