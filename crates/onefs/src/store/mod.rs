//! The record store: random-access read/write of container records.
//!
//! The store owns the container path and the free-space allocator. File
//! handles are opened per operation and closed on drop; no handle cache is
//! kept. Callers are expected to serialise access through a grant; the
//! store itself performs no locking beyond the allocator mutex.

mod cell;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use md5::{Digest, Md5};

use crate::alloc::{Allocator, Area};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::node::{FileLoader, FolderLoader};
use crate::path::{check_name, FsPath, NameString};
use crate::record::{
  write_row_with, FileRecord, FolderRecord, Record, RowRecord, FILE_PAYLOAD, FOLDER_PAYLOAD,
  HEADER_EXTENT, MD5_LEN, NULL_PTR, ROW_PREFIX,
};

pub use cell::{DataCell, MutableDataCell, RowReader, RowWriter, APPEND};

pub(crate) use cell::CellOwner;

/// Offset of the root folder record.
pub const ROOT_OFFSET: u64 = 0;

/// Payload capacity requested for a new file's content row.
const INITIAL_CONTENT_CAPACITY: u64 = 20;
/// Payload capacity requested for a new folder's children row: ten pointers.
const INITIAL_CHILDREN_CAPACITY: u64 = 10 * 8;

pub struct Store {
  container: PathBuf,
  clock: Arc<dyn Clock>,
  allocator: Mutex<Allocator>,
}

impl Store {
  pub fn open(container: impl Into<PathBuf>) -> Result<Arc<Self>> {
    Self::open_with_clock(container, Arc::new(SystemClock))
  }

  /// Opens (or creates) the container at `container`.
  ///
  /// A missing or zero-length container is formatted with a root folder at
  /// offset 0. An existing container is scanned in full before the store
  /// is handed out.
  pub fn open_with_clock(container: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Arc<Self>> {
    let container = container.into();

    if container.is_dir() {
      return Err(Error::Write(format!(
        "container path is a directory: {}",
        container.display()
      )));
    }

    let store = Arc::new(Self {
      container,
      clock,
      allocator: Mutex::new(Allocator::new()),
    });

    let fresh = match std::fs::metadata(&store.container) {
      Ok(meta) => meta.len() == 0,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
      Err(e) => return Err(e.into()),
    };

    if fresh {
      store.format()?;
    }

    store.scan()?;

    Ok(store)
  }

  pub fn container(&self) -> &Path {
    &self.container
  }

  /// Writes a fresh root folder and its empty children row.
  fn format(&self) -> Result<()> {
    log::info!("formatting container {}", self.container.display());

    let mut file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&self.container)?;

    let (folder_area, row_area) = {
      let mut allocator = self.allocator();
      allocator.clear();
      let folder_area = allocator.allocate(HEADER_EXTENT + FOLDER_PAYLOAD as u64, true);
      let row_area = allocator.allocate(
        HEADER_EXTENT + ROW_PREFIX + INITIAL_CHILDREN_CAPACITY,
        false,
      );
      (folder_area, row_area)
    };

    let children = RowRecord {
      offset: row_area.start,
      filled: 0,
      capacity: row_area.size - HEADER_EXTENT - ROW_PREFIX,
    };

    let root = FolderRecord {
      offset: folder_area.start,
      name: NameString::default(),
      parent: NULL_PTR,
      children: children.offset as i64,
    };

    file.seek(SeekFrom::Start(root.offset))?;
    Record::Folder(root).write_to(&mut file)?;
    file.seek(SeekFrom::Start(children.offset))?;
    write_row_with(&mut file, &children, &[])?;
    file.sync_all()?;

    Ok(())
  }

  /// Re-reads the whole container, rebuilding the allocator state and
  /// checking parent/child linkage. Returns a loader for the root folder.
  pub fn scan(self: &Arc<Self>) -> Result<FolderLoader> {
    let file = self.open_read()?;
    let length = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut index: HashMap<u64, Record> = HashMap::new();

    {
      let mut allocator = self.allocator();
      allocator.clear();

      let mut position = 0u64;

      while let Some(record) = Record::parse_next(&mut reader, position)? {
        let area = Area::new(position, record.extent());

        match &record {
          Record::Free(_) => allocator.register_free(area),
          _ => allocator.register_used(area),
        }

        position = area.end();
        index.insert(record.offset(), record);
      }

      if position != length {
        return Err(Error::Parse(format!(
          "container has {} bytes of trailing garbage",
          length - position
        )));
      }
    }

    match index.get(&ROOT_OFFSET) {
      Some(Record::Folder(root)) if root.is_root() && root.name.is_empty() => {}
      _ => {
        return Err(Error::Parse(
          "container does not start with a root folder record".into(),
        ));
      }
    }

    for record in index.values() {
      let Record::Folder(folder) = record else {
        continue;
      };

      for child in self.children_offsets(folder)? {
        match index.get(&child) {
          Some(Record::File(f)) if f.parent == folder.offset as i64 => {}
          Some(Record::Folder(f)) if f.parent == folder.offset as i64 => {}
          Some(_) => {
            return Err(Error::Parse(format!(
              "child at offset {child} does not point back at folder offset {}",
              folder.offset
            )));
          }
          None => {
            return Err(Error::Parse(format!(
              "folder at offset {} lists dangling child offset {child}",
              folder.offset
            )));
          }
        }
      }
    }

    log::info!(
      "scanned {} records in {}",
      index.len(),
      self.container.display()
    );

    Ok(self.folder_loader(FsPath::root()))
  }

  // ---- record primitives ----

  pub fn read_record(&self, offset: u64) -> Result<Record> {
    let mut file = self.open_read()?;
    file.seek(SeekFrom::Start(offset))?;
    let mut reader = BufReader::new(file);

    Record::parse_next(&mut reader, offset)?
      .ok_or_else(|| Error::Parse(format!("no record at offset {offset}")))
  }

  /// Serialises the record in place at its own offset.
  pub fn write_record(&self, record: &Record) -> Result<()> {
    log::debug!("rewriting record at offset {}", record.offset());

    let mut file = self.open_rw()?;
    file.seek(SeekFrom::Start(record.offset()))?;
    record.write_to(&mut file)
  }

  /// Flips the record at `offset` to a free hole.
  ///
  /// Only the header is rewritten; payload bytes stay behind, the header
  /// carries the true size.
  pub fn make_free(&self, offset: u64) -> Result<()> {
    let area = self
      .allocator()
      .unregister_used(offset)
      .ok_or_else(|| Error::Write(format!("no live record at offset {offset} to free")))?;

    let hole = crate::record::FreeRecord {
      offset,
      capacity: area.size - HEADER_EXTENT,
    };

    let mut file = self.open_rw()?;
    file.seek(SeekFrom::Start(offset))?;
    Record::Free(hole).write_to(&mut file)?;

    self.allocator().register_free(area);
    log::debug!("freed record at offset {offset} ({} bytes)", area.size);

    Ok(())
  }

  // ---- lookup ----

  /// Walks `path` from the root and returns the record it names.
  pub fn find(&self, path: &FsPath) -> Result<Record> {
    let mut current = self.read_folder(ROOT_OFFSET)?;
    let mut walked = FsPath::root();
    let depth = path.depth();

    for (ix, component) in path.components().enumerate() {
      let last = ix + 1 == depth;

      match self.lookup_child(&current, component)? {
        Some(record) if last => return Ok(record),
        Some(Record::Folder(folder)) => {
          walked = walked.add_folder(component)?;
          current = folder;
        }
        Some(_) => {
          // A file sits where the walk needs a directory.
          return Err(Error::DirectoryNotFound(
            walked.add_folder(component)?.to_string(),
          ));
        }
        None => {
          return Err(if last && !path.is_folder() {
            Error::FileNotFound(path.to_string())
          } else if last {
            Error::DirectoryNotFound(path.to_string())
          } else {
            Error::DirectoryNotFound(walked.add_folder(component)?.to_string())
          });
        }
      }
    }

    Ok(Record::Folder(current))
  }

  pub fn find_folder(&self, path: &FsPath) -> Result<FolderRecord> {
    match self.find(path)? {
      Record::Folder(folder) => Ok(folder),
      _ => Err(Error::DirectoryNotFound(path.as_folder().to_string())),
    }
  }

  pub fn find_file(&self, path: &FsPath) -> Result<FileRecord> {
    match self.find(path)? {
      Record::File(file) => Ok(file),
      _ => Err(Error::FileNotFound(path.to_string())),
    }
  }

  pub(crate) fn lookup_child(&self, folder: &FolderRecord, name: &str) -> Result<Option<Record>> {
    for offset in self.children_offsets(folder)? {
      let record = self.read_record(offset)?;
      if record.name() == name {
        return Ok(Some(record));
      }
    }

    Ok(None)
  }

  // ---- children rows ----

  /// Direct children of `folder`, in row order.
  ///
  /// Traversals must run inside a read grant; a concurrent `add_child` or
  /// `remove_child` invalidates the listing.
  pub fn children(&self, folder: &FolderRecord) -> Result<Vec<Record>> {
    let mut records = vec![];

    for offset in self.children_offsets(folder)? {
      let record = self.read_record(offset)?;

      match record {
        Record::File(_) | Record::Folder(_) => records.push(record),
        _ => {
          return Err(Error::Parse(format!(
            "folder at offset {} lists a non-entry child at offset {offset}",
            folder.offset
          )));
        }
      }
    }

    Ok(records)
  }

  pub(crate) fn children_offsets(&self, folder: &FolderRecord) -> Result<Vec<u64>> {
    if folder.children == NULL_PTR {
      return Ok(vec![]);
    }

    let row = self.read_row(folder.children as u64)?;

    if row.filled % 8 != 0 {
      return Err(Error::Parse(format!(
        "children row at offset {} holds {} bytes, not a pointer array",
        row.offset, row.filled
      )));
    }

    let mut file = self.open_read()?;
    file.seek(SeekFrom::Start(row.payload_offset()))?;
    let mut reader = BufReader::new(file).take(row.filled);

    let mut offsets = Vec::with_capacity((row.filled / 8) as usize);

    for _ in 0..row.filled / 8 {
      let pointer = reader.read_i64::<BigEndian>()?;

      if pointer < 0 {
        return Err(Error::Parse(format!(
          "children row at offset {} holds a null child pointer",
          row.offset
        )));
      }

      offsets.push(pointer as u64);
    }

    Ok(offsets)
  }

  /// Appends `child` to the folder's children row, growing it on demand.
  pub fn add_child(self: &Arc<Self>, folder: &FolderRecord, child: u64) -> Result<()> {
    let cell = self.children_cell(folder)?;
    let mut writer = cell.writer(APPEND)?;
    writer.write_i64::<BigEndian>(child as i64)?;
    Ok(())
  }

  /// Drops `child` from the folder's children row, rewriting the survivors.
  pub fn remove_child(self: &Arc<Self>, folder: &FolderRecord, child: u64) -> Result<()> {
    let offsets = self.children_offsets(folder)?;

    let mut cell = self.children_cell(folder)?;
    cell.clear()?;

    let survivors: Vec<u64> = offsets.into_iter().filter(|&o| o != child).collect();

    if !survivors.is_empty() {
      let mut writer = cell.writer(APPEND)?;
      for offset in survivors {
        writer.write_i64::<BigEndian>(offset as i64)?;
      }
    }

    Ok(())
  }

  fn children_cell(self: &Arc<Self>, folder: &FolderRecord) -> Result<MutableDataCell> {
    // Re-read; the children pointer may have moved since `folder` was read.
    let folder = self.read_folder(folder.offset)?;

    if folder.children == NULL_PTR {
      return Err(Error::Parse(format!(
        "folder record at offset {} has no children row",
        folder.offset
      )));
    }

    let row = self.read_row(folder.children as u64)?;

    Ok(MutableDataCell::new(
      Arc::clone(self),
      row,
      CellOwner::FolderChildren {
        folder_offset: folder.offset,
      },
    ))
  }

  // ---- file operations ----

  pub fn create_file(self: &Arc<Self>, path: &FsPath) -> Result<FileRecord> {
    let parent = self.find_folder(&path.parent())?;

    if let Some(existing) = self.lookup_child(&parent, path.name())? {
      return Err(entry_exists(&existing, path));
    }

    let content = self.fresh_row(INITIAL_CONTENT_CAPACITY)?;

    let area = self
      .allocator()
      .allocate(HEADER_EXTENT + FILE_PAYLOAD as u64, true);
    let now = self.clock.now();

    let record = FileRecord {
      offset: area.start,
      name: check_name(path.name())?,
      parent: parent.offset as i64,
      content: content.offset as i64,
      created: now,
      modified: now,
      md5: md5_of(&[]),
    };

    self.write_record(&Record::File(record.clone()))?;
    self.add_child(&parent, record.offset)?;

    log::info!("created file {} at offset {}", path, record.offset);

    Ok(record)
  }

  pub fn delete_file(self: &Arc<Self>, path: &FsPath) -> Result<()> {
    let file = self.find_file(path)?;
    let parent = self.read_folder(file.parent as u64)?;

    self.remove_child(&parent, file.offset)?;
    self.make_free(file.offset)?;

    if file.content != NULL_PTR {
      self.make_free(file.content as u64)?;
    }

    log::info!("deleted file {path}");

    Ok(())
  }

  /// Rewrites the file record in place with the destination's name and
  /// parent; the content row is untouched.
  pub fn move_file(self: &Arc<Self>, src: &FsPath, dst: &FsPath) -> Result<()> {
    let file = self.find_file(src)?;
    let old_parent = self.read_folder(file.parent as u64)?;
    let new_parent = self.find_folder(&dst.parent())?;

    let renamed = FileRecord {
      name: check_name(dst.name())?,
      parent: new_parent.offset as i64,
      ..file.clone()
    };

    self.write_record(&Record::File(renamed))?;
    self.remove_child(&old_parent, file.offset)?;
    self.add_child(&new_parent, file.offset)?;

    log::info!("moved file {src} to {dst}");

    Ok(())
  }

  pub fn set_md5(&self, path: &FsPath, md5: [u8; MD5_LEN]) -> Result<()> {
    let file = self.find_file(path)?;

    let updated = FileRecord {
      md5,
      modified: self.clock.now(),
      ..file
    };

    self.write_record(&Record::File(updated))
  }

  // ---- folder operations ----

  pub fn create_folder(self: &Arc<Self>, path: &FsPath) -> Result<FolderRecord> {
    let parent = self.find_folder(&path.parent())?;

    if let Some(existing) = self.lookup_child(&parent, path.name())? {
      return Err(entry_exists(&existing, path));
    }

    let children = self.fresh_row(INITIAL_CHILDREN_CAPACITY)?;

    let area = self
      .allocator()
      .allocate(HEADER_EXTENT + FOLDER_PAYLOAD as u64, true);

    let record = FolderRecord {
      offset: area.start,
      name: check_name(path.name())?,
      parent: parent.offset as i64,
      children: children.offset as i64,
    };

    self.write_record(&Record::Folder(record.clone()))?;
    self.add_child(&parent, record.offset)?;

    log::info!("created folder {} at offset {}", path, record.offset);

    Ok(record)
  }

  /// Frees the folder record and its children row.
  ///
  /// Descendants are not cascaded here; the service walks the tree and
  /// deletes them through its own primitives first.
  pub fn delete_folder(self: &Arc<Self>, path: &FsPath) -> Result<()> {
    let folder = self.find_folder(path)?;

    if folder.is_root() {
      return Err(Error::Write("cannot delete the root folder".into()));
    }

    let parent = self.read_folder(folder.parent as u64)?;
    self.remove_child(&parent, folder.offset)?;

    if folder.children != NULL_PTR {
      self.make_free(folder.children as u64)?;
    }

    self.make_free(folder.offset)?;

    log::info!("deleted folder {path}");

    Ok(())
  }

  pub fn move_folder(self: &Arc<Self>, src: &FsPath, dst: &FsPath) -> Result<()> {
    let folder = self.find_folder(src)?;

    if folder.is_root() {
      return Err(Error::Write("cannot move the root folder".into()));
    }

    let old_parent = self.read_folder(folder.parent as u64)?;
    let new_parent = self.find_folder(&dst.parent())?;

    let renamed = FolderRecord {
      name: check_name(dst.name())?,
      parent: new_parent.offset as i64,
      ..folder.clone()
    };

    self.write_record(&Record::Folder(renamed))?;
    self.remove_child(&old_parent, folder.offset)?;
    self.add_child(&new_parent, folder.offset)?;

    log::info!("moved folder {src} to {dst}");

    Ok(())
  }

  // ---- data cells and loaders ----

  /// Read view of the file's content row.
  pub fn data_cell(self: &Arc<Self>, path: &FsPath) -> Result<DataCell> {
    let file = self.find_file(path)?;
    let row = self.content_row(&file)?;
    Ok(DataCell::new(Arc::clone(self), row))
  }

  /// Mutable view of the file's content row; growth rewrites the file's
  /// content pointer.
  pub fn mutable_data_cell(self: &Arc<Self>, path: &FsPath) -> Result<MutableDataCell> {
    let file = self.find_file(path)?;
    let row = self.content_row(&file)?;

    Ok(MutableDataCell::new(
      Arc::clone(self),
      row,
      CellOwner::FileContent {
        file_offset: file.offset,
      },
    ))
  }

  fn content_row(&self, file: &FileRecord) -> Result<RowRecord> {
    if file.content == NULL_PTR {
      return Err(Error::Parse(format!(
        "file record at offset {} has no content row",
        file.offset
      )));
    }

    self.read_row(file.content as u64)
  }

  pub fn file_loader(self: &Arc<Self>, path: FsPath) -> FileLoader {
    FileLoader::new(Arc::clone(self), path)
  }

  pub fn folder_loader(self: &Arc<Self>, path: FsPath) -> FolderLoader {
    FolderLoader::new(Arc::clone(self), path.as_folder())
  }

  // ---- internals shared with the cell controllers ----

  /// Allocates and zero-fills a new row of at least `min_payload` bytes.
  pub(crate) fn fresh_row(&self, min_payload: u64) -> Result<RowRecord> {
    let area = self
      .allocator()
      .allocate(HEADER_EXTENT + ROW_PREFIX + min_payload, false);

    let row = RowRecord {
      offset: area.start,
      filled: 0,
      capacity: area.size - HEADER_EXTENT - ROW_PREFIX,
    };

    let mut file = self.open_rw()?;
    file.seek(SeekFrom::Start(row.offset))?;
    write_row_with(&mut file, &row, &[])?;

    Ok(row)
  }

  pub(crate) fn read_folder(&self, offset: u64) -> Result<FolderRecord> {
    match self.read_record(offset)? {
      Record::Folder(folder) => Ok(folder),
      _ => Err(Error::Parse(format!(
        "expected a folder record at offset {offset}"
      ))),
    }
  }

  pub(crate) fn read_row(&self, offset: u64) -> Result<RowRecord> {
    match self.read_record(offset)? {
      Record::Row(row) => Ok(row),
      _ => Err(Error::Parse(format!(
        "expected a row record at offset {offset}"
      ))),
    }
  }

  pub(crate) fn open_read(&self) -> Result<File> {
    File::open(&self.container).map_err(Into::into)
  }

  pub(crate) fn open_rw(&self) -> Result<File> {
    OpenOptions::new()
      .read(true)
      .write(true)
      .open(&self.container)
      .map_err(Into::into)
  }

  fn allocator(&self) -> MutexGuard<'_, Allocator> {
    self.allocator.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl std::fmt::Debug for Store {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Store")
      .field("container", &self.container)
      .finish_non_exhaustive()
  }
}

pub(crate) fn md5_of(data: &[u8]) -> [u8; MD5_LEN] {
  Md5::digest(data).into()
}

fn entry_exists(record: &Record, path: &FsPath) -> Error {
  match record {
    Record::Folder(_) => Error::DirectoryAlreadyExists(path.as_folder().to_string()),
    _ => Error::FileAlreadyExists(path.to_string()),
  }
}
