//! The logical filesystem service.
//!
//! Two capability surfaces over a navigator-produced cursor: the read
//! surface walks and verifies, the write surface mutates. Both are trait
//! sets with default implementations so any context that can name its
//! store and current folder gets the full service for free.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::import::Importer;
use crate::node::{FileLoader, FolderLoader, FolderNode, Loadable};
use crate::path::FsPath;
use crate::record::Record;
use crate::store::{md5_of, RowReader, RowWriter, Store, APPEND};

/// Read-only operations over the current folder.
pub trait FolderReader {
  /// Store backing this scope.
  fn store(&self) -> Arc<Store>;

  /// Absolute folder-valued path of the current folder.
  fn current_path(&self) -> FsPath;

  fn current_loader(&self) -> FolderLoader {
    self.store().folder_loader(self.current_path())
  }

  fn current_folder(&self) -> Result<FolderNode> {
    self.current_loader().load()
  }

  /// Lazily walks files under the current folder whose absolute path
  /// string matches `pattern`.
  ///
  /// The traversal reads children rows as it advances, so the iterator
  /// must be drained inside the grant that produced it.
  fn find_files(&self, pattern: &str, recursive: bool) -> Result<FileWalk> {
    FileWalk::new(self.store(), self.current_path(), Some(pattern), recursive)
  }

  /// Opens the named file in the current folder for reading.
  fn input_stream(&self, name: &str) -> Result<RowReader> {
    let path = self.current_path().add_file(name)?;
    self.store().data_cell(&path)?.input()
  }

  fn read_file(&self, name: &str) -> Result<Vec<u8>> {
    let path = self.current_path().add_file(name)?;
    self.store().data_cell(&path)?.read_to_vec()
  }

  /// True iff every file under the current folder, recursively, matches
  /// its stored digest.
  fn validate(&self) -> Result<bool> {
    let store = self.store();

    for loader in FileWalk::new(store.clone(), self.current_path(), None, true)? {
      let loader = loader?;
      let node = loader.load()?;

      if store.data_cell(loader.path())?.digest()? != node.md5 {
        log::debug!("stale digest on {}", loader.path());
        return Ok(false);
      }
    }

    Ok(true)
  }
}

/// Mutating operations; extends the read surface.
pub trait FolderWriter: FolderReader {
  fn create_folder(&self, name: &str) -> Result<()> {
    let path = self.current_path().add_folder(name)?;
    self.store().create_folder(&path)?;
    Ok(())
  }

  /// Creates the named file with `data` as content; the digest is recorded
  /// at creation.
  fn create_file(&self, name: &str, data: &[u8]) -> Result<()> {
    let path = self.current_path().add_file(name)?;
    let store = self.store();

    store.create_file(&path)?;

    if !data.is_empty() {
      let mut writer = store.mutable_data_cell(&path)?.writer(APPEND)?;
      writer.write_all(data)?;
      store.set_md5(&path, md5_of(data))?;
    }

    Ok(())
  }

  fn delete_file(&self, name: &str) -> Result<()> {
    let path = self.current_path().add_file(name)?;
    self.store().delete_file(&path)
  }

  /// Deletes the named folder and everything under it.
  fn delete_folder(&self, name: &str) -> Result<()> {
    let path = self.current_path().add_folder(name)?;
    delete_tree(&self.store(), &path)
  }

  /// Resolves a move/copy destination.
  ///
  /// Returns the destination folder, the existing record at the final name
  /// when the destination spells one out, and the new name (absent when a
  /// trailing `/` keeps the source name).
  fn dest_folder_and_new_name(
    &self,
    destination: &str,
  ) -> Result<(FsPath, Option<Record>, Option<String>)> {
    let store = self.store();
    let path = FsPath::parse(destination)?.resolved_against(&self.current_path());

    if path.is_folder() || path.depth() == 0 {
      // Trailing slash: place under this folder, keep the source name.
      store.find_folder(&path)?;
      return Ok((path.as_folder(), None, None));
    }

    let parent = path.parent();
    let parent_record = store.find_folder(&parent)?;
    let existing = store.lookup_child(&parent_record, path.name())?;

    Ok((parent, existing, Some(path.name().to_string())))
  }

  fn move_file(&self, name: &str, destination: &str, overwrite: bool) -> Result<()> {
    let store = self.store();
    let src = self.current_path().add_file(name)?;
    store.find_file(&src)?;

    let (dest_folder, existing, new_name) = self.dest_folder_and_new_name(destination)?;
    let had_rename = new_name.is_some();
    let final_name = new_name.unwrap_or_else(|| name.to_string());
    let target = dest_folder.add_file(&final_name)?;

    if target.same_entry(&src) {
      return Ok(());
    }

    self.clear_target(&dest_folder, &final_name, existing, had_rename, overwrite)?;
    store.move_file(&src, &target)
  }

  fn move_folder(&self, name: &str, destination: &str, overwrite: bool) -> Result<()> {
    let store = self.store();
    let src = self.current_path().add_folder(name)?;
    store.find_folder(&src)?;

    let (dest_folder, existing, new_name) = self.dest_folder_and_new_name(destination)?;
    let had_rename = new_name.is_some();
    let final_name = new_name.unwrap_or_else(|| name.to_string());
    let target = dest_folder.add_folder(&final_name)?;

    if target.same_entry(&src) {
      return Ok(());
    }

    if target.starts_with(&src) {
      return Err(Error::Write(format!(
        "cannot move {src} into its own subtree"
      )));
    }

    self.clear_target(&dest_folder, &final_name, existing, had_rename, overwrite)?;
    store.move_folder(&src, &target)
  }

  fn copy_file(&self, name: &str, destination: &str, overwrite: bool) -> Result<()> {
    let store = self.store();
    let src = self.current_path().add_file(name)?;
    store.find_file(&src)?;

    let (dest_folder, existing, new_name) = self.dest_folder_and_new_name(destination)?;
    let had_rename = new_name.is_some();
    let final_name = new_name.unwrap_or_else(|| name.to_string());

    if dest_folder.add_file(&final_name)?.same_entry(&src) {
      return Ok(());
    }

    self.clear_target(&dest_folder, &final_name, existing, had_rename, overwrite)?;

    crate::import::CopyImporter.import_file(
      &store,
      &store.folder_loader(dest_folder),
      &src,
      Some(&final_name),
    )
  }

  fn copy_folder(&self, name: &str, destination: &str, overwrite: bool) -> Result<()> {
    let store = self.store();
    let src = self.current_path().add_folder(name)?;
    store.find_folder(&src)?;

    let (dest_folder, existing, new_name) = self.dest_folder_and_new_name(destination)?;
    let had_rename = new_name.is_some();
    let final_name = new_name.unwrap_or_else(|| name.to_string());
    let target = dest_folder.add_folder(&final_name)?;

    if target.same_entry(&src) {
      return Ok(());
    }

    if target.starts_with(&src) {
      return Err(Error::Write(format!(
        "cannot copy {src} into its own subtree"
      )));
    }

    self.clear_target(&dest_folder, &final_name, existing, had_rename, overwrite)?;

    crate::import::CopyImporter.import_folder(
      &store,
      &store.folder_loader(dest_folder),
      &src,
      Some(&final_name),
    )
  }

  /// Applies the overwrite policy to whatever occupies the target name.
  fn clear_target(
    &self,
    dest_folder: &FsPath,
    final_name: &str,
    known: Option<Record>,
    had_rename: bool,
    overwrite: bool,
  ) -> Result<()> {
    let store = self.store();

    let existing = if had_rename {
      known
    } else {
      store.lookup_child(&store.find_folder(dest_folder)?, final_name)?
    };

    match existing {
      None => Ok(()),
      Some(Record::Folder(_)) if overwrite => {
        delete_tree(&store, &dest_folder.add_folder(final_name)?)
      }
      Some(_) if overwrite => store.delete_file(&dest_folder.add_file(final_name)?),
      Some(Record::Folder(_)) => Err(Error::DirectoryAlreadyExists(
        dest_folder.add_folder(final_name)?.to_string(),
      )),
      Some(_) => Err(Error::FileAlreadyExists(
        dest_folder.add_file(final_name)?.to_string(),
      )),
    }
  }

  /// Opens a positional write stream; [`APPEND`] (`-1`) appends.
  fn output_stream(&self, name: &str, offset: i64) -> Result<RowWriter> {
    let path = self.current_path().add_file(name)?;
    self.store().mutable_data_cell(&path)?.writer(offset)
  }

  /// Re-reads the file's content and writes the recomputed digest back.
  fn update_md5(&self, name: &str) -> Result<()> {
    let path = self.current_path().add_file(name)?;
    let store = self.store();

    let digest = store.data_cell(&path)?.digest()?;
    store.set_md5(&path, digest)
  }

  /// Sets the content length to zero without deallocating capacity.
  fn clear_file(&self, name: &str) -> Result<()> {
    let path = self.current_path().add_file(name)?;
    self.store().mutable_data_cell(&path)?.clear()
  }

  fn append_into_file(&self, name: &str, data: &[u8]) -> Result<()> {
    let mut writer = self.output_stream(name, APPEND)?;
    writer.write_all(data)?;
    Ok(())
  }

  /// Imports a single external file under `destination`.
  fn import_file<I: Importer + ?Sized>(
    &self,
    destination: &str,
    importer: &I,
    source: &I::FileId,
  ) -> Result<()> {
    let (dest_folder, _, new_name) = self.dest_folder_and_new_name(destination)?;
    let store = self.store();

    importer.import_file(
      &store,
      &store.folder_loader(dest_folder),
      source,
      new_name.as_deref(),
    )
  }

  /// Imports an external folder tree under `destination`.
  fn import_directory<I: Importer + ?Sized>(
    &self,
    destination: &str,
    importer: &I,
    source: &I::FolderId,
  ) -> Result<()> {
    let (dest_folder, _, new_name) = self.dest_folder_and_new_name(destination)?;
    let store = self.store();

    importer.import_folder(
      &store,
      &store.folder_loader(dest_folder),
      source,
      new_name.as_deref(),
    )
  }
}

/// Deletes `base` and everything under it, bottom-up, through the store
/// primitives so every content row is freed.
pub(crate) fn delete_tree(store: &Arc<Store>, base: &FsPath) -> Result<()> {
  let mut stack = vec![base.as_folder()];
  let mut folders = vec![];

  while let Some(path) = stack.pop() {
    let folder = store.find_folder(&path)?;

    for child in store.children(&folder)? {
      match child {
        Record::File(f) => store.delete_file(&path.add_file(f.name.as_str())?)?,
        Record::Folder(f) => stack.push(path.add_folder(f.name.as_str())?),
        _ => {}
      }
    }

    folders.push(path);
  }

  for path in folders.into_iter().rev() {
    store.delete_folder(&path)?;
  }

  Ok(())
}

/// Cold, stack-driven walk emitting file loaders whose absolute path
/// matches the pattern.
pub struct FileWalk {
  store: Arc<Store>,
  pattern: Option<glob::Pattern>,
  options: glob::MatchOptions,
  recursive: bool,
  folders: Vec<FsPath>,
  pending: VecDeque<FileLoader>,
  failed: bool,
}

impl FileWalk {
  pub(crate) fn new(
    store: Arc<Store>,
    base: FsPath,
    pattern: Option<&str>,
    recursive: bool,
  ) -> Result<Self> {
    let pattern = pattern
      .map(glob::Pattern::new)
      .transpose()
      .map_err(|e| Error::Write(format!("invalid glob pattern: {e}")))?;

    // `*` and `?` stop at separators; `**` crosses them.
    let options = glob::MatchOptions {
      case_sensitive: true,
      require_literal_separator: true,
      require_literal_leading_dot: false,
    };

    Ok(Self {
      store,
      pattern,
      options,
      recursive,
      folders: vec![base.as_folder()],
      pending: VecDeque::new(),
      failed: false,
    })
  }

  fn matches(&self, path: &FsPath) -> bool {
    match &self.pattern {
      None => true,
      Some(pattern) => pattern.matches_with(&path.to_string(), self.options),
    }
  }
}

impl Iterator for FileWalk {
  type Item = Result<FileLoader>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.failed {
      return None;
    }

    loop {
      if let Some(file) = self.pending.pop_front() {
        return Some(Ok(file));
      }

      let folder_path = self.folders.pop()?;

      let listed = (|| -> Result<()> {
        let folder = self.store.find_folder(&folder_path)?;

        for child in self.store.children(&folder)? {
          match child {
            Record::File(f) => {
              let path = folder_path.add_file(f.name.as_str())?;

              if self.matches(&path) {
                self.pending.push_back(self.store.file_loader(path));
              }
            }
            Record::Folder(f) => {
              if self.recursive {
                self.folders.push(folder_path.add_folder(f.name.as_str())?);
              }
            }
            _ => {}
          }
        }

        Ok(())
      })();

      if let Err(e) = listed {
        self.failed = true;
        return Some(Err(e));
      }
    }
  }
}
