//! External sources of files and folders.
//!
//! An importer is handed the store and a loader for the destination
//! folder, and calls back into the store to create records and stream
//! bytes. [`CopyImporter`] duplicates subtrees within one store;
//! [`HostImporter`] pulls a file or directory tree in from the host
//! filesystem.

use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::node::FolderLoader;
use crate::path::FsPath;
use crate::record::Record;
use crate::store::{Store, APPEND};

pub trait Importer {
  type FileId: ?Sized;
  type FolderId: ?Sized;

  /// Creates one file under `parent` from `source`; `name` overrides the
  /// source-derived name.
  fn import_file(
    &self,
    store: &Arc<Store>,
    parent: &FolderLoader,
    source: &Self::FileId,
    name: Option<&str>,
  ) -> Result<()>;

  /// Creates a folder tree under `parent` from `source`.
  fn import_folder(
    &self,
    store: &Arc<Store>,
    parent: &FolderLoader,
    source: &Self::FolderId,
    name: Option<&str>,
  ) -> Result<()>;
}

/// Duplicates files and subtrees within the same store through fresh data
/// cells. Digests are carried over from the source records.
pub struct CopyImporter;

impl Importer for CopyImporter {
  type FileId = FsPath;
  type FolderId = FsPath;

  fn import_file(
    &self,
    store: &Arc<Store>,
    parent: &FolderLoader,
    source: &FsPath,
    name: Option<&str>,
  ) -> Result<()> {
    let record = store.find_file(source)?;
    let target = parent.path().add_file(name.unwrap_or_else(|| source.name()))?;

    store.create_file(&target)?;

    let mut reader = store.data_cell(source)?.input()?;
    let mut writer = store.mutable_data_cell(&target)?.writer(APPEND)?;
    std::io::copy(&mut reader, &mut writer)?;

    store.set_md5(&target, record.md5)?;

    Ok(())
  }

  fn import_folder(
    &self,
    store: &Arc<Store>,
    parent: &FolderLoader,
    source: &FsPath,
    name: Option<&str>,
  ) -> Result<()> {
    let target = parent
      .path()
      .add_folder(name.unwrap_or_else(|| source.name()))?;

    store.create_folder(&target)?;
    let target_loader = store.folder_loader(target);

    let folder = store.find_folder(source)?;

    for child in store.children(&folder)? {
      match child {
        Record::File(f) => {
          self.import_file(store, &target_loader, &source.add_file(f.name.as_str())?, None)?;
        }
        Record::Folder(f) => {
          self.import_folder(
            store,
            &target_loader,
            &source.add_folder(f.name.as_str())?,
            None,
          )?;
        }
        _ => {}
      }
    }

    Ok(())
  }
}

/// Imports host files and directory trees, streaming bytes into fresh
/// content cells and recording each digest.
pub struct HostImporter;

impl Importer for HostImporter {
  type FileId = Path;
  type FolderId = Path;

  fn import_file(
    &self,
    store: &Arc<Store>,
    parent: &FolderLoader,
    source: &Path,
    name: Option<&str>,
  ) -> Result<()> {
    let file_name = match name {
      Some(name) => name.to_string(),
      None => host_name(source)?,
    };

    let target = parent.path().add_file(&file_name)?;
    store.create_file(&target)?;

    let mut reader = std::fs::File::open(source)?;
    let mut writer = store.mutable_data_cell(&target)?.writer(APPEND)?;
    std::io::copy(&mut reader, &mut writer)?;

    let digest = store.data_cell(&target)?.digest()?;
    store.set_md5(&target, digest)?;

    log::info!("imported host file {} as {}", source.display(), target);

    Ok(())
  }

  fn import_folder(
    &self,
    store: &Arc<Store>,
    parent: &FolderLoader,
    source: &Path,
    name: Option<&str>,
  ) -> Result<()> {
    let folder_name = match name {
      Some(name) => name.to_string(),
      None => host_name(source)?,
    };

    let base = parent.path().add_folder(&folder_name)?;
    store.create_folder(&base)?;

    // Directories are yielded before their contents, so every parent
    // exists by the time its entries come up.
    for entry in walkdir::WalkDir::new(source).min_depth(1) {
      let entry = entry.map_err(|e| Error::Import(Box::new(e)))?;

      let relative = entry
        .path()
        .strip_prefix(source)
        .map_err(|e| Error::Import(Box::new(e)))?;

      let mut target = base.clone();

      if let Some(parent_rel) = relative.parent() {
        for component in parent_rel.components() {
          target = target.add_folder(&component.as_os_str().to_string_lossy())?;
        }
      }

      let entry_name = entry.file_name().to_string_lossy().into_owned();

      if entry.file_type().is_dir() {
        store.create_folder(&target.add_folder(&entry_name)?)?;
      } else if entry.file_type().is_file() {
        self.import_file(store, &store.folder_loader(target), entry.path(), None)?;
      }
    }

    Ok(())
  }
}

fn host_name(source: &Path) -> Result<String> {
  source
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .ok_or_else(|| {
      Error::Import(format!("host path {} has no file name", source.display()).into())
    })
}
