//! Transient nodes and the loaders that materialise them.
//!
//! The tree is never held in memory as a strong reference graph: a loader
//! is a `(store, path)` handle that reports its location for free and
//! re-reads records on [`load`](Loadable::load). Parent and child loaders
//! are fabricated on demand.

use std::sync::Arc;

use crate::error::Result;
use crate::path::FsPath;
use crate::record::{Record, MD5_LEN};
use crate::store::Store;

/// Point-in-time view of a file's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
  pub name: String,
  pub created: i64,
  pub modified: i64,
  pub md5: [u8; MD5_LEN],
}

/// Point-in-time view of a folder and handles to its direct children.
#[derive(Debug, Clone)]
pub struct FolderNode {
  pub name: String,
  files: Vec<FileLoader>,
  folders: Vec<FolderLoader>,
  parent: Option<FolderLoader>,
}

impl FolderNode {
  pub fn files(&self) -> &[FileLoader] {
    &self.files
  }

  pub fn folders(&self) -> &[FolderLoader] {
    &self.folders
  }

  pub fn parent(&self) -> Option<&FolderLoader> {
    self.parent.as_ref()
  }

  pub fn file(&self, name: &str) -> Option<&FileLoader> {
    self.files.iter().find(|loader| loader.name() == name)
  }

  pub fn folder(&self, name: &str) -> Option<&FolderLoader> {
    self.folders.iter().find(|loader| loader.name() == name)
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty() && self.folders.is_empty()
  }
}

/// Materialises a node from the container on demand.
pub trait Loadable {
  type Node;

  fn load(&self) -> Result<Self::Node>;
}

#[derive(Debug, Clone)]
pub struct FileLoader {
  store: Arc<Store>,
  path: FsPath,
}

impl FileLoader {
  pub(crate) fn new(store: Arc<Store>, path: FsPath) -> Self {
    Self { store, path }
  }

  pub fn path(&self) -> &FsPath {
    &self.path
  }

  pub fn name(&self) -> &str {
    self.path.name()
  }
}

impl Loadable for FileLoader {
  type Node = FileNode;

  fn load(&self) -> Result<FileNode> {
    let record = self.store.find_file(&self.path)?;

    Ok(FileNode {
      name: record.name.as_str().to_string(),
      created: record.created,
      modified: record.modified,
      md5: record.md5,
    })
  }
}

#[derive(Debug, Clone)]
pub struct FolderLoader {
  store: Arc<Store>,
  path: FsPath,
}

impl FolderLoader {
  pub(crate) fn new(store: Arc<Store>, path: FsPath) -> Self {
    Self { store, path }
  }

  pub fn path(&self) -> &FsPath {
    &self.path
  }

  pub fn name(&self) -> &str {
    self.path.name()
  }
}

impl Loadable for FolderLoader {
  type Node = FolderNode;

  fn load(&self) -> Result<FolderNode> {
    let record = self.store.find_folder(&self.path)?;

    let mut files = vec![];
    let mut folders = vec![];

    for child in self.store.children(&record)? {
      match child {
        Record::File(f) => {
          files.push(self.store.file_loader(self.path.add_file(f.name.as_str())?));
        }
        Record::Folder(f) => {
          folders.push(
            self
              .store
              .folder_loader(self.path.add_folder(f.name.as_str())?),
          );
        }
        _ => {}
      }
    }

    let parent = if self.path.is_root() {
      None
    } else {
      Some(self.store.folder_loader(self.path.parent()))
    };

    Ok(FolderNode {
      name: record.name.as_str().to_string(),
      files,
      folders,
      parent,
    })
  }
}

/// Memoises a single [`load`](Loadable::load) until invalidated.
pub struct Cached<L: Loadable> {
  inner: L,
  node: Option<L::Node>,
}

impl<L: Loadable> Cached<L> {
  pub fn new(inner: L) -> Self {
    Self { inner, node: None }
  }

  pub fn inner(&self) -> &L {
    &self.inner
  }

  pub fn load(&mut self) -> Result<&L::Node> {
    if self.node.is_none() {
      self.node = Some(self.inner.load()?);
    }

    Ok(self.node.as_ref().expect("node cached by the line above"))
  }

  /// Drops the memoised node; the next load re-reads the container.
  pub fn invalidate(&mut self) {
    self.node = None;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::Store;

  fn path(s: &str) -> FsPath {
    FsPath::parse(s).unwrap()
  }

  #[test]
  fn cached_loader_memoises_until_invalidated() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("nodes.onefs")).unwrap();

    store.create_file(&path("/doc")).unwrap();

    let mut cached = Cached::new(store.file_loader(path("/doc")));
    let first = cached.load().unwrap().md5;

    store.set_md5(&path("/doc"), [9; 16]).unwrap();
    assert_eq!(cached.load().unwrap().md5, first);

    cached.invalidate();
    assert_eq!(cached.load().unwrap().md5, [9; 16]);
  }

  #[test]
  fn folder_nodes_expose_children_and_parent() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("nodes.onefs")).unwrap();

    store.create_folder(&path("/docs/")).unwrap();
    store.create_file(&path("/docs/a")).unwrap();
    store.create_folder(&path("/docs/sub/")).unwrap();

    let node = store.folder_loader(path("/docs/")).load().unwrap();

    assert_eq!(node.name, "docs");
    assert!(node.file("a").is_some());
    assert!(node.folder("sub").is_some());
    assert!(node.file("missing").is_none());

    let parent = node.parent().unwrap();
    assert!(parent.path().is_root());
    assert!(parent.load().unwrap().folder("docs").is_some());
  }
}
