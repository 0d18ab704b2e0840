//! Current-folder cursor and the per-grant contexts built from it.
//!
//! The navigator implements [`ContextProvider`]: read grants get a
//! snapshot of the cursor taken at grant time, write grants bind the
//! cursor by reference so `cd` during the grant is visible to every
//! operation after it.

use std::sync::{Arc, Mutex as StdMutex};

use crate::capture::ContextProvider;
use crate::error::{Error, Result};
use crate::node::{FolderNode, Loadable};
use crate::path::FsPath;
use crate::service::{FolderReader, FolderWriter};
use crate::store::Store;

pub struct Navigator {
  store: Arc<Store>,
  cursor: Arc<StdMutex<FsPath>>,
}

impl Navigator {
  pub fn new(store: Arc<Store>) -> Self {
    Self {
      store,
      cursor: Arc::new(StdMutex::new(FsPath::root())),
    }
  }

  fn snapshot(&self) -> FsPath {
    self
      .cursor
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .clone()
  }
}

impl ContextProvider for Navigator {
  type Read = ReadContext;
  type Write = WriteContext;

  fn read_context(&self) -> ReadContext {
    ReadContext {
      store: Arc::clone(&self.store),
      path: self.snapshot(),
    }
  }

  fn write_context(&self) -> WriteContext {
    WriteContext {
      store: Arc::clone(&self.store),
      cursor: Arc::clone(&self.cursor),
    }
  }
}

/// Read grant context; the current folder is the one captured at grant
/// time.
pub struct ReadContext {
  store: Arc<Store>,
  path: FsPath,
}

impl FolderReader for ReadContext {
  fn store(&self) -> Arc<Store> {
    Arc::clone(&self.store)
  }

  fn current_path(&self) -> FsPath {
    self.path.clone()
  }
}

/// Write grant context; cursor mutations made during the grant are seen
/// by every subsequent operation.
pub struct WriteContext {
  store: Arc<Store>,
  cursor: Arc<StdMutex<FsPath>>,
}

impl FolderReader for WriteContext {
  fn store(&self) -> Arc<Store> {
    Arc::clone(&self.store)
  }

  fn current_path(&self) -> FsPath {
    self.cursor.lock().unwrap_or_else(|e| e.into_inner()).clone()
  }
}

impl FolderWriter for WriteContext {}

impl WriteContext {
  /// Moves the cursor to `target`; absolute targets walk from the root,
  /// relative targets from the current folder.
  pub fn cd(&self, target: &str) -> Result<()> {
    let resolved = FsPath::parse(target)?
      .as_folder()
      .resolved_against(&self.current_path());

    // Walk the components so a missing folder names the step that failed.
    let mut loader = self.store.folder_loader(FsPath::root());
    let mut walked = FsPath::root();

    for component in resolved.components() {
      let node = loader.load()?;
      walked = walked.add_folder(component)?;

      loader = node
        .folder(component)
        .cloned()
        .ok_or_else(|| Error::DirectoryNotFound(walked.to_string()))?;
    }

    *self.cursor.lock().unwrap_or_else(|e| e.into_inner()) = resolved;

    Ok(())
  }

  /// Reseats the cursor on the parent folder; a no-op at the root.
  pub fn back(&self) -> Result<()> {
    let mut cursor = self.cursor.lock().unwrap_or_else(|e| e.into_inner());

    if !cursor.is_root() {
      *cursor = cursor.parent();
    }

    Ok(())
  }

  /// Re-reads the current folder from the store.
  pub fn reload(&self) -> Result<FolderNode> {
    self.store.folder_loader(self.current_path()).load()
  }
}
