//! A hierarchical filesystem persisted inside a single container file.
//!
//! The container is a stream of typed records (folders, files, raw data
//! rows and free holes) tied together by absolute byte offsets. [`Store`]
//! owns the container and the free-space allocator, [`OneFs`] layers path
//! operations and reader/writer access coordination on top of it.
//!
//! ```no_run
//! use onefs::prelude::*;
//!
//! # async fn demo() -> Result<()> {
//! let fs = OneFs::open("archive.onefs", CapturePolicy::WritePriority)?;
//!
//! fs.with_mutable_folder(|ctx| async move {
//!   ctx.create_folder("docs")?;
//!   ctx.create_file("readme.txt", b"hello")?;
//!   Ok::<_, Error>(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod alloc;
pub mod capture;
pub mod clock;
pub mod error;
pub mod filesystem;
pub mod import;
pub mod navigator;
pub mod node;
pub mod path;
pub mod record;
pub mod service;
pub mod store;

pub mod prelude {
  pub use crate::capture::{AccessCapture, CapturePolicy, ContextProvider};
  pub use crate::clock::{Clock, SystemClock};
  pub use crate::error::{Error, Result};
  pub use crate::filesystem::OneFs;
  pub use crate::import::{CopyImporter, HostImporter, Importer};
  pub use crate::navigator::{Navigator, ReadContext, WriteContext};
  pub use crate::node::{FileLoader, FileNode, FolderLoader, FolderNode};
  pub use crate::path::FsPath;
  pub use crate::service::{FolderReader, FolderWriter};
  pub use crate::store::Store;
}

pub use error::{Error, Result};
pub use filesystem::OneFs;
