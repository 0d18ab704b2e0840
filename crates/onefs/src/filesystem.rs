//! The embedder-facing filesystem facade.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use crate::capture::{AccessCapture, CapturePolicy};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::navigator::{Navigator, ReadContext, WriteContext};
use crate::store::Store;

/// A mounted container.
///
/// Every operation runs inside a grant obtained from the capture policy
/// chosen at open time: [`with_folder`](Self::with_folder) for reads,
/// [`with_mutable_folder`](Self::with_mutable_folder) for writes, plus
/// non-blocking `try_` variants.
pub struct OneFs {
  store: Arc<Store>,
  capture: AccessCapture<Navigator>,
}

impl OneFs {
  pub fn open(container: impl Into<PathBuf>, policy: CapturePolicy) -> Result<Self> {
    Self::open_with_clock(container, policy, Arc::new(SystemClock))
  }

  pub fn open_with_clock(
    container: impl Into<PathBuf>,
    policy: CapturePolicy,
    clock: Arc<dyn Clock>,
  ) -> Result<Self> {
    let store = Store::open_with_clock(container, clock)?;
    let navigator = Navigator::new(Arc::clone(&store));

    Ok(Self {
      store,
      capture: AccessCapture::new(policy, navigator),
    })
  }

  pub fn store(&self) -> &Arc<Store> {
    &self.store
  }

  /// Runs `block` under a read grant against a snapshot of the current
  /// folder.
  pub async fn with_folder<F, Fut, T>(&self, block: F) -> T
  where
    F: FnOnce(ReadContext) -> Fut,
    Fut: Future<Output = T>,
  {
    self.capture.capture_read(block).await
  }

  /// Runs `block` under a write grant bound to the live cursor.
  pub async fn with_mutable_folder<F, Fut, T>(&self, block: F) -> T
  where
    F: FnOnce(WriteContext) -> Fut,
    Fut: Future<Output = T>,
  {
    self.capture.capture_write(block).await
  }

  /// Like [`with_folder`](Self::with_folder) but fails with
  /// [`Error::ReadCapture`](crate::Error::ReadCapture) instead of waiting.
  pub async fn try_with_folder<F, Fut, T>(&self, block: F) -> Result<T>
  where
    F: FnOnce(ReadContext) -> Fut,
    Fut: Future<Output = T>,
  {
    self.capture.try_capture_read(block).await
  }

  /// Like [`with_mutable_folder`](Self::with_mutable_folder) but fails
  /// with [`Error::WriteCapture`](crate::Error::WriteCapture) instead of
  /// waiting.
  pub async fn try_with_mutable_folder<F, Fut, T>(&self, block: F) -> Result<T>
  where
    F: FnOnce(WriteContext) -> Fut,
    Fut: Future<Output = T>,
  {
    self.capture.try_capture_write(block).await
  }

  /// Moves the current folder; see [`WriteContext::cd`].
  pub async fn cd(&self, target: &str) -> Result<()> {
    self
      .with_mutable_folder(|ctx| async move { ctx.cd(target) })
      .await
  }

  /// Steps the current folder up to its parent.
  pub async fn back(&self) -> Result<()> {
    self
      .with_mutable_folder(|ctx| async move { ctx.back() })
      .await
  }

  /// The current folder path, with its trailing slash.
  pub async fn current_path(&self) -> String {
    self
      .with_folder(|ctx| async move {
        use crate::service::FolderReader;
        ctx.current_path().to_string()
      })
      .await
  }
}
