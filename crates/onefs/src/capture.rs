//! Reader/writer grant coordination.
//!
//! Two policies share one public contract: blocking `capture_read` /
//! `capture_write` and non-blocking `try_` variants, each running a caller
//! block against a context produced by the provider. Grants are RAII:
//! counter decrements and permit releases happen in `Drop`, so release
//! runs on normal return, error, and cancellation alike. No lock is held
//! across a grant boundary.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Produces one context per grant.
///
/// Read contexts are expected to snapshot their state at grant time; write
/// contexts bind shared state by reference.
pub trait ContextProvider {
  type Read;
  type Write;

  fn read_context(&self) -> Self::Read;
  fn write_context(&self) -> Self::Write;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePolicy {
  /// Active readers keep arriving writers out indefinitely.
  ReadPriority,
  /// A queued writer fences readers that arrive after it.
  WritePriority,
}

/// One side's occupancy: how many grants are active and, while any are,
/// the control permit they collectively hold.
#[derive(Default)]
struct CounterSlot {
  count: usize,
  permit: Option<OwnedSemaphorePermit>,
}

/// Decrements the counter on drop; the last grant out drops the permit,
/// releasing the control semaphore.
struct SideRelease {
  slot: Arc<StdMutex<CounterSlot>>,
}

impl Drop for SideRelease {
  fn drop(&mut self) {
    let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
    slot.count -= 1;

    if slot.count == 0 {
      slot.permit = None;
    }
  }
}

async fn acquire(semaphore: &Arc<Semaphore>) -> OwnedSemaphorePermit {
  semaphore
    .clone()
    .acquire_owned()
    .await
    .expect("capture semaphore is never closed")
}

fn lock_slot(slot: &Arc<StdMutex<CounterSlot>>) -> std::sync::MutexGuard<'_, CounterSlot> {
  slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Reader-priority coordination.
///
/// A single control semaphore is held by the reader group as a whole or by
/// one writer. The first reader in acquires it, the last reader out
/// releases it; as long as new readers keep arriving, a waiting writer
/// stays parked.
pub struct ReadPriorityCapture<P> {
  provider: P,
  read_capture: Arc<Semaphore>,
  reader_gate: AsyncMutex<()>,
  readers: Arc<StdMutex<CounterSlot>>,
}

impl<P: ContextProvider> ReadPriorityCapture<P> {
  pub fn new(provider: P) -> Self {
    Self {
      provider,
      read_capture: Arc::new(Semaphore::new(1)),
      reader_gate: AsyncMutex::new(()),
      readers: Arc::new(StdMutex::new(CounterSlot::default())),
    }
  }

  async fn begin_read(&self) -> SideRelease {
    let _gate = self.reader_gate.lock().await;

    {
      let mut slot = lock_slot(&self.readers);

      if slot.count > 0 {
        // Piggyback on the permit the active group already holds. Checked
        // and incremented under one lock so a concurrent exit cannot slip
        // in between.
        slot.count += 1;
        return SideRelease {
          slot: Arc::clone(&self.readers),
        };
      }
    }

    // No active readers, and the gate keeps other entries out: the count
    // stays zero while we suspend on the control permit.
    let permit = acquire(&self.read_capture).await;

    let mut slot = lock_slot(&self.readers);
    slot.permit = Some(permit);
    slot.count += 1;

    SideRelease {
      slot: Arc::clone(&self.readers),
    }
  }

  fn try_begin_read(&self) -> Result<SideRelease> {
    let _gate = self.reader_gate.try_lock().map_err(|_| Error::ReadCapture)?;

    let mut slot = lock_slot(&self.readers);

    if slot.count == 0 {
      let permit = self
        .read_capture
        .clone()
        .try_acquire_owned()
        .map_err(|_| Error::ReadCapture)?;
      slot.permit = Some(permit);
    }

    slot.count += 1;

    Ok(SideRelease {
      slot: Arc::clone(&self.readers),
    })
  }

  pub async fn capture_read<F, Fut, T>(&self, block: F) -> T
  where
    F: FnOnce(P::Read) -> Fut,
    Fut: Future<Output = T>,
  {
    let release = self.begin_read().await;
    let result = block(self.provider.read_context()).await;
    drop(release);
    result
  }

  pub async fn capture_write<F, Fut, T>(&self, block: F) -> T
  where
    F: FnOnce(P::Write) -> Fut,
    Fut: Future<Output = T>,
  {
    let permit = acquire(&self.read_capture).await;
    let result = block(self.provider.write_context()).await;
    drop(permit);
    result
  }

  pub async fn try_capture_read<F, Fut, T>(&self, block: F) -> Result<T>
  where
    F: FnOnce(P::Read) -> Fut,
    Fut: Future<Output = T>,
  {
    let release = self.try_begin_read()?;
    let result = block(self.provider.read_context()).await;
    drop(release);
    Ok(result)
  }

  pub async fn try_capture_write<F, Fut, T>(&self, block: F) -> Result<T>
  where
    F: FnOnce(P::Write) -> Fut,
    Fut: Future<Output = T>,
  {
    let permit = self
      .read_capture
      .clone()
      .try_acquire_owned()
      .map_err(|_| Error::WriteCapture)?;

    let result = block(self.provider.write_context()).await;
    drop(permit);
    Ok(result)
  }
}

/// Writer-priority coordination.
///
/// `write_captured` is held while any writer waits or runs; readers pass
/// through it on entry, so a queued writer fences later readers.
/// `can_write` is held while anyone runs: by the writer for its grant, by
/// the reader group from first in to last out.
pub struct WritePriorityCapture<P> {
  provider: P,
  write_captured: Arc<Semaphore>,
  can_write: Arc<Semaphore>,
  writer_gate: AsyncMutex<()>,
  writers: Arc<StdMutex<CounterSlot>>,
  reader_gate: AsyncMutex<()>,
  readers: Arc<StdMutex<CounterSlot>>,
}

impl<P: ContextProvider> WritePriorityCapture<P> {
  pub fn new(provider: P) -> Self {
    Self {
      provider,
      write_captured: Arc::new(Semaphore::new(1)),
      can_write: Arc::new(Semaphore::new(1)),
      writer_gate: AsyncMutex::new(()),
      writers: Arc::new(StdMutex::new(CounterSlot::default())),
      reader_gate: AsyncMutex::new(()),
      readers: Arc::new(StdMutex::new(CounterSlot::default())),
    }
  }

  async fn register_writer(&self) -> SideRelease {
    let _gate = self.writer_gate.lock().await;

    {
      let mut slot = lock_slot(&self.writers);

      if slot.count > 0 {
        slot.count += 1;
        return SideRelease {
          slot: Arc::clone(&self.writers),
        };
      }
    }

    let permit = acquire(&self.write_captured).await;

    let mut slot = lock_slot(&self.writers);
    slot.permit = Some(permit);
    slot.count += 1;

    SideRelease {
      slot: Arc::clone(&self.writers),
    }
  }

  pub async fn capture_write<F, Fut, T>(&self, block: F) -> T
  where
    F: FnOnce(P::Write) -> Fut,
    Fut: Future<Output = T>,
  {
    // Registration blocks new readers; the run permit waits for active
    // ones to drain.
    let registration = self.register_writer().await;
    let run = acquire(&self.can_write).await;

    let result = block(self.provider.write_context()).await;

    drop(run);
    drop(registration);
    result
  }

  pub async fn capture_read<F, Fut, T>(&self, block: F) -> T
  where
    F: FnOnce(P::Read) -> Fut,
    Fut: Future<Output = T>,
  {
    let pass = acquire(&self.write_captured).await;

    let release = {
      let _gate = self.reader_gate.lock().await;

      let joined = {
        let mut slot = lock_slot(&self.readers);

        if slot.count > 0 {
          slot.count += 1;
          true
        } else {
          false
        }
      };

      if joined {
        SideRelease {
          slot: Arc::clone(&self.readers),
        }
      } else {
        let permit = acquire(&self.can_write).await;

        let mut slot = lock_slot(&self.readers);
        slot.permit = Some(permit);
        slot.count += 1;

        SideRelease {
          slot: Arc::clone(&self.readers),
        }
      }
    };

    // Entry is over; writers may queue while we run.
    drop(pass);

    let result = block(self.provider.read_context()).await;
    drop(release);
    result
  }

  pub async fn try_capture_write<F, Fut, T>(&self, block: F) -> Result<T>
  where
    F: FnOnce(P::Write) -> Fut,
    Fut: Future<Output = T>,
  {
    let registration = {
      let _gate = self.writer_gate.try_lock().map_err(|_| Error::WriteCapture)?;

      let mut slot = lock_slot(&self.writers);

      if slot.count == 0 {
        let permit = self
          .write_captured
          .clone()
          .try_acquire_owned()
          .map_err(|_| Error::WriteCapture)?;
        slot.permit = Some(permit);
      }

      slot.count += 1;

      SideRelease {
        slot: Arc::clone(&self.writers),
      }
    };

    // Dropping `registration` on failure unwinds the acquisition above.
    let run = self
      .can_write
      .clone()
      .try_acquire_owned()
      .map_err(|_| Error::WriteCapture)?;

    let result = block(self.provider.write_context()).await;

    drop(run);
    drop(registration);
    Ok(result)
  }

  pub async fn try_capture_read<F, Fut, T>(&self, block: F) -> Result<T>
  where
    F: FnOnce(P::Read) -> Fut,
    Fut: Future<Output = T>,
  {
    let pass = self
      .write_captured
      .clone()
      .try_acquire_owned()
      .map_err(|_| Error::ReadCapture)?;

    let release = {
      let _gate = self.reader_gate.try_lock().map_err(|_| Error::ReadCapture)?;

      let mut slot = lock_slot(&self.readers);

      if slot.count == 0 {
        let permit = self
          .can_write
          .clone()
          .try_acquire_owned()
          .map_err(|_| Error::ReadCapture)?;
        slot.permit = Some(permit);
      }

      slot.count += 1;

      SideRelease {
        slot: Arc::clone(&self.readers),
      }
    };

    drop(pass);

    let result = block(self.provider.read_context()).await;
    drop(release);
    Ok(result)
  }
}

/// Policy-selected coordinator with the common contract.
pub enum AccessCapture<P> {
  ReadPriority(ReadPriorityCapture<P>),
  WritePriority(WritePriorityCapture<P>),
}

impl<P: ContextProvider> AccessCapture<P> {
  pub fn new(policy: CapturePolicy, provider: P) -> Self {
    match policy {
      CapturePolicy::ReadPriority => Self::ReadPriority(ReadPriorityCapture::new(provider)),
      CapturePolicy::WritePriority => Self::WritePriority(WritePriorityCapture::new(provider)),
    }
  }

  pub async fn capture_read<F, Fut, T>(&self, block: F) -> T
  where
    F: FnOnce(P::Read) -> Fut,
    Fut: Future<Output = T>,
  {
    match self {
      Self::ReadPriority(capture) => capture.capture_read(block).await,
      Self::WritePriority(capture) => capture.capture_read(block).await,
    }
  }

  pub async fn capture_write<F, Fut, T>(&self, block: F) -> T
  where
    F: FnOnce(P::Write) -> Fut,
    Fut: Future<Output = T>,
  {
    match self {
      Self::ReadPriority(capture) => capture.capture_write(block).await,
      Self::WritePriority(capture) => capture.capture_write(block).await,
    }
  }

  pub async fn try_capture_read<F, Fut, T>(&self, block: F) -> Result<T>
  where
    F: FnOnce(P::Read) -> Fut,
    Fut: Future<Output = T>,
  {
    match self {
      Self::ReadPriority(capture) => capture.try_capture_read(block).await,
      Self::WritePriority(capture) => capture.try_capture_read(block).await,
    }
  }

  pub async fn try_capture_write<F, Fut, T>(&self, block: F) -> Result<T>
  where
    F: FnOnce(P::Write) -> Fut,
    Fut: Future<Output = T>,
  {
    match self {
      Self::ReadPriority(capture) => capture.try_capture_write(block).await,
      Self::WritePriority(capture) => capture.try_capture_write(block).await,
    }
  }
}
