//! Grant-coordination fairness under both capture policies.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use onefs::prelude::*;

struct Unit;

impl ContextProvider for Unit {
  type Read = ();
  type Write = ();

  fn read_context(&self) {}
  fn write_context(&self) {}
}

#[derive(Default)]
struct Gauge {
  current: AtomicUsize,
  max: AtomicUsize,
}

impl Gauge {
  fn enter(&self) {
    let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
    self.max.fetch_max(now, Ordering::SeqCst);
  }

  fn exit(&self) {
    self.current.fetch_sub(1, Ordering::SeqCst);
  }

  fn max(&self) -> usize {
    self.max.load(Ordering::SeqCst)
  }
}

const BATCH: usize = 25;
const WORK: Duration = Duration::from_millis(300);

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn read_priority_late_readers_run_before_a_waiting_writer() {
  let capture = Arc::new(AccessCapture::new(CapturePolicy::ReadPriority, Unit));
  let readers = Arc::new(Gauge::default());
  let writers = Arc::new(Gauge::default());
  let readers_done = Arc::new(AtomicUsize::new(0));
  let writer_saw_done = Arc::new(AtomicUsize::new(0));

  let spawn_reader = |capture: Arc<AccessCapture<Unit>>,
                      readers: Arc<Gauge>,
                      readers_done: Arc<AtomicUsize>| {
    tokio::spawn(async move {
      capture
        .capture_read(|_| async {
          readers.enter();
          tokio::time::sleep(WORK).await;
          readers.exit();
          readers_done.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    })
  };

  let mut tasks = vec![];

  for _ in 0..BATCH {
    tasks.push(spawn_reader(
      Arc::clone(&capture),
      Arc::clone(&readers),
      Arc::clone(&readers_done),
    ));
  }

  tokio::time::sleep(Duration::from_millis(50)).await;

  tasks.push({
    let capture = Arc::clone(&capture);
    let writers = Arc::clone(&writers);
    let readers_done = Arc::clone(&readers_done);
    let writer_saw_done = Arc::clone(&writer_saw_done);

    tokio::spawn(async move {
      capture
        .capture_write(|_| async {
          writer_saw_done.store(readers_done.load(Ordering::SeqCst), Ordering::SeqCst);
          writers.enter();
          tokio::time::sleep(Duration::from_millis(20)).await;
          writers.exit();
        })
        .await;
    })
  });

  tokio::time::sleep(Duration::from_millis(30)).await;

  for _ in 0..BATCH {
    tasks.push(spawn_reader(
      Arc::clone(&capture),
      Arc::clone(&readers),
      Arc::clone(&readers_done),
    ));
  }

  for task in tasks {
    task.await.unwrap();
  }

  // Late readers piled onto the active read phase past the parked writer.
  assert_eq!(readers.max(), BATCH * 2);
  assert_eq!(writers.max(), 1);
  assert_eq!(
    writer_saw_done.load(Ordering::SeqCst),
    BATCH * 2,
    "the writer ran only after every reader finished"
  );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn write_priority_queued_writer_fences_late_readers() {
  let capture = Arc::new(AccessCapture::new(CapturePolicy::WritePriority, Unit));
  let readers = Arc::new(Gauge::default());
  let writers = Arc::new(Gauge::default());
  let readers_done = Arc::new(AtomicUsize::new(0));
  let writer_saw_done = Arc::new(AtomicUsize::new(0));
  let writer_finished = Arc::new(AtomicBool::new(false));
  let fence_violations = Arc::new(AtomicUsize::new(0));

  let mut tasks = vec![];

  for _ in 0..BATCH {
    let capture = Arc::clone(&capture);
    let readers = Arc::clone(&readers);
    let readers_done = Arc::clone(&readers_done);

    tasks.push(tokio::spawn(async move {
      capture
        .capture_read(|_| async {
          readers.enter();
          tokio::time::sleep(WORK).await;
          readers.exit();
          readers_done.fetch_add(1, Ordering::SeqCst);
        })
        .await;
    }));
  }

  tokio::time::sleep(Duration::from_millis(50)).await;

  tasks.push({
    let capture = Arc::clone(&capture);
    let writers = Arc::clone(&writers);
    let readers_done = Arc::clone(&readers_done);
    let writer_saw_done = Arc::clone(&writer_saw_done);
    let writer_finished = Arc::clone(&writer_finished);

    tokio::spawn(async move {
      capture
        .capture_write(|_| async {
          writer_saw_done.store(readers_done.load(Ordering::SeqCst), Ordering::SeqCst);
          writers.enter();
          tokio::time::sleep(Duration::from_millis(20)).await;
          writers.exit();
          writer_finished.store(true, Ordering::SeqCst);
        })
        .await;
    })
  });

  tokio::time::sleep(Duration::from_millis(30)).await;

  for _ in 0..BATCH {
    let capture = Arc::clone(&capture);
    let readers = Arc::clone(&readers);
    let writer_finished = Arc::clone(&writer_finished);
    let fence_violations = Arc::clone(&fence_violations);

    tasks.push(tokio::spawn(async move {
      capture
        .capture_read(|_| async {
          if !writer_finished.load(Ordering::SeqCst) {
            fence_violations.fetch_add(1, Ordering::SeqCst);
          }

          readers.enter();
          tokio::time::sleep(Duration::from_millis(20)).await;
          readers.exit();
        })
        .await;
    }));
  }

  for task in tasks {
    task.await.unwrap();
  }

  // The queued writer kept the batches apart.
  assert_eq!(readers.max(), BATCH);
  assert_eq!(writers.max(), 1);
  assert_eq!(
    writer_saw_done.load(Ordering::SeqCst),
    BATCH,
    "the writer waited for the active batch only"
  );
  assert_eq!(fence_violations.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn try_write_grant_fails_against_a_held_read_grant() {
  let dir = tempfile::tempdir().unwrap();
  let container = dir.path().join("busy.onefs");

  let fs = Arc::new(OneFs::open(&container, CapturePolicy::ReadPriority).unwrap());
  let started = Arc::new(tokio::sync::Notify::new());
  let release = Arc::new(tokio::sync::Notify::new());

  let reader = {
    let fs = Arc::clone(&fs);
    let started = Arc::clone(&started);
    let release = Arc::clone(&release);

    tokio::spawn(async move {
      fs.with_folder(|_| async move {
        started.notify_one();
        release.notified().await;
      })
      .await;
    })
  };

  started.notified().await;

  let denied = fs.try_with_mutable_folder(|_| async {}).await;
  assert!(matches!(denied, Err(Error::WriteCapture)));

  release.notify_one();
  reader.await.unwrap();

  // With the read grant gone the try variant succeeds.
  fs.try_with_mutable_folder(|ctx| async move { ctx.create_file("after", b"x") })
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn try_read_grant_fails_against_a_held_write_grant() {
  let dir = tempfile::tempdir().unwrap();
  let container = dir.path().join("busy.onefs");

  let fs = Arc::new(OneFs::open(&container, CapturePolicy::WritePriority).unwrap());
  let started = Arc::new(tokio::sync::Notify::new());
  let release = Arc::new(tokio::sync::Notify::new());

  let writer = {
    let fs = Arc::clone(&fs);
    let started = Arc::clone(&started);
    let release = Arc::clone(&release);

    tokio::spawn(async move {
      fs.with_mutable_folder(|_| async move {
        started.notify_one();
        release.notified().await;
      })
      .await;
    })
  };

  started.notified().await;

  let denied = fs.try_with_folder(|_| async {}).await;
  assert!(matches!(denied, Err(Error::ReadCapture)));

  release.notify_one();
  writer.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn writes_are_visible_to_later_grants() {
  let dir = tempfile::tempdir().unwrap();
  let container = dir.path().join("visible.onefs");

  let fs = OneFs::open(&container, CapturePolicy::WritePriority).unwrap();

  fs.with_mutable_folder(|ctx| async move { ctx.create_file("note", b"first") })
    .await
    .unwrap();

  let bytes = fs
    .with_folder(|ctx| async move { ctx.read_file("note") })
    .await
    .unwrap();

  assert_eq!(bytes, b"first");
}
