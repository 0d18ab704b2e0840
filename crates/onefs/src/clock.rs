/// Wall-clock source for record timestamps.
///
/// Injectable so tests can pin time; the store defaults to [`SystemClock`].
pub trait Clock: Send + Sync {
  /// Milliseconds since the Unix epoch.
  fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> i64 {
    chrono::Utc::now().timestamp_millis()
  }
}

/// A clock pinned to a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
  fn now(&self) -> i64 {
    self.0
  }
}
