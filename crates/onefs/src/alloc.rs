//! Free-space bookkeeping for the container.
//!
//! The allocator answers offset questions only; it never touches the
//! container file. Areas cover whole records, header included.

use std::collections::{BTreeMap, BTreeSet};

/// A contiguous byte range inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Area {
  pub start: u64,
  pub size: u64,
}

impl Area {
  pub fn new(start: u64, size: u64) -> Self {
    Self { start, size }
  }

  pub fn end(&self) -> u64 {
    self.start + self.size
  }
}

#[derive(Debug, Default)]
pub struct Allocator {
  free_by_start: BTreeMap<u64, u64>,
  used_by_start: BTreeMap<u64, u64>,
  /// Free areas keyed by (size, start) for best-fit lookups.
  free_by_size: BTreeSet<(u64, u64)>,
  last_position: u64,
}

impl Allocator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Offset one past the highest area seen so far.
  pub fn last_position(&self) -> u64 {
    self.last_position
  }

  pub fn register_free(&mut self, area: Area) {
    self.free_by_start.insert(area.start, area.size);
    self.free_by_size.insert((area.size, area.start));
    self.last_position = self.last_position.max(area.end());
  }

  pub fn register_used(&mut self, area: Area) {
    self.used_by_start.insert(area.start, area.size);
    self.last_position = self.last_position.max(area.end());
  }

  pub fn unregister_free(&mut self, start: u64) -> Option<Area> {
    let size = self.free_by_start.remove(&start)?;
    self.free_by_size.remove(&(size, start));
    Some(Area::new(start, size))
  }

  pub fn unregister_used(&mut self, start: u64) -> Option<Area> {
    let size = self.used_by_start.remove(&start)?;
    Some(Area::new(start, size))
  }

  /// Picks an area of at least `min_size` bytes and marks it used.
  ///
  /// The smallest adequate free area is reused; with `fitted` it is only
  /// taken on an exact size match. When nothing fits, a new area is
  /// appended at the high-water mark: exactly `min_size` bytes for fitted
  /// requests, the next power of two otherwise, so append-heavy rows
  /// amortise their reallocations.
  pub fn allocate(&mut self, min_size: u64, fitted: bool) -> Area {
    let found = self
      .free_by_size
      .range((min_size, 0)..)
      .next()
      .map(|&(size, start)| Area::new(start, size));

    if let Some(area) = found {
      if !fitted || area.size == min_size {
        self.unregister_free(area.start);
        self.register_used(area);
        return area;
      }
    }

    let size = if fitted {
      min_size
    } else {
      min_size.next_power_of_two()
    };

    let area = Area::new(self.last_position, size);
    self.register_used(area);
    area
  }

  /// Drops all state; used before re-scanning the container.
  pub fn clear(&mut self) {
    self.free_by_start.clear();
    self.used_by_start.clear();
    self.free_by_size.clear();
    self.last_position = 0;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn appends_when_empty() {
    let mut alloc = Allocator::new();

    let a = alloc.allocate(55, true);
    assert_eq!(a, Area::new(0, 55));

    let b = alloc.allocate(36, false);
    assert_eq!(b.start, 55);
    assert_eq!(b.size, 64);

    assert_eq!(alloc.last_position(), 55 + 64);
  }

  #[test]
  fn reuses_smallest_adequate_hole() {
    let mut alloc = Allocator::new();
    alloc.register_free(Area::new(0, 128));
    alloc.register_free(Area::new(128, 64));
    alloc.register_free(Area::new(192, 256));

    let area = alloc.allocate(60, false);
    assert_eq!(area, Area::new(128, 64));

    // The next-best hole serves the following request.
    let next = alloc.allocate(60, false);
    assert_eq!(next, Area::new(0, 128));

    // Nothing adequate is left for a big request; it appends rounded up.
    let big = alloc.allocate(300, false);
    assert_eq!(big, Area::new(192 + 256, 512));
  }

  #[test]
  fn fitted_requires_exact_match() {
    let mut alloc = Allocator::new();
    alloc.register_free(Area::new(0, 64));

    let appended = alloc.allocate(55, true);
    assert_eq!(appended, Area::new(64, 55));

    let exact = alloc.allocate(64, true);
    assert_eq!(exact, Area::new(0, 64));
  }

  #[test]
  fn unregister_moves_areas_between_indices() {
    let mut alloc = Allocator::new();
    alloc.register_used(Area::new(0, 91));

    let area = alloc.unregister_used(0).unwrap();
    alloc.register_free(area);

    assert_eq!(alloc.allocate(91, true), Area::new(0, 91));
    assert!(alloc.unregister_used(0).is_some());
  }

  #[test]
  fn clear_resets_the_high_water_mark() {
    let mut alloc = Allocator::new();
    alloc.register_used(Area::new(0, 512));
    alloc.clear();

    assert_eq!(alloc.last_position(), 0);
    assert_eq!(alloc.allocate(16, true).start, 0);
  }
}
