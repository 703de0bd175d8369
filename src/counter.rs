use super::*;

/// Unsigned counter shared by every thread calling through a wrapper.
///
/// The default build updates the counter with a relaxed load followed by a
/// relaxed store. Concurrent callers can lose each other's updates, which
/// skews totals slightly but never tears a value and costs no more than a
/// plain integer. Building with the `atomic-counters` feature turns `add`
/// and `take` into read-modify-write operations so no update is lost, at the
/// price of a locked instruction on every hot-path update.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
  /// Whether updates are read-modify-write atomics in this build.
  pub const SYNCHRONIZED: bool = cfg!(feature = "atomic-counters");

  /// Add `delta` and return the updated value.
  #[cfg(not(feature = "atomic-counters"))]
  #[inline]
  pub fn add(&self, delta: u64) -> u64 {
    let value = self.get().wrapping_add(delta);
    self.set(value);
    value
  }

  /// Add `delta` and return the updated value.
  #[cfg(feature = "atomic-counters")]
  #[inline]
  pub fn add(&self, delta: u64) -> u64 {
    self.0.fetch_add(delta, Ordering::Relaxed).wrapping_add(delta)
  }

  #[inline]
  #[must_use]
  pub fn get(&self) -> u64 {
    self.0.load(Ordering::Relaxed)
  }

  #[must_use]
  pub const fn new(value: u64) -> Self {
    Self(AtomicU64::new(value))
  }

  #[inline]
  pub fn set(&self, value: u64) {
    self.0.store(value, Ordering::Relaxed);
  }

  /// Reset to zero, returning the previous value.
  #[cfg(not(feature = "atomic-counters"))]
  #[inline]
  pub fn take(&self) -> u64 {
    let value = self.get();
    self.set(0);
    value
  }

  /// Reset to zero, returning the previous value.
  #[cfg(feature = "atomic-counters")]
  #[inline]
  pub fn take(&self) -> u64 {
    self.0.swap(0, Ordering::Relaxed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn add_returns_updated_value() {
    let counter = Counter::new(5);
    assert_eq!(counter.add(7), 12);
    assert_eq!(counter.get(), 12);
  }

  #[test]
  fn take_resets_to_zero() {
    let counter = Counter::new(0);
    counter.add(41);
    counter.add(1);
    assert_eq!(counter.take(), 42);
    assert_eq!(counter.get(), 0);
  }

  #[test]
  fn add_wraps_instead_of_panicking() {
    let counter = Counter::new(u64::MAX);
    assert_eq!(counter.add(2), 1);
  }

  #[cfg(feature = "atomic-counters")]
  #[test]
  fn synchronized_counter_keeps_every_update() {
    let counter = Counter::default();

    std::thread::scope(|scope| {
      for _ in 0..4 {
        scope.spawn(|| {
          for _ in 0..10_000 {
            counter.add(1);
          }
        });
      }
    });

    assert!(Counter::SYNCHRONIZED);
    assert_eq!(counter.get(), 40_000);
  }
}
