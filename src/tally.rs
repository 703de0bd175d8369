use super::*;

/// Running byte totals per origin since the last allocation report.
#[derive(Debug, Default)]
pub struct AttributionTally {
  interpreter: Counter,
  native: Counter,
}

impl AttributionTally {
  /// Share of attributed bytes that came from the interpreter.
  ///
  /// Zero interpreter bytes count as one, so the ratio is always defined:
  /// an empty tally reports 1 and a native-only tally `1 / (1 + native)`.
  #[must_use]
  pub fn interpreter_fraction(&self) -> f64 {
    let interpreter = self.interpreter.get().max(1) as f64;
    let native = self.native.get() as f64;

    (interpreter / (interpreter + native)).clamp(0.0, 1.0)
  }

  #[must_use]
  pub fn interpreter_bytes(&self) -> u64 {
    self.interpreter.get()
  }

  #[must_use]
  pub fn native_bytes(&self) -> u64 {
    self.native.get()
  }

  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub fn record(&self, origin: Origin, size: usize) {
    match origin {
      Origin::Interpreter => self.interpreter.add(size as u64),
      Origin::Native => self.native.add(size as u64),
    };
  }

  pub fn reset(&self) {
    self.interpreter.take();
    self.native.take();
  }
}

#[cfg(test)]
mod tests {
  use {super::*, proptest::prelude::*};

  #[test]
  fn empty_tally_counts_one_interpreter_byte() {
    let tally = AttributionTally::new();
    assert_eq!(tally.interpreter_fraction(), 1.0);
  }

  #[test]
  fn native_only_tally_is_guarded() {
    let tally = AttributionTally::new();
    tally.record(Origin::Native, 3);

    assert_eq!(tally.interpreter_bytes(), 0);
    assert!((tally.interpreter_fraction() - 0.25).abs() < 1e-12);
  }

  #[test]
  fn fraction_reflects_recorded_bytes() {
    let tally = AttributionTally::new();
    tally.record(Origin::Interpreter, 300);
    tally.record(Origin::Native, 100);

    assert_eq!(tally.interpreter_bytes(), 300);
    assert_eq!(tally.native_bytes(), 100);
    assert!((tally.interpreter_fraction() - 0.75).abs() < 1e-12);
  }

  #[test]
  fn reset_clears_both_sides() {
    let tally = AttributionTally::new();
    tally.record(Origin::Interpreter, 10);
    tally.record(Origin::Native, 10);
    tally.reset();

    assert_eq!(tally.interpreter_bytes(), 0);
    assert_eq!(tally.native_bytes(), 0);
    assert_eq!(tally.interpreter_fraction(), 1.0);
  }

  proptest! {
    #[test]
    fn fraction_stays_in_unit_interval(
      records in proptest::collection::vec(
        (any::<bool>(), any::<usize>()),
        0..32,
      ),
    ) {
      let tally = AttributionTally::new();

      for (interpreter, size) in records {
        let origin = if interpreter {
          Origin::Interpreter
        } else {
          Origin::Native
        };
        tally.record(origin, size);
        let fraction = tally.interpreter_fraction();
        prop_assert!((0.0..=1.0).contains(&fraction));
      }
    }
  }
}
