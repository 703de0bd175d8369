use super::*;

/// How the byte distance to the next trigger is chosen after each trigger.
#[derive(
  Debug, Clone, Copy, Default, Eq, PartialEq, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolicy {
  /// Exponentially distributed thresholds with mean equal to the rate. The
  /// resulting trigger process is memoryless, so the expected number of
  /// triggers is exactly `bytes / rate` regardless of allocation sizes.
  #[default]
  Exponential,
  /// Every threshold equals the rate. Deterministic, intended for tests and
  /// reproducible runs.
  Fixed,
}

/// Byte-rate trigger for one class of events (allocations, frees, or
/// call-stack attribution).
///
/// All state lives in [`Counter`]s, including the random generator's state
/// word, so sampling takes `&self`, never locks and never touches the heap.
#[derive(Debug)]
pub struct Sampler {
  next_threshold: Counter,
  policy: ThresholdPolicy,
  rate: u64,
  rng_state: Counter,
  since_trigger: Counter,
}

impl Sampler {
  /// Bytes accumulated since the last trigger.
  #[must_use]
  pub fn bytes_since_trigger(&self) -> u64 {
    self.since_trigger.get()
  }

  fn draw_threshold(&self) -> u64 {
    match self.policy {
      ThresholdPolicy::Fixed => self.rate,
      ThresholdPolicy::Exponential => {
        let mut rng = SmallRng::seed_from_u64(self.rng_state.get());
        self.rng_state.set(rng.next_u64());

        // Inverse transform sampling; `uniform` lies in (0, 1] so ln is finite.
        let uniform = 1.0 - rng.random::<f64>();
        let threshold = -uniform.ln() * self.rate as f64;

        (threshold.round() as u64).max(1)
      }
    }
  }

  #[must_use]
  pub fn new(rate: u64, policy: ThresholdPolicy, seed: u64) -> Self {
    let rate = rate.max(1);
    let sampler = Self {
      next_threshold: Counter::new(rate),
      policy,
      rate,
      rng_state: Counter::new(seed),
      since_trigger: Counter::default(),
    };

    sampler.next_threshold.set(sampler.draw_threshold());
    sampler
  }

  /// Accumulated byte count at which the next trigger fires.
  #[must_use]
  pub fn next_threshold(&self) -> u64 {
    self.next_threshold.get()
  }

  #[must_use]
  pub fn policy(&self) -> ThresholdPolicy {
    self.policy
  }

  #[must_use]
  pub fn rate(&self) -> u64 {
    self.rate
  }

  /// Account `size` bytes and return how many thresholds they crossed.
  ///
  /// Zero means the call was not sampled. A value above one means a single
  /// large call covered several rate units; each crossing consumes its own
  /// freshly drawn threshold.
  #[inline]
  pub fn sample(&self, size: usize) -> u64 {
    let mut since = self.since_trigger.add(size as u64);
    let mut threshold = self.next_threshold.get().max(1);

    if since < threshold {
      return 0;
    }

    if self.policy == ThresholdPolicy::Fixed {
      self.since_trigger.set(since % self.rate);
      return since / self.rate;
    }

    let mut multiplier = 0;

    while since >= threshold {
      multiplier += 1;
      since -= threshold;
      threshold = self.draw_threshold();
    }

    self.since_trigger.set(since);
    self.next_threshold.set(threshold);

    multiplier
  }
}
