use super::*;

/// Controls how the wrapper samples, attributes and reports allocations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
  /// Attribution samples are taken every `rate / divisor` bytes on average.
  pub call_stack_divisor: u64,
  /// Directory that holds the report channel file.
  pub channel_dir: PathBuf,
  /// Signal raised after a sampled free.
  pub free_signal: i32,
  /// Signal raised after a sampled allocation.
  pub malloc_signal: i32,
  /// Caller frames inspected per attribution sample.
  pub max_frames: usize,
  /// Whether sampled events raise signals (records are written regardless).
  pub raise_signals: bool,
  /// Mean bytes between allocation (and, separately, free) reports.
  pub sampling_rate_bytes: u64,
  /// Fixed seed for threshold draws; drawn from the OS when absent.
  pub seed: Option<u64>,
  /// Wrapper entry frames dropped past the sampling boundary.
  pub skip_frames: usize,
  /// Slots in the return address to symbol cache.
  pub symbol_cache_slots: usize,
  pub threshold: ThresholdPolicy,
}

impl Default for ProfilerConfig {
  fn default() -> Self {
    Self {
      call_stack_divisor: 13,
      channel_dir: PathBuf::from("/tmp"),
      free_signal: libc::SIGXFSZ,
      malloc_signal: libc::SIGXCPU,
      max_frames: 4,
      raise_signals: true,
      sampling_rate_bytes: 1_048_576,
      seed: None,
      skip_frames: ENTRY_FRAMES,
      symbol_cache_slots: DEFAULT_SYMBOL_CACHE_SLOTS,
      threshold: ThresholdPolicy::Exponential,
    }
  }
}

impl ProfilerConfig {
  pub const ENV_CHANNEL_DIR: &'static str = "SAMPLEHEAP_CHANNEL_DIR";
  pub const ENV_DISABLE_SIGNALS: &'static str = "SAMPLEHEAP_DISABLE_SIGNALS";
  pub const ENV_RATE_BYTES: &'static str = "SAMPLEHEAP_RATE_BYTES";
  pub const ENV_SEED: &'static str = "SAMPLEHEAP_SEED";

  /// Mean bytes between attribution samples.
  #[must_use]
  pub fn call_stack_rate_bytes(&self) -> u64 {
    (self.sampling_rate_bytes / self.call_stack_divisor.max(1)).max(1)
  }

  /// Defaults overridden by the process environment.
  #[must_use]
  pub fn from_env() -> Self {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Parse a JSON object; missing fields keep their defaults.
  ///
  /// # Errors
  ///
  /// Returns an error if the JSON is malformed or the result fails
  /// [`ProfilerConfig::validate`].
  pub fn from_json(json: &str) -> Result<Self, ProfilerError> {
    let config: Self = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
  }

  /// Defaults overridden by whatever `lookup` returns for the
  /// `SAMPLEHEAP_*` keys. Values that do not parse are logged and ignored.
  #[must_use]
  pub fn from_lookup<F>(lookup: F) -> Self
  where
    F: Fn(&str) -> Option<String>,
  {
    let mut config = Self::default();

    if let Some(rate) = parse_var::<u64>(&lookup, Self::ENV_RATE_BYTES) {
      config.sampling_rate_bytes = rate;
    }

    if let Some(seed) = parse_var::<u64>(&lookup, Self::ENV_SEED) {
      config.seed = Some(seed);
    }

    if let Some(dir) = lookup(Self::ENV_CHANNEL_DIR).filter(|d| !d.is_empty())
    {
      config.channel_dir = PathBuf::from(dir);
    }

    if let Some(disable) = parse_var::<u8>(&lookup, Self::ENV_DISABLE_SIGNALS)
    {
      config.raise_signals = disable == 0;
    }

    config
  }

  /// Check the invariants the samplers and classifier depend on.
  ///
  /// # Errors
  ///
  /// Returns [`ProfilerError::InvalidConfig`] naming the first violation.
  pub fn validate(&self) -> Result<(), ProfilerError> {
    if self.sampling_rate_bytes == 0 {
      return Err(ProfilerError::InvalidConfig(
        "sampling rate must be positive",
      ));
    }

    if self.call_stack_divisor == 0
      || self.call_stack_divisor > self.sampling_rate_bytes
    {
      return Err(ProfilerError::InvalidConfig(
        "call stack divisor must be between 1 and the sampling rate",
      ));
    }

    if !self.symbol_cache_slots.is_power_of_two() {
      return Err(ProfilerError::InvalidConfig(
        "symbol cache slots must be a power of two",
      ));
    }

    if !(1..=MAX_FRAMES_LIMIT).contains(&self.max_frames) {
      return Err(ProfilerError::InvalidConfig(
        "max frames must be between 1 and 32",
      ));
    }

    if self.malloc_signal == self.free_signal {
      return Err(ProfilerError::InvalidConfig(
        "allocation and free signals must differ",
      ));
    }

    Ok(())
  }

  #[must_use]
  pub fn with_channel_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.channel_dir = dir.into();
    self
  }

  #[must_use]
  pub fn with_max_frames(mut self, frames: usize) -> Self {
    self.max_frames = frames;
    self
  }

  #[must_use]
  pub fn with_sampling_rate(mut self, bytes: u64) -> Self {
    self.sampling_rate_bytes = bytes;
    self
  }

  #[must_use]
  pub fn with_seed(mut self, seed: u64) -> Self {
    self.seed = Some(seed);
    self
  }

  #[must_use]
  pub fn with_threshold(mut self, policy: ThresholdPolicy) -> Self {
    self.threshold = policy;
    self
  }
}

fn parse_var<T: FromStr>(
  lookup: &impl Fn(&str) -> Option<String>,
  key: &str,
) -> Option<T> {
  let raw = lookup(key)?;

  match raw.trim().parse::<T>() {
    Ok(value) => Some(value),
    Err(_) => {
      tracing::warn!(key, value = %raw, "ignoring unparsable setting");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use {super::*, std::collections::HashMap, tracing_test::traced_test};

  fn lookup_from(
    pairs: &[(&str, &str)],
  ) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
      .iter()
      .map(|(key, value)| (key.to_string(), value.to_string()))
      .collect();

    move |key| vars.get(key).cloned()
  }

  #[test]
  fn defaults_are_valid() {
    let config = ProfilerConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.call_stack_rate_bytes(), 1_048_576 / 13);
  }

  #[test]
  fn reads_environment_overrides() {
    let config = ProfilerConfig::from_lookup(lookup_from(&[
      ("SAMPLEHEAP_RATE_BYTES", "65536"),
      ("SAMPLEHEAP_SEED", "7"),
      ("SAMPLEHEAP_CHANNEL_DIR", "/var/run/profiler"),
      ("SAMPLEHEAP_DISABLE_SIGNALS", "1"),
    ]));

    assert_eq!(config.sampling_rate_bytes, 65_536);
    assert_eq!(config.seed, Some(7));
    assert_eq!(config.channel_dir, PathBuf::from("/var/run/profiler"));
    assert!(!config.raise_signals);
  }

  #[traced_test]
  #[test]
  fn ignores_and_logs_unparsable_values() {
    let config = ProfilerConfig::from_lookup(lookup_from(&[(
      "SAMPLEHEAP_RATE_BYTES",
      "lots",
    )]));

    assert_eq!(config.sampling_rate_bytes, 1_048_576);
    assert!(logs_contain("ignoring unparsable setting"));
  }

  #[test]
  fn loads_partial_json() {
    let config = ProfilerConfig::from_json(
      r#"{"sampling_rate_bytes": 4096, "threshold": "fixed", "max_frames": 8}"#,
    )
    .unwrap();

    assert_eq!(config.sampling_rate_bytes, 4096);
    assert_eq!(config.threshold, ThresholdPolicy::Fixed);
    assert_eq!(config.max_frames, 8);
    assert_eq!(config.call_stack_divisor, 13);
  }

  #[test]
  fn rejects_invalid_settings() {
    let invalid = [
      ProfilerConfig::default().with_sampling_rate(0),
      ProfilerConfig::default().with_sampling_rate(4),
      ProfilerConfig::default().with_max_frames(0),
      ProfilerConfig::default().with_max_frames(MAX_FRAMES_LIMIT + 1),
      ProfilerConfig {
        symbol_cache_slots: 1000,
        ..ProfilerConfig::default()
      },
      ProfilerConfig {
        free_signal: libc::SIGXCPU,
        ..ProfilerConfig::default()
      },
    ];

    for config in invalid {
      assert!(matches!(
        config.validate(),
        Err(ProfilerError::InvalidConfig(_))
      ));
    }
  }

  #[test]
  fn rejects_malformed_json() {
    assert!(matches!(
      ProfilerConfig::from_json("{\"sampling_rate_bytes\": -1}"),
      Err(ProfilerError::Json(_))
    ));
    assert!(matches!(
      ProfilerConfig::from_json("{\"sampling_rate_bytes\": 0}"),
      Err(ProfilerError::InvalidConfig(_))
    ));
  }
}
