use {
  sampleheap::{
    ProfilerConfig, ProfilerError, SampleHeap, SystemHeap, read_records,
  },
  std::io,
  tracing_subscriber::EnvFilter,
};

/// Environment settings over demo defaults: a 64 KiB rate, a fixed seed and
/// the temp dir unless `SAMPLEHEAP_CHANNEL_DIR` names another directory.
fn demo_config<F>(lookup: F) -> ProfilerConfig
where
  F: Fn(&str) -> Option<String>,
{
  let channel_dir_set = lookup(ProfilerConfig::ENV_CHANNEL_DIR)
    .is_some_and(|dir| !dir.is_empty());
  let rate_set = lookup(ProfilerConfig::ENV_RATE_BYTES).is_some();

  let mut config = ProfilerConfig::from_lookup(&lookup);

  if !channel_dir_set {
    config = config.with_channel_dir(std::env::temp_dir());
  }

  if !rate_set {
    config = config.with_sampling_rate(64 * 1024);
  }

  config.seed.get_or_insert(7);
  config
}

fn main() -> Result<(), ProfilerError> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sampleheap=debug")),
    )
    .with_writer(io::stderr)
    .init();

  let config = demo_config(|key| std::env::var(key).ok());

  let heap = SampleHeap::builder()
    .with_config(config)
    .raise_signals(false)
    .finish(SystemHeap)?;

  let mut live = Vec::new();

  for round in 0..2_000usize {
    live.push(heap.allocate(64 + round % 4096));

    if live.len() > 64 {
      let ptr = live.swap_remove(round % live.len());
      // SAFETY: `ptr` came from `heap.allocate` and is released once.
      unsafe { heap.release(ptr) };
    }
  }

  for ptr in live {
    // SAFETY: as above.
    unsafe { heap.release(ptr) };
  }

  println!("=== sample heap stats ===");
  heap.stats().export_json(io::stdout())?;
  println!();

  println!("=== report channel {} ===", heap.channel_path().display());
  for record in read_records(heap.channel_path())? {
    println!("{record}");
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use {super::*, std::path::PathBuf};

  #[test]
  fn environment_channel_dir_wins() {
    let config = demo_config(|key| {
      (key == ProfilerConfig::ENV_CHANNEL_DIR)
        .then(|| "/var/run/sampleheap".to_string())
    });

    assert_eq!(config.channel_dir, PathBuf::from("/var/run/sampleheap"));
  }

  #[test]
  fn unset_environment_uses_demo_defaults() {
    let config = demo_config(|_| None);

    assert_eq!(config.channel_dir, std::env::temp_dir());
    assert_eq!(config.sampling_rate_bytes, 64 * 1024);
    assert_eq!(config.seed, Some(7));
  }
}
