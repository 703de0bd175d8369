use super::*;

/// Point-in-time counters of a [`SampleHeap`].
///
/// Fields are read one at a time without a lock, so a snapshot taken while
/// other threads allocate may mix values from neighbouring instants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfilerStats {
  pub cached_symbols: usize,
  pub call_stack_rate_bytes: u64,
  pub counters_synchronized: bool,
  pub free_triggers: u64,
  pub interpreter_bytes: u64,
  pub interpreter_fraction: f64,
  pub malloc_triggers: u64,
  pub native_bytes: u64,
  pub sampling_rate_bytes: u64,
}

impl ProfilerStats {
  /// Serialize the stats as a single JSON object.
  ///
  /// # Errors
  ///
  /// Returns an error if serialization or the writer fails.
  pub fn export_json<W: Write>(&self, writer: W) -> Result<(), ProfilerError> {
    serde_json::to_writer(writer, self)?;
    Ok(())
  }

  /// Allocation and free triggers combined.
  #[must_use]
  pub fn trigger_count(&self) -> u64 {
    self.malloc_triggers.wrapping_add(self.free_triggers)
  }
}
