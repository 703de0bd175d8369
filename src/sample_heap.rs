use super::*;

/// Requests smaller than this may be rounded up by more than a factor of two.
pub const SMALL_OBJECT_BYTES: usize = 16;

thread_local! {
  static IN_PROFILER: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running profiler code.
///
/// Allocations made while a guard is alive (stack unwinding, symbol lookup,
/// opening the channel, logging) reach the underlying heap unsampled.
#[derive(Debug)]
pub(crate) struct ReentrancyGuard(());

impl ReentrancyGuard {
  /// Enter profiler code, or `None` if this thread is already inside it.
  pub(crate) fn enter() -> Option<Self> {
    IN_PROFILER
      .try_with(|flag| (!flag.replace(true)).then_some(Self(())))
      .ok()
      .flatten()
  }
}

impl Drop for ReentrancyGuard {
  fn drop(&mut self) {
    let _ = IN_PROFILER.try_with(|flag| flag.set(false));
  }
}

/// Builder that customizes `ProfilerConfig` and classifier rules.
#[derive(Debug, Default)]
pub struct SampleHeapBuilder {
  config: ProfilerConfig,
  rules: ClassifierRules,
}

impl SampleHeapBuilder {
  #[must_use]
  pub fn call_stack_divisor(mut self, divisor: u64) -> Self {
    self.config.call_stack_divisor = divisor;
    self
  }

  #[must_use]
  pub fn channel_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.config.channel_dir = dir.into();
    self
  }

  /// Build a wrapper with POSIX signal notification and native stack
  /// inspection.
  ///
  /// # Errors
  ///
  /// Returns an error if the configuration is invalid or the report channel
  /// cannot be created.
  pub fn finish<H: Heap>(
    self,
    heap: H,
  ) -> Result<SampleHeap<H>, ProfilerError> {
    let notifier = SignalNotifier::from_config(&self.config);
    let stack = NativeStack::new(self.config.skip_frames);
    self.finish_with(heap, notifier, stack)
  }

  /// Build a wrapper around caller-supplied notification and stack access.
  ///
  /// # Errors
  ///
  /// Returns an error if the configuration is invalid or the report channel
  /// cannot be created.
  pub fn finish_with<H, N, S>(
    self,
    heap: H,
    notifier: N,
    stack: S,
  ) -> Result<SampleHeap<H, N, S>, ProfilerError>
  where
    H: Heap,
    N: Notifier,
    S: StackInspector,
  {
    SampleHeap::from_parts(self.config, self.rules, heap, notifier, stack)
  }

  #[must_use]
  pub fn max_frames(mut self, frames: usize) -> Self {
    self.config.max_frames = frames;
    self
  }

  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn raise_signals(mut self, raise: bool) -> Self {
    self.config.raise_signals = raise;
    self
  }

  #[must_use]
  pub fn rules(mut self, rules: ClassifierRules) -> Self {
    self.rules = rules;
    self
  }

  #[must_use]
  pub fn sampling_rate(mut self, bytes: u64) -> Self {
    self.config.sampling_rate_bytes = bytes;
    self
  }

  #[must_use]
  pub fn seed(mut self, seed: u64) -> Self {
    self.config.seed = Some(seed);
    self
  }

  #[must_use]
  pub fn skip_frames(mut self, frames: usize) -> Self {
    self.config.skip_frames = frames;
    self
  }

  #[must_use]
  pub fn threshold(mut self, policy: ThresholdPolicy) -> Self {
    self.config.threshold = policy;
    self
  }

  #[must_use]
  pub fn with_config(mut self, config: ProfilerConfig) -> Self {
    self.config = config;
    self
  }
}

/// Sampling decorator over an underlying heap.
///
/// Allocation and free volumes drive two independent samplers at the
/// configured rate. A third, denser sampler decides when to walk the stack
/// and attribute bytes to interpreter or native code. Each allocation or free
/// trigger appends a [`ReportRecord`] to the report channel and then raises
/// the matching notification on the calling thread.
///
/// Counters are shared by all threads without locks; see [`Counter`] for the
/// consistency that buys.
#[derive(Debug)]
pub struct SampleHeap<H, N = SignalNotifier, S = NativeStack> {
  call_stack_sampler: Sampler,
  channel: ReportChannel,
  classifier: Classifier<S>,
  config: ProfilerConfig,
  free_sampler: Sampler,
  free_triggered: Counter,
  heap: H,
  malloc_sampler: Sampler,
  malloc_triggered: Counter,
  notifier: N,
  tally: AttributionTally,
}

impl SampleHeap<SystemHeap> {
  #[must_use]
  pub fn builder() -> SampleHeapBuilder {
    SampleHeapBuilder::new()
  }
}

impl<H: Heap> SampleHeap<H> {
  /// Wrap `heap` with the default configuration.
  ///
  /// # Errors
  ///
  /// Returns an error if the report channel cannot be created.
  pub fn new(heap: H) -> Result<Self, ProfilerError> {
    SampleHeapBuilder::new().finish(heap)
  }

  /// Wrap `heap` with `config`.
  ///
  /// # Errors
  ///
  /// Returns an error if the configuration is invalid or the report channel
  /// cannot be created.
  pub fn with_config(
    config: ProfilerConfig,
    heap: H,
  ) -> Result<Self, ProfilerError> {
    SampleHeapBuilder::new().with_config(config).finish(heap)
  }
}

impl<H, N, S> SampleHeap<H, N, S>
where
  H: Heap,
  N: Notifier,
  S: StackInspector,
{
  /// Allocate through the underlying heap and sample the granted size.
  ///
  /// A null result from the heap is returned untouched and never sampled.
  #[inline(never)]
  pub fn allocate(&self, size: usize) -> *mut u8 {
    self.enter_allocate(size, H::ALIGNMENT)
  }

  /// Like [`SampleHeap::allocate`] for alignments beyond `H::ALIGNMENT`.
  #[inline(never)]
  pub fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8 {
    self.enter_allocate(size, align)
  }

  fn allocate_sampled(&self, size: usize, align: usize) -> *mut u8 {
    let natural = align <= H::ALIGNMENT;

    let ptr = if natural {
      self.heap.allocate(size)
    } else {
      self.heap.allocate_aligned(size, align)
    };

    if !ptr.is_null() {
      // Alignment padding can legitimately exceed twice a small request.
      // SAFETY: `ptr` was just returned by this heap.
      unsafe { self.on_allocate(ptr, size, natural) };
    }

    ptr
  }

  #[must_use]
  pub fn channel_path(&self) -> &Path {
    self.channel.path()
  }

  #[must_use]
  pub fn classifier(&self) -> &Classifier<S> {
    &self.classifier
  }

  #[must_use]
  pub fn config(&self) -> &ProfilerConfig {
    &self.config
  }

  /// Allocate behind the sampling boundary. Inlined into each public entry
  /// point so that entry point is the only wrapper frame above the boundary.
  #[inline(always)]
  pub(crate) fn enter_allocate(&self, size: usize, align: usize) -> *mut u8 {
    let mut ptr = ptr::null_mut();
    sampling_boundary(&mut || ptr = self.allocate_sampled(size, align));
    ptr
  }

  /// Assemble a wrapper from explicit parts.
  ///
  /// Both notifications are set to their ignore disposition and the report
  /// channel file is created before this returns.
  ///
  /// # Errors
  ///
  /// Returns an error if the configuration is invalid or the report channel
  /// cannot be created.
  pub fn from_parts(
    config: ProfilerConfig,
    rules: ClassifierRules,
    heap: H,
    notifier: N,
    stack: S,
  ) -> Result<Self, ProfilerError> {
    config.validate()?;

    let seed = config
      .seed
      .unwrap_or_else(|| SmallRng::from_os_rng().next_u64());

    notifier.ignore(SignalKind::Malloc);
    notifier.ignore(SignalKind::Free);

    let channel = ReportChannel::create(&config.channel_dir)?;

    tracing::debug!(
      channel = %channel.path().display(),
      sampling_rate = config.sampling_rate_bytes,
      call_stack_rate = config.call_stack_rate_bytes(),
      synchronized_counters = Counter::SYNCHRONIZED,
      "sample heap ready"
    );

    let rate = config.sampling_rate_bytes;

    Ok(Self {
      call_stack_sampler: Sampler::new(
        config.call_stack_rate_bytes(),
        config.threshold,
        stream_seed(seed, 2),
      ),
      channel,
      classifier: Classifier::new(
        stack,
        rules,
        config.max_frames,
        config.symbol_cache_slots,
      ),
      free_sampler: Sampler::new(
        rate,
        config.threshold,
        stream_seed(seed, 1),
      ),
      free_triggered: Counter::default(),
      heap,
      malloc_sampler: Sampler::new(
        rate,
        config.threshold,
        stream_seed(seed, 0),
      ),
      malloc_triggered: Counter::default(),
      notifier,
      tally: AttributionTally::new(),
      config,
    })
  }

  #[must_use]
  pub fn heap(&self) -> &H {
    &self.heap
  }

  #[must_use]
  pub fn notifier(&self) -> &N {
    &self.notifier
  }

  /// # Safety
  ///
  /// `ptr` must be live and come from `self.heap`.
  unsafe fn on_allocate(&self, ptr: *mut u8, requested: usize, bounded: bool) {
    let Some(_guard) = ReentrancyGuard::enter() else {
      return;
    };

    // SAFETY: forwarded caller contract.
    let granted = unsafe { self.heap.granted_size(ptr) };

    debug_assert!(
      granted >= requested,
      "heap granted {granted} bytes for a {requested} byte request"
    );
    debug_assert!(
      !bounded || requested < SMALL_OBJECT_BYTES || granted <= 2 * requested,
      "heap granted {granted} bytes for a {requested} byte request"
    );

    self.sample_allocation(granted);
  }

  /// Release `ptr` and sample the freed size. Null is ignored.
  ///
  /// # Safety
  ///
  /// `ptr` must be null or a live pointer obtained from this wrapper.
  pub unsafe fn release(&self, ptr: *mut u8) {
    if ptr.is_null() {
      return;
    }

    // SAFETY: forwarded caller contract.
    let freed = unsafe { self.heap.release(ptr) };

    let Some(_guard) = ReentrancyGuard::enter() else {
      return;
    };

    let units = self.free_sampler.sample(freed);

    if units > 0 {
      self.report(SignalKind::Free, units);
      self.free_triggered.add(1);
      self.notifier.raise(SignalKind::Free);
    }
  }

  fn report(&self, kind: SignalKind, units: u64) {
    let record = ReportRecord {
      byte_estimate: units.saturating_mul(self.config.sampling_rate_bytes),
      interpreter_fraction: self.tally.interpreter_fraction(),
      kind,
      trigger_count: self.trigger_count(),
    };

    if let Err(err) = self.channel.append(&record) {
      tracing::trace!(%err, "dropped report record");
    }
  }

  fn sample_allocation(&self, size: usize) {
    let units = self.malloc_sampler.sample(size);
    let call_stack_units = self.call_stack_sampler.sample(size);

    if call_stack_units > 0 {
      self.tally.record(self.classifier.classify(), size);
    }

    if units > 0 {
      self.report(SignalKind::Malloc, units);
      self.tally.reset();
      self.malloc_triggered.add(1);
      self.notifier.raise(SignalKind::Malloc);
    }
  }

  /// Point-in-time view of the wrapper's counters.
  #[must_use]
  pub fn stats(&self) -> ProfilerStats {
    ProfilerStats {
      cached_symbols: self.classifier.cache().len(),
      call_stack_rate_bytes: self.call_stack_sampler.rate(),
      counters_synchronized: Counter::SYNCHRONIZED,
      free_triggers: self.free_triggered.get(),
      interpreter_bytes: self.tally.interpreter_bytes(),
      interpreter_fraction: self.tally.interpreter_fraction(),
      malloc_triggers: self.malloc_triggered.get(),
      native_bytes: self.tally.native_bytes(),
      sampling_rate_bytes: self.malloc_sampler.rate(),
    }
  }

  #[must_use]
  pub fn tally(&self) -> &AttributionTally {
    &self.tally
  }

  /// Allocation and free triggers since construction.
  #[must_use]
  pub fn trigger_count(&self) -> u64 {
    self
      .malloc_triggered
      .get()
      .wrapping_add(self.free_triggered.get())
  }
}

impl<H, N, S> Drop for SampleHeap<H, N, S> {
  fn drop(&mut self) {
    if let Err(err) = self.channel.remove() {
      tracing::warn!(
        channel = %self.channel.path().display(),
        %err,
        "failed to remove report channel"
      );
    }
  }
}

fn stream_seed(seed: u64, stream: u64) -> u64 {
  seed.wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
}
