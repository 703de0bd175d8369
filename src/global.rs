use {
  super::*,
  std::alloc::{GlobalAlloc, Layout},
};

static GLOBAL_CHANNEL: OnceLock<PathBuf> = OnceLock::new();

/// Process-wide allocator that samples through a lazily built
/// [`SampleHeap`] over the system heap.
///
/// ```ignore
/// #[global_allocator]
/// static ALLOC: sampleheap::GlobalSampleHeap =
///   sampleheap::GlobalSampleHeap::new();
/// ```
///
/// The wrapper is built on first allocation from [`ProfilerConfig::from_env`].
/// If that fails the allocator keeps serving requests without sampling. The
/// report channel of the first global wrapper is removed at process exit.
pub struct GlobalSampleHeap {
  inner: OnceLock<Option<SampleHeap<SystemHeap>>>,
  load_config: fn() -> ProfilerConfig,
}

impl GlobalSampleHeap {
  #[must_use]
  pub const fn new() -> Self {
    Self::with_config(ProfilerConfig::from_env)
  }

  /// Like [`GlobalSampleHeap::new`] with configuration from `load_config`.
  #[must_use]
  pub const fn with_config(load_config: fn() -> ProfilerConfig) -> Self {
    Self {
      inner: OnceLock::new(),
      load_config,
    }
  }

  /// The sampling wrapper, once it has been built successfully.
  #[must_use]
  pub fn get(&self) -> Option<&SampleHeap<SystemHeap>> {
    self.inner.get().and_then(Option::as_ref)
  }

  fn init(&self) -> Option<SampleHeap<SystemHeap>> {
    match SampleHeap::with_config((self.load_config)(), SystemHeap) {
      Ok(heap) => {
        if GLOBAL_CHANNEL.set(heap.channel_path().to_path_buf()).is_ok() {
          // SAFETY: the callback is a plain `extern "C"` function.
          unsafe { libc::atexit(remove_global_channel) };
        }

        Some(heap)
      }
      Err(err) => {
        tracing::warn!(%err, "allocation sampling disabled");
        None
      }
    }
  }
}

impl Default for GlobalSampleHeap {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for GlobalSampleHeap {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    f.debug_struct("GlobalSampleHeap")
      .field("inner", &self.inner)
      .finish_non_exhaustive()
  }
}

// SAFETY: every pointer comes from the C heap, either through the sampling
// wrapper or directly, and is returned to it with `free`.
unsafe impl GlobalAlloc for GlobalSampleHeap {
  #[inline(never)]
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    let heap = {
      // Allocations made while building the wrapper land here.
      let Some(_guard) = ReentrancyGuard::enter() else {
        return SystemHeap.allocate_aligned(layout.size(), layout.align());
      };

      self.inner.get_or_init(|| self.init())
    };

    match heap {
      Some(heap) => heap.enter_allocate(layout.size(), layout.align()),
      None => SystemHeap.allocate_aligned(layout.size(), layout.align()),
    }
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
    match self.get() {
      // SAFETY: `ptr` came from `alloc`, which only hands out C heap
      // pointers.
      Some(heap) => unsafe { heap.release(ptr) },
      None => {
        // SAFETY: as above.
        unsafe { SystemHeap.release(ptr) };
      }
    }
  }
}

extern "C" fn remove_global_channel() {
  if let Some(path) = GLOBAL_CHANNEL.get() {
    let _ = fs::remove_file(path);
  }
}
