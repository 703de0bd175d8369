//! Statistical sampling wrapper around a process heap.
//!
//! Every allocation and free passes through [`SampleHeap`], which samples the
//! byte stream at a configurable mean rate, attributes sampled bytes to
//! interpreter or native code by inspecting a few caller frames, and reports
//! each trigger out of band: a line appended to a per-process channel file,
//! followed by a POSIX signal raised in the allocating thread.
//!
//! [`GlobalSampleHeap`] installs the same machinery as a Rust global
//! allocator.

mod channel;
mod classifier;
mod config;
mod counter;
mod error;
mod global;
mod heap;
mod report;
mod sample_heap;
mod sampler;
mod stack;
mod stats;
mod symbol_cache;
mod tally;

#[cfg(test)]
mod testing;

use {
  rand::{Rng, RngCore, SeedableRng, rngs::SmallRng},
  sample_heap::ReentrancyGuard,
  serde::{Deserialize, Serialize},
  stack::sampling_boundary,
  std::{
    cell::Cell,
    ffi::{CStr, c_char, c_int, c_void},
    fmt::{self, Display, Formatter},
    fs::{self, OpenOptions},
    io::{self, Cursor, Write},
    mem::MaybeUninit,
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
    ptr,
    str::FromStr,
    sync::{
      OnceLock,
      atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering},
    },
  },
};

pub use {
  channel::{
    CHANNEL_FILE_PREFIX, Notifier, ReportChannel, SignalNotifier,
    read_records,
  },
  classifier::{Classifier, ClassifierRules, FrameVerdict, Origin},
  config::ProfilerConfig,
  counter::Counter,
  error::{ParseReportError, ProfilerError},
  global::GlobalSampleHeap,
  heap::{Heap, SystemHeap},
  report::{MAX_RECORD_LEN, ReportRecord, SignalKind},
  sample_heap::{SMALL_OBJECT_BYTES, SampleHeap, SampleHeapBuilder},
  sampler::{Sampler, ThresholdPolicy},
  stack::{ENTRY_FRAMES, MAX_FRAMES_LIMIT, NativeStack, StackInspector},
  stats::ProfilerStats,
  symbol_cache::{DEFAULT_SYMBOL_CACHE_SLOTS, SymbolCache},
  tally::AttributionTally,
};
