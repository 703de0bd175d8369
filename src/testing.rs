//! Test doubles shared across unit tests.

use {
  super::*,
  std::{
    alloc::{GlobalAlloc, Layout, System},
    sync::Mutex,
  },
};

const HEADER: usize = 16;

/// Fresh, empty scratch directory unique to this process and test.
pub(crate) fn scratch_dir(name: &str) -> PathBuf {
  let dir = std::env::temp_dir()
    .join(format!("sampleheap-{name}-{}", std::process::id()));

  let _ = fs::remove_dir_all(&dir);
  fs::create_dir_all(&dir).expect("failed to create scratch dir");

  dir
}

/// Heap whose granted size always equals the requested size.
#[derive(Debug, Default)]
pub(crate) struct ExactHeap {
  fail: bool,
  releases: AtomicUsize,
}

impl ExactHeap {
  /// A heap that refuses every request.
  pub(crate) fn failing() -> Self {
    Self {
      fail: true,
      ..Self::default()
    }
  }

  pub(crate) fn releases(&self) -> usize {
    self.releases.load(Ordering::Relaxed)
  }
}

unsafe impl Heap for ExactHeap {
  const ALIGNMENT: usize = HEADER;

  fn allocate(&self, size: usize) -> *mut u8 {
    if self.fail {
      return ptr::null_mut();
    }

    let Ok(layout) = Layout::from_size_align(size + HEADER, HEADER) else {
      return ptr::null_mut();
    };

    unsafe {
      let base = System.alloc(layout);
      if base.is_null() {
        return base;
      }
      base.cast::<usize>().write(size);
      base.add(HEADER)
    }
  }

  unsafe fn granted_size(&self, ptr: *mut u8) -> usize {
    unsafe { ptr.sub(HEADER).cast::<usize>().read() }
  }

  unsafe fn release(&self, ptr: *mut u8) -> usize {
    self.releases.fetch_add(1, Ordering::Relaxed);

    unsafe {
      let base = ptr.sub(HEADER);
      let size = base.cast::<usize>().read();
      System.dealloc(
        base,
        Layout::from_size_align_unchecked(size + HEADER, HEADER),
      );
      size
    }
  }
}

/// Notifier that remembers what it was asked to do.
#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
  ignored: Mutex<Vec<SignalKind>>,
  raised: Mutex<Vec<SignalKind>>,
}

impl RecordingNotifier {
  pub(crate) fn ignored(&self) -> Vec<SignalKind> {
    self.ignored.lock().unwrap().clone()
  }

  pub(crate) fn raised(&self) -> Vec<SignalKind> {
    self.raised.lock().unwrap().clone()
  }
}

impl Notifier for RecordingNotifier {
  fn ignore(&self, kind: SignalKind) {
    self.ignored.lock().unwrap().push(kind);
  }

  fn raise(&self, kind: SignalKind) {
    self.raised.lock().unwrap().push(kind);
  }
}

/// Fixed call stack of fake return addresses with fixed symbol names.
#[derive(Debug, Default)]
pub(crate) struct SyntheticStack {
  captures: AtomicUsize,
  frames: Vec<(usize, Option<&'static CStr>)>,
  resolutions: AtomicUsize,
}

impl SyntheticStack {
  pub(crate) fn new<I>(frames: I) -> Self
  where
    I: IntoIterator<Item = (usize, Option<&'static CStr>)>,
  {
    Self {
      frames: frames.into_iter().collect(),
      ..Self::default()
    }
  }

  /// A stack made of one named frame.
  pub(crate) fn single(name: &'static CStr) -> Self {
    Self::new([(0x1000, Some(name))])
  }

  pub(crate) fn captures(&self) -> usize {
    self.captures.load(Ordering::Relaxed)
  }

  pub(crate) fn resolutions(&self) -> usize {
    self.resolutions.load(Ordering::Relaxed)
  }
}

impl StackInspector for SyntheticStack {
  fn capture(&self, frames: &mut [usize]) -> usize {
    self.captures.fetch_add(1, Ordering::Relaxed);

    let count = self.frames.len().min(frames.len());
    for (slot, (address, _)) in frames.iter_mut().zip(&self.frames) {
      *slot = *address;
    }

    count
  }

  fn resolve(&self, address: usize) -> Option<&'static CStr> {
    self.resolutions.fetch_add(1, Ordering::Relaxed);

    self
      .frames
      .iter()
      .find(|(candidate, _)| *candidate == address)
      .and_then(|(_, name)| *name)
  }
}
