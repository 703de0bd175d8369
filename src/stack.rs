use super::*;

/// Upper bound on frames the classifier will ever inspect.
pub const MAX_FRAMES_LIMIT: usize = 32;

/// Access to the current call stack and to the symbol tables that name it.
///
/// Implementations run inside the allocator, so neither method may allocate
/// through the wrapped heap.
pub trait StackInspector {
  /// Write the return addresses of the caller's frames, nearest first, into
  /// `frames` and return how many were written.
  fn capture(&self, frames: &mut [usize]) -> usize;

  /// Resolve a return address to its dynamic symbol name.
  fn resolve(&self, address: usize) -> Option<&'static CStr>;
}

/// Frames between the sampling boundary and the caller of the wrapper: the
/// public entry point (`SampleHeap::allocate` or `GlobalAlloc::alloc`).
pub const ENTRY_FRAMES: usize = 1;

/// How far up the stack `NativeStack` looks for the sampling boundary.
const BOUNDARY_SEARCH_FRAMES: usize = 64;

/// Run `body` inside the frame that `NativeStack` treats as the edge of the
/// wrapper's own code.
#[inline(never)]
pub(crate) fn sampling_boundary(body: &mut dyn FnMut()) {
  // The call must not become a tail call or this frame disappears.
  std::hint::black_box(body());
}

fn boundary_address() -> usize {
  sampling_boundary as usize
}

/// Walks the native stack with `backtrace` and names frames through
/// `dladdr`, so only exported dynamic symbols are visible.
///
/// Frames inside the wrapper are dropped: capture starts past the
/// [`sampling_boundary`] frame and then skips `skip_frames` entry frames.
/// When no boundary is on the stack (or the unwinder cannot report function
/// start addresses) `skip_frames` counts from the innermost frame instead.
#[derive(Debug, Clone, Copy)]
pub struct NativeStack {
  skip_frames: usize,
}

impl Default for NativeStack {
  fn default() -> Self {
    Self::new(ENTRY_FRAMES)
  }
}

impl NativeStack {
  #[must_use]
  pub fn new(skip_frames: usize) -> Self {
    Self { skip_frames }
  }

  #[must_use]
  pub fn skip_frames(&self) -> usize {
    self.skip_frames
  }
}

impl StackInspector for NativeStack {
  fn capture(&self, frames: &mut [usize]) -> usize {
    let boundary = boundary_address();
    let mut captured = 0;
    let mut past_boundary = false;
    let mut remaining_skip = self.skip_frames;
    let mut walked = 0;

    backtrace::trace(|frame| {
      walked += 1;

      if !past_boundary && frame.symbol_address() as usize == boundary {
        past_boundary = true;
        captured = 0;
        remaining_skip = self.skip_frames;
        return true;
      }

      if remaining_skip > 0 {
        remaining_skip -= 1;
      } else if captured < frames.len() {
        frames[captured] = frame.ip() as usize;
        captured += 1;
      }

      if past_boundary {
        captured < frames.len()
      } else {
        walked < BOUNDARY_SEARCH_FRAMES
      }
    });

    captured
  }

  fn resolve(&self, address: usize) -> Option<&'static CStr> {
    if address == 0 {
      return None;
    }

    let mut info = MaybeUninit::<libc::Dl_info>::zeroed();

    // SAFETY: `dladdr` only reads `address` and fills `info` on success.
    let found =
      unsafe { libc::dladdr(address as *const c_void, info.as_mut_ptr()) };

    if found == 0 {
      return None;
    }

    // SAFETY: a non-zero return means `info` was initialised.
    let info = unsafe { info.assume_init() };

    if info.dli_sname.is_null() {
      return None;
    }

    // SAFETY: the name lives in the loader's string table for as long as the
    // object stays mapped.
    Some(unsafe { CStr::from_ptr(info.dli_sname) })
  }
}
