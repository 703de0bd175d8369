use super::*;

/// The allocator being profiled.
///
/// # Safety
///
/// `granted_size` must report at least the requested size for any pointer
/// returned by `allocate`/`allocate_aligned`, and `release` must accept
/// exactly those pointers. Implementations must not allocate through the
/// wrapper that sits on top of them.
pub unsafe trait Heap {
  /// Alignment every pointer from `allocate` satisfies.
  const ALIGNMENT: usize;

  /// Allocate `size` bytes, returning null on failure.
  fn allocate(&self, size: usize) -> *mut u8;

  /// Allocate `size` bytes aligned to `align`, returning null on failure or
  /// when the alignment cannot be honoured.
  fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8 {
    if align <= Self::ALIGNMENT {
      self.allocate(size)
    } else {
      ptr::null_mut()
    }
  }

  /// Usable size of a live allocation.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live pointer obtained from this heap.
  unsafe fn granted_size(&self, ptr: *mut u8) -> usize;

  /// Return `ptr` to the heap and report how many bytes it held.
  ///
  /// # Safety
  ///
  /// `ptr` must be a live, non-null pointer obtained from this heap.
  unsafe fn release(&self, ptr: *mut u8) -> usize;
}

/// The C library's `malloc` family.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHeap;

// SAFETY: `malloc_usable_size`/`malloc_size` report the usable size, which
// is never below the requested size.
unsafe impl Heap for SystemHeap {
  const ALIGNMENT: usize = 2 * size_of::<usize>();

  fn allocate(&self, size: usize) -> *mut u8 {
    // SAFETY: `malloc` has no preconditions.
    unsafe { libc::malloc(size).cast() }
  }

  fn allocate_aligned(&self, size: usize, align: usize) -> *mut u8 {
    if align <= Self::ALIGNMENT {
      return self.allocate(size);
    }

    let mut out = ptr::null_mut();
    let align = align.max(size_of::<usize>());

    // SAFETY: `align` is a power of two (it comes from a `Layout`) and a
    // multiple of the pointer size.
    match unsafe { libc::posix_memalign(&mut out, align, size) } {
      0 => out.cast(),
      _ => ptr::null_mut(),
    }
  }

  unsafe fn granted_size(&self, ptr: *mut u8) -> usize {
    // SAFETY: forwarded caller contract.
    unsafe { usable_size(ptr) }
  }

  unsafe fn release(&self, ptr: *mut u8) -> usize {
    // SAFETY: forwarded caller contract; the size is read before freeing.
    unsafe {
      let size = usable_size(ptr);
      libc::free(ptr.cast());
      size
    }
  }
}

#[cfg(target_os = "macos")]
unsafe fn usable_size(ptr: *mut u8) -> usize {
  unsafe { libc::malloc_size(ptr.cast_const().cast()) }
}

#[cfg(not(target_os = "macos"))]
unsafe fn usable_size(ptr: *mut u8) -> usize {
  unsafe { libc::malloc_usable_size(ptr.cast()) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn system_heap_grants_at_least_requested() {
    let heap = SystemHeap;

    for size in [1, 16, 100, 4096, 200_000] {
      let ptr = heap.allocate(size);
      assert!(!ptr.is_null());

      let granted = unsafe { heap.granted_size(ptr) };
      assert!(granted >= size);
      assert!(size < 16 || granted <= 2 * size);

      assert_eq!(unsafe { heap.release(ptr) }, granted);
    }
  }

  #[test]
  fn system_heap_honours_large_alignment() {
    let heap = SystemHeap;
    let ptr = heap.allocate_aligned(100, 4096);

    assert!(!ptr.is_null());
    assert_eq!(ptr as usize % 4096, 0);
    assert!(unsafe { heap.release(ptr) } >= 100);
  }

  #[test]
  fn default_aligned_allocation_refuses_unsupported_alignment() {
    struct NullHeap;

    unsafe impl Heap for NullHeap {
      const ALIGNMENT: usize = 8;

      fn allocate(&self, _size: usize) -> *mut u8 {
        std::ptr::NonNull::dangling().as_ptr()
      }

      unsafe fn granted_size(&self, _ptr: *mut u8) -> usize {
        0
      }

      unsafe fn release(&self, _ptr: *mut u8) -> usize {
        0
      }
    }

    assert!(!NullHeap.allocate_aligned(8, 8).is_null());
    assert!(NullHeap.allocate_aligned(8, 64).is_null());
  }
}
