use super::*;

/// Default slot count, large enough that realistic working sets of return
/// addresses rarely collide.
pub const DEFAULT_SYMBOL_CACHE_SLOTS: usize = 65_536;

#[derive(Debug, Default)]
struct Slot {
  address: AtomicUsize,
  name: AtomicPtr<c_char>,
}

/// Fixed-capacity, open-addressed map from return address to symbol name.
///
/// Entries are write-once: an address keeps the first name stored for it and
/// the table never grows or deletes. Names are borrowed from the dynamic
/// loader's symbol tables, hence `'static`. Address zero marks an empty slot
/// and is never cached.
#[derive(Debug)]
pub struct SymbolCache {
  len: AtomicUsize,
  mask: usize,
  shift: u32,
  slots: Box<[Slot]>,
}

impl SymbolCache {
  #[must_use]
  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  /// Look up a previously cached name.
  #[must_use]
  pub fn get(&self, address: usize) -> Option<&'static CStr> {
    if address == 0 {
      return None;
    }

    for slot in self.probe(address) {
      match slot.address.load(Ordering::Acquire) {
        0 => return None,
        key if key == address => {
          let name = slot.name.load(Ordering::Acquire);

          if name.is_null() {
            // Claimed by a concurrent `put` that has not published yet.
            return None;
          }

          // SAFETY: only pointers taken from `&'static CStr` are stored.
          return Some(unsafe { CStr::from_ptr(name) });
        }
        _ => {}
      }
    }

    None
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Number of occupied slots.
  #[must_use]
  pub fn len(&self) -> usize {
    self.len.load(Ordering::Relaxed)
  }

  /// Create a cache with `slots` entries, rounded up to a power of two.
  #[must_use]
  pub fn new(slots: usize) -> Self {
    let capacity = slots.max(2).next_power_of_two();

    Self {
      len: AtomicUsize::new(0),
      mask: capacity - 1,
      shift: u64::BITS - capacity.trailing_zeros(),
      slots: (0..capacity).map(|_| Slot::default()).collect(),
    }
  }

  fn probe(&self, address: usize) -> impl Iterator<Item = &Slot> {
    // Fibonacci hashing: the high bits of the product spread aligned code
    // addresses across the table.
    let start = ((address as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
      >> self.shift) as usize;

    (0..self.slots.len())
      .map(move |step| &self.slots[start.wrapping_add(step) & self.mask])
  }

  /// Insert `name` for `address`.
  ///
  /// A no-op when the address is already present or the table is full.
  pub fn put(&self, address: usize, name: &'static CStr) {
    if address == 0 {
      return;
    }

    for slot in self.probe(address) {
      match slot.address.compare_exchange(
        0,
        address,
        Ordering::AcqRel,
        Ordering::Acquire,
      ) {
        Ok(_) => {
          slot.name.store(name.as_ptr().cast_mut(), Ordering::Release);
          self.len.fetch_add(1, Ordering::Relaxed);
          return;
        }
        Err(existing) if existing == address => return,
        Err(_) => {}
      }
    }
  }
}

impl Default for SymbolCache {
  fn default() -> Self {
    Self::new(DEFAULT_SYMBOL_CACHE_SLOTS)
  }
}
