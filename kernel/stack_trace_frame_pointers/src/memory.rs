//! Sources of stack memory and the range an unwind is allowed to read from.

use kernel_config::memory::BYTES_PER_ADDR;

/// The half-open address range `[bottom, top)` that holds a valid stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBounds {
    bottom: usize,
    top: usize,
}

impl StackBounds {
    /// Bounds that contain no address, so no frame record validates against them.
    pub const EMPTY: StackBounds = StackBounds { bottom: 0, top: 0 };

    /// Returns the bounds of the stack spanning `bottom` (lowest address) up to, but excluding, `top`.
    /// Returns `None` if `bottom` is above `top`.
    pub const fn new(bottom: usize, top: usize) -> Option<StackBounds> {
        if bottom > top {
            None
        } else {
            Some(StackBounds { bottom, top })
        }
    }

    pub const fn bottom(&self) -> usize {
        self.bottom
    }

    pub const fn top(&self) -> usize {
        self.top
    }

    pub const fn contains(&self, addr: usize) -> bool {
        self.bottom <= addr && addr < self.top
    }

    /// Returns `true` if all `len` bytes starting at `addr` lie within these bounds.
    pub const fn contains_range(&self, addr: usize, len: usize) -> bool {
        match addr.checked_add(len) {
            Some(end) => self.bottom <= addr && end <= self.top,
            None => false,
        }
    }
}

/// Read access to the memory of a stack.
///
/// The unwinder only calls [`read_word()`](StackMemory::read_word) for addresses
/// it has already checked against the [`StackBounds`].
pub trait StackMemory {
    /// Reads one word, little-endian, at `addr`.
    /// Returns `None` if this source has no data for that address.
    fn read_word(&self, addr: usize) -> Option<usize>;

    /// The size in bytes of one word of this stack, 4 or 8.
    /// The unwinder stops at the first record of a stack with any other word size.
    fn word_size(&self) -> usize {
        BYTES_PER_ADDR
    }
}

/// The stack of the running system, read directly through raw pointers.
pub struct LiveStack {
    _private: (),
}

impl LiveStack {
    /// # Safety
    /// Every [`StackBounds`] used together with the returned `LiveStack`
    /// must describe memory that is mapped and readable for its whole range.
    pub const unsafe fn new() -> LiveStack {
        LiveStack { _private: () }
    }
}

impl StackMemory for LiveStack {
    fn read_word(&self, addr: usize) -> Option<usize> {
        if addr % BYTES_PER_ADDR != 0 {
            return None;
        }
        // SAFE: the caller of `LiveStack::new()` guaranteed the validated range is readable,
        // and the unwinder only reads validated, aligned addresses.
        Some(unsafe { core::ptr::read_volatile(addr as *const usize) })
    }
}

/// A copy of stack memory taken earlier, e.g., the "Stack memory:" dump printed
/// by a panicking device, decoded later on a host.
#[derive(Debug, Clone, Copy)]
pub struct StackSnapshot<'a> {
    base: usize,
    bytes: &'a [u8],
    word_size: usize,
}

impl<'a> StackSnapshot<'a> {
    /// Creates a snapshot whose first byte was at address `base`, made of `word_size`-byte words.
    /// Returns `None` if `word_size` is neither 4 nor 8, or is wider than this machine's word.
    pub fn new(base: usize, bytes: &'a [u8], word_size: usize) -> Option<StackSnapshot<'a>> {
        if (word_size != 4 && word_size != 8) || word_size > BYTES_PER_ADDR {
            return None;
        }
        Some(StackSnapshot { base, bytes, word_size })
    }

    /// The bounds covered by this snapshot.
    pub fn bounds(&self) -> Option<StackBounds> {
        let top = self.base.checked_add(self.bytes.len())?;
        StackBounds::new(self.base, top)
    }
}

impl<'a> StackMemory for StackSnapshot<'a> {
    fn read_word(&self, addr: usize) -> Option<usize> {
        let offset = addr.checked_sub(self.base)?;
        let word = self.bytes.get(offset..offset.checked_add(self.word_size)?)?;
        let mut le = [0u8; BYTES_PER_ADDR];
        le[..self.word_size].copy_from_slice(word);
        Some(usize::from_le_bytes(le))
    }

    fn word_size(&self) -> usize {
        self.word_size
    }
}
