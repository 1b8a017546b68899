//! Memory-map facts the fault classifier depends on.

/// The number of bytes in one machine address.
pub const BYTES_PER_ADDR: usize = core::mem::size_of::<usize>();

cfg_if::cfg_if! {
if #[cfg(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "riscv64"))] {
    /// Accesses below this address are classified as null dereferences.
    /// The first page is never mapped on paged targets.
    pub const NULL_PAGE_SIZE: usize = 0x1000;
} else {
    /// Accesses below this address are classified as null dereferences.
    /// Microcontrollers keep their vector table or a reserved region here.
    pub const NULL_PAGE_SIZE: usize = 0x400;
}
}

/// Size of the window directly below the bottom of the stack in which a faulting
/// access is treated as a stack overflow rather than a wild pointer.
pub const STACK_GUARD_SIZE: usize = 0x100;
