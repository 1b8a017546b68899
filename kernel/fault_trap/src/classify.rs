//! Turning what the hardware reported into a [`FaultKind`].

use fault_context::{FaultKind, TrapCause};
use kernel_config::memory::{NULL_PAGE_SIZE, STACK_GUARD_SIZE};
use stack_trace_frame_pointers::StackBounds;

/// The exception frame that the architecture's vector glue fills in
/// before calling into the fault handler.
///
/// Registers the architecture does not have are left zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct TrapFrame {
    pub pc: usize,
    pub sp: usize,
    pub fp: usize,
    pub lr: usize,
    /// The address whose access faulted (`CR2`, `FAR`, `mtval`, `EXCVADDR`).
    /// Zero for faults that are not memory accesses.
    pub fault_address: usize,
    /// The raw cause code: an x86 exception vector, RISC-V `mcause`, Xtensa `EXCCAUSE`, etc.
    pub cause_code: usize,
    /// The id of the core that took the fault.
    pub core: usize,
}

/// Decodes a raw cause code of the architecture this crate is compiled for.
pub fn decode_native_cause(cause_code: usize) -> TrapCause {
    cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "x86", target_arch = "x86_64"))] {
        TrapCause::from_x86_vector(cause_code as u8)
    } else if #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))] {
        TrapCause::from_riscv_mcause(cause_code)
    } else if #[cfg(target_arch = "xtensa")] {
        TrapCause::from_xtensa_exccause(cause_code as u32)
    } else {
        TrapCause::Other(cause_code as u32)
    }
    }
}

/// Returns `true` if `addr` lies in the guard window directly below the stack.
fn in_guard_window(addr: usize, bounds: &StackBounds) -> bool {
    addr < bounds.bottom() && addr >= bounds.bottom().saturating_sub(STACK_GUARD_SIZE)
}

/// Classifies a fault. The first matching rule wins:
/// 1. the stack pointer is outside `stack`, or a memory access faulted
///    in the guard window below it: [`FaultKind::StackOverflow`];
/// 2. a division by zero: [`FaultKind::DivByZero`];
/// 3. a misaligned access: [`FaultKind::Misaligned`];
/// 4. a breakpoint: [`FaultKind::Breakpoint`];
/// 5. a memory access below [`NULL_PAGE_SIZE`]: [`FaultKind::NullDeref`];
/// 6. anything else: [`FaultKind::Unknown`].
///
/// Rule 1 is skipped if the bounds of the faulting stack are not known.
/// A stack pointer equal to the top of the stack (an empty stack) is inside it.
pub fn classify(
    cause: TrapCause,
    fault_address: usize,
    sp: usize,
    stack: Option<&StackBounds>,
) -> FaultKind {
    if let Some(bounds) = stack {
        let sp_outside = sp < bounds.bottom() || sp > bounds.top();
        if sp_outside || (cause.is_memory_access() && in_guard_window(fault_address, bounds)) {
            return FaultKind::StackOverflow;
        }
    }
    match cause {
        TrapCause::DivideByZero => FaultKind::DivByZero,
        TrapCause::Misaligned => FaultKind::Misaligned,
        TrapCause::Breakpoint => FaultKind::Breakpoint,
        c if c.is_memory_access() && fault_address < NULL_PAGE_SIZE => FaultKind::NullDeref,
        _ => FaultKind::Unknown,
    }
}
