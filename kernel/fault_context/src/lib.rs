//! The data captured when the hardware raises a synchronous fault.
//!
//! A [`FaultContext`] is built once by the fault trap from the exception frame
//! and never modified afterwards; every later stage (unwinding, symbol resolution,
//! reporting, recovery) only reads it.

#![no_std]

mod cause;

pub use cause::TrapCause;

use core::fmt;

/// The classified kind of a fault.
///
/// The discriminants are the values written into the fault kind byte of a binary report,
/// so existing values must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FaultKind {
    /// A fault that matched none of the other classifications.
    Unknown       = 0,
    /// A memory access to an address inside the reserved first page.
    NullDeref     = 1,
    /// A load, store, or fetch from an address not aligned to its access size.
    Misaligned    = 2,
    /// An integer division by zero.
    DivByZero     = 3,
    /// The stack pointer left the stack, or the access hit the guard window below it.
    StackOverflow = 4,
    /// A debug trap. Not an error: execution may resume.
    Breakpoint    = 5,
}

impl FaultKind {
    /// Returns the `FaultKind` encoded by the given report byte, if valid.
    pub const fn from_u8(value: u8) -> Option<FaultKind> {
        Some(match value {
            0 => FaultKind::Unknown,
            1 => FaultKind::NullDeref,
            2 => FaultKind::Misaligned,
            3 => FaultKind::DivByZero,
            4 => FaultKind::StackOverflow,
            5 => FaultKind::Breakpoint,
            _ => return None,
        })
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            FaultKind::Unknown       => "Unknown",
            FaultKind::NullDeref     => "NullDeref",
            FaultKind::Misaligned    => "Misaligned",
            FaultKind::DivByZero     => "DivByZero",
            FaultKind::StackOverflow => "StackOverflow",
            FaultKind::Breakpoint    => "Breakpoint",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The registers saved by the hardware (or the vector glue) when the fault was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SavedRegisters {
    /// Program counter of the faulting instruction.
    pub pc: usize,
    /// Stack pointer at the time of the fault.
    pub sp: usize,
    /// Frame pointer at the time of the fault; the head of the frame record chain.
    pub fp: usize,
    /// Link / return-address register. Zero on architectures that have none.
    pub lr: usize,
}

/// Everything known about one fault at the moment it was trapped.
///
/// There are no setters: a `FaultContext` is immutable once captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultContext {
    kind: FaultKind,
    fault_address: usize,
    registers: SavedRegisters,
    cause_code: u32,
    core: u8,
}

impl FaultContext {
    pub const fn new(kind: FaultKind, fault_address: usize, registers: SavedRegisters) -> FaultContext {
        FaultContext {
            kind,
            fault_address,
            registers,
            cause_code: 0,
            core: 0,
        }
    }

    /// Returns this context with the raw architecture cause code attached.
    pub const fn with_cause_code(mut self, cause_code: u32) -> FaultContext {
        self.cause_code = cause_code;
        self
    }

    /// Returns this context tagged with the id of the core that faulted.
    pub const fn on_core(mut self, core: u8) -> FaultContext {
        self.core = core;
        self
    }

    pub const fn kind(&self) -> FaultKind {
        self.kind
    }

    /// The address whose access caused the fault (e.g., `MTVAL`, `EXCVADDR`, `CR2`, `FAR`).
    pub const fn fault_address(&self) -> usize {
        self.fault_address
    }

    pub const fn registers(&self) -> &SavedRegisters {
        &self.registers
    }

    pub const fn pc(&self) -> usize {
        self.registers.pc
    }

    pub const fn sp(&self) -> usize {
        self.registers.sp
    }

    pub const fn fp(&self) -> usize {
        self.registers.fp
    }

    pub const fn lr(&self) -> usize {
        self.registers.lr
    }

    pub const fn cause_code(&self) -> u32 {
        self.cause_code
    }

    pub const fn core(&self) -> u8 {
        self.core
    }
}
