//! Architecture cause codes, decoded into one architecture-neutral [`TrapCause`].

use core::fmt;

/// Why the hardware entered the trap, independent of the architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    DivideByZero,
    Misaligned,
    Breakpoint,
    IllegalInstruction,
    /// An instruction fetch from an address that could not be fetched.
    InstructionFetch,
    /// A load from an address that could not be read.
    Load,
    /// A store to an address that could not be written.
    Store,
    /// A memory access whose direction the cause code does not tell.
    MemoryAccess,
    /// A cause code with no mapping; carries the raw code.
    Other(u32),
}

impl TrapCause {
    /// Returns `true` if this cause was a failed memory access of any kind.
    pub const fn is_memory_access(&self) -> bool {
        matches!(
            self,
            TrapCause::InstructionFetch | TrapCause::Load | TrapCause::Store | TrapCause::MemoryAccess
        )
    }

    /// Decodes an x86 exception vector number.
    pub const fn from_x86_vector(vector: u8) -> TrapCause {
        match vector {
            0x00 => TrapCause::DivideByZero,
            0x03 => TrapCause::Breakpoint,
            0x06 => TrapCause::IllegalInstruction,
            0x0C => TrapCause::MemoryAccess, // stack segment fault
            0x0D => TrapCause::MemoryAccess, // general protection fault
            0x0E => TrapCause::MemoryAccess, // page fault; direction is in the error code
            0x11 => TrapCause::Misaligned,   // alignment check
            v => TrapCause::Other(v as u32),
        }
    }

    /// Decodes a RISC-V `mcause` value. Interrupts (the top bit set) are not faults.
    pub const fn from_riscv_mcause(mcause: usize) -> TrapCause {
        const INTERRUPT_BIT: usize = 1 << (usize::BITS - 1);
        if mcause & INTERRUPT_BIT != 0 {
            return TrapCause::Other(mcause as u32);
        }
        match mcause {
            0 | 4 | 6 => TrapCause::Misaligned,
            1 | 12    => TrapCause::InstructionFetch,
            2         => TrapCause::IllegalInstruction,
            3         => TrapCause::Breakpoint,
            5 | 13    => TrapCause::Load,
            7 | 15    => TrapCause::Store,
            code      => TrapCause::Other(code as u32),
        }
    }

    /// Decodes an Xtensa `EXCCAUSE` value, as printed in ESP32 panic output.
    pub const fn from_xtensa_exccause(exccause: u32) -> TrapCause {
        match exccause {
            0                   => TrapCause::IllegalInstruction,
            2 | 12 | 14         => TrapCause::InstructionFetch,
            16 | 17 | 18 | 20   => TrapCause::InstructionFetch,
            3 | 13 | 15         => TrapCause::MemoryAccess,
            24 | 25 | 26        => TrapCause::MemoryAccess,
            6                   => TrapCause::DivideByZero,
            9                   => TrapCause::Misaligned,
            28                  => TrapCause::Load,
            29                  => TrapCause::Store,
            code                => TrapCause::Other(code),
        }
    }
}

impl fmt::Display for TrapCause {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TrapCause::DivideByZero       => f.write_str("divide by zero"),
            TrapCause::Misaligned         => f.write_str("misaligned access"),
            TrapCause::Breakpoint         => f.write_str("breakpoint"),
            TrapCause::IllegalInstruction => f.write_str("illegal instruction"),
            TrapCause::InstructionFetch   => f.write_str("instruction fetch fault"),
            TrapCause::Load               => f.write_str("load fault"),
            TrapCause::Store              => f.write_str("store fault"),
            TrapCause::MemoryAccess       => f.write_str("memory access fault"),
            TrapCause::Other(code)        => write!(f, "cause {:#X}", code),
        }
    }
}
