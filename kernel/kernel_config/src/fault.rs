//! Limits and versions of the fault report.

/// The maximum number of stack frames that an unwind will ever produce,
/// including frame 0 (the faulting program counter).
/// Reaching this bound stops the unwind and flags the trace as depth-truncated.
pub const MAX_STACK_FRAMES: usize = 32;

/// The version byte written at offset 0 of every binary fault report.
pub const FAULT_REPORT_FORMAT_VERSION: u8 = 1;

/// Size in bytes of the statically-allocated buffer that a fault report is encoded into.
///
/// Large enough for a full-depth report on a 64-bit target:
/// version + kind + address + count + frames + flags.
pub const REPORT_BUFFER_SIZE: usize = 1 + 1 + 8 + 1 + (8 * MAX_STACK_FRAMES) + 1;

/// Size in bytes of the buffer that the one-line fallback summary is formatted into.
pub const SUMMARY_BUFFER_SIZE: usize = 64;
