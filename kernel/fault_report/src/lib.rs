//! Fault reports: the captured context plus the resolved call stack, and the ways to get
//! them off the device.
//!
//! A [`FaultReport`] is built exactly once from a [`FaultContext`] and a consumed
//! [`FrameIter`], and cannot be modified afterwards.
//! It can be rendered as text through its `Display` impl, or serialized into the
//! versioned binary layout (see the [`binary`] module) and handed to a [`ReportSink`]
//! by [`emit()`], which degrades to a one-line summary when the full report can't be written.
//!
//! Nothing in this crate allocates or recurses.

#![no_std]

pub mod binary;
mod emit;
mod sink;
mod text;

pub use binary::{AddressWidth, EncodeError, ParseError, ParsedReport};
pub use emit::{emit, EmitFailure, EmitOutcome};
pub use sink::{PersistentRegion, PolledTransmitter, ReportSink, SinkError, TransmitPort};
pub use text::{parse_backtrace_line, parse_register_dump, write_summary, FixedBuf, RegisterDump};

use core::fmt;
use fault_context::FaultContext;
use kernel_config::fault::MAX_STACK_FRAMES;
use kernel_config::memory::BYTES_PER_ADDR;
use stack_trace_frame_pointers::{FrameIter, StackFrame, StackMemory, Truncation};
use symbol_table::{SymbolInfo, SymbolTable};

/// One unwound frame and, if the symbol table covered it, the function it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedFrame {
    pub frame: StackFrame,
    pub symbol: Option<SymbolInfo<'static>>,
}

impl ResolvedFrame {
    const EMPTY: ResolvedFrame = ResolvedFrame { frame: StackFrame::new(0, 0), symbol: None };
}

/// The complete record of one fault.
#[derive(Debug, Clone)]
pub struct FaultReport {
    context: FaultContext,
    frames: [ResolvedFrame; MAX_STACK_FRAMES],
    frame_count: usize,
    truncation: Truncation,
}

impl FaultReport {
    /// Builds a report by draining `frames` and resolving each one against `symbols`.
    ///
    /// Frames that no symbol covers are kept with their raw address only.
    pub fn new<M: StackMemory + ?Sized>(
        context: FaultContext,
        mut frames: FrameIter<'_, M>,
        symbols: Option<&SymbolTable<'static>>,
    ) -> FaultReport {
        let mut report = FaultReport {
            context,
            frames: [ResolvedFrame::EMPTY; MAX_STACK_FRAMES],
            frame_count: 0,
            truncation: Truncation::empty(),
        };
        for slot in report.frames.iter_mut() {
            let Some(frame) = frames.next() else { break };
            *slot = ResolvedFrame {
                frame,
                symbol: symbols.and_then(|table| table.resolve(&frame)),
            };
            report.frame_count += 1;
        }
        // the iterator is fused, so this only yields a frame if it outgrew the report
        let overflowed = frames.next().is_some();
        report.truncation = frames.truncation();
        if overflowed {
            report.truncation |= Truncation::DEPTH;
        }
        report
    }

    pub fn context(&self) -> &FaultContext {
        &self.context
    }

    /// The resolved frames, innermost first.
    pub fn frames(&self) -> &[ResolvedFrame] {
        &self.frames[..self.frame_count]
    }

    pub fn truncation(&self) -> Truncation {
        self.truncation
    }
}

/// Formats `addr` zero-padded to this machine's pointer width.
struct Addr(usize);

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#0width$X}", self.0, width = 2 + 2 * BYTES_PER_ADDR)
    }
}

impl fmt::Display for FaultReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ctx = &self.context;
        writeln!(
            f,
            "FAULT: {} at {} (core {}, cause {:#X})",
            ctx.kind(), Addr(ctx.fault_address()), ctx.core(), ctx.cause_code(),
        )?;
        writeln!(
            f,
            "PC: {}  SP: {}  FP: {}  LR: {}",
            Addr(ctx.pc()), Addr(ctx.sp()), Addr(ctx.fp()), Addr(ctx.lr()),
        )?;
        f.write_str("Backtrace:")?;
        for resolved in self.frames() {
            write!(f, " {}", Addr(resolved.frame.return_address()))?;
        }
        f.write_str("\n")?;
        for resolved in self.frames() {
            write!(f, "  #{:<2} {} in ", resolved.frame.index(), Addr(resolved.frame.return_address()))?;
            match resolved.symbol {
                Some(symbol) => writeln!(f, "{}", symbol)?,
                None => writeln!(f, "??")?,
            }
        }
        if self.truncation.contains(Truncation::VALIDATION) {
            writeln!(f, "  (backtrace stopped: corrupted frame record)")?;
        }
        if self.truncation.contains(Truncation::DEPTH) {
            writeln!(f, "  (backtrace stopped: maximum depth of {} frames)", MAX_STACK_FRAMES)?;
        }
        Ok(())
    }
}
