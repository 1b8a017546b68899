//! Stack trace (backtrace) functionality using frame pointers.
//!
//! When the compiler is configured to emit frame pointers
//! (`-C force-frame-pointers=yes`), every function prologue pushes a *frame record*:
//! the caller's frame pointer and the return address into the caller.
//! The frame pointer register then points at (or just above) that record,
//! so the records form a linked list from the innermost frame outwards.
//!
//! This crate walks that list starting from the frame pointer captured in a [`FaultContext`].
//! It runs inside a fault handler, where a second fault would be catastrophic,
//! so it never follows a pointer it has not first checked:
//! * every frame record must lie entirely within the declared [`StackBounds`],
//! * every frame record must be word aligned,
//! * every frame record must lie strictly above the previous one (stacks grow down),
//!   which also rules out cycles.
//!
//! The walk is an explicit loop bounded by [`MAX_STACK_FRAMES`].
//! A walk that stops early is flagged in its [`Truncation`]:
//! [`Truncation::VALIDATION`] when a record failed the checks above,
//! [`Truncation::DEPTH`] when the bound was reached while the chain still continued.

#![no_std]

mod memory;

pub use memory::{LiveStack, StackBounds, StackMemory, StackSnapshot};

use bitflags::bitflags;
use fault_context::FaultContext;
use kernel_config::fault::MAX_STACK_FRAMES;
use log::{trace, warn};

/// Whether this build forces frame pointers. Without them, traces usually stop at frame 0.
pub const FRAME_POINTERS_ENABLED: bool = cfg!(frame_pointers);

bitflags! {
    /// Why an unwind stopped before reaching the end of the frame-pointer chain.
    ///
    /// The bit values are written into the truncation byte of a binary fault report.
    pub struct Truncation: u8 {
        /// A frame record failed validation; the chain was not followed further.
        const VALIDATION = 1 << 0;
        /// The maximum number of frames was reached while the chain still continued.
        const DEPTH      = 1 << 1;
    }
}

/// Where a function's frame record sits relative to the frame pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLayout {
    /// `[fp]` is the caller's frame pointer, `[fp + word]` the return address.
    /// Used on x86_64 (`rbp`) and AArch64 (`x29`).
    RecordAtFp,
    /// `[fp - 2 * word]` is the caller's frame pointer, `[fp - word]` the return address.
    /// Used on RISC-V (`s0`), whose frame pointer points just past the saved registers.
    RecordBelowFp,
}

impl FrameLayout {
    cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))] {
        /// The frame record layout of the architecture this crate is compiled for.
        pub const NATIVE: FrameLayout = FrameLayout::RecordBelowFp;
    } else {
        /// The frame record layout of the architecture this crate is compiled for.
        pub const NATIVE: FrameLayout = FrameLayout::RecordAtFp;
    }
    }

    /// Returns the lowest address of the two-word frame record that `fp` refers to.
    fn record_start(self, fp: usize, word: usize) -> Option<usize> {
        match self {
            FrameLayout::RecordAtFp    => Some(fp),
            FrameLayout::RecordBelowFp => fp.checked_sub(2 * word),
        }
    }
}

/// One entry of an unwound call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    index: usize,
    return_address: usize,
}

impl StackFrame {
    pub const fn new(index: usize, return_address: usize) -> StackFrame {
        StackFrame { index, return_address }
    }

    /// The position of this frame in the call stack; 0 is the innermost (faulting) frame.
    pub const fn index(&self) -> usize {
        self.index
    }

    /// For frame 0, the faulting program counter; otherwise the address execution
    /// would have returned to in the caller.
    pub const fn return_address(&self) -> usize {
        self.return_address
    }

    /// The address that best identifies the function this frame is executing.
    ///
    /// A return address points past the call instruction and may already belong to
    /// the next function, so for frames above 0 this backs up by one byte into the call.
    pub const fn call_site_address(&self) -> usize {
        if self.index == 0 {
            self.return_address
        } else {
            self.return_address.saturating_sub(1)
        }
    }
}

/// Starts an unwind of the stack described by `context`, using the native frame layout
/// and the default maximum depth.
pub fn unwind<'m, M: StackMemory + ?Sized>(
    context: &FaultContext,
    bounds: StackBounds,
    memory: &'m M,
) -> FrameIter<'m, M> {
    FrameIter::new(context, bounds, memory)
}

/// A lazy, finite iterator over the frames of a call stack.
///
/// The iterator cannot be cloned or restarted: once it returns `None`,
/// it keeps returning `None`, and [`FrameIter::truncation()`] tells why it stopped.
pub struct FrameIter<'m, M: StackMemory + ?Sized> {
    memory: &'m M,
    bounds: StackBounds,
    layout: FrameLayout,
    max_frames: usize,
    pc: usize,
    fp: usize,
    /// Start address of the last frame record that was followed.
    last_record: Option<usize>,
    index: usize,
    finished: bool,
    truncation: Truncation,
}

impl<'m, M: StackMemory + ?Sized> FrameIter<'m, M> {
    pub fn new(context: &FaultContext, bounds: StackBounds, memory: &'m M) -> FrameIter<'m, M> {
        FrameIter {
            memory,
            bounds,
            layout: FrameLayout::NATIVE,
            max_frames: MAX_STACK_FRAMES,
            pc: context.pc(),
            fp: context.fp(),
            last_record: None,
            index: 0,
            finished: false,
            truncation: Truncation::empty(),
        }
    }

    /// Uses the given frame record layout instead of the native one,
    /// e.g., when decoding a stack dump from another architecture.
    pub fn with_layout(mut self, layout: FrameLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Lowers the maximum number of frames. Values are clamped to `1 ..= MAX_STACK_FRAMES`.
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames.clamp(1, MAX_STACK_FRAMES);
        self
    }

    /// The reasons this unwind stopped early. Empty while iteration is still in progress
    /// and after an unwind that reached the natural end of the chain.
    pub fn truncation(&self) -> Truncation {
        self.truncation
    }

    /// Returns `true` once the iterator has produced its last frame.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn finish(&mut self, truncation: Truncation) -> Option<StackFrame> {
        self.truncation |= truncation;
        self.finished = true;
        None
    }

    /// Validates the frame record referred to by `self.fp` and reads it.
    ///
    /// Returns the record's start address, the caller's frame pointer, and the return address.
    fn read_record(&self) -> Result<(usize, usize, usize), &'static str> {
        let word = self.memory.word_size();
        if word != 4 && word != 8 {
            return Err("stack memory reports an unsupported word size");
        }
        if self.fp % word != 0 {
            return Err("frame pointer is not word aligned");
        }
        let record = self.layout.record_start(self.fp, word)
            .ok_or("frame pointer too small to hold a frame record")?;
        if !self.bounds.contains_range(record, 2 * word) {
            return Err("frame record lies outside the valid stack range");
        }
        if let Some(last) = self.last_record {
            if record <= last {
                return Err("frame record does not lie above the previous one");
            }
        }
        // Both words of the record were checked to be within bounds above.
        let prev_fp = self.memory.read_word(record)
            .ok_or("stack memory could not provide the saved frame pointer")?;
        let return_address = self.memory.read_word(record + word)
            .ok_or("stack memory could not provide the return address")?;
        Ok((record, prev_fp, return_address))
    }
}

impl<'m, M: StackMemory + ?Sized> Iterator for FrameIter<'m, M> {
    type Item = StackFrame;

    fn next(&mut self) -> Option<StackFrame> {
        if self.finished {
            return None;
        }

        if self.index == 0 {
            self.index = 1;
            if self.max_frames == 1 && self.fp != 0 {
                self.truncation |= Truncation::DEPTH;
                self.finished = true;
            }
            return Some(StackFrame::new(0, self.pc));
        }

        // a zero frame pointer terminates the chain
        if self.fp == 0 {
            return self.finish(Truncation::empty());
        }

        match self.read_record() {
            Ok((record, prev_fp, return_address)) => {
                if return_address == 0 {
                    return self.finish(Truncation::empty());
                }
                let frame = StackFrame::new(self.index, return_address);
                trace!("unwind: frame {} at {:#X}, record {:#X}", self.index, return_address, record);
                self.last_record = Some(record);
                self.fp = prev_fp;
                self.index += 1;
                if self.index >= self.max_frames && self.fp != 0 {
                    warn!("unwind: stopped at the maximum depth of {} frames", self.max_frames);
                    self.truncation |= Truncation::DEPTH;
                    self.finished = true;
                }
                Some(frame)
            }
            Err(reason) => {
                warn!("unwind: stopped at frame {}, fp {:#X}: {}", self.index, self.fp, reason);
                self.finish(Truncation::VALIDATION)
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            (0, Some(0))
        } else {
            (0, Some(self.max_frames - self.index))
        }
    }
}

impl<'m, M: StackMemory + ?Sized> core::iter::FusedIterator for FrameIter<'m, M> {}
