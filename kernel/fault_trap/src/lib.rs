//! The entry point for synchronous faults.
//!
//! The architecture's vector glue saves the faulting state into a [`TrapFrame`]
//! and calls [`handle_fault()`], which runs the whole pipeline on the faulting core
//! with interrupts disabled:
//! 1. classify the fault (see [`classify()`]),
//! 2. capture it as a [`FaultContext`],
//! 3. unwind the stack and resolve each frame against the symbol table,
//! 4. emit the report to the given [`ReportSink`],
//! 5. ask the recovery policy what to do, and do it.
//!
//! Nothing here allocates. The report and the buffer it is encoded into live inside
//! the [`FaultHandler`], and [`FAULT_HANDLER`] is a `const`-initialized static.
//! A fault raised while another fault is being handled never produces a second report:
//! it halts immediately.

#![no_std]

mod classify;
mod platform;

pub use classify::{classify, decode_native_cause, TrapFrame};
pub use platform::{hold_interrupts, FaultPlatform, HeldInterrupts};

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};
use fault_context::{FaultContext, FaultKind, SavedRegisters};
use fault_log::{FaultHistory, RecoveryAction, RecoveryDecision};
use fault_report::{emit, AddressWidth, EmitOutcome, FaultReport, ReportSink};
use kernel_config::fault::REPORT_BUFFER_SIZE;
use log::{debug, error, warn};
use stack_trace_frame_pointers::{unwind, LiveStack, StackBounds, StackMemory, FRAME_POINTERS_ENABLED};

/// The system-wide fault handler that [`handle_fault()`] uses.
pub static FAULT_HANDLER: FaultHandler = FaultHandler::new();

/// Handles a fault with the system-wide [`FAULT_HANDLER`].
/// See [`FaultHandler::handle_fault()`].
pub fn handle_fault<P, S>(trap: &TrapFrame, platform: &P, sink: &mut S)
where
    P: FaultPlatform + ?Sized,
    S: ReportSink + ?Sized,
{
    FAULT_HANDLER.handle_fault(trap, platform, sink)
}

/// What happened while processing one fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultOutcome {
    pub kind: FaultKind,
    pub decision: RecoveryDecision,
    /// How the report was written. `None` if no report was attempted (a re-entrant fault).
    pub emitted: Option<EmitOutcome>,
    /// The fault history after this fault was recorded. `None` for a re-entrant fault.
    pub history: Option<FaultHistory>,
}

// States of a `FaultHandler`.
const IDLE: u8 = 0;
const HANDLING: u8 = 1;
/// A fault was handled and the system is about to reset or halt; nothing will change anymore.
const LATCHED: u8 = 2;

/// The state of fault handling: a re-entrancy guard, the statically allocated report
/// and capture buffer, and the fault history that the recovery policy consults.
pub struct FaultHandler {
    state: AtomicU8,
    report: UnsafeCell<Option<FaultReport>>,
    scratch: UnsafeCell<[u8; REPORT_BUFFER_SIZE]>,
    history: UnsafeCell<FaultHistory>,
}

// SAFE: the cells are only accessed by whoever moved `state` from IDLE to HANDLING,
// or read-only once `state` is LATCHED, after which it never changes again.
unsafe impl Sync for FaultHandler {}

impl Default for FaultHandler {
    fn default() -> Self {
        FaultHandler::new()
    }
}

impl FaultHandler {
    pub const fn new() -> FaultHandler {
        FaultHandler {
            state: AtomicU8::new(IDLE),
            report: UnsafeCell::new(None),
            scratch: UnsafeCell::new([0; REPORT_BUFFER_SIZE]),
            history: UnsafeCell::new(FaultHistory::new()),
        }
    }

    /// Runs `f` with exclusive access to the fault history.
    fn with_history<R>(&self, f: impl FnOnce(&mut FaultHistory) -> R) -> Result<R, &'static str> {
        if self.state.compare_exchange(IDLE, HANDLING, Ordering::Acquire, Ordering::Relaxed).is_err() {
            return Err("a fault is being handled");
        }
        // SAFE: we moved the state from IDLE to HANDLING, so no one else accesses the history.
        let result = f(unsafe { &mut *self.history.get() });
        self.state.store(IDLE, Ordering::Release);
        Ok(result)
    }

    /// Restores the fault history that [`FaultPlatform::soft_reset()`] stored in
    /// retained memory before the last reset.
    ///
    /// Call this during startup, before any fault can occur.
    /// Fails if `retained` does not hold a valid history (e.g., after a cold boot).
    pub fn restore_history(&self, retained: &[u8]) -> Result<(), &'static str> {
        let restored = FaultHistory::from_bytes(retained)?;
        self.with_history(|history| *history = restored)?;
        debug!("fault_trap: restored fault history: {}", restored);
        Ok(())
    }

    /// Marks all faults so far as resolved; call once the firmware has run healthily for a while.
    pub fn mark_resolved(&self) -> Result<(), &'static str> {
        self.with_history(|history| history.mark_resolved())
    }

    /// Returns a copy of the current fault history.
    pub fn history(&self) -> Result<FaultHistory, &'static str> {
        self.with_history(|history| *history)
    }

    /// Returns `true` if a fault is being handled, or one was handled and the system
    /// is about to reset or halt.
    pub fn is_handling_fault(&self) -> bool {
        self.state.load(Ordering::Acquire) != IDLE
    }

    /// The report of the fault that is stopping the system.
    ///
    /// Only available after a fault whose recovery was a reset or a halt.
    pub fn last_report(&self) -> Option<&FaultReport> {
        if self.state.load(Ordering::Acquire) != LATCHED {
            return None;
        }
        // SAFE: once LATCHED, the report is never written again.
        unsafe { (*self.report.get()).as_ref() }
    }

    /// Handles one fault: reports it to `sink`, then resets or halts through `platform`
    /// as the recovery policy decides.
    ///
    /// Returns only if execution may resume after the faulting instruction.
    pub fn handle_fault<P, S>(&self, trap: &TrapFrame, platform: &P, sink: &mut S)
    where
        P: FaultPlatform + ?Sized,
        S: ReportSink + ?Sized,
    {
        // SAFE: `FaultPlatform` implementors guarantee that the stack bounds
        // they return are readable, and the unwinder reads nothing outside them.
        let live_stack = unsafe { LiveStack::new() };
        let outcome = self.process_fault(trap, platform, &live_stack, sink);
        match (outcome.decision.action, outcome.history) {
            (RecoveryAction::Continue, _) => {}
            (RecoveryAction::SoftReset, Some(history)) => platform.soft_reset(&history),
            _ => platform.halt(),
        }
    }

    /// Processes one fault up to the recovery decision, without enacting it.
    ///
    /// The stack is read through `memory`.
    /// Interrupts stay disabled afterwards unless the decision is to continue.
    pub fn process_fault<P, M, S>(
        &self,
        trap: &TrapFrame,
        platform: &P,
        memory: &M,
        sink: &mut S,
    ) -> FaultOutcome
    where
        P: FaultPlatform + ?Sized,
        M: StackMemory + ?Sized,
        S: ReportSink + ?Sized,
    {
        let held = hold_interrupts(platform);
        let bounds = platform.stack_bounds(trap);
        let cause = platform.decode_cause(trap.cause_code);
        let kind = classify(cause, trap.fault_address, trap.sp, bounds.as_ref());

        if self.state.compare_exchange(IDLE, HANDLING, Ordering::Acquire, Ordering::Relaxed).is_err() {
            error!("FAULT: {} at pc {:#X} while handling a previous fault, halting", kind, trap.pc);
            core::mem::forget(held);
            return FaultOutcome {
                kind,
                decision: RecoveryDecision::reentrant(),
                emitted: None,
                history: None,
            };
        }

        platform.halt_other_cores();
        platform.pause_watchdog();

        error!(
            "FAULT: {} ({}) at {:#X}, pc {:#X}, sp {:#X}, core {}",
            kind, cause, trap.fault_address, trap.pc, trap.sp, trap.core,
        );
        if !FRAME_POINTERS_ENABLED {
            warn!("fault_trap: built without forced frame pointers, the backtrace may stop at frame 0");
        }

        let context = FaultContext::new(
            kind,
            trap.fault_address,
            SavedRegisters { pc: trap.pc, sp: trap.sp, fp: trap.fp, lr: trap.lr },
        )
        .with_cause_code(trap.cause_code as u32)
        .on_core(trap.core as u8);

        let bounds = bounds.unwrap_or_else(|| {
            warn!("fault_trap: bounds of the faulting stack are unknown, not unwinding");
            StackBounds::EMPTY
        });
        let frames = unwind(&context, bounds, memory).with_layout(platform.frame_layout());

        // SAFE: we moved the state from IDLE to HANDLING, so no one else accesses these cells.
        let (report_slot, scratch, history) = unsafe {
            (&mut *self.report.get(), &mut *self.scratch.get(), &mut *self.history.get())
        };
        let report = report_slot.insert(FaultReport::new(context, frames, symbol_table::get()));
        let emitted = emit(report, AddressWidth::native(), scratch, sink);

        let decision = history.decide(kind, platform.uptime_ms());
        let history = *history;
        warn!("fault_trap: {:?} ({:?})", decision.action, decision.reason);

        if decision.action == RecoveryAction::Continue {
            platform.resume_watchdog();
            platform.resume_other_cores();
            self.state.store(IDLE, Ordering::Release);
            drop(held);
        } else {
            self.state.store(LATCHED, Ordering::Release);
            core::mem::forget(held);
        }

        FaultOutcome { kind, decision, emitted: Some(emitted), history: Some(history) }
    }
}

#[cfg(test)]
mod test;
