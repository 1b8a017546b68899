//! This crate logs the faults that occur during a boot session
//! and decides how the system recovers from each one.
//!
//! The log does not grow: it only remembers the most recent fault and how many faults
//! have occurred since the firmware last reported itself healthy via [`FaultHistory::mark_resolved()`].
//! That is enough to recognize a reset loop, and small enough to be carried across
//! a soft reset in retained RAM (see [`FaultHistory::to_bytes()`]).

#![no_std]

mod retained;

pub use retained::RETAINED_HISTORY_LEN;

use core::fmt;
use fault_context::FaultKind;
use kernel_config::time::FAULT_COOLDOWN_MS;
use log::{debug, warn};

/// The recovery procedures that can follow a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Resume execution after the faulting instruction. Only taken for debug traps.
    Continue,
    /// Reset the system through the reset controller.
    SoftReset,
    /// Stop with interrupts disabled so that a debugger can inspect the system.
    HaltForDebug,
}

/// Which rule of the policy produced a [`RecoveryDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionReason {
    /// A fault occurred while a previous fault was still being handled.
    ReentrantFault,
    /// The stack is exhausted; a reset would likely overflow again.
    StackOverflow,
    /// The same kind of fault occurred again within the cooldown window.
    RepeatedWithinCooldown,
    /// A well-understood fault that a reset recovers from.
    Recoverable,
    /// A well-understood fault, but an earlier fault was never marked resolved,
    /// so the last reset did not recover the system.
    UnresolvedFault,
    /// An unclassified fault with no unresolved fault before it.
    FirstUnknown,
    /// An unclassified fault following other unresolved faults.
    RepeatedUnknown,
    /// A debug trap.
    Breakpoint,
}

/// The outcome of consulting the recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryDecision {
    pub action: RecoveryAction,
    pub reason: DecisionReason,
}

impl RecoveryDecision {
    const fn new(action: RecoveryAction, reason: DecisionReason) -> RecoveryDecision {
        RecoveryDecision { action, reason }
    }

    /// The decision for a fault raised while another fault is being handled.
    /// It does not consult or modify any history.
    pub const fn reentrant() -> RecoveryDecision {
        RecoveryDecision::new(RecoveryAction::HaltForDebug, DecisionReason::ReentrantFault)
    }
}

/// The most recent fault of a [`FaultHistory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastFault {
    pub kind: FaultKind,
    /// Uptime in milliseconds when the fault occurred.
    pub at_ms: u64,
    /// `true` if the fault happened before the most recent reset,
    /// i.e., the history was restored from retained memory.
    pub before_reset: bool,
}

impl LastFault {
    /// Returns `true` if a fault at uptime `now_ms` is within the cooldown window of this one.
    ///
    /// Uptime restarts at zero after a reset, so for a fault from before the reset
    /// only the time since boot is known; that is used as the elapsed time.
    fn within_cooldown(&self, now_ms: u64) -> bool {
        let elapsed = if self.before_reset {
            now_ms
        } else {
            now_ms.saturating_sub(self.at_ms)
        };
        elapsed < FAULT_COOLDOWN_MS
    }
}

/// The faults of the current boot session (and, if restored, the sessions before it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultHistory {
    last: Option<LastFault>,
    unresolved: u16,
    total: u32,
}

impl Default for FaultHistory {
    fn default() -> Self {
        FaultHistory::new()
    }
}

impl FaultHistory {
    /// Returns an empty history, as on a cold boot.
    pub const fn new() -> FaultHistory {
        FaultHistory { last: None, unresolved: 0, total: 0 }
    }

    pub fn last_fault(&self) -> Option<LastFault> {
        self.last
    }

    /// The number of faults since the last call to [`mark_resolved()`](Self::mark_resolved).
    pub fn unresolved_count(&self) -> u16 {
        self.unresolved
    }

    /// The number of faults ever recorded in this history.
    pub fn total_count(&self) -> u32 {
        self.total
    }

    /// Decides how to recover from a fault of the given `kind` at uptime `now_ms`,
    /// then records the fault.
    ///
    /// Debug traps are not faults: they are never recorded.
    pub fn decide(&mut self, kind: FaultKind, now_ms: u64) -> RecoveryDecision {
        let decision = self.evaluate(kind, now_ms);
        if kind != FaultKind::Breakpoint {
            self.last = Some(LastFault { kind, at_ms: now_ms, before_reset: false });
            self.unresolved = self.unresolved.saturating_add(1);
            self.total = self.total.saturating_add(1);
        }
        debug!("fault_log: {} at {} ms -> {:?}", kind, now_ms, decision);
        decision
    }

    fn evaluate(&self, kind: FaultKind, now_ms: u64) -> RecoveryDecision {
        use RecoveryAction::*;
        use DecisionReason as R;

        if kind == FaultKind::StackOverflow {
            return RecoveryDecision::new(HaltForDebug, R::StackOverflow);
        }
        if let Some(last) = self.last {
            if last.kind == kind && last.within_cooldown(now_ms) {
                warn!("fault_log: {} repeated within {} ms, possible reset loop", kind, FAULT_COOLDOWN_MS);
                return RecoveryDecision::new(HaltForDebug, R::RepeatedWithinCooldown);
            }
        }
        match kind {
            FaultKind::NullDeref | FaultKind::Misaligned | FaultKind::DivByZero if self.unresolved == 0 => {
                RecoveryDecision::new(SoftReset, R::Recoverable)
            }
            FaultKind::NullDeref | FaultKind::Misaligned | FaultKind::DivByZero => {
                warn!("fault_log: {} with {} unresolved fault(s)", kind, self.unresolved);
                RecoveryDecision::new(HaltForDebug, R::UnresolvedFault)
            }
            FaultKind::Unknown if self.unresolved == 0 => RecoveryDecision::new(SoftReset, R::FirstUnknown),
            FaultKind::Unknown => RecoveryDecision::new(HaltForDebug, R::RepeatedUnknown),
            FaultKind::Breakpoint => RecoveryDecision::new(Continue, R::Breakpoint),
            FaultKind::StackOverflow => RecoveryDecision::new(HaltForDebug, R::StackOverflow),
        }
    }

    /// Marks all recorded faults as resolved.
    ///
    /// Firmware calls this once it has run healthily after recovering from a fault.
    /// The last fault is kept, so a quick repeat is still recognized.
    pub fn mark_resolved(&mut self) {
        if self.unresolved != 0 {
            debug!("fault_log: {} fault(s) marked resolved", self.unresolved);
        }
        self.unresolved = 0;
    }
}

impl fmt::Display for FaultHistory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} fault(s), {} unresolved", self.total, self.unresolved)?;
        if let Some(last) = self.last {
            write!(f, ", last: {} at {} ms", last.kind, last.at_ms)?;
            if last.before_reset {
                f.write_str(" (before reset)")?;
            }
        }
        Ok(())
    }
}
