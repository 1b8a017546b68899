//! The board- and architecture-specific services the fault handler relies on.

use crate::classify::{decode_native_cause, TrapFrame};
use fault_context::TrapCause;
use fault_log::FaultHistory;
use stack_trace_frame_pointers::{FrameLayout, StackBounds};

/// The services of the underlying platform that the fault handler drives.
///
/// Every method may be called from the fault handler with interrupts disabled,
/// so none of them may block, allocate, or fault.
///
/// # Safety
/// [`stack_bounds()`](FaultPlatform::stack_bounds) must only return ranges that are
/// mapped and readable in their entirety: the handler reads the live stack within them.
pub unsafe trait FaultPlatform {
    /// Disables interrupts on the current core.
    /// Returns whether they were enabled before, to be passed to `restore_interrupts()`.
    fn disable_interrupts(&self) -> bool;

    fn restore_interrupts(&self, were_enabled: bool);

    /// Stops the watchdog from resetting the system while the fault is handled.
    fn pause_watchdog(&self);

    fn resume_watchdog(&self);

    /// Asks every other core to stop. Does nothing on single-core parts.
    fn halt_other_cores(&self) {}

    fn resume_other_cores(&self) {}

    /// Milliseconds since boot.
    fn uptime_ms(&self) -> u64;

    /// The bounds of the stack that was in use when the fault was taken,
    /// or `None` if they are not known.
    fn stack_bounds(&self, trap: &TrapFrame) -> Option<StackBounds>;

    /// Decodes the raw cause code in a [`TrapFrame`].
    fn decode_cause(&self, cause_code: usize) -> TrapCause {
        decode_native_cause(cause_code)
    }

    /// The frame record layout that the code on the faulting stack was compiled with.
    fn frame_layout(&self) -> FrameLayout {
        FrameLayout::NATIVE
    }

    /// Resets the system through the reset controller.
    ///
    /// `history` should be stored in retained memory first, so that the next boot
    /// can restore it with [`FaultHandler::restore_history()`](crate::FaultHandler::restore_history).
    fn soft_reset(&self, history: &FaultHistory) -> !;

    /// Stops this core with interrupts disabled, waiting for a debugger.
    fn halt(&self) -> !;
}

/// Holds interrupts disabled until dropped, then restores their previous state.
pub struct HeldInterrupts<'p, P: FaultPlatform + ?Sized> {
    platform: &'p P,
    were_enabled: bool,
}

/// Disables interrupts through `platform` and returns a guard that restores them.
pub fn hold_interrupts<P: FaultPlatform + ?Sized>(platform: &P) -> HeldInterrupts<'_, P> {
    let were_enabled = platform.disable_interrupts();
    HeldInterrupts { platform, were_enabled }
}

impl<'p, P: FaultPlatform + ?Sized> Drop for HeldInterrupts<'p, P> {
    fn drop(&mut self) {
        self.platform.restore_interrupts(self.were_enabled);
    }
}
