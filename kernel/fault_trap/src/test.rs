extern crate std;

use self::std::cell::Cell;
use self::std::vec::Vec;

use super::*;
use fault_context::TrapCause;
use fault_log::DecisionReason;
use fault_report::{ParsedReport, PersistentRegion, SinkError};
use kernel_config::memory::{BYTES_PER_ADDR as W, NULL_PAGE_SIZE, STACK_GUARD_SIZE};
use stack_trace_frame_pointers::{FrameLayout, StackSnapshot, Truncation};
use symbol_table::SymbolEntry;

const STACK_BASE: usize = 0x2000_0000;
const STACK_LEN: usize = 0x400;
const PC: usize = 0x0400_2000;

// x86 exception vectors, decoded by the mock platform
const DIVIDE_ERROR: usize = 0x00;
const BREAKPOINT: usize = 0x03;
const INVALID_OPCODE: usize = 0x06;
const PAGE_FAULT: usize = 0x0E;

static SYMBOLS: [SymbolEntry; 3] = [
    SymbolEntry::new(0x0400_0100, 0x0400_0300, "main"),
    SymbolEntry::new(0x0400_1000, 0x0400_1200, "poll_sensors"),
    SymbolEntry::new(0x0400_2000, 0x0400_2080, "read_sensor"),
];

fn install_symbols() {
    // every test installs the same table; only the first call succeeds
    let _ = symbol_table::init(&SYMBOLS);
}

struct MockPlatform {
    interrupts_enabled: Cell<bool>,
    watchdog_paused: Cell<bool>,
    others_halted: Cell<bool>,
    now_ms: Cell<u64>,
    bounds: Option<StackBounds>,
}

impl MockPlatform {
    fn new(bounds: Option<StackBounds>) -> MockPlatform {
        MockPlatform {
            interrupts_enabled: Cell::new(true),
            watchdog_paused: Cell::new(false),
            others_halted: Cell::new(false),
            now_ms: Cell::new(1_000),
            bounds,
        }
    }
}

unsafe impl FaultPlatform for MockPlatform {
    fn disable_interrupts(&self) -> bool {
        self.interrupts_enabled.replace(false)
    }
    fn restore_interrupts(&self, were_enabled: bool) {
        self.interrupts_enabled.set(were_enabled);
    }
    fn pause_watchdog(&self) {
        self.watchdog_paused.set(true);
    }
    fn resume_watchdog(&self) {
        self.watchdog_paused.set(false);
    }
    fn halt_other_cores(&self) {
        self.others_halted.set(true);
    }
    fn resume_other_cores(&self) {
        self.others_halted.set(false);
    }
    fn uptime_ms(&self) -> u64 {
        self.now_ms.get()
    }
    fn stack_bounds(&self, _trap: &TrapFrame) -> Option<StackBounds> {
        self.bounds
    }
    fn decode_cause(&self, cause_code: usize) -> TrapCause {
        TrapCause::from_x86_vector(cause_code as u8)
    }
    fn frame_layout(&self) -> FrameLayout {
        FrameLayout::RecordAtFp
    }
    fn soft_reset(&self, _history: &FaultHistory) -> ! {
        panic!("soft reset")
    }
    fn halt(&self) -> ! {
        panic!("halt")
    }
}

/// A sink that remembers whether interrupts were ever enabled while it was written to.
struct CheckingSink<'p> {
    platform: &'p MockPlatform,
    bytes: Vec<u8>,
    saw_interrupts_enabled: bool,
}

impl<'p> ReportSink for CheckingSink<'p> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        self.saw_interrupts_enabled |= self.platform.interrupts_enabled.get();
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }
}

/// Writes a frame record at each `(offset, prev_fp, ret)`.
fn stack_with(records: &[(usize, usize, usize)]) -> [u8; STACK_LEN] {
    let mut bytes = [0u8; STACK_LEN];
    for &(off, prev, ret) in records {
        bytes[off..off + W].copy_from_slice(&prev.to_le_bytes());
        bytes[off + W..off + 2 * W].copy_from_slice(&ret.to_le_bytes());
    }
    bytes
}

/// A three-frame chain: `read_sensor` <- `poll_sensors` <- `main`.
fn valid_stack() -> [u8; STACK_LEN] {
    stack_with(&[
        (0x40, STACK_BASE + 0x80, 0x0400_1040),
        (0x80, 0, 0x0400_0180),
    ])
}

fn trap(cause_code: usize, fault_address: usize) -> TrapFrame {
    TrapFrame {
        pc: PC,
        sp: STACK_BASE + 0x20,
        fp: STACK_BASE + 0x40,
        lr: 0,
        fault_address,
        cause_code,
        core: 0,
    }
}

#[test]
fn null_deref_is_reported_and_resets() {
    install_symbols();
    let bytes = valid_stack();
    let snapshot = StackSnapshot::new(STACK_BASE, &bytes, W).unwrap();
    let platform = MockPlatform::new(snapshot.bounds());
    let handler = FaultHandler::new();
    let mut sink = CheckingSink { platform: &platform, bytes: Vec::new(), saw_interrupts_enabled: false };

    let outcome = handler.process_fault(&trap(PAGE_FAULT, 0x0), &platform, &snapshot, &mut sink);

    assert_eq!(outcome.kind, FaultKind::NullDeref);
    assert_eq!(outcome.decision.action, RecoveryAction::SoftReset);
    assert_eq!(outcome.emitted, Some(EmitOutcome::Written(sink.bytes.len())));
    assert!(!sink.saw_interrupts_enabled);

    let (parsed, _) = ParsedReport::parse(&sink.bytes, AddressWidth::native()).unwrap();
    assert_eq!(parsed.kind, FaultKind::NullDeref);
    assert_eq!(parsed.fault_address, 0);
    assert_eq!(parsed.frames(), [PC, 0x0400_1040, 0x0400_0180]);
    assert!(parsed.truncation.is_empty());

    let report = handler.last_report().unwrap();
    let names: Vec<_> = report.frames().iter().map(|f| f.symbol.and_then(|s| s.name)).collect();
    assert_eq!(names, [Some("read_sensor"), Some("poll_sensors"), Some("main")]);

    // stays stopped until the platform resets
    assert!(handler.is_handling_fault());
    assert!(!platform.interrupts_enabled.get());
    assert!(platform.watchdog_paused.get());
    assert!(platform.others_halted.get());
}

#[test]
fn chain_leaving_the_stack_is_truncated() {
    install_symbols();
    let bytes = stack_with(&[(0x40, 0x7000_0000, 0x0400_1040)]);
    let snapshot = StackSnapshot::new(STACK_BASE, &bytes, W).unwrap();
    let platform = MockPlatform::new(snapshot.bounds());
    let handler = FaultHandler::new();
    let mut storage = [0u8; 512];
    let mut region = PersistentRegion::new(&mut storage);

    handler.process_fault(&trap(PAGE_FAULT, 0x8), &platform, &snapshot, &mut region);

    let (parsed, _) = ParsedReport::parse(region.contents(), AddressWidth::native()).unwrap();
    assert_eq!(parsed.frames(), [PC, 0x0400_1040]);
    assert_eq!(parsed.truncation, Truncation::VALIDATION);
}

#[test]
fn fault_during_fault_handling_halts_without_report() {
    let bytes = valid_stack();
    let snapshot = StackSnapshot::new(STACK_BASE, &bytes, W).unwrap();
    let platform = MockPlatform::new(snapshot.bounds());
    let handler = FaultHandler::new();
    let mut storage = [0u8; 512];
    let mut region = PersistentRegion::new(&mut storage);

    handler.process_fault(&trap(PAGE_FAULT, 0x0), &platform, &snapshot, &mut region);
    let written = region.contents().len();

    let second = handler.process_fault(&trap(DIVIDE_ERROR, 0), &platform, &snapshot, &mut region);
    assert_eq!(second.decision, RecoveryDecision::reentrant());
    assert_eq!(second.emitted, None);
    assert_eq!(second.history, None);
    assert_eq!(region.contents().len(), written);
    assert!(!platform.interrupts_enabled.get());
}

#[test]
fn breakpoint_continues_and_restores_the_system() {
    let bytes = valid_stack();
    let snapshot = StackSnapshot::new(STACK_BASE, &bytes, W).unwrap();
    let platform = MockPlatform::new(snapshot.bounds());
    let handler = FaultHandler::new();
    let mut storage = [0u8; 512];
    let mut region = PersistentRegion::new(&mut storage);

    let outcome = handler.process_fault(&trap(BREAKPOINT, 0), &platform, &snapshot, &mut region);
    assert_eq!(outcome.kind, FaultKind::Breakpoint);
    assert_eq!(outcome.decision.action, RecoveryAction::Continue);
    assert!(platform.interrupts_enabled.get());
    assert!(!platform.watchdog_paused.get());
    assert!(!platform.others_halted.get());
    assert!(!handler.is_handling_fault());
    assert!(handler.last_report().is_none());

    // the next fault is handled normally, not as a re-entrant one
    let next = handler.process_fault(&trap(DIVIDE_ERROR, 0), &platform, &snapshot, &mut region);
    assert_eq!(next.decision.reason, DecisionReason::Recoverable);
}

#[test]
fn handle_fault_returns_on_continue() {
    let platform = MockPlatform::new(StackBounds::new(STACK_BASE, STACK_BASE + STACK_LEN));
    let handler = FaultHandler::new();
    let mut storage = [0u8; 512];
    let mut region = PersistentRegion::new(&mut storage);
    // a zero frame pointer, so the live stack is never read
    let frame = TrapFrame { fp: 0, ..trap(BREAKPOINT, 0) };

    handler.handle_fault(&frame, &platform, &mut region);
    assert!(platform.interrupts_enabled.get());
    assert!(!region.contents().is_empty());
}

#[test]
fn repeated_fault_after_reset_halts() {
    let bytes = valid_stack();
    let snapshot = StackSnapshot::new(STACK_BASE, &bytes, W).unwrap();
    let platform = MockPlatform::new(snapshot.bounds());
    let mut storage = [0u8; 512];
    let mut region = PersistentRegion::new(&mut storage);

    platform.now_ms.set(500_000);
    let before_reset = FaultHandler::new();
    let first = before_reset.process_fault(&trap(PAGE_FAULT, 0x0), &platform, &snapshot, &mut region);
    assert_eq!(first.decision.action, RecoveryAction::SoftReset);
    let retained = first.history.unwrap().to_bytes();

    // the next boot: fresh handler, uptime restarted
    platform.now_ms.set(200);
    let after_reset = FaultHandler::new();
    after_reset.restore_history(&retained).unwrap();
    let second = after_reset.process_fault(&trap(PAGE_FAULT, 0x0), &platform, &snapshot, &mut region);
    assert_eq!(second.decision.action, RecoveryAction::HaltForDebug);
    assert_eq!(second.decision.reason, DecisionReason::RepeatedWithinCooldown);
}

#[test]
fn other_fault_after_unresolved_reset_halts() {
    let bytes = valid_stack();
    let snapshot = StackSnapshot::new(STACK_BASE, &bytes, W).unwrap();
    let platform = MockPlatform::new(snapshot.bounds());
    let mut storage = [0u8; 512];
    let mut region = PersistentRegion::new(&mut storage);

    let before_reset = FaultHandler::new();
    let first = before_reset.process_fault(&trap(PAGE_FAULT, 0x0), &platform, &snapshot, &mut region);
    assert_eq!(first.decision.action, RecoveryAction::SoftReset);
    let retained = first.history.unwrap().to_bytes();

    // a different fault, long after the reset, but nothing marked the first one resolved
    platform.now_ms.set(60_000);
    let after_reset = FaultHandler::new();
    after_reset.restore_history(&retained).unwrap();
    let second = after_reset.process_fault(&trap(DIVIDE_ERROR, 0), &platform, &snapshot, &mut region);
    assert_eq!(second.decision.action, RecoveryAction::HaltForDebug);
    assert_eq!(second.decision.reason, DecisionReason::UnresolvedFault);

    // once the firmware reports itself healthy, the same fault resets again
    let resolved = FaultHandler::new();
    resolved.restore_history(&retained).unwrap();
    resolved.mark_resolved().unwrap();
    let third = resolved.process_fault(&trap(DIVIDE_ERROR, 0), &platform, &snapshot, &mut region);
    assert_eq!(third.decision.action, RecoveryAction::SoftReset);
    assert_eq!(third.decision.reason, DecisionReason::Recoverable);
}

#[test]
fn two_stack_overflows_within_cooldown_halt() {
    let bytes = valid_stack();
    let snapshot = StackSnapshot::new(STACK_BASE, &bytes, W).unwrap();
    let platform = MockPlatform::new(snapshot.bounds());
    let mut storage = [0u8; 512];
    let mut region = PersistentRegion::new(&mut storage);
    let overflow = TrapFrame { sp: STACK_BASE - 0x10, ..trap(PAGE_FAULT, STACK_BASE - 0x18) };

    let handler = FaultHandler::new();
    let first = handler.process_fault(&overflow, &platform, &snapshot, &mut region);
    assert_eq!(first.kind, FaultKind::StackOverflow);
    assert_eq!(first.decision.action, RecoveryAction::HaltForDebug);

    platform.now_ms.set(1_500);
    let handler = FaultHandler::new();
    handler.restore_history(&first.history.unwrap().to_bytes()).unwrap();
    let second = handler.process_fault(&overflow, &platform, &snapshot, &mut region);
    assert_eq!(second.kind, FaultKind::StackOverflow);
    assert_eq!(second.decision.action, RecoveryAction::HaltForDebug);
    assert_eq!(second.history.unwrap().total_count(), 2);
}

#[test]
fn unknown_stack_bounds_skip_unwinding() {
    let bytes = valid_stack();
    let snapshot = StackSnapshot::new(STACK_BASE, &bytes, W).unwrap();
    let platform = MockPlatform::new(None);
    let handler = FaultHandler::new();
    let mut storage = [0u8; 512];
    let mut region = PersistentRegion::new(&mut storage);

    let outcome = handler.process_fault(&trap(PAGE_FAULT, 0x5000_0000), &platform, &snapshot, &mut region);
    assert_eq!(outcome.kind, FaultKind::Unknown);
    assert_eq!(outcome.decision.reason, DecisionReason::FirstUnknown);
    let report = handler.last_report().unwrap();
    assert_eq!(report.frames().len(), 1);
    assert_eq!(report.truncation(), Truncation::VALIDATION);
}

#[test]
fn lost_report_still_reaches_a_decision() {
    let bytes = valid_stack();
    let snapshot = StackSnapshot::new(STACK_BASE, &bytes, W).unwrap();
    let platform = MockPlatform::new(snapshot.bounds());
    let handler = FaultHandler::new();
    let mut storage = [0u8; 16];
    let mut region = PersistentRegion::with_used(&mut storage, 8);
    let frame = TrapFrame { fp: 0, ..trap(DIVIDE_ERROR, 0) };

    let outcome = handler.process_fault(&frame, &platform, &snapshot, &mut region);
    assert_eq!(outcome.kind, FaultKind::DivByZero);
    assert_eq!(outcome.emitted, Some(EmitOutcome::Lost(SinkError::Full)));
    assert_eq!(outcome.decision.action, RecoveryAction::SoftReset);
    assert_eq!(region.contents().len(), 8);
}

#[test]
fn history_is_locked_while_stopped() {
    let bytes = valid_stack();
    let snapshot = StackSnapshot::new(STACK_BASE, &bytes, W).unwrap();
    let platform = MockPlatform::new(snapshot.bounds());
    let handler = FaultHandler::new();
    let mut storage = [0u8; 512];
    let mut region = PersistentRegion::new(&mut storage);

    assert!(handler.restore_history(&[0u8; 32]).is_err());
    assert_eq!(handler.history(), Ok(FaultHistory::new()));
    assert_eq!(handler.mark_resolved(), Ok(()));

    handler.process_fault(&trap(INVALID_OPCODE, 0), &platform, &snapshot, &mut region);
    assert!(handler.history().is_err());
    assert!(handler.mark_resolved().is_err());
}

#[test]
fn classification_table() {
    let bounds = StackBounds::new(STACK_BASE, STACK_BASE + STACK_LEN).unwrap();
    let stack = Some(&bounds);
    let sp = STACK_BASE + 0x100;

    assert_eq!(classify(TrapCause::Load, 0x10, STACK_BASE - 4, stack), FaultKind::StackOverflow);
    assert_eq!(classify(TrapCause::Load, 0x10, STACK_BASE + STACK_LEN + 4, stack), FaultKind::StackOverflow);
    assert_eq!(classify(TrapCause::Store, STACK_BASE - 1, sp, stack), FaultKind::StackOverflow);
    assert_eq!(classify(TrapCause::Store, STACK_BASE - STACK_GUARD_SIZE, sp, stack), FaultKind::StackOverflow);
    assert_eq!(
        classify(TrapCause::Store, STACK_BASE - STACK_GUARD_SIZE - 1, sp, stack),
        FaultKind::Unknown
    );
    assert_eq!(classify(TrapCause::DivideByZero, 0, sp, stack), FaultKind::DivByZero);
    assert_eq!(classify(TrapCause::Misaligned, 0x2000_0003, sp, stack), FaultKind::Misaligned);
    assert_eq!(classify(TrapCause::Breakpoint, 0, sp, stack), FaultKind::Breakpoint);
    assert_eq!(classify(TrapCause::Load, 0, sp, stack), FaultKind::NullDeref);
    assert_eq!(classify(TrapCause::MemoryAccess, NULL_PAGE_SIZE - 1, sp, stack), FaultKind::NullDeref);
    assert_eq!(classify(TrapCause::MemoryAccess, NULL_PAGE_SIZE, sp, stack), FaultKind::Unknown);
    assert_eq!(classify(TrapCause::IllegalInstruction, 0, sp, stack), FaultKind::Unknown);
    assert_eq!(classify(TrapCause::Other(99), 0, sp, stack), FaultKind::Unknown);
    // an empty stack is still inside it
    assert_eq!(classify(TrapCause::Load, 0, STACK_BASE + STACK_LEN, stack), FaultKind::NullDeref);
}

#[test]
fn classification_without_bounds() {
    assert_eq!(classify(TrapCause::Load, 0x8, 0, None), FaultKind::NullDeref);
    assert_eq!(classify(TrapCause::DivideByZero, 0, usize::MAX, None), FaultKind::DivByZero);
}

#[cfg(target_arch = "x86_64")]
#[test]
fn native_cause_is_the_x86_vector() {
    assert_eq!(decode_native_cause(DIVIDE_ERROR), TrapCause::DivideByZero);
    assert_eq!(decode_native_cause(PAGE_FAULT), TrapCause::MemoryAccess);
}

#[test]
fn null_page_matches_the_target() {
    let expected = if cfg!(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "riscv64")) {
        0x1000
    } else {
        0x400
    };
    assert_eq!(NULL_PAGE_SIZE, expected);
}
