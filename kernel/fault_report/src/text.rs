//! Text forms of a fault: the one-line summary, the `Backtrace:` line and the register dump.

use core::fmt::{self, Write};
use fault_context::{FaultContext, FaultKind, SavedRegisters};
use kernel_config::memory::BYTES_PER_ADDR;

/// A `core::fmt::Write` target over a fixed byte buffer.
/// Formatting fails instead of growing once the buffer is full.
pub struct FixedBuf<'b> {
    buf: &'b mut [u8],
    len: usize,
}

impl<'b> FixedBuf<'b> {
    pub fn new(buf: &'b mut [u8]) -> FixedBuf<'b> {
        FixedBuf { buf, len: 0 }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<'b> Write for FixedBuf<'b> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len.checked_add(s.len()).ok_or(fmt::Error)?;
        let dest = self.buf.get_mut(self.len..end).ok_or(fmt::Error)?;
        dest.copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

/// Formats the minimal one-line summary of a fault into `buf`:
/// `FAULT <kind> @ <address>` followed by a newline.
///
/// Returns the number of bytes written, or `None` if `buf` is too small.
pub fn write_summary(kind: FaultKind, fault_address: usize, buf: &mut [u8]) -> Option<usize> {
    let mut out = FixedBuf::new(buf);
    writeln!(out, "FAULT {} @ {:#0width$X}", kind, fault_address, width = 2 + 2 * BYTES_PER_ADDR).ok()?;
    Some(out.len())
}

/// Extracts the addresses from a `Backtrace:` line, as printed by a fault report
/// or by an ESP32 panic handler (`Backtrace: 0x400d1234:0x3ffb1e50 ...`, where only
/// the part before the colon is a code address).
///
/// Text before `Backtrace:` is ignored. Parsing stops at the first token that is not
/// a hex address, or when `out` is full. Returns the number of addresses written to `out`.
pub fn parse_backtrace_line(line: &str, out: &mut [usize]) -> usize {
    const MARKER: &str = "Backtrace:";
    let Some(start) = line.find(MARKER) else {
        return 0;
    };
    let mut count = 0;
    for token in line[start + MARKER.len()..].split_whitespace() {
        if count == out.len() {
            break;
        }
        let pc = token.split(':').next().unwrap_or(token);
        let digits = pc.strip_prefix("0x").or_else(|| pc.strip_prefix("0X")).unwrap_or(pc);
        match usize::from_str_radix(digits, 16) {
            Ok(addr) => {
                out[count] = addr;
                count += 1;
            }
            Err(_) => break,
        }
    }
    count
}

/// The registers recovered from the register dump of a fault printout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDump {
    pub registers: SavedRegisters,
    /// `EXCVADDR`, `MTVAL`, or zero if the dump has neither.
    pub fault_address: usize,
    /// `EXCCAUSE`, `MCAUSE`, or zero if the dump has neither.
    pub cause_code: u32,
}

impl RegisterDump {
    /// Builds the context of a fault that was classified as `kind`.
    pub fn into_context(self, kind: FaultKind) -> FaultContext {
        FaultContext::new(kind, self.fault_address, self.registers).with_cause_code(self.cause_code)
    }
}

#[derive(Clone, Copy)]
enum DumpField {
    Pc,
    Sp,
    Fp,
    Lr,
    FaultAddress,
    Cause,
}

impl DumpField {
    /// Maps the register names of a fault report, an ESP32 (Xtensa) or ESP8266 panic,
    /// and an ESP32-C3 (RISC-V) panic onto the fields of a [`RegisterDump`].
    fn from_name(name: &str) -> Option<DumpField> {
        const NAMES: &[(&str, DumpField)] = &[
            ("PC", DumpField::Pc),
            ("MEPC", DumpField::Pc),
            ("EPC1", DumpField::Pc),
            ("SP", DumpField::Sp),
            ("A1", DumpField::Sp),
            ("FP", DumpField::Fp),
            ("S0/FP", DumpField::Fp),
            ("S0", DumpField::Fp),
            ("LR", DumpField::Lr),
            ("RA", DumpField::Lr),
            ("A0", DumpField::Lr),
            ("EXCVADDR", DumpField::FaultAddress),
            ("MTVAL", DumpField::FaultAddress),
            ("EXCCAUSE", DumpField::Cause),
            ("MCAUSE", DumpField::Cause),
            ("CAUSE", DumpField::Cause),
        ];
        NAMES.iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
            .map(|&(_, field)| field)
    }
}

fn parse_hex_value(token: &str) -> Option<usize> {
    let token = token.trim_end_matches(&[',', ')'][..]);
    let digits = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X"))?;
    usize::from_str_radix(digits, 16).ok()
}

/// Extracts the registers from the register dump of a fault printout.
///
/// Understands `NAME : 0xVALUE` pairs (ESP32 panics, RISC-V panics, and the `PC:` line
/// of a fault report) and `name=0xVALUE` pairs (ESP8266 exceptions).
/// Names are matched without regard to case; the first value of each register wins,
/// so only the first core of a multi-core dump is used.
/// Returns `None` if the text has no program counter.
pub fn parse_register_dump(text: &str) -> Option<RegisterDump> {
    let mut pc = None;
    let mut sp = None;
    let mut fp = None;
    let mut lr = None;
    let mut fault_address = None;
    let mut cause = None;

    let mut assign = |name: &str, value: usize| {
        let slot = match DumpField::from_name(name) {
            Some(DumpField::Pc) => &mut pc,
            Some(DumpField::Sp) => &mut sp,
            Some(DumpField::Fp) => &mut fp,
            Some(DumpField::Lr) => &mut lr,
            Some(DumpField::FaultAddress) => &mut fault_address,
            Some(DumpField::Cause) => &mut cause,
            None => return,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    };

    // the most recent register name that is still waiting for its value
    let mut pending: Option<&str> = None;
    for token in text.split_whitespace() {
        if token == ":" {
            continue;
        }
        if let Some((name, value)) = token.split_once('=') {
            if let Some(value) = parse_hex_value(value) {
                assign(name, value);
            }
            pending = None;
        } else if let Some(name) = token.strip_suffix(':') {
            pending = Some(name);
        } else if let Some(value) = parse_hex_value(token) {
            if let Some(name) = pending.take() {
                assign(name, value);
            }
        } else {
            pending = Some(token);
        }
    }

    Some(RegisterDump {
        registers: SavedRegisters {
            pc: pc?,
            sp: sp.unwrap_or(0),
            fp: fp.unwrap_or(0),
            lr: lr.unwrap_or(0),
        },
        fault_address: fault_address.unwrap_or(0),
        cause_code: cause.unwrap_or(0) as u32,
    })
}
