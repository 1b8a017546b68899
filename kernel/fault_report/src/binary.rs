//! The fixed-width, versioned binary layout of a fault report.
//!
//! All multi-byte fields are little-endian. Addresses are `W` bytes wide,
//! where `W` is the [`AddressWidth`] of the device that produced the report;
//! the width is not stored in the report, so the reader must know it.
//!
//! | Offset | Field             | Size                 |
//! |--------|-------------------|----------------------|
//! | 0      | format version    | 1                    |
//! | 1      | fault kind        | 1                    |
//! | 2      | faulting address  | W                    |
//! | 2 + W  | frame count `n`   | 1                    |
//! | 3 + W  | frame addresses   | W × n                |
//! | 3+W+Wn | truncation flags  | 1                    |

use crate::FaultReport;
use fault_context::FaultKind;
use kernel_config::fault::{FAULT_REPORT_FORMAT_VERSION, MAX_STACK_FRAMES};
use kernel_config::memory::BYTES_PER_ADDR;
use stack_trace_frame_pointers::Truncation;

/// The width of one address in the binary layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressWidth {
    Four,
    Eight,
}

impl AddressWidth {
    /// The address width of the machine this code runs on.
    pub const fn native() -> AddressWidth {
        if BYTES_PER_ADDR == 4 {
            AddressWidth::Four
        } else {
            AddressWidth::Eight
        }
    }

    pub const fn bytes(self) -> usize {
        match self {
            AddressWidth::Four => 4,
            AddressWidth::Eight => 8,
        }
    }

    /// Returns the total length of a report with `frame_count` frames.
    pub const fn report_len(self, frame_count: usize) -> usize {
        1 + 1 + self.bytes() + 1 + self.bytes() * frame_count + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// The output buffer cannot hold the report; `needed` bytes are required.
    BufferTooSmall { needed: usize },
    /// An address does not fit in the requested width.
    AddressTooWide(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The input ended before the report did.
    Truncated,
    UnsupportedVersion(u8),
    UnknownKind(u8),
    TooManyFrames(u8),
    UnknownFlags(u8),
    /// An address in the input does not fit in this machine's `usize`.
    AddressTooWide,
}

/// A cursor over an output buffer whose capacity was checked up front.
struct Writer<'b> {
    buf: &'b mut [u8],
    pos: usize,
}

impl<'b> Writer<'b> {
    fn u8(&mut self, value: u8) {
        self.buf[self.pos] = value;
        self.pos += 1;
    }

    fn addr(&mut self, addr: usize, width: AddressWidth) -> Result<(), EncodeError> {
        let n = width.bytes();
        let le = (addr as u64).to_le_bytes();
        if n < le.len() && le[n..].iter().any(|b| *b != 0) {
            return Err(EncodeError::AddressTooWide(addr));
        }
        self.buf[self.pos..self.pos + n].copy_from_slice(&le[..n]);
        self.pos += n;
        Ok(())
    }
}

impl FaultReport {
    /// Returns the number of bytes [`encode()`](FaultReport::encode) will write.
    pub fn encoded_len(&self, width: AddressWidth) -> usize {
        width.report_len(self.frames().len())
    }

    /// Serializes this report into `buf`, returning the number of bytes written.
    ///
    /// On error, the contents of `buf` are unspecified.
    pub fn encode(&self, width: AddressWidth, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let needed = self.encoded_len(width);
        if buf.len() < needed {
            return Err(EncodeError::BufferTooSmall { needed });
        }
        let mut w = Writer { buf, pos: 0 };
        w.u8(FAULT_REPORT_FORMAT_VERSION);
        w.u8(self.context().kind().as_u8());
        w.addr(self.context().fault_address(), width)?;
        w.u8(self.frames().len() as u8);
        for resolved in self.frames() {
            w.addr(resolved.frame.return_address(), width)?;
        }
        w.u8(self.truncation().bits());
        Ok(w.pos)
    }
}

/// A fault report read back from its binary layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReport {
    pub version: u8,
    pub kind: FaultKind,
    pub fault_address: usize,
    frames: [usize; MAX_STACK_FRAMES],
    frame_count: usize,
    pub truncation: Truncation,
}

impl ParsedReport {
    /// The frame addresses, innermost first.
    pub fn frames(&self) -> &[usize] {
        &self.frames[..self.frame_count]
    }

    /// Parses one report from the front of `bytes`.
    ///
    /// Returns the report and the number of bytes it occupied,
    /// so that consecutive reports in a log region can be read one after another.
    pub fn parse(bytes: &[u8], width: AddressWidth) -> Result<(ParsedReport, usize), ParseError> {
        let mut r = Reader { bytes, pos: 0, width };
        let version = r.u8()?;
        if version != FAULT_REPORT_FORMAT_VERSION {
            return Err(ParseError::UnsupportedVersion(version));
        }
        let kind_byte = r.u8()?;
        let kind = FaultKind::from_u8(kind_byte).ok_or(ParseError::UnknownKind(kind_byte))?;
        let fault_address = r.addr()?;
        let count = r.u8()?;
        if count as usize > MAX_STACK_FRAMES {
            return Err(ParseError::TooManyFrames(count));
        }
        let mut frames = [0usize; MAX_STACK_FRAMES];
        for frame in frames.iter_mut().take(count as usize) {
            *frame = r.addr()?;
        }
        let flags = r.u8()?;
        let truncation = Truncation::from_bits(flags).ok_or(ParseError::UnknownFlags(flags))?;
        Ok((
            ParsedReport { version, kind, fault_address, frames, frame_count: count as usize, truncation },
            r.pos,
        ))
    }
}

struct Reader<'b> {
    bytes: &'b [u8],
    pos: usize,
    width: AddressWidth,
}

impl<'b> Reader<'b> {
    fn take(&mut self, n: usize) -> Result<&'b [u8], ParseError> {
        let slice = self.bytes.get(self.pos..self.pos + n).ok_or(ParseError::Truncated)?;
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    fn addr(&mut self) -> Result<usize, ParseError> {
        let raw = self.take(self.width.bytes())?;
        let mut le = [0u8; 8];
        le[..raw.len()].copy_from_slice(raw);
        usize::try_from(u64::from_le_bytes(le)).map_err(|_| ParseError::AddressTooWide)
    }
}
