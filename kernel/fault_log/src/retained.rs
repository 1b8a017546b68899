//! Carrying a [`FaultHistory`] across a soft reset.
//!
//! The encoded record is meant for a retained RAM section that the reset does not clear.
//! On a cold boot that section holds garbage, so the record starts with a magic value
//! and ends with a checksum.
//!
//! | Offset | Field                          | Size |
//! |--------|--------------------------------|------|
//! | 0      | magic `"FLOG"`                 | 4    |
//! | 4      | has last fault (0 or 1)        | 1    |
//! | 5      | last fault kind                | 1    |
//! | 6      | unresolved count (LE)          | 2    |
//! | 8      | total count (LE)               | 4    |
//! | 12     | last fault uptime in ms (LE)   | 8    |
//! | 20     | checksum                       | 1    |

use crate::{FaultHistory, LastFault};
use fault_context::FaultKind;
use log::debug;

/// The length in bytes of an encoded [`FaultHistory`].
pub const RETAINED_HISTORY_LEN: usize = 21;

const MAGIC: [u8; 4] = *b"FLOG";

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0xA5u8, |acc, b| acc.rotate_left(1) ^ b)
}

impl FaultHistory {
    /// Encodes this history for retained memory.
    pub fn to_bytes(&self) -> [u8; RETAINED_HISTORY_LEN] {
        let mut out = [0u8; RETAINED_HISTORY_LEN];
        out[0..4].copy_from_slice(&MAGIC);
        if let Some(last) = self.last {
            out[4] = 1;
            out[5] = last.kind.as_u8();
            out[12..20].copy_from_slice(&last.at_ms.to_le_bytes());
        }
        out[6..8].copy_from_slice(&self.unresolved.to_le_bytes());
        out[8..12].copy_from_slice(&self.total.to_le_bytes());
        out[20] = checksum(&out[..20]);
        out
    }

    /// Restores a history written by [`to_bytes()`](FaultHistory::to_bytes) before a reset.
    ///
    /// The restored last fault is marked as having happened before the reset.
    /// Returns an error if `bytes` do not hold a valid record, as after a cold boot.
    pub fn from_bytes(bytes: &[u8]) -> Result<FaultHistory, &'static str> {
        let record = bytes.get(..RETAINED_HISTORY_LEN).ok_or("retained fault history is too short")?;
        if record[0..4] != MAGIC {
            return Err("no retained fault history (bad magic)");
        }
        if checksum(&record[..20]) != record[20] {
            debug!("FaultHistory::from_bytes(): checksum mismatch");
            return Err("retained fault history is corrupted (bad checksum)");
        }
        let last = match record[4] {
            0 => None,
            1 => Some(LastFault {
                kind: FaultKind::from_u8(record[5]).ok_or("retained fault history has an unknown fault kind")?,
                at_ms: u64::from_le_bytes([
                    record[12], record[13], record[14], record[15],
                    record[16], record[17], record[18], record[19],
                ]),
                before_reset: true,
            }),
            _ => return Err("retained fault history is corrupted (bad flag)"),
        };
        Ok(FaultHistory {
            last,
            unresolved: u16::from_le_bytes([record[6], record[7]]),
            total: u32::from_le_bytes([record[8], record[9], record[10], record[11]]),
        })
    }
}
