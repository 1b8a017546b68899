//! Destinations that a fault report can be written to.

use kernel_config::time::TRANSMIT_TIMEOUT_SPINS;

/// Why a sink could not accept a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// Not enough space remains for the whole write; nothing was written.
    Full,
    /// The channel is not present or not initialized.
    Unavailable,
    /// The channel stopped accepting data before the write completed.
    Timeout,
}

/// A persistent log region or transmit channel that fault reports are written to.
///
/// Implementations must finish in bounded time and must not allocate.
pub trait ReportSink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError>;
}

/// An append-only region of memory that survives a reset,
/// e.g., a `.noinit` RAM section or a mirror of a flash log page.
pub struct PersistentRegion<'r> {
    region: &'r mut [u8],
    used: usize,
}

impl<'r> PersistentRegion<'r> {
    pub fn new(region: &'r mut [u8]) -> PersistentRegion<'r> {
        PersistentRegion { region, used: 0 }
    }

    /// Reopens a region that already holds `used` bytes of earlier reports.
    pub fn with_used(region: &'r mut [u8], used: usize) -> PersistentRegion<'r> {
        let used = used.min(region.len());
        PersistentRegion { region, used }
    }

    /// The bytes written so far.
    pub fn contents(&self) -> &[u8] {
        &self.region[..self.used]
    }

    pub fn remaining(&self) -> usize {
        self.region.len() - self.used
    }
}

impl<'r> ReportSink for PersistentRegion<'r> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        if bytes.len() > self.remaining() {
            return Err(SinkError::Full);
        }
        self.region[self.used..self.used + bytes.len()].copy_from_slice(bytes);
        self.used += bytes.len();
        Ok(())
    }
}

/// A byte-at-a-time output port, such as a UART transmit register.
pub trait TransmitPort {
    /// Returns `true` if the port can accept another byte now.
    fn ready_to_transmit(&self) -> bool;
    /// Sends one byte. Only called after `ready_to_transmit()` returned `true`.
    fn out_byte(&mut self, byte: u8);
}

/// Writes to a [`TransmitPort`] by busy-polling it, giving up on a byte after
/// a fixed number of polls instead of waiting forever.
pub struct PolledTransmitter<P: TransmitPort> {
    port: P,
    timeout_spins: usize,
}

impl<P: TransmitPort> PolledTransmitter<P> {
    pub fn new(port: P) -> PolledTransmitter<P> {
        PolledTransmitter { port, timeout_spins: TRANSMIT_TIMEOUT_SPINS }
    }

    pub fn with_timeout_spins(mut self, timeout_spins: usize) -> PolledTransmitter<P> {
        self.timeout_spins = timeout_spins;
        self
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    fn wait_until_ready(&self) -> bool {
        for _ in 0..self.timeout_spins {
            if self.port.ready_to_transmit() {
                return true;
            }
            core::hint::spin_loop();
        }
        self.port.ready_to_transmit()
    }
}

impl<P: TransmitPort> ReportSink for PolledTransmitter<P> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        for byte in bytes {
            if !self.wait_until_ready() {
                return Err(SinkError::Timeout);
            }
            self.port.out_byte(*byte);
        }
        Ok(())
    }
}
