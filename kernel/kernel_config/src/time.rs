/// A second fault of the same kind within this many milliseconds of the previous one
/// is treated as a reset loop, and the system halts for a debugger instead of resetting again.
pub const FAULT_COOLDOWN_MS: u64 = 10_000;

/// The number of busy-poll iterations a transmitter waits for the port to become ready
/// before giving up on a single byte.
pub const TRANSMIT_TIMEOUT_SPINS: usize = 100_000;
