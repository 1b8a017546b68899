use crate::binary::{AddressWidth, EncodeError};
use crate::sink::{ReportSink, SinkError};
use crate::text::write_summary;
use crate::FaultReport;
use kernel_config::fault::SUMMARY_BUFFER_SIZE;
use log::{debug, error, warn};

/// Why the full report could not be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitFailure {
    Encode(EncodeError),
    Sink(SinkError),
}

/// What [`emit()`] managed to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// The full binary report was written; carries its length in bytes.
    Written(usize),
    /// The full report failed for the given reason; the one-line summary was written instead.
    SummaryOnly(EmitFailure),
    /// Neither the report nor the summary could be written. The fault was logged only.
    Lost(SinkError),
}

/// Encodes `report` into `scratch` and writes it to `sink`.
///
/// If encoding fails or the sink rejects the report, a one-line summary
/// (fault kind and faulting address) is written to the same sink instead.
/// Every outcome is returned to the caller; none is dropped silently.
pub fn emit<S: ReportSink + ?Sized>(
    report: &FaultReport,
    width: AddressWidth,
    scratch: &mut [u8],
    sink: &mut S,
) -> EmitOutcome {
    let failure = match report.encode(width, scratch) {
        Ok(len) => match sink.write(&scratch[..len]) {
            Ok(()) => {
                debug!("emit(): wrote {}-byte fault report", len);
                return EmitOutcome::Written(len);
            }
            Err(e) => EmitFailure::Sink(e),
        },
        Err(e) => EmitFailure::Encode(e),
    };
    warn!("emit(): full fault report not written ({:?}), falling back to summary", failure);

    let ctx = report.context();
    let mut line = [0u8; SUMMARY_BUFFER_SIZE];
    let result = match write_summary(ctx.kind(), ctx.fault_address(), &mut line) {
        Some(len) => sink.write(&line[..len]),
        None => Err(SinkError::Full),
    };
    match result {
        Ok(()) => EmitOutcome::SummaryOnly(failure),
        Err(e) => {
            error!(
                "emit(): fault report LOST ({:?}): {} at {:#X}",
                e, ctx.kind(), ctx.fault_address(),
            );
            EmitOutcome::Lost(e)
        }
    }
}
