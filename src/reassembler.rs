/*! The shared capability set every subprotocol reassembler implements,
plus the base-filter predicates common to all of them.

This directly models the Design Notes' replacement for inheritance-based
polymorphism: one trait, one value per mode, held behind `Box<dyn
Reassembler>` by the orchestrator.
*/
use crate::enrich::EnrichedFrame;
use crate::error::Result;
use crate::frame::RawFrame;
use crate::pipeline::Pipeline;

/// Something a reassembler hands to `consume`: either a line of text, or
/// a block of bytes destined for a binary output stream (PCAP/GSMTAP).
pub enum Emission {
    Text(String),
    Bytes(Vec<u8>),
}

impl Emission {
    pub fn text(s: impl Into<String>) -> Self {
        Emission::Text(s.into())
    }
}

/// The capability set of one subprotocol reassembler.
///
/// The orchestrator's run loop is: for each raw frame, `filter` it; on a
/// pass, enrich it and call `process`, then `consume` each emission; at
/// end of input, call `end` to flush incomplete/expired state and report
/// statistics.
pub trait Reassembler {
    /// Whether this frame is even a candidate for this mode, prior to
    /// enrichment (cheap, syntactic checks only).
    fn filter(&self, raw: &RawFrame) -> bool;

    /// Turn one enriched frame into zero or more emissions.
    fn process(&mut self, frame: EnrichedFrame) -> Vec<Emission>;

    /// Write one emission to the pipeline's output sink.
    fn consume(&mut self, emission: Emission, pipeline: &mut Pipeline) -> Result<()> {
        match emission {
            Emission::Text(s) => pipeline.emit_line(&s),
            Emission::Bytes(b) => pipeline.emit_bytes(&b),
        }
    }

    /// Flush any pending state (expired-but-incomplete chains, etc.) and
    /// print aggregate statistics.
    fn end(&mut self, pipeline: &mut Pipeline) -> Result<()>;
}

/// `typ[3] != ':'`, or `typ` is one of the two always-ignored tags.
pub fn is_base_filtered(typ: &str) -> bool {
    if typ.as_bytes().get(3) != Some(&b':') {
        return true;
    }
    matches!(typ, "RAW:" | "IME:")
}

/// Whether an enriched frame passes the optional `perfect`-only gate.
pub fn passes_perfect(frame: &EnrichedFrame, want_perfect: bool) -> bool {
    !want_perfect || frame.perfect
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_typ() {
        assert!(is_base_filtered("ID:"));
        assert!(is_base_filtered("X"));
    }

    #[test]
    fn rejects_raw_and_ime() {
        assert!(is_base_filtered("RAW:"));
        assert!(is_base_filtered("IME:"));
        assert!(!is_base_filtered("IDA:"));
    }
}
