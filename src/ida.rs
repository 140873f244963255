/*! IDA L2 Reassembler: joins IDA fragments by (frequency, uplink, counter)
into L2 PDUs, deduplicating and expiring open chains.

The join/dedupe/expire algorithm (`IdaJoiner`) is shared by every mode
that consumes IDA PDUs (`ida`, `idapp`, `sbd`, `lap`/`gsmtap`) instead of
being reimplemented per mode, mirroring how the original's
`ReassembleIDA` is the common base class the other reassemblers extend.
*/
use crate::enrich::EnrichedFrame;
use crate::error::Error;
use crate::pipeline::Pipeline;
use crate::reassembler::{Emission, Reassembler};
use crate::time::IridiumTime;
use std::sync::LazyLock;

/// Dedupe tolerance: a fragment within this many seconds of the previous
/// one, with identical payload and frequency, is a duplicate.
pub const DEDUPE_TIME_S: i64 = 1;
/// Dedupe tolerance: frequency delta below which two fragments are
/// considered the same carrier for dedupe purposes.
pub const DEDUPE_FREQ_HZ: i64 = 200;
/// Join tolerance: frequency delta below which a fragment may extend an
/// open chain.
pub const CHAIN_FREQ_HZ: i64 = 260;
/// Join tolerance: a fragment may extend a chain only within this many
/// seconds of the chain's last fragment.
pub const CHAIN_WINDOW_S: i64 = 280;
/// A chain not extended for this many seconds is expired as broken.
pub const CHAIN_EXPIRE_S: i64 = 1000;

static IDA_BODY_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"cont=(\d) (\d) ctr=([01]+) \d+ len=(\d+) 0:.000 \[([0-9a-f.!]*)\]\s+.{4}/.{4} CRC:OK",
    )
    .unwrap()
});

/// One parsed IDA fragment, prior to joining.
#[derive(Debug, Clone)]
struct IdaFragment {
    cont: bool,
    ctr: u8,
    hex: String,
    time: IridiumTime,
    frequency: i64,
    level: f64,
    ul: bool,
}

fn parse_ida_body(data: &str) -> Result<(bool, u8, String), Error> {
    let caps = IDA_BODY_RE
        .captures(data)
        .ok_or_else(|| Error::SubprotocolFormat { proto: "IDA", text: data.to_string() })?;
    let f1 = &caps[1];
    let ctr_bits = &caps[3];
    let ctr = u8::from_str_radix(ctr_bits, 2)
        .map_err(|_| Error::SubprotocolFormat { proto: "IDA", text: data.to_string() })?;
    let hex = caps[5].to_string();
    Ok((f1 == "1", ctr, hex))
}

/// Decode a hex payload where `.` and `!` are field separators (treated
/// as spaces, then dropped) rather than hex digits.
pub fn hex_decode_loose(s: &str) -> Vec<u8> {
    let cleaned: String = s.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    let mut out = Vec::with_capacity(cleaned.len() / 2);
    let bytes = cleaned.as_bytes();
    for pair in bytes.chunks_exact(2) {
        let hi = (pair[0] as char).to_digit(16).unwrap_or(0) as u8;
        let lo = (pair[1] as char).to_digit(16).unwrap_or(0) as u8;
        out.push((hi << 4) | lo);
    }
    out
}

/// An assembled (or single-fragment) IDA L2 PDU.
#[derive(Debug, Clone)]
pub struct L2Pdu {
    pub bytes: Vec<u8>,
    pub time: IridiumTime,
    pub uplink: bool,
    pub level: f64,
    pub frequency: i64,
}

struct Chain {
    freq: i64,
    times: Vec<IridiumTime>,
    last_ctr: u8,
    hex_accum: String,
    ul: bool,
}

/// Aggregate statistics reported by `end()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdaStats {
    pub stat_ok: u64,
    pub stat_fragments: u64,
    pub stat_broken: u64,
    pub stat_dupes: u64,
}

/// The join/dedupe/expire state machine, shared across every IDA-derived
/// mode.
#[derive(Default)]
pub struct IdaJoiner {
    buf: Vec<Chain>,
    last: Option<(IridiumTime, String, i64)>,
    pub stats: IdaStats,
}

impl IdaJoiner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base filter: `typ == "IDA:"` and the body contains a CRC:OK marker.
    pub fn filter(typ: &str, data: &str) -> bool {
        typ == "IDA:" && data.contains(" CRC:OK")
    }

    /// Feed one enriched IDA frame through dedupe/join/expire. Returns
    /// `Some(pdu)` when a fragment completes a PDU (single-fragment or
    /// final-of-chain).
    pub fn push(&mut self, frame: &EnrichedFrame) -> Result<Option<L2Pdu>, Error> {
        let (cont, ctr, hex) = parse_ida_body(&frame.data)?;
        let frag = IdaFragment {
            cont,
            ctr,
            hex,
            time: frame.time,
            frequency: frame.frequency,
            level: frame.level,
            ul: frame.is_uplink(),
        };

        if let Some((otime, odata, ofreq)) = &self.last {
            if frag.time.within_after(otime, DEDUPE_TIME_S)
                && otime.within_after(&frag.time, DEDUPE_TIME_S)
                && *odata == frag.hex
                && (ofreq - frag.frequency).abs() < DEDUPE_FREQ_HZ
            {
                self.stats.stat_dupes += 1;
                return Ok(None);
            }
        }
        self.last = Some((frag.time, frag.hex.clone(), frag.frequency));

        let mut joined = None;
        let mut chain_idx = None;
        for (idx, chain) in self.buf.iter().enumerate() {
            let last_time = *chain.times.last().unwrap();
            if (chain.freq - frag.frequency).abs() < CHAIN_FREQ_HZ
                && frag.time.within_after(&last_time, CHAIN_WINDOW_S)
                && (chain.last_ctr + 1) % 8 == frag.ctr
                && chain.ul == frag.ul
            {
                chain_idx = Some(idx);
                break;
            }
        }

        if let Some(idx) = chain_idx {
            let mut chain = self.buf.remove(idx);
            chain.hex_accum.push('.');
            chain.hex_accum.push_str(&frag.hex);
            chain.times.push(frag.time);
            chain.last_ctr = frag.ctr;
            chain.freq = frag.frequency;
            self.stats.stat_fragments += 1;
            if frag.cont {
                self.buf.push(chain);
            } else {
                self.stats.stat_ok += 1;
                joined = Some(L2Pdu {
                    bytes: hex_decode_loose(&chain.hex_accum),
                    time: frag.time,
                    uplink: frag.ul,
                    level: frag.level,
                    frequency: chain.freq,
                });
            }
        } else if frag.ctr == 0 && !frag.cont {
            joined = Some(L2Pdu {
                bytes: hex_decode_loose(&frag.hex),
                time: frag.time,
                uplink: frag.ul,
                level: frag.level,
                frequency: frag.frequency,
            });
        } else if frag.ctr == 0 && frag.cont {
            self.stats.stat_fragments += 1;
            self.buf.push(Chain {
                freq: frag.frequency,
                times: vec![frag.time],
                last_ctr: frag.ctr,
                hex_accum: frag.hex.clone(),
                ul: frag.ul,
            });
        } else {
            self.stats.stat_broken += 1;
            self.stats.stat_fragments += 1;
        }

        self.buf.retain(|chain| {
            let last_time = *chain.times.last().unwrap();
            let expired = last_time.as_secs().saturating_add(CHAIN_EXPIRE_S) <= frag.time.as_secs();
            if expired {
                self.stats.stat_broken += 1;
            }
            !expired
        });

        Ok(joined)
    }

    pub fn report(&self, pipeline: &mut Pipeline) -> Result<(), Error> {
        let ratio = self.stats.stat_fragments as f64 / (self.stats.stat_ok.max(1) as f64);
        pipeline.emit_line(&format!(
            "{} valid packets assembled from {} fragments (1:{ratio:.2}).",
            self.stats.stat_ok, self.stats.stat_fragments
        ))?;
        let pct = 100.0 * self.stats.stat_broken as f64 / (self.stats.stat_fragments.max(1) as f64);
        pipeline.emit_line(&format!(
            "{}/{} ({pct:.1}%) broken fragments.",
            self.stats.stat_broken, self.stats.stat_fragments
        ))?;
        pipeline.emit_line(&format!("{} dupes removed.", self.stats.stat_dupes))
    }
}

/// `ida` mode: emit every assembled PDU as a hex/ascii text line.
#[derive(Default)]
pub struct IdaReassembler {
    joiner: IdaJoiner,
}

impl IdaReassembler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reassembler for IdaReassembler {
    fn filter(&self, raw: &crate::frame::RawFrame) -> bool {
        IdaJoiner::filter(&raw.typ, &raw.data)
    }

    fn process(&mut self, frame: EnrichedFrame) -> Vec<Emission> {
        match self.joiner.push(&frame) {
            Ok(Some(pdu)) => vec![Emission::text(format_pdu_line(&pdu))],
            Ok(None) => vec![],
            Err(e) => {
                log::warn!("{e}");
                vec![]
            }
        }
    }

    fn end(&mut self, pipeline: &mut Pipeline) -> Result<(), Error> {
        self.joiner.report(pipeline)
    }
}

fn format_pdu_line(pdu: &L2Pdu) -> String {
    let (chan, off) = crate::enrich::channelize(pdu.frequency);
    let ul = if pdu.uplink { "UL" } else { "DL" };
    let hex: String = pdu.bytes.iter().map(|b| format!("{b:02x} ")).collect();
    let ascii = crate::gsm_elements::to_ascii(&pdu.bytes, true);
    format!(
        "{:.6} {chan:3}|{off:+06} {ul} {} | {ascii}",
        pdu.time.as_f64_secs(),
        hex.trim_end()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::{enrich, EnrichOptions, EnrichWarnings};
    use crate::frame::parse_line;

    fn enrich_line(line: &str) -> EnrichedFrame {
        let raw = parse_line(line).unwrap();
        let warn = EnrichWarnings::default();
        enrich(&raw, &EnrichOptions::default(), &warn).unwrap()
    }

    #[test]
    fn single_fragment_pdu() {
        let line = "IDA: p-1000-e000 5000.0 10|+00100 100% 1 8 DL cont=0 0 ctr=000 0 len=3 0:0000 [abcdef]  ..../.... CRC:OK";
        let frame = enrich_line(line);
        let mut joiner = IdaJoiner::new();
        let pdu = joiner.push(&frame).unwrap().unwrap();
        assert_eq!(pdu.bytes, vec![0xab, 0xcd, 0xef]);
        assert!(!pdu.uplink);
    }

    #[test]
    fn two_fragment_chain_joins() {
        let line1 = "IDA: p-1000-e000 5000.0 10|+00100 100% 1 8 DL cont=1 0 ctr=000 0 len=3 0:0000 [abcdef]  ..../.... CRC:OK";
        let line2 = "IDA: p-1000-e000 35000.0 10|+00150 100% 1 8 DL cont=0 0 ctr=001 0 len=3 0:0000 [112233]  ..../.... CRC:OK";
        let mut joiner = IdaJoiner::new();
        assert!(joiner.push(&enrich_line(line1)).unwrap().is_none());
        let pdu = joiner.push(&enrich_line(line2)).unwrap().unwrap();
        assert_eq!(pdu.bytes, vec![0xab, 0xcd, 0xef, 0x11, 0x22, 0x33]);
    }

    #[test]
    fn duplicate_fragment_is_dropped() {
        let line = "IDA: p-1000-e000 5000.0 10|+00100 100% 1 8 DL cont=0 0 ctr=000 0 len=3 0:0000 [abcdef]  ..../.... CRC:OK";
        let mut joiner = IdaJoiner::new();
        assert!(joiner.push(&enrich_line(line)).unwrap().is_some());
        assert!(joiner.push(&enrich_line(line)).unwrap().is_none());
        assert_eq!(joiner.stats.stat_dupes, 1);
    }

    #[test]
    fn orphan_fragment_counts_broken() {
        let line = "IDA: p-1000-e000 5000.0 10|+00100 100% 1 8 DL cont=0 0 ctr=001 0 len=3 0:0000 [abcdef]  ..../.... CRC:OK";
        let mut joiner = IdaJoiner::new();
        assert!(joiner.push(&enrich_line(line)).unwrap().is_none());
        assert_eq!(joiner.stats.stat_broken, 1);
    }
}
