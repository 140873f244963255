/*! ITL/IRA Satellite Map: correlates simultaneous ITL ring-alert and IRA
ranging broadcasts on the same physical downlink to learn which
Iridium-internal satellite number carries which orbital-plane slot.
*/
use crate::enrich::{EnrichedFrame, FREQ_WIDTH_HZ};
use crate::error::Error;
use crate::frame::RawFrame;
use crate::pipeline::Pipeline;
use crate::reassembler::{is_base_filtered, Emission, Reassembler};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static IRA_SAT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"sat:(\d+) beam:(\d+)").unwrap());
static ITL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"V[12] OK P(\d+) (?:---|S(\d+)) ").unwrap());

#[derive(Debug, Clone, Copy)]
struct IraSeen {
    mstime: f64,
    frequency: i64,
    sat: u32,
}

#[derive(Debug, Clone, Copy)]
struct ItlSeen {
    mstime: f64,
    frequency: i64,
    plane: u32,
    satno: u32,
}

/// `itlmap` mode: accumulates `(plane, itl satno) -> {sat: count}` votes,
/// then prints the majority-vote grid.
#[derive(Default)]
pub struct ItlSatMapReassembler {
    ira: Option<IraSeen>,
    itl: Option<ItlSeen>,
    store: HashMap<(u32, u32), HashMap<u32, u64>>,
}

impl ItlSatMapReassembler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reassembler for ItlSatMapReassembler {
    fn filter(&self, raw: &RawFrame) -> bool {
        !is_base_filtered(&raw.typ) && (raw.typ == "IRA:" || raw.typ == "ITL:")
    }

    fn process(&mut self, frame: EnrichedFrame) -> Vec<Emission> {
        if frame.typ == "IRA:" {
            let Some(caps) = IRA_SAT_RE.captures(&frame.data) else {
                log::warn!("Couldn't parse IRA: {}", frame.data);
                return vec![];
            };
            let Ok(sat) = caps[1].parse::<u32>() else { return vec![] };
            self.ira = Some(IraSeen { mstime: frame.mstime, frequency: frame.frequency, sat });
        } else if frame.typ == "ITL:" {
            let Some(caps) = ITL_RE.captures(&frame.data) else {
                log::warn!("Couldn't parse ITL: {}", frame.data);
                return vec![];
            };
            let Some(satno_m) = caps.get(2) else { return vec![] };
            let Ok(plane) = caps[1].parse::<u32>() else { return vec![] };
            let Ok(satno) = satno_m.as_str().parse::<u32>() else { return vec![] };
            self.itl = Some(ItlSeen { mstime: frame.mstime, frequency: frame.frequency, plane, satno });
        }

        let (Some(ira), Some(itl)) = (self.ira, self.itl) else { return vec![] };
        if (itl.mstime - ira.mstime).abs() >= 0.01 {
            return vec![];
        }
        let df = ira.frequency - itl.frequency;
        if (df - 4 * FREQ_WIDTH_HZ).abs() >= 300 {
            return vec![];
        }
        log::debug!("Match: delta_f={df}");
        *self.store.entry((itl.plane, itl.satno)).or_default().entry(ira.sat).or_insert(0) += 1;
        vec![]
    }

    fn end(&mut self, pipeline: &mut Pipeline) -> Result<(), Error> {
        pipeline.emit_line("Iridium satellite ordering (using iridium-internal identifiers)")?;
        pipeline.emit_line("")?;
        let mut header = String::from("        ");
        for x in 1..12 {
            header.push_str(&format!("{x:3} "));
        }
        pipeline.emit_line(&header)?;

        for plane in 1..7 {
            let mut line = format!("Plane {plane}: ");
            for idx in 1..12 {
                match self.store.get(&(plane, idx)) {
                    Some(votes) if !votes.is_empty() => {
                        let sum: u64 = votes.values().sum();
                        let (maxname, max) = votes.iter().max_by_key(|(_, c)| **c).unwrap();
                        let conf = max * 100 / sum;
                        if conf < 98 {
                            line.push_str(&format!("{maxname:3}({conf:2}%) "));
                        } else {
                            line.push_str(&format!("{maxname:3} "));
                        }
                    }
                    _ => line.push_str("  ? "),
                }
            }
            pipeline.emit_line(&line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::IridiumTime;

    fn frame(typ: &str, data: &str, mstime: f64, frequency: i64) -> EnrichedFrame {
        EnrichedFrame {
            typ: typ.to_string(),
            name: String::new(),
            ftype: None,
            starttime: None,
            attr: None,
            mstime,
            frequency,
            freq_chan: None,
            freq_off: None,
            confidence: 100,
            level: 1.0,
            noise: None,
            snr: None,
            symbols: 0,
            uldl: "DL".to_string(),
            data: data.to_string(),
            time: IridiumTime::ZERO,
            timens: None,
            perfect: true,
        }
    }

    #[test]
    fn matching_pair_within_tolerance_votes() {
        let mut r = ItlSatMapReassembler::new();
        let base = 1_616_000_000;
        r.process(frame("ITL:", "V1 OK P3 S07 ", 1000.0, base));
        r.process(frame("IRA:", "sat:42 beam:1", 1000.0, base + 4 * FREQ_WIDTH_HZ));
        assert_eq!(*r.store.get(&(3, 7)).unwrap().get(&42).unwrap(), 1);
    }

    #[test]
    fn itl_without_satno_is_ignored() {
        let mut r = ItlSatMapReassembler::new();
        r.process(frame("ITL:", "V1 OK P3 --- ", 1000.0, 1_616_000_000));
        assert!(r.itl.is_none());
    }
}
