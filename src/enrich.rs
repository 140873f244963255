/*! Enricher: derive frequency/channel, signal level, absolute time and the
"perfect" flag from a `RawFrame`.

Everything here is pure with the exception of the one-time "'perfect'
requested, but no EC info found" diagnostic, which needs to fire at most
once per run; that single bit of state lives in `EnrichWarnings`, handed
in by the caller (the `Pipeline`) rather than hidden behind a static.
*/
use crate::error::Error;
use crate::frame::RawFrame;
use crate::time::IridiumTime;
use std::cell::Cell;

/// Base frequency of channel 0, in Hz.
pub const FREQ_BASE_HZ: i64 = 1_616_000_000;
/// Width of one frequency channel, in Hz.
pub const FREQ_WIDTH_HZ: i64 = 41_667;

/// Options controlling which derived fields the Enricher computes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnrichOptions {
    /// Whether to derive `freq_chan`/`freq_off` from the absolute frequency.
    pub channelize: bool,
    /// Whether the caller intends to filter on `perfect` later. Used only
    /// to decide whether the "no EC info" warning applies.
    pub want_perfect: bool,
}

/// Holds the one-time-warning flags a `Pipeline` threads through repeated
/// calls to `enrich`.
#[derive(Debug, Default)]
pub struct EnrichWarnings {
    perfect_no_ec_warned: Cell<bool>,
}

/// A `RawFrame` plus every field the pipeline derives from it.
///
/// Immutable once constructed: there is no setter, matching the Data Model
/// invariant that a frame is immutable once enriched.
#[derive(Debug, Clone)]
pub struct EnrichedFrame {
    pub typ: String,
    pub name: String,
    pub ftype: Option<char>,
    pub starttime: Option<i64>,
    pub attr: Option<String>,
    pub mstime: f64,
    pub frequency: i64,
    pub freq_chan: Option<i64>,
    pub freq_off: Option<i64>,
    pub confidence: i32,
    pub level: f64,
    pub noise: Option<f64>,
    pub snr: Option<f64>,
    pub symbols: i64,
    pub uldl: String,
    pub data: String,
    pub time: IridiumTime,
    /// Only set on the `ftype == 'j'` branch.
    pub timens: Option<f64>,
    pub perfect: bool,
}

impl EnrichedFrame {
    pub fn is_uplink(&self) -> bool {
        self.uldl == "UL"
    }

    /// `"%3d|%+06d"`-style channel/offset rendering, when channelization
    /// was requested.
    pub fn freq_print(&self) -> Option<String> {
        match (self.freq_chan, self.freq_off) {
            (Some(chan), Some(off)) => Some(format!("{chan:3}|{off:+06}")),
            _ => None,
        }
    }
}

fn resolve_frequency(s: &str) -> Result<i64, Error> {
    if let Some((chan_s, off_s)) = s.split_once('|') {
        let chan: i64 = chan_s
            .trim()
            .parse()
            .map_err(|_| Error::LineParse(s.to_string()))?;
        let off: i64 = off_s
            .trim()
            .parse()
            .map_err(|_| Error::LineParse(s.to_string()))?;
        Ok(FREQ_BASE_HZ + chan * FREQ_WIDTH_HZ + off)
    } else {
        s.trim().parse().map_err(|_| Error::LineParse(s.to_string()))
    }
}

/// Derive `(chan, signed-centered-off)` from an absolute frequency.
///
/// Public so other modes (`ida`, `idapp`, `lap`) can render a
/// `chan|off` label even when they didn't request full channelization
/// via `EnrichOptions`.
pub fn channelize(freq: i64) -> (i64, i64) {
    let rel = freq - FREQ_BASE_HZ;
    let chan = rel.div_euclid(FREQ_WIDTH_HZ);
    let off = rel.rem_euclid(FREQ_WIDTH_HZ);
    (chan, off - FREQ_WIDTH_HZ / 2)
}

fn parse_confidence(s: &str) -> Result<i32, Error> {
    s.trim_end_matches('%')
        .parse()
        .map_err(|_| Error::LineParse(s.to_string()))
}

/// Parse the level token: either a pipe-delimited `level|noise|snr` triple
/// already in dBm, or a single raw magnitude converted via `20*log10`
/// (with `0` mapped to `1` first). An unparseable token is not fatal: it
/// logs a warning and yields `level = 0`.
fn parse_level(s: &str) -> (f64, Option<f64>, Option<f64>) {
    let parts: Vec<&str> = s.split('|').collect();
    if parts.len() == 3 {
        if let (Ok(level), Ok(noise), Ok(snr)) = (
            parts[0].parse::<f64>(),
            parts[1].parse::<f64>(),
            parts[2].parse::<f64>(),
        ) {
            return (level, Some(noise), Some(snr));
        }
    }
    match s.parse::<f64>() {
        Ok(mag) => {
            let mag = if mag == 0.0 { 1.0 } else { mag };
            (20.0 * mag.log10(), None, None)
        }
        Err(_) => {
            log::warn!("invalid level field {s:?}, using 0");
            (0.0, None, None)
        }
    }
}

/// Decompose `name` into `(ftype, starttime, attr)` when its second byte
/// is `-`.
fn decompose_name(name: &str) -> (Option<char>, Option<i64>, Option<String>) {
    let bytes = name.as_bytes();
    if bytes.len() > 1 && bytes[1] == b'-' {
        let ftype = bytes[0] as char;
        let rest = &name[2..];
        match rest.split_once('-') {
            Some((starttime_s, attr)) => {
                (Some(ftype), starttime_s.parse().ok(), Some(attr.to_string()))
            }
            None => (Some(ftype), None, Some(rest.to_string())),
        }
    } else {
        (None, None, None)
    }
}

fn is_perfect(attr: Option<&str>, opts: &EnrichOptions, warnings: &EnrichWarnings) -> bool {
    match attr {
        Some(a) if a.starts_with('e') => a == "e000",
        Some(a) => a == "UW:0-LCW:0-FIX:00",
        None => {
            if opts.want_perfect && !warnings.perfect_no_ec_warned.replace(true) {
                log::warn!("'perfect' requested, but no EC info found");
            }
            false
        }
    }
}

/// Derive an `EnrichedFrame` from a `RawFrame`.
pub fn enrich(
    raw: &RawFrame,
    opts: &EnrichOptions,
    warnings: &EnrichWarnings,
) -> Result<EnrichedFrame, Error> {
    let mstime: f64 = raw
        .mstime
        .parse()
        .map_err(|_| Error::LineParse(raw.mstime.clone()))?;
    let symbols: i64 = raw
        .symbols
        .parse()
        .map_err(|_| Error::LineParse(raw.symbols.clone()))?;
    let confidence = parse_confidence(&raw.confidence)?;
    let frequency = resolve_frequency(&raw.frequency)?;
    let (freq_chan, freq_off) = if opts.channelize {
        let (c, o) = channelize(frequency);
        (Some(c), Some(o))
    } else {
        (None, None)
    };
    let (level, noise, snr) = parse_level(&raw.level);
    let (ftype, starttime, attr) = decompose_name(&raw.name);

    let (time, timens) = match ftype {
        Some('p') => {
            let t = starttime.map(|st| st as f64 + mstime / 1000.0).unwrap_or(mstime / 1000.0);
            (IridiumTime::from_f64_secs(t), None)
        }
        Some('j') => (IridiumTime::from_f64_secs(mstime), Some(mstime * 1e9)),
        _ => {
            let t = starttime.map(|st| st as f64 + mstime / 1000.0).unwrap_or(mstime / 1000.0);
            (IridiumTime::from_f64_secs(t), None)
        }
    };

    let perfect = is_perfect(attr.as_deref(), opts, warnings);

    Ok(EnrichedFrame {
        typ: raw.typ.clone(),
        name: raw.name.clone(),
        ftype,
        starttime,
        attr,
        mstime,
        frequency,
        freq_chan,
        freq_off,
        confidence,
        level,
        noise,
        snr,
        symbols,
        uldl: raw.uldl.clone(),
        data: raw.data.clone(),
        time,
        timens,
        perfect,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_line;

    fn opts(channelize: bool, want_perfect: bool) -> EnrichOptions {
        EnrichOptions { channelize, want_perfect }
    }

    #[test]
    fn resolves_chan_off_frequency() {
        let raw = parse_line("IDA: p-1000-e000 5000.0 10|+00100 100% 1 8 DL data").unwrap();
        let warn = EnrichWarnings::default();
        let e = enrich(&raw, &opts(true, false), &warn).unwrap();
        assert_eq!(e.frequency, FREQ_BASE_HZ + 10 * FREQ_WIDTH_HZ + 100);
        assert_eq!(e.freq_chan, Some(10));
        assert_eq!(e.freq_off, Some(100 - FREQ_WIDTH_HZ / 2));
    }

    #[test]
    fn channel_round_trip() {
        let freq = FREQ_BASE_HZ + 26 * FREQ_WIDTH_HZ + 12345;
        let (chan, off) = channelize(freq);
        assert_eq!(chan, 26);
        assert_eq!(off, 12345 - FREQ_WIDTH_HZ / 2);
    }

    #[test]
    fn decomposes_ptype_name_and_time() {
        let raw = parse_line("IDA: p-1000-e000 5000.0 100 100% 1 8 DL data").unwrap();
        let warn = EnrichWarnings::default();
        let e = enrich(&raw, &opts(false, false), &warn).unwrap();
        assert_eq!(e.ftype, Some('p'));
        assert_eq!(e.starttime, Some(1000));
        assert_eq!(e.attr.as_deref(), Some("e000"));
        assert_eq!(e.time.as_f64_secs(), 1005.0);
        assert!(e.perfect);
    }

    #[test]
    fn non_e000_attr_is_not_perfect() {
        let raw = parse_line("IDA: p-1000-e001 5000.0 100 100% 1 8 DL data").unwrap();
        let warn = EnrichWarnings::default();
        let e = enrich(&raw, &opts(false, false), &warn).unwrap();
        assert!(!e.perfect);
    }

    #[test]
    fn uw_form_perfect_attr() {
        let raw = parse_line("IDA: x-1000-UW:0-LCW:0-FIX:00 5000.0 100 100% 1 8 DL data").unwrap();
        let warn = EnrichWarnings::default();
        let e = enrich(&raw, &opts(false, false), &warn).unwrap();
        assert!(e.perfect);
    }

    #[test]
    fn triple_level_parses_as_dbm_directly() {
        let raw = parse_line("IDA: p-1000-e000 5000.0 100 100% 34.5|-100|12.3 8 DL data").unwrap();
        let warn = EnrichWarnings::default();
        let e = enrich(&raw, &opts(false, false), &warn).unwrap();
        assert_eq!(e.level, 34.5);
        assert_eq!(e.noise, Some(-100.0));
        assert_eq!(e.snr, Some(12.3));
    }

    #[test]
    fn single_level_converts_via_log10() {
        let raw = parse_line("IDA: p-1000-e000 5000.0 100 100% 10 8 DL data").unwrap();
        let warn = EnrichWarnings::default();
        let e = enrich(&raw, &opts(false, false), &warn).unwrap();
        assert!((e.level - 20.0).abs() < 1e-9);
    }

    #[test]
    fn zero_level_maps_to_one_before_log() {
        let raw = parse_line("IDA: p-1000-e000 5000.0 100 100% 0 8 DL data").unwrap();
        let warn = EnrichWarnings::default();
        let e = enrich(&raw, &opts(false, false), &warn).unwrap();
        assert_eq!(e.level, 0.0);
    }

    #[test]
    fn jtype_time_uses_mstime_directly() {
        let raw = parse_line("IDA: j-1000-e000 42.5 100 100% 1 8 DL data").unwrap();
        let warn = EnrichWarnings::default();
        let e = enrich(&raw, &opts(false, false), &warn).unwrap();
        assert_eq!(e.time.as_f64_secs(), 42.5);
        assert_eq!(e.timens, Some(42.5e9));
    }
}
