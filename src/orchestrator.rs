/*! Orchestrator: selects exactly one reassembler by mode, validates that
mode's `-a` option vocabulary, and drives the single-threaded
frame → filter → enrich → process → consume loop.
*/
use crate::acars::AcarsReassembler;
use crate::enrich::enrich;
use crate::error::{Error, Result};
use crate::frame::parse_line;
use crate::gsmtap::{GsmtapReassembler, LapReassembler};
use crate::ida::IdaReassembler;
use crate::idapp::IdappReassembler;
use crate::io::LineSource;
use crate::ira::{IraPageReassembler, LiveMapReassembler};
use crate::itlmap::ItlSatMapReassembler;
use crate::msg::MsgReassembler;
use crate::pipeline::{Options, Pipeline};
use crate::reassembler::{passes_perfect, Reassembler};
use crate::satmap::{SatMapReassembler, TleCatalog};
use crate::sbd::SbdReassembler;
use crate::stats::{LiveStatsReassembler, PpmReassembler, StatsSnrReassembler};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The 14 reassembly modes, one selected per run via `-m`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Ida,
    Idapp,
    Gsmtap,
    Lap,
    Sbd,
    Acars,
    Page,
    Satmap,
    Msg,
    StatsSnr,
    LiveStats,
    LiveMap,
    Ppm,
    Itlmap,
}

impl Mode {
    /// The `-a` option keys this mode accepts; an option outside this set
    /// is a configuration error, not silently ignored.
    ///
    /// `perfect` and `debug` are cross-cutting: every mode declares them
    /// because the base-filter stage in the orchestrator's run loop (not
    /// the reassembler itself) applies `perfect`-gating uniformly before
    /// a frame ever reaches `Reassembler::process`.
    pub fn legal_options(self) -> &'static [&'static str] {
        match self {
            Mode::Ida => &["perfect", "debug"],
            Mode::Idapp => &["perfect", "debug"],
            Mode::Gsmtap => &["perfect", "debug"],
            Mode::Lap => &["perfect", "all", "debug"],
            Mode::Sbd => &["perfect", "debug"],
            Mode::Acars => &["perfect", "json", "showerrs", "debug"],
            Mode::Page => &["perfect", "debug"],
            Mode::Satmap => &["perfect", "debug"],
            Mode::Msg => &["perfect", "incomplete", "debug"],
            Mode::StatsSnr => &["perfect", "debug"],
            Mode::LiveStats => &["perfect", "state", "debug"],
            Mode::LiveMap => &["perfect", "debug"],
            Mode::Ppm => &["perfect", "grafana", "tdelta", "debug"],
            Mode::Itlmap => &["perfect", "debug"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Ida => "ida",
            Mode::Idapp => "idapp",
            Mode::Gsmtap => "gsmtap",
            Mode::Lap => "lap",
            Mode::Sbd => "sbd",
            Mode::Acars => "acars",
            Mode::Page => "page",
            Mode::Satmap => "satmap",
            Mode::Msg => "msg",
            Mode::StatsSnr => "stats-snr",
            Mode::LiveStats => "live-stats",
            Mode::LiveMap => "live-map",
            Mode::Ppm => "ppm",
            Mode::Itlmap => "itlmap",
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "ida" => Mode::Ida,
            "idapp" => Mode::Idapp,
            "gsmtap" => Mode::Gsmtap,
            "lap" => Mode::Lap,
            "sbd" => Mode::Sbd,
            "acars" => Mode::Acars,
            "page" => Mode::Page,
            "satmap" => Mode::Satmap,
            "msg" => Mode::Msg,
            "stats-snr" => Mode::StatsSnr,
            "live-stats" => Mode::LiveStats,
            "live-map" => Mode::LiveMap,
            "ppm" => Mode::Ppm,
            "itlmap" => Mode::Itlmap,
            other => return Err(Error::Config(format!("unknown mode {other:?}"))),
        })
    }
}

/// Parse a comma-separated `-a` option list (`key` or `key=value` terms)
/// into an `Options`, rejecting any key outside `mode`'s vocabulary.
pub fn parse_options(mode: Mode, raw: &str, station: Option<String>) -> Result<Options> {
    let legal = mode.legal_options();
    let mut opts = Options { station, ..Options::default() };
    if raw.trim().is_empty() {
        return Ok(opts);
    }
    for term in raw.split(',') {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        let (key, value) = term.split_once('=').unwrap_or((term, ""));
        if !legal.contains(&key) {
            return Err(Error::Config(format!(
                "option {key:?} is not valid for mode {:?} (expected one of {legal:?})",
                mode.as_str()
            )));
        }
        match key {
            "perfect" => opts.perfect = true,
            "incomplete" => opts.incomplete = true,
            "json" => opts.json = true,
            "showerrs" => opts.showerrs = true,
            "debug" => opts.debug = true,
            "all" => opts.all = true,
            "grafana" => opts.grafana = true,
            "tdelta" => opts.tdelta = true,
            "state" => opts.state_path = Some(if value.is_empty() { "live-stats.state".to_string() } else { value.to_string() }),
            _ => unreachable!("checked against legal_options above"),
        }
    }
    Ok(opts)
}

/// Build the `Box<dyn Reassembler>` for one mode.
///
/// `tle_path` is the `-s` flag: required by `satmap`, ignored elsewhere.
/// `output_path` is the `-o` flag, needed directly (rather than just as
/// the pipeline's text sink) by `live-map`, which writes a JSON snapshot
/// file instead of a stream of lines.
pub fn build_reassembler(
    mode: Mode,
    opts: &Options,
    tle_path: Option<&str>,
    output_path: Option<&str>,
) -> Result<Box<dyn Reassembler>> {
    Ok(match mode {
        Mode::Ida => Box::new(IdaReassembler::new()),
        Mode::Idapp => Box::new(IdappReassembler::new()),
        Mode::Gsmtap => Box::new(GsmtapReassembler::new().map_err(Error::Io)?),
        Mode::Lap => Box::new(LapReassembler::new(opts.all)),
        Mode::Sbd => Box::new(SbdReassembler::new()),
        Mode::Acars => Box::new(AcarsReassembler::new(opts.json, opts.showerrs, opts.station.clone())),
        Mode::Page => Box::new(IraPageReassembler::new()),
        Mode::Satmap => {
            let path = tle_path.ok_or_else(|| Error::Config("satmap mode requires -s <tle file>".into()))?;
            let text = std::fs::read_to_string(path)?;
            Box::new(SatMapReassembler::new(TleCatalog::parse(&text)?))
        }
        Mode::Msg => Box::new(MsgReassembler::new(opts.incomplete)),
        Mode::StatsSnr => Box::new(StatsSnrReassembler::new()),
        Mode::LiveStats => Box::new(LiveStatsReassembler::new(opts.state_path.clone())?),
        Mode::LiveMap => {
            let path = output_path.ok_or_else(|| Error::Config("live-map mode requires -o <snapshot file>".into()))?;
            Box::new(LiveMapReassembler::new(path))
        }
        Mode::Ppm => Box::new(PpmReassembler::new(opts.grafana, opts.tdelta)),
        Mode::Itlmap => Box::new(ItlSatMapReassembler::new()),
    })
}

/// Drives one run: read lines from `source`, route each through
/// `reassembler`, write emissions via `pipeline`. Cooperative — checks
/// `cancel` once per input line and, on a pending cancellation, stops
/// reading and falls straight through to `end()`.
pub struct Orchestrator {
    reassembler: Box<dyn Reassembler>,
    cancel: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(reassembler: Box<dyn Reassembler>, cancel: Arc<AtomicBool>) -> Self {
        Orchestrator { reassembler, cancel }
    }

    pub fn run(&mut self, source: LineSource, pipeline: &mut Pipeline) -> Result<()> {
        for line in source.lines() {
            if self.cancel.load(Ordering::Relaxed) {
                log::info!("Cancellation requested, stopping input and flushing.");
                break;
            }
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    log::warn!("I/O error reading input: {e}");
                    break;
                }
            };

            pipeline.stat_line += 1;
            let raw = match parse_line(&line) {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!("{e}");
                    continue;
                }
            };

            if !self.reassembler.filter(&raw) {
                continue;
            }
            pipeline.stat_filter += 1;

            let enriched = match enrich(&raw, &pipeline.options.enrich_options(), &pipeline.warnings) {
                Ok(e) => e,
                Err(e) => {
                    log::warn!("{e}");
                    continue;
                }
            };

            if !passes_perfect(&enriched, pipeline.options.perfect) {
                continue;
            }

            for emission in self.reassembler.process(enriched) {
                self.reassembler.consume(emission, pipeline)?;
            }
        }

        self.reassembler.end(pipeline)?;
        pipeline.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trips_through_str() {
        for name in [
            "ida", "idapp", "gsmtap", "lap", "sbd", "acars", "page", "satmap", "msg", "stats-snr",
            "live-stats", "live-map", "ppm", "itlmap",
        ] {
            let m: Mode = name.parse().unwrap();
            assert_eq!(m.as_str(), name);
        }
    }

    #[test]
    fn unknown_mode_is_config_error() {
        assert!("bogus".parse::<Mode>().is_err());
    }

    #[test]
    fn rejects_option_outside_mode_vocabulary() {
        let err = parse_options(Mode::Ida, "json", None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn accepts_legal_options() {
        let opts = parse_options(Mode::Acars, "json,showerrs", None).unwrap();
        assert!(opts.json);
        assert!(opts.showerrs);
    }

    #[test]
    fn state_option_carries_its_value() {
        let opts = parse_options(Mode::LiveStats, "state=/tmp/foo.state", None).unwrap();
        assert_eq!(opts.state_path.as_deref(), Some("/tmp/foo.state"));
    }
}
