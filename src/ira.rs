/*! IRA Decoder: ranging/position broadcasts plus the paging channel and a
live satellite/beam snapshot map.
*/
use crate::enrich::EnrichedFrame;
use crate::error::Error;
use crate::frame::RawFrame;
use crate::pipeline::Pipeline;
use crate::reassembler::{is_base_filtered, Emission, Reassembler};
use crate::time::IridiumTime;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;

static IRA_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"sat:(\d+) beam:(\d+) (?:(?:aps|xyz)=\(([+-]?[0-9]+),([+-]?[0-9]+),([+-]?[0-9]+)\) )?pos=\(([+-][0-9.]+)/([+-][0-9.]+)\) alt=(-?[0-9]+) .* bc_sb:\d+(?: (.*))?",
    )
    .unwrap()
});

static PAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"PAGE\(tmsi:([0-9a-f]+) msc_id:([0-9]+)\)").unwrap());

/// One decoded IRA broadcast.
#[derive(Debug, Clone)]
pub struct IraRecord {
    pub sat: u32,
    pub beam: u32,
    pub xyz: Option<[i64; 3]>,
    pub lat: f64,
    pub lon: f64,
    pub alt: i64,
    pub pages: Vec<(String, String)>,
    pub time: IridiumTime,
}

/// Parse one IRA line's data field. Returns `None` (with a warning already
/// logged by the caller) when the regex doesn't match.
pub fn parse_ira(data: &str, time: IridiumTime) -> Option<IraRecord> {
    let caps = IRA_RE.captures(data)?;
    let sat: u32 = caps[1].parse().ok()?;
    let beam: u32 = caps[2].parse().ok()?;
    let xyz = match (caps.get(3), caps.get(4), caps.get(5)) {
        (Some(x), Some(y), Some(z)) => {
            let x: i64 = x.as_str().parse().ok()?;
            let y: i64 = y.as_str().parse().ok()?;
            let z: i64 = z.as_str().parse().ok()?;
            Some([x * 4, y * 4, z * 4])
        }
        _ => None,
    };
    let lat: f64 = caps[6].parse().ok()?;
    let lon: f64 = caps[7].parse().ok()?;
    let alt: i64 = caps[8].parse().ok()?;
    let pages = match caps.get(9) {
        Some(m) => PAGE_RE
            .captures_iter(m.as_str())
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect(),
        None => vec![],
    };
    Some(IraRecord { sat, beam, xyz, lat, lon, alt, pages, time })
}

/// `page` mode: print the first paging entry of each IRA broadcast that
/// carries one, matching the original decoder's single-page-per-line
/// behavior.
#[derive(Default)]
pub struct IraPageReassembler;

impl IraPageReassembler {
    pub fn new() -> Self {
        Self
    }
}

impl Reassembler for IraPageReassembler {
    fn filter(&self, raw: &RawFrame) -> bool {
        !is_base_filtered(&raw.typ) && raw.typ == "IRA:"
    }

    fn process(&mut self, frame: EnrichedFrame) -> Vec<Emission> {
        let Some(rec) = parse_ira(&frame.data, frame.time) else {
            log::warn!("Couldn't parse IRA: {}", frame.data);
            return vec![];
        };
        match rec.pages.first() {
            Some((tmsi, msc_id)) => vec![Emission::text(format!(
                "{:03} {:02} {:6.2} {:6.2} {:03} : {} {}",
                rec.sat, rec.beam, rec.lat, rec.lon, rec.alt, tmsi, msc_id
            ))],
            None => vec![],
        }
    }

    fn end(&mut self, _pipeline: &mut Pipeline) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
struct MapPoint {
    lat: f64,
    lon: f64,
    alt: i64,
    time: i64,
}

#[derive(Debug, Clone, Serialize)]
struct GroundPoint {
    lat: f64,
    lon: f64,
    alt: i64,
    beam: u32,
    time: i64,
}

#[derive(Debug, Default, Serialize)]
struct MapSnapshot {
    sats: HashMap<u32, Vec<MapPoint>>,
    beam: HashMap<u32, Vec<GroundPoint>>,
    time: Option<i64>,
}

/// `livemap` mode: a rolling 60s-bucketed snapshot of satellite positions
/// (altitude 700-800km) and ground beam hits (altitude <100km), written as
/// one JSON object per timeslot via write-temp-then-rename.
pub struct LiveMapReassembler {
    positions: HashMap<u32, Vec<MapPoint>>,
    ground: HashMap<u32, Vec<GroundPoint>>,
    timeslot: Option<i64>,
    interval_s: i64,
    expire_s: i64,
    output_path: String,
}

impl LiveMapReassembler {
    pub fn new(output_path: impl Into<String>) -> Self {
        LiveMapReassembler {
            positions: HashMap::new(),
            ground: HashMap::new(),
            timeslot: None,
            interval_s: 60,
            expire_s: 60 * 8,
            output_path: output_path.into(),
        }
    }

    fn expire(&mut self, now: i64) {
        for pts in self.positions.values_mut() {
            pts.retain(|p| p.time + self.expire_s >= now);
        }
        for pts in self.ground.values_mut() {
            pts.retain(|p| p.time + self.expire_s / 2 >= now);
        }
        self.positions.retain(|_, v| !v.is_empty());
        self.ground.retain(|_, v| !v.is_empty());
    }

    fn snapshot(&self) -> MapSnapshot {
        MapSnapshot { sats: self.positions.clone(), beam: self.ground.clone(), time: None }
    }

    fn write_snapshot(&self, timeslot: i64) -> Result<(), Error> {
        let mut snap = self.snapshot();
        snap.time = Some(timeslot + self.interval_s);
        let body = serde_json::to_string(&snap)?;
        let tmp = format!("{}.tmp", self.output_path);
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.output_path)?;
        Ok(())
    }
}

impl Reassembler for LiveMapReassembler {
    fn filter(&self, raw: &RawFrame) -> bool {
        !is_base_filtered(&raw.typ) && raw.typ == "IRA:"
    }

    fn process(&mut self, frame: EnrichedFrame) -> Vec<Emission> {
        let Some(rec) = parse_ira(&frame.data, frame.time) else {
            return vec![];
        };
        let now = rec.time.as_secs();
        let maptime = now - now.rem_euclid(self.interval_s);

        let mut flush = None;
        if self.timeslot.map(|ts| maptime > ts).unwrap_or(true) {
            self.expire(now);
            if let Some(ts) = self.timeslot {
                flush = Some(ts);
            }
            self.timeslot = Some(maptime);
        }

        if rec.alt > 700 && rec.alt < 800 {
            let slots = self.positions.entry(rec.sat).or_default();
            let dupe = slots.last().map(|p| p.lat == rec.lat && p.lon == rec.lon).unwrap_or(false);
            if !dupe {
                slots.push(MapPoint { lat: rec.lat, lon: rec.lon, alt: rec.alt, time: now });
            }
        } else if rec.alt < 100 {
            self.ground.entry(rec.sat).or_default().push(GroundPoint {
                lat: rec.lat,
                lon: rec.lon,
                alt: rec.alt,
                beam: rec.beam,
                time: now,
            });
        }

        if let Some(ts) = flush {
            if let Err(e) = self.write_snapshot(ts) {
                log::warn!("livemap: failed to write snapshot: {e}");
            }
        }
        vec![]
    }

    fn end(&mut self, _pipeline: &mut Pipeline) -> Result<(), Error> {
        if let Some(ts) = self.timeslot {
            self.write_snapshot(ts)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_position() {
        let data = "sat:12 beam:3 pos=(45.1/-93.2) alt=780 foo bc_sb:1";
        let rec = parse_ira(data, IridiumTime::ZERO).unwrap();
        assert_eq!(rec.sat, 12);
        assert_eq!(rec.beam, 3);
        assert!((rec.lat - 45.1).abs() < 1e-9);
        assert!(rec.pages.is_empty());
    }

    #[test]
    fn parses_xyz_and_paging() {
        let data = "sat:1 beam:2 xyz=(100,200,300) pos=(1.0/2.0) alt=780 foo bc_sb:5 PAGE(tmsi:abcd1234 msc_id:7)";
        let rec = parse_ira(data, IridiumTime::ZERO).unwrap();
        assert_eq!(rec.xyz, Some([400, 800, 1200]));
        assert_eq!(rec.pages, vec![("abcd1234".to_string(), "7".to_string())]);
    }

    #[test]
    fn unparsable_line_returns_none() {
        assert!(parse_ira("garbage", IridiumTime::ZERO).is_none());
    }

    #[test]
    fn livemap_dedupes_repeated_satellite_position() {
        let mut r = LiveMapReassembler::new("/tmp/does-not-exist.json");
        r.process(enriched_ira("sat:1 beam:0 pos=(1.0/2.0) alt=780 x bc_sb:0", 10.0));
        r.process(enriched_ira("sat:1 beam:0 pos=(1.0/2.0) alt=780 x bc_sb:0", 11.0));
        assert_eq!(r.positions.get(&1).unwrap().len(), 1);
    }

    fn enriched_ira(data: &str, t: f64) -> EnrichedFrame {
        EnrichedFrame {
            typ: "IRA:".to_string(),
            name: String::new(),
            ftype: None,
            starttime: None,
            attr: None,
            mstime: 0.0,
            frequency: 1_616_000_000,
            freq_chan: None,
            freq_off: None,
            confidence: 100,
            level: 1.0,
            noise: None,
            snr: None,
            symbols: 0,
            uldl: "DL".to_string(),
            data: data.to_string(),
            time: IridiumTime::from_f64_secs(t),
            timens: None,
            perfect: true,
        }
    }
}
