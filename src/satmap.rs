/*! Satellite Map: matches each IRA broadcast's reported ground position
against a TLE catalog to learn which physical satellite (by name) answers
to which Iridium-internal satellite number.

The original propagates TLEs with Skyfield and compares in the ITRF
frame. Skyfield isn't available in the Rust ecosystem; this uses the
`sgp4` crate's TEME propagation directly and rotates the observed
position into TEME with a GMST correction, which is close enough at the
few-kilometer tolerances `MAX_DIST_KM` already allows for, but is not
bit-exact with the original's IERS-corrected ITRF chain.
*/
use crate::enrich::EnrichedFrame;
use crate::error::Error;
use crate::frame::RawFrame;
use crate::ira::parse_ira;
use crate::pipeline::Pipeline;
use crate::reassembler::{is_base_filtered, Emission, Reassembler};
use crate::time::IridiumTime;
use std::collections::HashMap;

/// Matches further than this (km) from any cataloged satellite are
/// considered unmatched.
pub const MAX_DIST_KM: f64 = 100.0;

const WGS84_A_KM: f64 = 6378.137;
const WGS84_E2: f64 = 0.006_694_379_990_13;

struct Satellite {
    name: String,
    constants: sgp4::Constants,
    epoch_minutes_since_1950: f64,
}

/// A parsed TLE catalog, ready to propagate.
pub struct TleCatalog {
    sats: Vec<Satellite>,
}

impl TleCatalog {
    /// Parse a classic 3-line-per-satellite TLE text file.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut sats = Vec::new();
        for chunk in lines.chunks(3) {
            let [name, l1, l2] = chunk else { break };
            let elements = sgp4::Elements::from_tle(Some(name.trim().to_string()), l1.as_bytes(), l2.as_bytes())
                .map_err(|e| Error::Config(format!("bad TLE for {name}: {e}")))?;
            let epoch_minutes_since_1950 = elements.epoch() * 1440.0;
            let constants = sgp4::Constants::from_elements(&elements)
                .map_err(|e| Error::Config(format!("sgp4 init failed for {name}: {e}")))?;
            sats.push(Satellite { name: name.trim().to_string(), constants, epoch_minutes_since_1950 });
        }
        if sats.is_empty() {
            return Err(Error::Config("TLE catalog is empty".into()));
        }
        Ok(TleCatalog { sats })
    }

    fn oldest_epoch_age_days(&self, now_minutes_since_1950: f64) -> f64 {
        let e = self.sats[0].epoch_minutes_since_1950;
        (now_minutes_since_1950 - e) / 1440.0
    }
}

fn unix_to_minutes_since_1950(unix_secs: f64) -> f64 {
    // 1950-01-01T00:00:00Z is -631_152_000 unix seconds.
    (unix_secs + 631_152_000.0) / 60.0
}

fn gmst_radians(unix_secs: f64) -> f64 {
    let days_since_j2000 = (unix_secs - 946_728_000.0) / 86400.0;
    let t = days_since_j2000 / 36525.0;
    let gmst_deg = 280.460_618_37 + 360.985_647_366_29 * days_since_j2000 + 0.000_387_93 * t * t;
    gmst_deg.rem_euclid(360.0).to_radians()
}

/// Geodetic (lat/lon deg, alt km) to a TEME-ish ECI position (km), via a
/// plain WGS84 ellipsoid + GMST rotation.
fn geodetic_to_eci(lat_deg: f64, lon_deg: f64, alt_km: f64, unix_secs: f64) -> [f64; 3] {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let sin_lat = lat.sin();
    let n = WGS84_A_KM / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();
    let x_ecef = (n + alt_km) * lat.cos() * lon.cos();
    let y_ecef = (n + alt_km) * lat.cos() * lon.sin();
    let z_ecef = (n * (1.0 - WGS84_E2) + alt_km) * sin_lat;

    let theta = gmst_radians(unix_secs);
    let x_eci = x_ecef * theta.cos() - y_ecef * theta.sin();
    let y_eci = x_ecef * theta.sin() + y_ecef * theta.cos();
    [x_eci, y_eci, z_ecef]
}

fn distance_km(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Find the cataloged satellite whose propagated position is closest to
/// `observed_eci` at `unix_secs`.
fn find_closest(cat: &TleCatalog, unix_secs: f64, observed_eci: [f64; 3]) -> Option<(&str, f64)> {
    let now = unix_to_minutes_since_1950(unix_secs);
    let mut best: Option<(&str, f64)> = None;
    for sat in &cat.sats {
        let dt = now - sat.epoch_minutes_since_1950;
        let Ok(prediction) = sat.constants.propagate(sgp4::MinutesSinceEpoch(dt)) else { continue };
        let d = distance_km(prediction.position, observed_eci);
        if best.map(|(_, bd)| d < bd).unwrap_or(true) {
            best = Some((&sat.name, d));
        }
    }
    best
}

#[derive(Debug, Default, Clone, Copy)]
struct SatStat {
    count: u64,
}

/// `satmap` mode.
pub struct SatMapReassembler {
    catalog: TleCatalog,
    seen_first: bool,
    sats: HashMap<u32, HashMap<String, SatStat>>,
    stats_cnt: u64,
    stats_sum_km: f64,
}

impl SatMapReassembler {
    pub fn new(catalog: TleCatalog) -> Self {
        SatMapReassembler { catalog, seen_first: false, sats: HashMap::new(), stats_cnt: 0, stats_sum_km: 0.0 }
    }
}

impl Reassembler for SatMapReassembler {
    fn filter(&self, raw: &RawFrame) -> bool {
        !is_base_filtered(&raw.typ) && raw.typ == "IRA:"
    }

    fn process(&mut self, frame: EnrichedFrame) -> Vec<Emission> {
        let Some(rec) = parse_ira(&frame.data, frame.time) else {
            return vec![];
        };
        if rec.alt < 100 {
            return vec![];
        }
        let unix_secs = rec.time.as_f64_secs();

        if !self.seen_first {
            self.seen_first = true;
            let age = self.catalog.oldest_epoch_age_days(unix_to_minutes_since_1950(unix_secs));
            if age.abs() > 3.0 {
                log::warn!("TLE relative age is {age:.2} days. Expect poor results.");
            } else {
                log::debug!("TLE relative age is {age:.2} days");
            }
        }

        let observed = geodetic_to_eci(rec.lat, rec.lon, rec.alt as f64, unix_secs);
        let Some((name, dist)) = find_closest(&self.catalog, unix_secs, observed) else {
            return vec![];
        };

        let matched_name = if dist > MAX_DIST_KM { "NONE".to_string() } else { name.to_string() };
        let slot = self.sats.entry(rec.sat).or_default().entry(matched_name.clone()).or_default();
        slot.count += 1;

        if matched_name != "NONE" {
            self.stats_cnt += 1;
            self.stats_sum_km += dist;
        }

        log::debug!(
            "sat {:02} beam {:02} [{:8.4} {:8.4} {}] matched {matched_name:<20} @ {dist:5}km",
            rec.sat,
            rec.beam,
            rec.lat,
            rec.lon,
            rec.alt
        );
        vec![]
    }

    fn end(&mut self, pipeline: &mut Pipeline) -> Result<(), Error> {
        let mut sats: Vec<_> = self.sats.keys().copied().collect();
        sats.sort_unstable();
        for sat in sats {
            let votes = &self.sats[&sat];
            let sum: u64 = votes.values().map(|v| v.count).sum();
            let mut names: Vec<_> = votes.keys().collect();
            names.sort();
            for name in names {
                let count = votes[name].count;
                let pct = 100.0 * count as f64 / sum.max(1) as f64;
                pipeline.emit_line(&format!("{sat:03} seen: {sum:5} times - matched to {name:<20} {pct:5.1}%"))?;
            }
        }
        if self.stats_cnt == 0 {
            pipeline.emit_line("No matches. Wrong input file?")
        } else {
            pipeline.emit_line(&format!(
                "{} matches. Avg distance: {:5.2}km",
                self.stats_cnt,
                self.stats_sum_km / self.stats_cnt as f64
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geodetic_roundtrips_to_plausible_radius() {
        let p = geodetic_to_eci(0.0, 0.0, 0.0, 946_728_000.0);
        let r = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
        assert!((r - WGS84_A_KM).abs() < 1.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = [1.0, 2.0, 3.0];
        let b = [4.0, 5.0, 6.0];
        assert_eq!(distance_km(a, b), distance_km(b, a));
    }
}
