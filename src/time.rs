/*! Absolute time handling.

The Python original keeps frame timestamps as `float` seconds since the
Unix epoch, and compares expiry windows (5s, 280s, 1000s, 2000s) directly
on those floats. That's fine until the fractional-second accumulation from
repeated addition makes two timestamps that "should" be equal compare as
merely "close". Per the Design Notes, we represent time as an integer
(seconds, nanoseconds) pair instead, so every comparison and every expiry
window in this crate is exact integer arithmetic.
*/
use std::time::Duration;

/// Absolute UTC time, as whole seconds since the Unix epoch plus a
/// nanosecond remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IridiumTime {
    secs: i64,
    nanos: u32,
}

impl IridiumTime {
    /// Zero time (Unix epoch).
    pub const ZERO: IridiumTime = IridiumTime { secs: 0, nanos: 0 };

    /// Construct from whole seconds and a nanosecond remainder.
    ///
    /// `nanos` is normalized into `0..1_000_000_000`, carrying into `secs`.
    pub fn new(secs: i64, nanos: i64) -> Self {
        let extra_secs = nanos.div_euclid(1_000_000_000);
        let nanos = nanos.rem_euclid(1_000_000_000) as u32;
        IridiumTime {
            secs: secs + extra_secs,
            nanos,
        }
    }

    /// Construct from a floating point count of seconds since the epoch.
    ///
    /// This is only used at the input boundary, when converting the
    /// textual `mstime`/`starttime` fields of a raw frame.
    pub fn from_f64_secs(secs: f64) -> Self {
        let whole = secs.floor();
        let frac = secs - whole;
        IridiumTime::new(whole as i64, (frac * 1_000_000_000.0).round() as i64)
    }

    /// Seconds component of this time, truncating the nanosecond remainder.
    pub fn as_secs(&self) -> i64 {
        self.secs
    }

    /// This time as a floating point count of seconds since the epoch.
    ///
    /// Used only for presentation (e.g. the legacy `%15.6f` style output).
    pub fn as_f64_secs(&self) -> f64 {
        self.secs as f64 + self.nanos as f64 / 1_000_000_000.0
    }

    /// Nanosecond remainder, in `0..1_000_000_000`.
    pub fn subsec_nanos(&self) -> u32 {
        self.nanos
    }

    /// Add a (possibly fractional) number of seconds.
    pub fn add_secs_f64(&self, delta: f64) -> Self {
        IridiumTime::from_f64_secs(self.as_f64_secs() + delta)
    }

    /// Add a whole number of seconds.
    pub fn add_secs(&self, delta: i64) -> Self {
        IridiumTime::new(self.secs + delta, self.nanos as i64)
    }

    /// Signed difference `self - other`, in seconds.
    pub fn diff_secs(&self, other: &IridiumTime) -> f64 {
        (self.secs - other.secs) as f64 + (self.nanos as f64 - other.nanos as f64) / 1e9
    }

    /// Whether `self` is within `window` seconds *after* `other` (i.e.
    /// `other <= self <= other + window`), the shape every expiry check
    /// in this crate uses.
    pub fn within_after(&self, other: &IridiumTime, window_secs: i64) -> bool {
        *self >= *other && self.secs <= other.secs.saturating_add(window_secs)
    }

    /// `std::time::SystemTime` equivalent, for formatting with `chrono`.
    pub fn to_system_time(self) -> std::time::SystemTime {
        if self.secs >= 0 {
            std::time::UNIX_EPOCH + Duration::new(self.secs as u64, self.nanos)
        } else {
            std::time::UNIX_EPOCH - Duration::new((-self.secs) as u64, 0)
                + Duration::new(0, self.nanos)
        }
    }

    /// Format as `YYYY-MM-DDTHH:MM:SS.ccZ` (centisecond precision), matching
    /// the original's `strftime("%Y-%m-%dT%H:%M:%S.{:02.0f}Z")`.
    pub fn to_iso_centis(self) -> String {
        let dt = chrono::DateTime::<chrono::Utc>::from(self.to_system_time());
        format!(
            "{}.{:02}Z",
            dt.format("%Y-%m-%dT%H:%M:%S"),
            self.nanos / 10_000_000
        )
    }

    /// Format as `YYYY-MM-DDTHH:MM:SS`, matching the original's unadorned
    /// `strftime("%Y-%m-%dT%H:%M:%S")` calls (used by `sbd`/`msg` modes).
    pub fn to_iso_seconds(self) -> String {
        let dt = chrono::DateTime::<chrono::Utc>::from(self.to_system_time());
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

impl std::fmt::Display for IridiumTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}", self.as_f64_secs())
    }
}

/// Format an Iridium timestamp (a 32-bit count of 90ms ticks from the
/// Iridium epoch, 1996-06-01T00:00:11Z) into `(seconds-since-epoch,
/// formatted string)`, mirroring `util.fmt_iritime` in the original.
///
/// The Iridium epoch is close enough to, but not identical to, the Unix
/// epoch that the tick count must be added to a fixed offset.
pub fn fmt_iritime(ticks: u64) -> (IridiumTime, String) {
    // Iridium epoch: 1996-06-01T00:00:11Z.
    const IRIDIUM_EPOCH_UNIX: i64 = 833_587_211;
    const TICK_NANOS: i64 = 90_000_000; // 90ms
    let t = IridiumTime::new(IRIDIUM_EPOCH_UNIX, ticks as i64 * TICK_NANOS);
    let s = t.to_iso_centis();
    (t, s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_f64_roundtrips() {
        let t = IridiumTime::from_f64_secs(1_000_000.5);
        assert_eq!(t.as_secs(), 1_000_000);
        assert_eq!(t.subsec_nanos(), 500_000_000);
        assert!((t.as_f64_secs() - 1_000_000.5).abs() < 1e-9);
    }

    #[test]
    fn diff_is_exact_for_integer_seconds() {
        let a = IridiumTime::from_f64_secs(1000.0);
        let b = IridiumTime::from_f64_secs(1030.0);
        assert_eq!(b.diff_secs(&a), 30.0);
    }

    #[test]
    fn within_after_respects_window() {
        let a = IridiumTime::from_f64_secs(1000.0);
        let b = a.add_secs(280);
        assert!(b.within_after(&a, 280));
        let c = a.add_secs(281);
        assert!(!c.within_after(&a, 280));
    }

    #[test]
    fn ordering_matches_chronology() {
        let a = IridiumTime::from_f64_secs(5.0);
        let b = IridiumTime::from_f64_secs(5.5);
        assert!(a < b);
    }
}
