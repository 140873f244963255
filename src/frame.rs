/*! Frame Parser: tokenizing one input line into a raw frame record.

Mirrors the original's `Reassemble.filter()` base case: split on runs of
whitespace into nine fields, the ninth retaining any internal whitespace
verbatim. No further interpretation happens here — that's the Enricher's
job (`crate::enrich`).
*/
use crate::error::Error;

/// One tokenized input line, before enrichment.
///
/// All fields are kept as the original text token; parsing them into
/// numbers, splitting the frequency/level compound fields, etc. is the
/// Enricher's responsibility so that a `RawFrame` can always be produced
/// from any nine-field line, even a malformed one (Testable Properties
/// §8, "Parser totality").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Four-character type tag ending in `:`, e.g. `IDA:`.
    pub typ: String,
    /// Opaque recording identifier.
    pub name: String,
    /// Millisecond offset within the recording, as text.
    pub mstime: String,
    /// Frequency token: either an absolute integer, or `chan|off`.
    pub frequency: String,
    /// Confidence token, e.g. `98%`.
    pub confidence: String,
    /// Level token: either one float, or `level|noise|snr`.
    pub level: String,
    /// Symbol count, as text.
    pub symbols: String,
    /// `"UL"` or `"DL"`.
    pub uldl: String,
    /// Remainder of the line, subprotocol-specific text.
    pub data: String,
}

impl RawFrame {
    /// Whether this is an uplink frame.
    pub fn is_uplink(&self) -> bool {
        self.uldl == "UL"
    }
}

/// Split `line` into nine whitespace-delimited fields, the ninth keeping
/// any internal whitespace.
///
/// This matches Python's `line.split(None, 8)`: runs of whitespace
/// collapse to a single delimiter, leading whitespace is ignored, and the
/// final field is whatever textual remainder follows the eighth split
/// point. If fewer than nine non-empty fields can be produced, parsing
/// fails.
fn split_nine(line: &str) -> Option<[String; 9]> {
    let line = line.trim_end_matches(['\n', '\r']);
    let mut rest = line;
    let mut fields: Vec<String> = Vec::with_capacity(9);
    for _ in 0..8 {
        rest = rest.trim_start_matches(char::is_whitespace);
        if rest.is_empty() {
            return None;
        }
        let idx = rest.find(char::is_whitespace).unwrap_or(rest.len());
        if idx == rest.len() {
            // Ran out of fields before reaching nine.
            return None;
        }
        fields.push(rest[..idx].to_string());
        rest = &rest[idx..];
    }
    rest = rest.trim_start_matches(char::is_whitespace);
    if rest.is_empty() {
        return None;
    }
    fields.push(rest.to_string());
    fields.try_into().ok()
}

/// Parse one input line into a `RawFrame`.
///
/// On failure, returns `Error::LineParse` carrying the offending line; the
/// caller (the orchestrator) is responsible for logging it and bumping
/// `stat_line` without incrementing `stat_filter`.
pub fn parse_line(line: &str) -> Result<RawFrame, Error> {
    let [typ, name, mstime, frequency, confidence, level, symbols, uldl, data] =
        split_nine(line).ok_or_else(|| Error::LineParse(line.to_string()))?;
    Ok(RawFrame {
        typ,
        name,
        mstime,
        frequency,
        confidence,
        level,
        symbols,
        uldl,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_line() {
        let line = "IDA: p-1000-e000 5000.0 10|+00100 100% 1 8 DL cont=0 0 ctr=0 0 len=3 0:000 [ab.cd.ef]  ..../.... CRC:OK";
        let f = parse_line(line).unwrap();
        assert_eq!(f.typ, "IDA:");
        assert_eq!(f.name, "p-1000-e000");
        assert_eq!(f.mstime, "5000.0");
        assert_eq!(f.frequency, "10|+00100");
        assert_eq!(f.confidence, "100%");
        assert_eq!(f.level, "1");
        assert_eq!(f.symbols, "8");
        assert_eq!(f.uldl, "DL");
        assert!(f.data.starts_with("cont=0"));
        assert!(f.data.ends_with("CRC:OK"));
    }

    #[test]
    fn rejects_short_line() {
        assert!(parse_line("IDA: only two fields").is_err());
        assert!(parse_line("").is_err());
    }

    #[test]
    fn preserves_internal_whitespace_in_data() {
        let line = "IRA: x-1-a 1.0 100 99% 1 4 UL data  with   extra   spaces";
        let f = parse_line(line).unwrap();
        assert_eq!(f.data, "data  with   extra   spaces");
    }

    #[test]
    fn is_uplink_reflects_uldl() {
        let f = parse_line("IRA: x-1-a 1.0 100 99% 1 4 UL data").unwrap();
        assert!(f.is_uplink());
        let f = parse_line("IRA: x-1-a 1.0 100 99% 1 4 DL data").unwrap();
        assert!(!f.is_uplink());
    }
}
