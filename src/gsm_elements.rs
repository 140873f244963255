/*! Pure decoders for a handful of GSM Layer-3 information elements that
show up inside IDA application PDUs: Mobile Identity, Location Area
Identity, and the Disconnect/Release cause IE.

Each returns a typed `Result` instead of the original's `("PARSE_FAIL",
data)` sentinel tuple: callers that want the exact original text can map
the error to that string, but now have a type to match on instead.
*/

/// A GSM element failed its length/parity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GsmParseError;

impl std::fmt::Display for GsmParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PARSE_FAIL")
    }
}

type ParseResult<'a> = Result<(String, &'a [u8]), GsmParseError>;

/// Decode a Mobile Identity IEI: one length byte, then a type/odd-even
/// nibble, then BCD-ish digits (IMSI/IMEI) or a raw TMSI.
pub fn parse_mobile_identity(data: &[u8]) -> ParseResult<'_> {
    if data.len() < 2 {
        return Err(GsmParseError);
    }
    let iei_len = data[0];
    let iei_dig = data[1] >> 4;
    let iei_odd = (data[1] >> 3) & 1;
    let iei_typ = data[1] & 7;

    match iei_typ {
        1 | 2 => {
            if iei_odd == 1 && iei_len == 8 && data.len() >= 2 + 7 {
                let mut s = format!("{iei_dig:x}");
                for &x in &data[2..2 + 7] {
                    s.push_str(&format!("{:x}{:x}", x & 0xf, x >> 4));
                }
                let kind = if iei_typ == 1 { "imsi" } else { "imei" };
                Ok((format!("{kind}:{s}"), &data[2 + 7..]))
            } else {
                Err(GsmParseError)
            }
        }
        4 => {
            if iei_odd == 0 && iei_len == 5 && iei_dig == 0xf && data.len() >= 6 {
                let s = format!(
                    "tmsi:{:02x}{:02x}{:02x}{:02x}",
                    data[2], data[3], data[4], data[5]
                );
                Ok((s, &data[6..]))
            } else {
                Err(GsmParseError)
            }
        }
        _ => Err(GsmParseError),
    }
}

/// Decode a Location Area Identity: MCC/MNC/LAC from 5 bytes.
pub fn parse_lai(lai: &[u8]) -> ParseResult<'_> {
    if lai.len() < 4 || lai[1] >> 4 != 0xf {
        return Err(GsmParseError);
    }
    let s = format!(
        "MCC={}{}{}/MNC={}{}/LAC={:02x}{:02x}",
        lai[0] & 0xf,
        lai[0] >> 4,
        lai[1] & 0xf,
        lai[2] >> 4,
        lai[2] & 0xf,
        lai[3],
        lai[4],
    );
    Ok((s, &lai[5..]))
}

/// Decode a Release/Disconnect cause IE: location, numeric cause, and
/// optional CCBS extension.
pub fn parse_disconnect_cause(disc: &[u8]) -> ParseResult<'_> {
    if disc.len() < 3 || disc[0] < 2 || disc[1] >> 4 != 0xe {
        return Err(GsmParseError);
    }
    let net = disc[1] & 0xf;
    let cause = disc[2] & 0x7f;

    let mut s = match net {
        0 => "Loc:user ".to_string(),
        2 => "Net:local".to_string(),
        3 => "Net:trans".to_string(),
        4 => "Net:remot".to_string(),
        _ => format!("Net: {net:3} "),
    };

    s += &match cause {
        17 => " Cause(17) User busy".to_string(),
        31 => " Cause(31) Normal, unspecified".to_string(),
        1 => " Cause(01) Unassigned number".to_string(),
        41 => " Cause(41) Temporary failure".to_string(),
        16 => " Cause(16) Normal call clearing".to_string(),
        57 => " Cause(57) Bearer cap. not authorized".to_string(),
        34 => " Cause(34) No channel available".to_string(),
        127 => " Cause(127) Interworking, unspecified".to_string(),
        _ => format!(" Cause: {cause}"),
    };

    if disc.len() >= 4 && (disc[2] >> 7) == 1 && disc[0] == 3 && disc[3] == 0x88 {
        s += " CCBS not poss.";
        return Ok((s, &disc[4..]));
    }
    Ok((s, &disc[3..]))
}

/// Render bytes as ASCII, substituting `.` for anything outside the
/// printable range.
pub fn to_ascii(data: &[u8], dot: bool) -> String {
    data.iter()
        .map(|&b| {
            if (0x20..0x7f).contains(&b) {
                b as char
            } else if dot {
                '.'
            } else {
                ' '
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imei_roundtrip() {
        let data = [0x08u8, 0x29, 0x12, 0x34, 0x56, 0x78, 0x90, 0x12, 0x34, 0xff];
        let (s, rest) = parse_mobile_identity(&data).unwrap();
        assert!(s.starts_with("imei:"));
        assert_eq!(rest, &[0xffu8]);
    }

    #[test]
    fn tmsi_parses() {
        let data = [0x05u8, 0xf4, 0xde, 0xad, 0xbe, 0xef, 0xaa];
        let (s, rest) = parse_mobile_identity(&data).unwrap();
        assert_eq!(s, "tmsi:deadbeef");
        assert_eq!(rest, &[0xaau8]);
    }

    #[test]
    fn lai_requires_f_nibble() {
        assert!(parse_lai(&[0x12, 0x34, 0x56, 0x78, 0x9a]).is_err());
        assert!(parse_lai(&[0x12, 0xf4, 0x56, 0x78, 0x9a]).is_ok());
    }

    #[test]
    fn disconnect_cause_known_code() {
        let (s, _) = parse_disconnect_cause(&[0x08, 0xe0, 0x91]).unwrap();
        assert!(s.contains("User busy"));
    }

    #[test]
    fn ascii_dots_nonprintable() {
        assert_eq!(to_ascii(&[0x41, 0x00, 0x42], true), "A.B");
    }
}
