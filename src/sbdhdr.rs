/*! Byte layouts shared by the IDA Application Decoder (`idapp.rs`, which
pretty-prints these headers) and the SBD L3 Reassembler (`sbd.rs`, which
uses them to derive `msgno`/`msgcnt`). Kept in one place so the two
decoders of the same wire format cannot drift apart.
*/

/// The 29-byte `0600` uplink registration prehdr.
pub const REG0600_LEN: usize = 29;

/// Fields pulled out of a `0600` uplink registration prehdr.
pub struct Reg0600<'a> {
    pub raw: &'a [u8],
    pub msgct: u8,
    /// `len` field present only on the IMEI-bearing (`0x20`) layout.
    pub addlen: Option<u8>,
}

/// Parse the fixed 29-byte `0600` prehdr. Returns `None` if too short.
pub fn parse_reg0600(hdr: &[u8]) -> Option<Reg0600<'_>> {
    if hdr.len() < REG0600_LEN {
        return None;
    }
    let raw = &hdr[..REG0600_LEN];
    let msgct = raw[15];
    let addlen = if raw[0] == 0x20 { Some(raw[17]) } else { None };
    Some(Reg0600 { raw, msgct, addlen })
}

fn hex_colon(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Render a `0600` prehdr the way the IDA Application Decoder's pretty
/// printer does: `<type:byte:layout ... msgct:N ... t:iso-time>`.
pub fn format_reg0600(hdr: &[u8]) -> String {
    let Some(reg) = parse_reg0600(hdr) else {
        return "<ERR:short>".to_string();
    };
    let raw = reg.raw;
    let mut s = format!("<{}", hex_colon(&raw[0..4]));

    if raw[0] == 0x20 {
        s += &format!(",{:02x}", raw[4]);
        let mut digits = String::new();
        for &x in &raw[5..13] {
            digits.push_str(&format!("{:x}", x & 0xf));
            digits.push_str(&format!("{:x}", x >> 4));
        }
        s += &format!(",{},imei:{}", &digits[0..1], &digits[1..]);
        s += &format!(" MOMSN={:02x}{:02x}", raw[13], raw[14]);
    } else if matches!(raw[0], 0x10 | 0x40 | 0x50 | 0x70) {
        s += &format!(",{}", hex_colon(&raw[4..8]).replace(':', ""));
        s += &format!(",{:02x}{:02x}", raw[8], raw[9]);
        s += &format!(",{:02x}{:02x}", raw[10], raw[11]);
        s += &format!(",{:02x}{:02x}{:02x}", raw[12], raw[13], raw[14]);
    } else {
        s += "[ERR:hdrtype]";
        s += &format!(" {}", hex_colon(&raw[4..15]));
    }

    s += &format!(" msgct:{}", raw[15]);
    s += &format!(" {}", hex_colon(&raw[16..25]));

    let mut ticks: u64 = 0;
    for &b in &raw[25..29] {
        ticks = (ticks << 8) | b as u64;
    }
    let (_, ts_str) = crate::time::fmt_iritime(ticks);
    s += &format!(" t:{ts_str}");
    s += ">";
    s
}

/// Slice a DL `7608` prehdr off `data`: 7 bytes when it starts with
/// `0x26`, 5 bytes when it starts with `0x20`. Returns
/// `(prehdr, rest, recognized)`.
pub fn slice_7608_prehdr(data: &[u8]) -> (&[u8], &[u8], bool) {
    match data.first() {
        Some(0x26) if data.len() >= 7 => (&data[..7], &data[7..], true),
        Some(0x20) if data.len() >= 5 => (&data[..5], &data[5..], true),
        _ => (&[], data, false),
    }
}

/// The `{0x10, len, msgno}` sub-header wrapping most SBD message bodies.
pub struct BodyHeader {
    pub len: u8,
    pub msgno: u8,
}

/// Parse the body sub-header, if present (`data[0] == 0x10` and at least
/// 4 bytes available).
pub fn parse_body_header(data: &[u8]) -> Option<(BodyHeader, &[u8])> {
    if data.len() > 3 && data[0] == 0x10 {
        Some((
            BodyHeader { len: data[1], msgno: data[2] },
            &data[3..],
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reg0600_imei_layout() {
        let mut hdr = [0u8; REG0600_LEN];
        hdr[0] = 0x20;
        hdr[15] = 3;
        hdr[17] = 9;
        let reg = parse_reg0600(&hdr).unwrap();
        assert_eq!(reg.msgct, 3);
        assert_eq!(reg.addlen, Some(9));
    }

    #[test]
    fn slices_7608_by_leading_byte() {
        let data = [0x26, 1, 2, 3, 4, 5, 6, 7, 8];
        let (pre, rest, ok) = slice_7608_prehdr(&data);
        assert!(ok);
        assert_eq!(pre.len(), 7);
        assert_eq!(rest, &[7, 8]);
    }

    #[test]
    fn body_header_requires_0x10_tag() {
        assert!(parse_body_header(&[0x10, 2, 5, 0xaa, 0xbb]).is_some());
        assert!(parse_body_header(&[0x20, 2, 5, 0xaa]).is_none());
    }
}
