/*! GSMTAP/PCAP Encoder: wraps IDA L2 PDUs (treated as LAPDm frames) in a
GSMTAP v2 pseudo-header, and optionally in a fake UDP/IPv4/Ethernet frame
plus a PCAP record, so the result can be opened directly in Wireshark.
*/
use crate::enrich::{self, EnrichedFrame};
use crate::error::Error;
use crate::frame::RawFrame;
use crate::ida::{IdaJoiner, L2Pdu};
use crate::pipeline::Pipeline;
use crate::reassembler::{Emission, Reassembler};
use crate::time::IridiumTime;
use std::net::UdpSocket;

const GSMTAP_PORT: u16 = 4729;

/// Build the 16-byte GSMTAP v2 header for one PDU, per the Component
/// Design: version 2, 4x32-bit words, type Um, ARFCN with the uplink bit
/// set when appropriate, clamped signal level, and `frame_number` reused
/// to carry the absolute frequency.
pub fn gsmtap_header(pdu: &L2Pdu) -> [u8; 16] {
    let (chan, _off) = enrich::channelize(pdu.frequency);
    let olvl = pdu.level.round().clamp(-126.0, 127.0) as i8;
    let arfcn: u16 = (chan as u16 & 0x3fff) | if pdu.uplink { 0x4000 } else { 0 };

    let mut h = [0u8; 16];
    h[0] = 2; // version
    h[1] = 4; // hdr_len (32-bit words)
    h[2] = 2; // type: Um
    h[3] = 0; // timeslot
    h[4..6].copy_from_slice(&arfcn.to_be_bytes());
    h[6] = olvl as u8;
    h[7] = 0; // snr_db
    h[8..12].copy_from_slice(&(pdu.frequency as u32).to_be_bytes());
    h[12] = 1; // sub_type
    h[13] = 0; // antenna
    h[14] = 0; // sub_slot
    h[15] = 0; // res
    h
}

/// GSMTAP header followed by the raw PDU bytes as the LAPDm payload.
pub fn gsm_wrap(pdu: &L2Pdu) -> Vec<u8> {
    let mut out = gsmtap_header(pdu).to_vec();
    out.extend_from_slice(&pdu.bytes);
    out
}

/// Whether this PDU is not interesting GSM traffic and should be dropped
/// unless `all` is set: first byte low nibble 6 or 8, high nibble 7, or
/// total length 1.
pub fn should_filter(data: &[u8], all: bool) -> bool {
    if all || data.is_empty() {
        return false;
    }
    if data.len() == 1 {
        return true;
    }
    let b0 = data[0];
    b0 & 0xf == 6 || b0 & 0xf == 8 || (b0 >> 4) == 7
}

fn build_udp(gsmtap: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + gsmtap.len());
    out.extend_from_slice(&45988u16.to_be_bytes()); // src port
    out.extend_from_slice(&GSMTAP_PORT.to_be_bytes()); // dst port
    out.extend_from_slice(&((8 + gsmtap.len()) as u16).to_be_bytes());
    out.extend_from_slice(&0xffffu16.to_be_bytes()); // checksum: unchecked
    out.extend_from_slice(gsmtap);
    out
}

fn build_ipv4(udp: &[u8], ul: bool) -> Vec<u8> {
    let (src, dst) = if ul {
        ([10u8, 0, 0, 1], [127u8, 0, 0, 1])
    } else {
        ([127u8, 0, 0, 1], [10u8, 0, 0, 1])
    };
    let mut out = Vec::with_capacity(20 + udp.len());
    out.push((0x4 << 4) + 5); // version/IHL
    out.push(0); // DSCP/ECN
    out.extend_from_slice(&((udp.len() + 20) as u16).to_be_bytes());
    out.extend_from_slice(&0xdaaeu16.to_be_bytes()); // identification
    out.push(0x40); // flags (don't fragment)
    out.push(0x0); // fragment offset
    out.push(0x40); // TTL
    out.push(17); // protocol: UDP
    out.extend_from_slice(&0xffffu16.to_be_bytes()); // header checksum: unchecked
    out.extend_from_slice(&src);
    out.extend_from_slice(&dst);
    out.extend_from_slice(udp);
    out
}

fn build_ethernet(ip: &[u8], ul: bool) -> Vec<u8> {
    let src: [u8; 6] = if ul { [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff] } else { [0x10, 0x22, 0x33, 0x44, 0x55, 0x66] };
    let dst: [u8; 6] = if ul { [0x10, 0x22, 0x33, 0x44, 0x55, 0x66] } else { [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff] };
    let mut out = Vec::with_capacity(14 + ip.len());
    out.extend_from_slice(&dst);
    out.extend_from_slice(&src);
    out.extend_from_slice(&0x0800u16.to_be_bytes()); // ethertype: IPv4
    out.extend_from_slice(ip);
    out
}

/// Global PCAP file header, written once at the start of the stream.
pub fn pcap_file_header() -> [u8; 24] {
    let mut h = [0u8; 24];
    h[0..4].copy_from_slice(&0xa1b2c3d4u32.to_le_bytes());
    h[4..6].copy_from_slice(&2u16.to_le_bytes());
    h[6..8].copy_from_slice(&4u16.to_le_bytes());
    // thiszone: 0, sigfigs: 0 (bytes 8..16 stay zero)
    h[16..20].copy_from_slice(&0xffffu32.to_le_bytes()); // snaplen
    h[20..24].copy_from_slice(&1u32.to_le_bytes()); // network: ethernet
    h
}

fn pcap_record(time: IridiumTime, eth: &[u8]) -> Vec<u8> {
    let sec = time.as_secs().max(0) as u32;
    let usec = (time.subsec_nanos() / 1000) as u32;
    let mut out = Vec::with_capacity(16 + eth.len());
    out.extend_from_slice(&sec.to_le_bytes());
    out.extend_from_slice(&usec.to_le_bytes());
    out.extend_from_slice(&(eth.len() as u32).to_le_bytes());
    out.extend_from_slice(&(eth.len() as u32).to_le_bytes());
    out.extend_from_slice(eth);
    out
}

/// Build one full PCAP record (UDP/IPv4/Ethernet around the GSMTAP
/// payload) for a PDU.
pub fn build_pcap_record(pdu: &L2Pdu) -> Vec<u8> {
    let gsmtap = gsm_wrap(pdu);
    let udp = build_udp(&gsmtap);
    let ip = build_ipv4(&udp, pdu.uplink);
    let eth = build_ethernet(&ip, pdu.uplink);
    pcap_record(pdu.time, &eth)
}

/// `lap` mode: binary PCAP stream.
pub struct LapReassembler {
    joiner: IdaJoiner,
    wrote_header: bool,
    all: bool,
}

impl LapReassembler {
    pub fn new(all: bool) -> Self {
        LapReassembler { joiner: IdaJoiner::default(), wrote_header: false, all }
    }
}

impl Reassembler for LapReassembler {
    fn filter(&self, raw: &RawFrame) -> bool {
        IdaJoiner::filter(&raw.typ, &raw.data)
    }

    fn process(&mut self, frame: EnrichedFrame) -> Vec<Emission> {
        let pdu = match self.joiner.push(&frame) {
            Ok(Some(pdu)) => pdu,
            Ok(None) => return vec![],
            Err(e) => {
                log::warn!("{e}");
                return vec![];
            }
        };
        if should_filter(&pdu.bytes, self.all) {
            return vec![];
        }
        let mut emissions = Vec::new();
        if !self.wrote_header {
            emissions.push(Emission::Bytes(pcap_file_header().to_vec()));
            self.wrote_header = true;
        }
        emissions.push(Emission::Bytes(build_pcap_record(&pdu)));
        emissions
    }

    fn end(&mut self, pipeline: &mut Pipeline) -> Result<(), Error> {
        self.joiner.report(pipeline)
    }
}

/// `gsmtap` mode: live UDP datagrams to `127.0.0.1:4729`, matching a
/// Wireshark GSMTAP capture filter listening on the loopback interface.
pub struct GsmtapReassembler {
    joiner: IdaJoiner,
    socket: UdpSocket,
}

impl GsmtapReassembler {
    pub fn new() -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(GsmtapReassembler { joiner: IdaJoiner::default(), socket })
    }
}

impl Reassembler for GsmtapReassembler {
    fn filter(&self, raw: &RawFrame) -> bool {
        IdaJoiner::filter(&raw.typ, &raw.data)
    }

    fn process(&mut self, frame: EnrichedFrame) -> Vec<Emission> {
        let pdu = match self.joiner.push(&frame) {
            Ok(Some(pdu)) => pdu,
            Ok(None) => return vec![],
            Err(e) => {
                log::warn!("{e}");
                return vec![];
            }
        };
        if pdu.bytes.len() <= 1 {
            return vec![];
        }
        let pkt = gsm_wrap(&pdu);
        if let Err(e) = self.socket.send_to(&pkt, ("127.0.0.1", GSMTAP_PORT)) {
            log::warn!("failed to send GSMTAP datagram: {e}");
        }
        vec![]
    }

    fn end(&mut self, pipeline: &mut Pipeline) -> Result<(), Error> {
        self.joiner.report(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdu(bytes: Vec<u8>, ul: bool) -> L2Pdu {
        L2Pdu { bytes, time: IridiumTime::from_f64_secs(1000.25), uplink: ul, level: 10.0, frequency: 1_616_000_000 }
    }

    #[test]
    fn header_sets_uplink_bit() {
        let h = gsmtap_header(&pdu(vec![1, 2, 3], true));
        let arfcn = u16::from_be_bytes([h[4], h[5]]);
        assert_eq!(arfcn & 0x4000, 0x4000);
    }

    #[test]
    fn header_clamps_level() {
        let h = gsmtap_header(&pdu(vec![1], false));
        let mut p = pdu(vec![1], false);
        p.level = 1000.0;
        let h2 = gsmtap_header(&p);
        assert_eq!(h2[6] as i8, 127);
        let _ = h;
    }

    #[test]
    fn filters_out_low_nibble_six() {
        assert!(should_filter(&[0x36], false));
        assert!(!should_filter(&[0x36], true));
    }

    #[test]
    fn pcap_record_swaps_direction() {
        let ul_record = build_pcap_record(&pdu(vec![1, 2, 3, 4], true));
        let dl_record = build_pcap_record(&pdu(vec![1, 2, 3, 4], false));
        // Ethernet src (bytes 16..22 into the eth frame, after the 16-byte
        // pcap record header) differs by direction.
        assert_ne!(ul_record[16..22], dl_record[16..22]);
    }
}
