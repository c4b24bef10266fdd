//! One-shot packet templating.
//!
//! Builds the canonical Ethernet+IPv4+UDP frame for a (port, tx queue) pair
//! and stamps it into every buffer of the port's send pool, so the transmit
//! path never reconstructs headers. Stamping happens exactly once per port;
//! the race between transmit-capable workers is resolved by the port's init
//! lock (see [`crate::port::Port::ensure_tx_templates`]).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::RunConfig;
use crate::nic::{FrameBuf, MacAddr, NicDriver, PortId, QueueId};

/// Ethernet header length in bytes.
pub const ETHER_HDR_LEN: u32 = 14;
/// IPv4 header length in bytes (no options).
pub const IPV4_HDR_LEN: u32 = 20;
/// UDP header length in bytes.
pub const UDP_HDR_LEN: u32 = 8;
/// Frame check sequence length in bytes.
pub const ETHER_CRC_LEN: u32 = 4;

/// Fixed destination-MAC prefix; the low byte is the transmit queue id.
const DST_MAC_PREFIX: [u8; 5] = [0x00, 0xaa, 0xbb, 0xcc, 0xdd];

const ETHERTYPE_IPV4: u16 = 0x0800;
const IPPROTO_UDP: u8 = 17;

fn checksum_words(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for w in &mut chunks {
        sum += u32::from(u16::from_be_bytes([w[0], w[1]]));
    }
    if let [last] = chunks.remainder() {
        sum += u32::from(u16::from_be_bytes([*last, 0]));
    }
    sum
}

fn checksum_fold(mut sum: u32) -> u16 {
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Standard IPv4 one's-complement header checksum.
///
/// The checksum field of `header` must be zeroed by the caller.
pub fn ipv4_checksum(header: &[u8]) -> u16 {
    checksum_fold(checksum_words(0, header))
}

/// UDP checksum over the IPv4 pseudo-header and the UDP segment.
///
/// `segment` is the UDP header (checksum field zeroed) plus payload.
/// A computed value of 0 is transmitted as 0xffff per RFC 768.
pub fn udp_checksum(src: [u8; 4], dst: [u8; 4], segment: &[u8]) -> u16 {
    let mut sum = checksum_words(0, &src);
    sum = checksum_words(sum, &dst);
    sum += u32::from(IPPROTO_UDP);
    sum += segment.len() as u32;
    let folded = checksum_fold(checksum_words(sum, segment));
    if folded == 0 { 0xffff } else { folded }
}

/// Build the canonical frame image for one (port, tx queue) stream.
///
/// The returned buffer is `pkt_size - ETHER_CRC_LEN` bytes: the FCS is
/// appended by the hardware and never part of the template.
///
/// Layout:
/// - Ethernet: dst `00:aa:bb:cc:dd:<tx_qid>`, src = port MAC, type IPv4
/// - IPv4: 0x45, TOS 0, id 1, no frag, TTL 64, proto UDP, src/dst random
///   in the configured /24
/// - UDP: src/dst ports random in [1, 65534]
/// - payload: repeating printable pattern, byte i = 32 + (i mod 95)
pub fn build_frame(config: &RunConfig, mac: MacAddr, tx_qid: QueueId) -> Vec<u8> {
    // Failure to obtain this scratch buffer aborts the process, which is
    // the intended response to a resource-sizing misconfiguration.
    let mut pkt = vec![0u8; config.frame_len()];
    // Seeded per stream so template contents are reproducible.
    let mut rng = StdRng::seed_from_u64(0x706b_7462 ^ u64::from(tx_qid));

    for (i, b) in pkt.iter_mut().enumerate() {
        *b = 32 + (i % 95) as u8;
    }

    let eth_end = ETHER_HDR_LEN as usize;
    let ip_end = (ETHER_HDR_LEN + IPV4_HDR_LEN) as usize;
    let udp_end = (ETHER_HDR_LEN + IPV4_HDR_LEN + UDP_HDR_LEN) as usize;

    // Ethernet header
    pkt[0..5].copy_from_slice(&DST_MAC_PREFIX);
    pkt[5] = tx_qid as u8;
    pkt[6..12].copy_from_slice(&mac.0);
    pkt[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    // IPv4 header
    let base = config.subnet.octets();
    let mut rand_addr = || -> [u8; 4] {
        [base[0], base[1], base[2], rng.gen_range(1..=200u8)]
    };
    let total_length = (config.pkt_size - ETHER_HDR_LEN - ETHER_CRC_LEN) as u16;
    pkt[14] = 0x45;
    pkt[15] = 0;
    pkt[16..18].copy_from_slice(&total_length.to_be_bytes());
    pkt[18..20].copy_from_slice(&1u16.to_be_bytes());
    pkt[20..22].copy_from_slice(&0u16.to_be_bytes());
    pkt[22] = 64;
    pkt[23] = IPPROTO_UDP;
    pkt[24..26].fill(0);
    let src_addr = rand_addr();
    let dst_addr = rand_addr();
    pkt[26..30].copy_from_slice(&src_addr);
    pkt[30..34].copy_from_slice(&dst_addr);

    // UDP header
    let dgram_len = (config.pkt_size - ETHER_HDR_LEN - IPV4_HDR_LEN - ETHER_CRC_LEN) as u16;
    let src_port: u16 = rng.gen_range(1..=0xfffe);
    let dst_port: u16 = rng.gen_range(1..=0xfffe);
    pkt[34..36].copy_from_slice(&src_port.to_be_bytes());
    pkt[36..38].copy_from_slice(&dst_port.to_be_bytes());
    pkt[38..40].copy_from_slice(&dgram_len.to_be_bytes());
    pkt[40..42].fill(0);

    let udp_cksum = udp_checksum(src_addr, dst_addr, &pkt[eth_end + IPV4_HDR_LEN as usize..]);
    pkt[40..42].copy_from_slice(&udp_cksum.to_be_bytes());

    let ip_cksum = ipv4_checksum(&pkt[eth_end..ip_end]);
    pkt[24..26].copy_from_slice(&ip_cksum.to_be_bytes());

    debug_assert_eq!(udp_end, 42);
    pkt
}

/// Stamp the template into every buffer of the port's send pool.
///
/// Also sets each buffer's packet length so the transmit path sends
/// buffers exactly as pulled from the pool.
pub fn stamp_tx_pool<N: NicDriver>(nic: &N, port: PortId, mac: MacAddr, tx_qid: QueueId, config: &RunConfig) {
    let frame = build_frame(config, mac, tx_qid);
    let plen = config.frame_len();
    debug!(port, tx_qid, plen, "stamping send pool with packet template");
    nic.stamp_pool(port, &mut |buf| {
        buf.set_pkt_len(plen);
        buf.data_mut().copy_from_slice(&frame);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> (RunConfig, Vec<u8>) {
        let config = RunConfig::default();
        let mac = MacAddr([0x3c, 0xfd, 0xfe, 0xe4, 0x38, 0x40]);
        let pkt = build_frame(&config, mac, 3);
        (config, pkt)
    }

    #[test]
    fn frame_layout() {
        let (config, pkt) = frame();
        assert_eq!(pkt.len(), 60); // 64 minus FCS

        // Ethernet
        assert_eq!(&pkt[0..6], &[0x00, 0xaa, 0xbb, 0xcc, 0xdd, 0x03]);
        assert_eq!(&pkt[6..12], &[0x3c, 0xfd, 0xfe, 0xe4, 0x38, 0x40]);
        assert_eq!(&pkt[12..14], &0x0800u16.to_be_bytes());

        // IPv4
        assert_eq!(pkt[14], 0x45);
        assert_eq!(u16::from_be_bytes([pkt[16], pkt[17]]), 46); // 64 - 14 - 4
        assert_eq!(u16::from_be_bytes([pkt[18], pkt[19]]), 1);
        assert_eq!(pkt[22], 64);
        assert_eq!(pkt[23], 17);
        let base = config.subnet.octets();
        assert_eq!(&pkt[26..29], &base[..3]);
        assert_eq!(&pkt[30..33], &base[..3]);
        assert!((1..=200).contains(&pkt[29]));
        assert!((1..=200).contains(&pkt[33]));

        // UDP
        let sport = u16::from_be_bytes([pkt[34], pkt[35]]);
        let dport = u16::from_be_bytes([pkt[36], pkt[37]]);
        assert!((1..=0xfffe).contains(&sport));
        assert!((1..=0xfffe).contains(&dport));
        assert_eq!(u16::from_be_bytes([pkt[38], pkt[39]]), 26); // 64 - 14 - 20 - 4
    }

    #[test]
    fn checksums_round_trip() {
        let (_, pkt) = frame();

        // Recomputing the IPv4 checksum with the field zeroed reproduces it.
        let stored_ip = u16::from_be_bytes([pkt[24], pkt[25]]);
        let mut header = pkt[14..34].to_vec();
        header[10] = 0;
        header[11] = 0;
        assert_eq!(ipv4_checksum(&header), stored_ip);

        // Summing the full header including the stored checksum folds to zero.
        assert_eq!(ipv4_checksum(&pkt[14..34]), 0);

        // Same round trip for UDP over the pseudo-header.
        let stored_udp = u16::from_be_bytes([pkt[40], pkt[41]]);
        let src: [u8; 4] = pkt[26..30].try_into().unwrap();
        let dst: [u8; 4] = pkt[30..34].try_into().unwrap();
        let mut segment = pkt[34..].to_vec();
        segment[6] = 0;
        segment[7] = 0;
        assert_eq!(udp_checksum(src, dst, &segment), stored_udp);
    }

    #[test]
    fn payload_pattern_is_printable() {
        let (_, pkt) = frame();
        for (i, b) in pkt.iter().enumerate().skip(42) {
            assert_eq!(*b, 32 + (i % 95) as u8);
        }
    }

    #[test]
    fn queue_id_lands_in_dst_mac() {
        let config = RunConfig::default();
        let mac = MacAddr([0; 6]);
        for qid in [0u16, 1, 7] {
            let pkt = build_frame(&config, mac, qid);
            assert_eq!(pkt[5], qid as u8);
        }
    }
}
