//! The only place in this crate that knows about IPv4/TCP wire bytes. The
//! core (`segment.rs` and everything that builds on it) speaks `TcpSegment`
//! and never imports `etherparse` directly.

use std::net::Ipv4Addr;

use etherparse::{IpNumber, Ipv4Header, Ipv4HeaderSlice, TcpHeader, TcpHeaderSlice};

use super::segment::{Tcp4Tuple, TcpSegment};
use super::wrap::Wrap32;

const TTL: u8 = 64;

#[derive(Debug)]
pub enum DecodeError {
    NotIpv4(String),
    NotTcp,
    BadTcpHeader(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::NotIpv4(e) => write!(f, "not a valid IPv4 packet: {e}"),
            DecodeError::NotTcp => write!(f, "IPv4 payload is not TCP"),
            DecodeError::BadTcpHeader(e) => write!(f, "malformed TCP header: {e}"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decodes a raw IPv4 frame into the four-tuple that identifies its
/// connection and the segment it carries.
pub fn decode(frame: &[u8]) -> Result<(Tcp4Tuple, TcpSegment), DecodeError> {
    let ip = Ipv4HeaderSlice::from_slice(frame).map_err(|e| DecodeError::NotIpv4(e.to_string()))?;
    if ip.protocol() != IpNumber::TCP {
        return Err(DecodeError::NotTcp);
    }
    let ip_payload = &frame[ip.slice().len()..];
    let tcp = TcpHeaderSlice::from_slice(ip_payload)
        .map_err(|e| DecodeError::BadTcpHeader(e.to_string()))?;
    let payload = &ip_payload[tcp.slice().len()..];

    let tuple = Tcp4Tuple {
        src: (ip.source_addr(), tcp.source_port()),
        dst: (ip.destination_addr(), tcp.destination_port()),
    };
    let seg = TcpSegment {
        seqno: Wrap32::new(tcp.sequence_number()),
        ackno: Wrap32::new(tcp.acknowledgment_number()),
        win: tcp.window_size(),
        syn: tcp.syn(),
        ack: tcp.ack(),
        fin: tcp.fin(),
        rst: tcp.rst(),
        payload: payload.to_vec(),
    };
    Ok((tuple, seg))
}

/// Encodes a segment as a raw IPv4 frame addressed from `tuple.dst` to
/// `tuple.src` — i.e. `tuple` is the identity of the connection as seen from
/// the *peer's* side, and we're replying.
pub fn encode(tuple: &Tcp4Tuple, seg: &TcpSegment) -> Vec<u8> {
    let (src_addr, src_port) = tuple.dst;
    let (dst_addr, dst_port) = tuple.src;

    let mut tcph = TcpHeader::new(src_port, dst_port, seg.seqno.raw(), seg.win);
    tcph.syn = seg.syn;
    tcph.ack = seg.ack;
    tcph.fin = seg.fin;
    tcph.rst = seg.rst;
    tcph.acknowledgment_number = seg.ackno.raw();

    let ip4h = Ipv4Header::new(
        tcph.header_len() as u16 + seg.payload.len() as u16,
        TTL,
        IpNumber::TCP,
        src_addr.octets(),
        dst_addr.octets(),
    )
    .expect("header length and payload fit in an IPv4 packet");
    tcph.checksum = tcph
        .calc_checksum_ipv4(&ip4h, &seg.payload)
        .expect("payload fits in a u16 length field");

    let mut out =
        Vec::with_capacity(ip4h.header_len() + tcph.header_len() as usize + seg.payload.len());
    ip4h.write(&mut out).expect("writing to a Vec never fails");
    tcph.write(&mut out).expect("writing to a Vec never fails");
    out.extend_from_slice(&seg.payload);
    out
}
