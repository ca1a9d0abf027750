//! IPv6 header compression for the wireless hop.
//!
//! This module implements the stateless subset of IPHC (RFC 6282): no context
//! identifiers, no next-header compression, and no addresses derived from the
//! link-layer. Every packet the relay accepts from the local interface can be
//! compressed, and [`decompress`] reproduces it byte-for-byte on the far side.
//!
//! # Compressed header layout
//!
//! ```text
//!   0                   1
//!   0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!  |0|1|1| TF|N|HLI|C|S|SAM|M|D|DAM|
//!  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! followed by the inline fields in RFC order: traffic class / flow label,
//! next header, hop limit, source, destination. The payload follows unchanged.
//! The payload length field is always elided; it travels next to the frame as
//! `payload_len`.
//!
//! # Mesh frame
//!
//! On the radio a compressed packet is framed as
//! `[consumed_header_len: u8][payload_len: u16 BE][compressed header + payload]`.

use crate::address::Address;

/// Maximum packet size carried over the mesh (IPv6 minimum MTU).
pub const MTU: usize = 1280;

/// Size of the fixed IPv6 header.
pub const IPV6_HEADER_LEN: usize = 40;

/// Offset of the source address inside the IPv6 header.
pub const SOURCE_OFFSET: usize = 8;

/// Offset of the destination address inside the IPv6 header (RFC 8200).
pub const DESTINATION_OFFSET: usize = 24;

/// Destination offset used by the first generation of relay nodes.
///
/// Those nodes read the destination one byte early. Only select this when
/// interoperating with peers that were built against that layout.
pub const LEGACY_DESTINATION_OFFSET: usize = 23;

/// Size of the mesh frame prefix (`consumed_header_len` + `payload_len`).
pub const FRAME_PREFIX_LEN: usize = 3;

const IPHC_DISPATCH: u8 = 0b0110_0000;
const IPHC_DISPATCH_MASK: u8 = 0b1110_0000;

const TF_INLINE: u8 = 0b00;
const TF_NO_DSCP: u8 = 0b01;
const TF_NO_FLOW_LABEL: u8 = 0b10;
const TF_ELIDED: u8 = 0b11;

const ADDR_INLINE: u8 = 0b00;
const ADDR_64: u8 = 0b01;
const ADDR_16: u8 = 0b10;
const ADDR_ELIDED: u8 = 0b11;

const LINK_LOCAL_PREFIX: [u8; 8] = [0xfe, 0x80, 0, 0, 0, 0, 0, 0];
const SHORT_IID_PREFIX: [u8; 6] = [0, 0, 0, 0xff, 0xfe, 0];

/// Header codec errors.
///
/// Errors raised by [`compress`] are compression failures; errors raised by
/// [`decompress`] and [`CompressedPacket::decode`] are decompression failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("packet too short: {actual} bytes (need at least {})", IPV6_HEADER_LEN)]
    PacketTooShort { actual: usize },

    #[error("packet too large: {actual} bytes (MTU {})", MTU)]
    PacketTooLarge { actual: usize },

    #[error("not an IPv6 packet: version {0}")]
    UnsupportedVersion(u8),

    #[error("payload length field says {header} bytes but packet carries {actual}")]
    PayloadLengthMismatch { header: usize, actual: usize },

    #[error("invalid IPHC dispatch byte: 0x{0:02X}")]
    InvalidDispatch(u8),

    #[error("unsupported IPHC mode: {0}")]
    UnsupportedMode(&'static str),

    #[error("compressed header truncated: need {needed} more bytes, {available} left")]
    Truncated { needed: usize, available: usize },

    #[error("consumed header length {actual} does not match IPv6 header length {}", IPV6_HEADER_LEN)]
    HeaderLengthMismatch { actual: usize },

    #[error("frame carries {actual} payload bytes, expected {expected}")]
    FrameLengthMismatch { expected: usize, actual: usize },

    #[error("mesh frame too short: {0} bytes")]
    FrameTooShort(usize),
}

/// Decoded fixed IPv6 header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv6Header {
    pub traffic_class: u8,
    /// 20-bit flow label
    pub flow_label: u32,
    pub payload_len: u16,
    pub next_header: u8,
    pub hop_limit: u8,
    pub source: [u8; 16],
    pub destination: [u8; 16],
}

impl Ipv6Header {
    /// Size of the header in bytes
    pub const SIZE: usize = IPV6_HEADER_LEN;

    /// Decode the fixed header from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < Self::SIZE {
            return Err(CodecError::PacketTooShort { actual: buf.len() });
        }

        let version = buf[0] >> 4;
        if version != 6 {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let traffic_class = (buf[0] << 4) | (buf[1] >> 4);
        let flow_label = (u32::from(buf[1] & 0x0f) << 16) | (u32::from(buf[2]) << 8) | u32::from(buf[3]);
        let payload_len = u16::from_be_bytes([buf[4], buf[5]]);

        let mut source = [0u8; 16];
        source.copy_from_slice(&buf[SOURCE_OFFSET..SOURCE_OFFSET + 16]);
        let mut destination = [0u8; 16];
        destination.copy_from_slice(&buf[DESTINATION_OFFSET..DESTINATION_OFFSET + 16]);

        Ok(Self {
            traffic_class,
            flow_label,
            payload_len,
            next_header: buf[6],
            hop_limit: buf[7],
            source,
            destination,
        })
    }

    /// Encode header to bytes (network byte order)
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = 0x60 | (self.traffic_class >> 4);
        buf[1] = (self.traffic_class << 4) | ((self.flow_label >> 16) as u8 & 0x0f);
        buf[2] = (self.flow_label >> 8) as u8;
        buf[3] = self.flow_label as u8;
        buf[4..6].copy_from_slice(&self.payload_len.to_be_bytes());
        buf[6] = self.next_header;
        buf[7] = self.hop_limit;
        buf[SOURCE_OFFSET..SOURCE_OFFSET + 16].copy_from_slice(&self.source);
        buf[DESTINATION_OFFSET..DESTINATION_OFFSET + 16].copy_from_slice(&self.destination);
        buf
    }
}

/// Compressed header plus payload, with the two lengths needed to invert the
/// transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedPacket {
    /// Compressed header followed by the untouched payload
    pub bytes: Vec<u8>,
    /// Bytes of the uncompressed header consumed by compression
    pub consumed_header_len: usize,
    /// Length of the payload following the header
    pub payload_len: usize,
}

impl CompressedPacket {
    /// Reconstruct the original packet.
    pub fn decompress(&self) -> Result<Vec<u8>, CodecError> {
        decompress(&self.bytes, self.consumed_header_len, self.payload_len)
    }

    /// Encode as a mesh frame.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_PREFIX_LEN + self.bytes.len());
        buf.push(self.consumed_header_len as u8);
        buf.extend_from_slice(&(self.payload_len as u16).to_be_bytes());
        buf.extend_from_slice(&self.bytes);
        buf
    }

    /// Decode a mesh frame. Field consistency is checked by [`decompress`].
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < FRAME_PREFIX_LEN {
            return Err(CodecError::FrameTooShort(buf.len()));
        }

        Ok(Self {
            consumed_header_len: usize::from(buf[0]),
            payload_len: usize::from(u16::from_be_bytes([buf[1], buf[2]])),
            bytes: buf[FRAME_PREFIX_LEN..].to_vec(),
        })
    }
}

/// Compress the IPv6 header of `packet` for the wireless hop.
pub fn compress(packet: &[u8]) -> Result<CompressedPacket, CodecError> {
    if packet.len() > MTU {
        return Err(CodecError::PacketTooLarge {
            actual: packet.len(),
        });
    }

    let header = Ipv6Header::decode(packet)?;
    let payload = &packet[IPV6_HEADER_LEN..];
    if usize::from(header.payload_len) != payload.len() {
        return Err(CodecError::PayloadLengthMismatch {
            header: usize::from(header.payload_len),
            actual: payload.len(),
        });
    }

    let mut out = Vec::with_capacity(IPV6_HEADER_LEN + payload.len());
    out.extend_from_slice(&[0, 0]);

    // Traffic class and flow label
    let ecn = header.traffic_class & 0x03;
    let dscp = header.traffic_class >> 2;
    let fl = header.flow_label;
    let tf = if header.traffic_class == 0 && fl == 0 {
        TF_ELIDED
    } else if fl == 0 {
        out.push((ecn << 6) | dscp);
        TF_NO_FLOW_LABEL
    } else if dscp == 0 {
        out.extend_from_slice(&[(ecn << 6) | ((fl >> 16) as u8 & 0x0f), (fl >> 8) as u8, fl as u8]);
        TF_NO_DSCP
    } else {
        out.extend_from_slice(&[
            (ecn << 6) | dscp,
            (fl >> 16) as u8 & 0x0f,
            (fl >> 8) as u8,
            fl as u8,
        ]);
        TF_INLINE
    };

    out.push(header.next_header);

    let hlim = match header.hop_limit {
        1 => 0b01,
        64 => 0b10,
        255 => 0b11,
        other => {
            out.push(other);
            0b00
        }
    };

    let (sac, sam) = if header.source == [0u8; 16] {
        (1, ADDR_INLINE)
    } else {
        (0, compress_unicast(&header.source, &mut out))
    };

    let (m, dam) = if header.destination[0] == 0xff {
        (1, compress_multicast(&header.destination, &mut out))
    } else {
        (0, compress_unicast(&header.destination, &mut out))
    };

    out[0] = IPHC_DISPATCH | (tf << 3) | hlim;
    out[1] = (sac << 6) | (sam << 4) | (m << 3) | dam;
    out.extend_from_slice(payload);

    Ok(CompressedPacket {
        bytes: out,
        consumed_header_len: IPV6_HEADER_LEN,
        payload_len: payload.len(),
    })
}

/// Exact inverse of [`compress`].
pub fn decompress(
    bytes: &[u8],
    consumed_header_len: usize,
    payload_len: usize,
) -> Result<Vec<u8>, CodecError> {
    if consumed_header_len != IPV6_HEADER_LEN {
        return Err(CodecError::HeaderLengthMismatch {
            actual: consumed_header_len,
        });
    }
    if IPV6_HEADER_LEN + payload_len > MTU {
        return Err(CodecError::PacketTooLarge {
            actual: IPV6_HEADER_LEN + payload_len,
        });
    }

    let mut r = Reader::new(bytes);
    let b0 = r.u8()?;
    let b1 = r.u8()?;
    if b0 & IPHC_DISPATCH_MASK != IPHC_DISPATCH {
        return Err(CodecError::InvalidDispatch(b0));
    }

    let tf = (b0 >> 3) & 0x03;
    let nh = (b0 >> 2) & 0x01;
    let hlim = b0 & 0x03;
    let cid = b1 >> 7;
    let sac = (b1 >> 6) & 0x01;
    let sam = (b1 >> 4) & 0x03;
    let m = (b1 >> 3) & 0x01;
    let dac = (b1 >> 2) & 0x01;
    let dam = b1 & 0x03;

    if cid == 1 {
        return Err(CodecError::UnsupportedMode("context identifier extension"));
    }
    if nh == 1 {
        return Err(CodecError::UnsupportedMode("compressed next header"));
    }
    if dac == 1 {
        return Err(CodecError::UnsupportedMode("context-based destination"));
    }

    let (traffic_class, flow_label) = match tf {
        TF_INLINE => {
            let f = r.take(4)?;
            let tc = (f[0] << 2) | (f[0] >> 6);
            (tc, flow_label_from(f[1], f[2], f[3]))
        }
        TF_NO_DSCP => {
            let f = r.take(3)?;
            (f[0] >> 6, flow_label_from(f[0], f[1], f[2]))
        }
        TF_NO_FLOW_LABEL => {
            let f = r.u8()?;
            ((f << 2) | (f >> 6), 0)
        }
        _ => (0, 0),
    };

    let next_header = r.u8()?;
    let hop_limit = match hlim {
        0b00 => r.u8()?,
        0b01 => 1,
        0b10 => 64,
        _ => 255,
    };

    let source = match (sac, sam) {
        (0, mode) => decompress_unicast(mode, &mut r)?,
        (1, ADDR_INLINE) => [0u8; 16],
        _ => return Err(CodecError::UnsupportedMode("context-based source")),
    };

    let destination = if m == 1 {
        decompress_multicast(dam, &mut r)?
    } else {
        decompress_unicast(dam, &mut r)?
    };

    let payload = r.rest();
    if payload.len() != payload_len {
        return Err(CodecError::FrameLengthMismatch {
            expected: payload_len,
            actual: payload.len(),
        });
    }

    let header = Ipv6Header {
        traffic_class,
        flow_label,
        payload_len: payload_len as u16,
        next_header,
        hop_limit,
        source,
        destination,
    };

    let mut packet = Vec::with_capacity(IPV6_HEADER_LEN + payload_len);
    packet.extend_from_slice(&header.encode());
    packet.extend_from_slice(payload);
    Ok(packet)
}

/// Read the 16-byte destination field of an uncompressed packet at `offset`.
///
/// Returns `None` when the packet is too short to hold the field.
pub fn destination_from_packet(packet: &[u8], offset: usize) -> Option<Address> {
    address_at(packet, offset)
}

/// Read the source field of an uncompressed packet.
pub fn source_from_packet(packet: &[u8]) -> Option<Address> {
    address_at(packet, SOURCE_OFFSET)
}

fn address_at(packet: &[u8], offset: usize) -> Option<Address> {
    let field = packet.get(offset..offset.checked_add(16)?)?;
    let mut octets = [0u8; 16];
    octets.copy_from_slice(field);
    Some(Address::from_octets(octets))
}

fn flow_label_from(hi: u8, mid: u8, lo: u8) -> u32 {
    (u32::from(hi & 0x0f) << 16) | (u32::from(mid) << 8) | u32::from(lo)
}

fn compress_unicast(addr: &[u8; 16], out: &mut Vec<u8>) -> u8 {
    if addr[..8] != LINK_LOCAL_PREFIX {
        out.extend_from_slice(addr);
        return ADDR_INLINE;
    }
    if addr[8..14] == SHORT_IID_PREFIX {
        out.extend_from_slice(&addr[14..]);
        ADDR_16
    } else {
        out.extend_from_slice(&addr[8..]);
        ADDR_64
    }
}

fn decompress_unicast(mode: u8, r: &mut Reader<'_>) -> Result<[u8; 16], CodecError> {
    let mut addr = [0u8; 16];
    match mode {
        ADDR_INLINE => addr.copy_from_slice(r.take(16)?),
        ADDR_64 => {
            addr[..8].copy_from_slice(&LINK_LOCAL_PREFIX);
            addr[8..].copy_from_slice(r.take(8)?);
        }
        ADDR_16 => {
            addr[..8].copy_from_slice(&LINK_LOCAL_PREFIX);
            addr[8..14].copy_from_slice(&SHORT_IID_PREFIX);
            addr[14..].copy_from_slice(r.take(2)?);
        }
        _ => return Err(CodecError::UnsupportedMode("address derived from link-layer")),
    }
    Ok(addr)
}

fn compress_multicast(addr: &[u8; 16], out: &mut Vec<u8>) -> u8 {
    let zero = |range: std::ops::Range<usize>| addr[range].iter().all(|b| *b == 0);

    if addr[1] == 0x02 && zero(2..15) {
        out.push(addr[15]);
        ADDR_ELIDED
    } else if zero(2..13) {
        out.push(addr[1]);
        out.extend_from_slice(&addr[13..]);
        ADDR_16
    } else if zero(2..11) {
        out.push(addr[1]);
        out.extend_from_slice(&addr[11..]);
        ADDR_64
    } else {
        out.extend_from_slice(addr);
        ADDR_INLINE
    }
}

fn decompress_multicast(mode: u8, r: &mut Reader<'_>) -> Result<[u8; 16], CodecError> {
    let mut addr = [0u8; 16];
    addr[0] = 0xff;
    match mode {
        ADDR_INLINE => addr.copy_from_slice(r.take(16)?),
        ADDR_64 => {
            let f = r.take(6)?;
            addr[1] = f[0];
            addr[11..].copy_from_slice(&f[1..]);
        }
        ADDR_16 => {
            let f = r.take(4)?;
            addr[1] = f[0];
            addr[13..].copy_from_slice(&f[1..]);
        }
        _ => {
            addr[1] = 0x02;
            addr[15] = r.u8()?;
        }
    }
    Ok(addr)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let available = self.buf.len() - self.pos;
        if available < n {
            return Err(CodecError::Truncated {
                needed: n,
                available,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    /// Build a well-formed IPv6 packet for tests.
    pub(crate) fn build_packet(src: Ipv6Addr, dst: Ipv6Addr, hop_limit: u8, payload: &[u8]) -> Vec<u8> {
        let header = Ipv6Header {
            traffic_class: 0,
            flow_label: 0,
            payload_len: payload.len() as u16,
            next_header: 17,
            hop_limit,
            source: src.octets(),
            destination: dst.octets(),
        };
        let mut packet = header.encode().to_vec();
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn test_header_encode_decode() {
        let header = Ipv6Header {
            traffic_class: 0xb8,
            flow_label: 0xabcde,
            payload_len: 10,
            next_header: 58,
            hop_limit: 33,
            source: "fe80::1".parse::<Ipv6Addr>().unwrap().octets(),
            destination: "2001:db8::2".parse::<Ipv6Addr>().unwrap().octets(),
        };

        let encoded = header.encode();
        assert_eq!(encoded[0] >> 4, 6);
        let decoded = Ipv6Header::decode(&encoded).expect("Failed to decode header");
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_fifty_byte_packet_roundtrip() {
        let header = Ipv6Header {
            traffic_class: 0x2e,
            flow_label: 0x12345,
            payload_len: 10,
            next_header: 17,
            hop_limit: 64,
            source: "fe80::b826:1c8b:ccbb:32f0".parse::<Ipv6Addr>().unwrap().octets(),
            destination: "fe80::3ff8:d2ff:feeb:27b8".parse::<Ipv6Addr>().unwrap().octets(),
        };
        let mut packet = header.encode().to_vec();
        packet.extend_from_slice(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(packet.len(), 50);

        let compressed = compress(&packet).expect("compress failed");
        assert_eq!(compressed.consumed_header_len, 40);
        assert_eq!(compressed.payload_len, 10);
        assert!(compressed.bytes.len() < packet.len());

        let restored = compressed.decompress().expect("decompress failed");
        assert_eq!(restored, packet);
    }

    #[test]
    fn test_link_local_addresses_compress_to_iid() {
        let packet = build_packet(
            "fe80::291:a8ff:feeb:27b8".parse().unwrap(),
            "fe80::ff:fe00:1234".parse().unwrap(),
            64,
            &[],
        );
        let compressed = compress(&packet).unwrap();

        // 2 dispatch bytes, next header, 8-byte source IID, 2-byte destination
        assert_eq!(compressed.bytes.len(), 2 + 1 + 8 + 2);
        assert_eq!(compressed.bytes[1], (ADDR_64 << 4) | ADDR_16);
    }

    #[test]
    fn test_unspecified_source_and_all_nodes_multicast() {
        let packet = build_packet(Ipv6Addr::UNSPECIFIED, "ff02::1".parse().unwrap(), 255, b"ra");
        let compressed = compress(&packet).unwrap();

        assert_eq!(compressed.bytes.len(), 2 + 1 + 1 + 2);
        assert_eq!(compressed.decompress().unwrap(), packet);
    }

    #[test]
    fn test_multicast_forms_roundtrip() {
        for dst in ["ff05::1:3", "ff0e::12:3456", "ff15::ab:cdef:0102", "ff02::1:ff00:1"] {
            let packet = build_packet("2001:db8::1".parse().unwrap(), dst.parse().unwrap(), 7, b"x");
            let compressed = compress(&packet).unwrap();
            assert_eq!(compressed.decompress().unwrap(), packet, "dst {dst}");
        }
    }

    #[test]
    fn test_traffic_class_forms_roundtrip() {
        for (tc, fl) in [(0x00, 0x00000), (0x03, 0x00000), (0xfc, 0x00000), (0x01, 0xfffff), (0xb9, 0x00001)] {
            let mut packet = build_packet("fe80::1".parse().unwrap(), "fe80::2".parse().unwrap(), 64, b"tc");
            let mut header = Ipv6Header::decode(&packet).unwrap();
            header.traffic_class = tc;
            header.flow_label = fl;
            packet[..40].copy_from_slice(&header.encode());

            let compressed = compress(&packet).unwrap();
            assert_eq!(compressed.decompress().unwrap(), packet, "tc {tc:#x} fl {fl:#x}");
        }
    }

    #[test]
    fn test_compress_rejects_short_packet() {
        let result = compress(&[0x60; 39]);
        assert!(matches!(result, Err(CodecError::PacketTooShort { actual: 39 })));
    }

    #[test]
    fn test_compress_rejects_ipv4() {
        let mut packet = build_packet("fe80::1".parse().unwrap(), "fe80::2".parse().unwrap(), 64, &[]);
        packet[0] = 0x45;
        assert!(matches!(compress(&packet), Err(CodecError::UnsupportedVersion(4))));
    }

    #[test]
    fn test_compress_rejects_length_mismatch() {
        let mut packet = build_packet("fe80::1".parse().unwrap(), "fe80::2".parse().unwrap(), 64, b"abc");
        packet.push(0);
        assert!(matches!(
            compress(&packet),
            Err(CodecError::PayloadLengthMismatch { header: 3, actual: 4 })
        ));
    }

    #[test]
    fn test_compress_rejects_oversized_packet() {
        let packet = build_packet(
            "fe80::1".parse().unwrap(),
            "fe80::2".parse().unwrap(),
            64,
            &vec![0u8; MTU - IPV6_HEADER_LEN + 1],
        );
        assert!(matches!(compress(&packet), Err(CodecError::PacketTooLarge { .. })));
    }

    #[test]
    fn test_decompress_rejects_wrong_lengths() {
        let packet = build_packet("fe80::1".parse().unwrap(), "fe80::2".parse().unwrap(), 64, b"hello");
        let c = compress(&packet).unwrap();

        assert!(matches!(
            decompress(&c.bytes, 39, c.payload_len),
            Err(CodecError::HeaderLengthMismatch { actual: 39 })
        ));
        assert!(matches!(
            decompress(&c.bytes, 40, c.payload_len + 1),
            Err(CodecError::FrameLengthMismatch { expected: 6, actual: 5 })
        ));
        assert!(matches!(
            decompress(&c.bytes[..4], 40, 0),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_decompress_rejects_bad_dispatch() {
        assert!(matches!(
            decompress(&[0x41, 0x00, 0x11], 40, 0),
            Err(CodecError::InvalidDispatch(0x41))
        ));
    }

    #[test]
    fn test_decompress_rejects_link_layer_derived_address() {
        // SAM=11 needs the link-layer address, which the mesh frame does not carry
        let bytes = [IPHC_DISPATCH | (TF_ELIDED << 3) | 0b10, ADDR_ELIDED << 4, 17];
        assert!(matches!(
            decompress(&bytes, 40, 0),
            Err(CodecError::UnsupportedMode(_))
        ));
    }

    #[test]
    fn test_frame_encode_decode() {
        let packet = build_packet("fe80::1".parse().unwrap(), "fe80::2".parse().unwrap(), 3, b"frame");
        let compressed = compress(&packet).unwrap();

        let wire = compressed.encode();
        assert_eq!(wire.len(), FRAME_PREFIX_LEN + compressed.bytes.len());

        let decoded = CompressedPacket::decode(&wire).unwrap();
        assert_eq!(decoded, compressed);
        assert_eq!(decoded.decompress().unwrap(), packet);
    }

    #[test]
    fn test_frame_too_short() {
        assert!(matches!(
            CompressedPacket::decode(&[40, 0]),
            Err(CodecError::FrameTooShort(2))
        ));
    }

    #[test]
    fn test_destination_offsets() {
        let dst: Ipv6Addr = "fe80::3ff8:d2ff:feeb:27b8".parse().unwrap();
        let packet = build_packet("fe80::1".parse().unwrap(), dst, 64, &[]);

        assert_eq!(
            destination_from_packet(&packet, DESTINATION_OFFSET),
            Some(Address::new(dst))
        );

        // The legacy offset picks up the last source byte and drops the final
        // destination byte.
        let legacy = destination_from_packet(&packet, LEGACY_DESTINATION_OFFSET).unwrap();
        assert_eq!(legacy.octets()[0], packet[23]);
        assert_eq!(legacy.octets()[1..], dst.octets()[..15]);

        assert_eq!(destination_from_packet(&packet[..39], DESTINATION_OFFSET), None);
        assert_eq!(
            source_from_packet(&packet),
            Some("fe80::1".parse::<Address>().unwrap())
        );
    }
}
