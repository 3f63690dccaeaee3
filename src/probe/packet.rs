// ICMP Echo framing, RFC 792 (v4) and RFC 4443 (v6):
//
//  0        8        16                32
//  +--------+--------+-----------------+
//  |  type  |  code  |    checksum     |
//  +--------+--------+-----------------+
//  |   identifier    |    sequence     |
//  +-----------------+-----------------+
//  | send timestamp (8) | token (16) | zero padding ...
use std::net::IpAddr;

use crate::error::ProtocolError;

pub const ICMP_HEADER_LEN: usize = 8;
pub const TIMESTAMP_LEN: usize = 8;
pub const TOKEN_LEN: usize = 16;
pub const MIN_PAYLOAD_LEN: usize = TIMESTAMP_LEN + TOKEN_LEN;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }

    pub const fn echo_request(self) -> u8 {
        match self {
            Family::V4 => 8,
            Family::V6 => 128,
        }
    }

    pub const fn echo_reply(self) -> u8 {
        match self {
            Family::V4 => 0,
            Family::V6 => 129,
        }
    }
}

/// Outgoing echo request. `size` is the requested payload length; it never
/// shrinks below the timestamp and token.
#[derive(Debug)]
pub struct EchoRequest<'a> {
    pub id: u16,
    pub seq: u16,
    pub sent_nanos: u64,
    pub token: &'a [u8; TOKEN_LEN],
    pub size: usize,
}

impl EchoRequest<'_> {
    pub fn encode(&self, family: Family) -> Vec<u8> {
        let payload_len = self.size.max(MIN_PAYLOAD_LEN);
        let mut buf = vec![0u8; ICMP_HEADER_LEN + payload_len];

        buf[0] = family.echo_request();
        buf[1] = 0;
        buf[4..6].copy_from_slice(&self.id.to_be_bytes());
        buf[6..8].copy_from_slice(&self.seq.to_be_bytes());

        let payload = &mut buf[ICMP_HEADER_LEN..];
        payload[..TIMESTAMP_LEN].copy_from_slice(&self.sent_nanos.to_be_bytes());
        payload[TIMESTAMP_LEN..MIN_PAYLOAD_LEN].copy_from_slice(self.token);

        // ICMPv6 checksums cover a pseudo-header only the kernel knows
        if family == Family::V4 {
            let sum = checksum(&buf);
            buf[2..4].copy_from_slice(&sum.to_be_bytes());
        }

        buf
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EchoReply {
    pub id: u16,
    pub seq: u16,
    pub sent_nanos: u64,
    pub token: [u8; TOKEN_LEN],
    /// Length of the whole ICMP message
    pub len: usize,
}

/// Parse an ICMP message (no IP header) as an echo reply for `family`.
pub fn decode_reply(buf: &[u8], family: Family) -> Result<EchoReply, ProtocolError> {
    if buf.len() < ICMP_HEADER_LEN {
        return Err(ProtocolError::Truncated { len: buf.len() });
    }

    let (icmp_type, code) = (buf[0], buf[1]);
    if icmp_type != family.echo_reply() || code != 0 {
        return Err(ProtocolError::UnexpectedType { icmp_type, code });
    }

    if family == Family::V4 {
        // Summing a message that carries a valid checksum yields zero
        if checksum(buf) != 0 {
            let carried = u16::from_be_bytes([buf[2], buf[3]]);
            let mut zeroed = buf.to_vec();
            zeroed[2] = 0;
            zeroed[3] = 0;
            return Err(ProtocolError::Checksum {
                carried,
                computed: checksum(&zeroed),
            });
        }
    }

    let payload = &buf[ICMP_HEADER_LEN..];
    if payload.len() < MIN_PAYLOAD_LEN {
        return Err(ProtocolError::ShortPayload {
            len: payload.len(),
        });
    }

    let mut stamp = [0u8; TIMESTAMP_LEN];
    stamp.copy_from_slice(&payload[..TIMESTAMP_LEN]);
    let mut token = [0u8; TOKEN_LEN];
    token.copy_from_slice(&payload[TIMESTAMP_LEN..MIN_PAYLOAD_LEN]);

    Ok(EchoReply {
        id: u16::from_be_bytes([buf[4], buf[5]]),
        seq: u16::from_be_bytes([buf[6], buf[7]]),
        sent_nanos: u64::from_be_bytes(stamp),
        token,
        len: buf.len(),
    })
}

/// RFC 1071 internet checksum. An odd trailing byte is padded with zero.
pub fn checksum(buf: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = buf.chunks_exact(2);
    for word in &mut chunks {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: [u8; TOKEN_LEN] = [0xAB; TOKEN_LEN];

    fn request(size: usize) -> EchoRequest<'static> {
        EchoRequest {
            id: 0x1234,
            seq: 7,
            sent_nanos: 1_000_000_123,
            token: &TOKEN,
            size,
        }
    }

    // Turn an encoded request into the reply a peer would send back
    fn reflect(mut buf: Vec<u8>, family: Family) -> Vec<u8> {
        buf[0] = family.echo_reply();
        buf[2] = 0;
        buf[3] = 0;
        if family == Family::V4 {
            let sum = checksum(&buf);
            buf[2..4].copy_from_slice(&sum.to_be_bytes());
        }
        buf
    }

    #[test]
    fn test_checksum_rfc1071_example() {
        // Worked example from RFC 1071 section 3
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum(&data), !0xddf2);
    }

    #[test]
    fn test_checksum_odd_length() {
        assert_eq!(checksum(&[0xff]), !0xff00);
    }

    #[test]
    fn test_encode_v4_layout() {
        let buf = request(56).encode(Family::V4);
        assert_eq!(buf.len(), ICMP_HEADER_LEN + 56);
        assert_eq!(buf[0], 8);
        assert_eq!(buf[1], 0);
        assert_eq!(&buf[4..6], &[0x12, 0x34]);
        assert_eq!(&buf[6..8], &[0x00, 0x07]);
        assert_eq!(&buf[8..16], &1_000_000_123u64.to_be_bytes());
        assert_eq!(&buf[16..32], &TOKEN);
        assert!(buf[32..].iter().all(|b| *b == 0));
        assert_eq!(checksum(&buf), 0);
    }

    #[test]
    fn test_encode_v6_leaves_checksum_to_kernel() {
        let buf = request(0).encode(Family::V6);
        assert_eq!(buf[0], 128);
        assert_eq!(&buf[2..4], &[0, 0]);
        // Payload never drops below timestamp + token
        assert_eq!(buf.len(), ICMP_HEADER_LEN + MIN_PAYLOAD_LEN);
    }

    #[test]
    fn test_decode_reply_v4() {
        let reply = reflect(request(32).encode(Family::V4), Family::V4);
        let parsed = decode_reply(&reply, Family::V4).unwrap();
        assert_eq!(parsed.id, 0x1234);
        assert_eq!(parsed.seq, 7);
        assert_eq!(parsed.sent_nanos, 1_000_000_123);
        assert_eq!(parsed.token, TOKEN);
        assert_eq!(parsed.len, ICMP_HEADER_LEN + 32);
    }

    #[test]
    fn test_decode_reply_v6_ignores_checksum() {
        let mut reply = reflect(request(24).encode(Family::V6), Family::V6);
        reply[2] = 0xde;
        reply[3] = 0xad;
        let parsed = decode_reply(&reply, Family::V6).unwrap();
        assert_eq!(parsed.seq, 7);
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let mut reply = reflect(request(24).encode(Family::V4), Family::V4);
        reply[20] ^= 0xff;
        assert!(matches!(
            decode_reply(&reply, Family::V4),
            Err(ProtocolError::Checksum { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_requests_and_wrong_family() {
        let req = request(24).encode(Family::V4);
        assert_eq!(
            decode_reply(&req, Family::V4),
            Err(ProtocolError::UnexpectedType {
                icmp_type: 8,
                code: 0
            })
        );

        let reply = reflect(request(24).encode(Family::V4), Family::V4);
        assert!(matches!(
            decode_reply(&reply, Family::V6),
            Err(ProtocolError::UnexpectedType { icmp_type: 0, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_short_frames() {
        assert_eq!(
            decode_reply(&[0, 0, 0], Family::V4),
            Err(ProtocolError::Truncated { len: 3 })
        );

        let mut header = vec![129, 0, 0, 0, 0, 1, 0, 1];
        header.extend_from_slice(&[0; 10]);
        assert_eq!(
            decode_reply(&header, Family::V6),
            Err(ProtocolError::ShortPayload { len: 10 })
        );
    }
}
