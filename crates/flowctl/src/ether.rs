//! Ethernet frame classification
//!
//! Maps a raw frame to the traffic class it should queue under. IPv4 frames
//! classify by TOS precedence, upgraded to VIP for DHCP datagrams and split
//! into ack/data classes for TCP. Everything else rides the normal class.

use crate::error::{FlowControlError, Result};
use crate::queues::QueueId;
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;

/// Ethernet header length (two MACs plus the type field)
pub const ETHER_HEADER_LEN: usize = 14;
/// Minimum IPv4 header length
pub const IPV4_MIN_HEADER_LEN: usize = 20;
/// Smallest frame the classifier accepts
pub const MIN_CLASSIFY_LEN: usize = ETHER_HEADER_LEN + IPV4_MIN_HEADER_LEN;

const ETHER_TYPE_IPV4: u16 = 0x0800;
const IP_PROTO_TCP: u8 = 6;
const IP_PROTO_UDP: u8 = 17;
const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;
/// More-fragments flag plus the fragment offset field
const FRAGMENT_MASK: u16 = 0x3FFF;

/// The IPv4 header fields classification looks at
#[derive(Debug)]
struct Ipv4Header {
    header_len: usize,
    tos: u8,
    total_len: u16,
    flags_frag: u16,
    protocol: u8,
}

impl Ipv4Header {
    /// Parse from a buffer starting at the IP header
    ///
    /// `None` when the buffer is truncated or the header length field is
    /// below the minimum.
    fn parse(buf: &[u8]) -> Option<Self> {
        let mut cursor = Cursor::new(buf);
        let version_ihl = cursor.read_u8().ok()?;
        let tos = cursor.read_u8().ok()?;
        let total_len = cursor.read_u16::<BigEndian>().ok()?;
        let _identification = cursor.read_u16::<BigEndian>().ok()?;
        let flags_frag = cursor.read_u16::<BigEndian>().ok()?;
        let _ttl = cursor.read_u8().ok()?;
        let protocol = cursor.read_u8().ok()?;

        let header_len = ((version_ihl & 0x0F) as usize) * 4;
        if header_len < IPV4_MIN_HEADER_LEN {
            return None;
        }

        Some(Self {
            header_len,
            tos,
            total_len,
            flags_frag,
            protocol,
        })
    }

    fn is_fragmented(&self) -> bool {
        self.flags_frag & FRAGMENT_MASK != 0
    }
}

fn ether_type_of(frame: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(frame.get(12..ETHER_HEADER_LEN)?);
    cursor.read_u16::<BigEndian>().ok()
}

/// DHCP rides UDP on port 67/68 and is never fragmented
fn is_dhcp_datagram(ip: &Ipv4Header, ip_buf: &[u8]) -> bool {
    if ip.is_fragmented() {
        return false;
    }
    let Some(port_bytes) = ip_buf.get(ip.header_len..ip.header_len + 4) else {
        return false;
    };
    let mut cursor = Cursor::new(port_bytes);
    let Ok(src_port) = cursor.read_u16::<BigEndian>() else {
        return false;
    };
    let Ok(dst_port) = cursor.read_u16::<BigEndian>() else {
        return false;
    };
    matches!(src_port, DHCP_SERVER_PORT | DHCP_CLIENT_PORT)
        || matches!(dst_port, DHCP_SERVER_PORT | DHCP_CLIENT_PORT)
}

/// A content-less control segment: the headers are the whole packet
fn is_tcp_control_segment(ip: &Ipv4Header, ip_buf: &[u8]) -> bool {
    // TCP data offset sits in the high nibble of the 13th TCP byte.
    let Some(&offset_byte) = ip_buf.get(ip.header_len + 12) else {
        return false;
    };
    let tcp_header_len = ((offset_byte >> 4) as usize) * 4;
    ip.total_len as usize == ip.header_len + tcp_header_len
}

/// Classify a raw Ethernet frame into its traffic class
///
/// Non-IP frames go to [`QueueId::Normal`]. IPv4 frames map through the TOS
/// precedence table, except that DHCP datagrams land in [`QueueId::Vip`] and
/// TCP segments split into [`QueueId::TcpAck`] and [`QueueId::TcpData`] by
/// whether they carry payload. Frames too short to hold the Ethernet and IP
/// headers are refused; the caller drops them.
///
/// # Example
///
/// ```
/// use flowctl::{queue_id_for_frame, QueueId};
///
/// let mut frame = vec![0u8; 64];
/// frame[12] = 0x08;
/// frame[13] = 0x06; // ARP
/// assert_eq!(queue_id_for_frame(&frame).unwrap(), QueueId::Normal);
/// ```
pub fn queue_id_for_frame(frame: &[u8]) -> Result<QueueId> {
    let short = |need: usize| FlowControlError::FrameTooShort {
        len: frame.len(),
        need,
    };

    if frame.len() < MIN_CLASSIFY_LEN {
        return Err(short(MIN_CLASSIFY_LEN));
    }
    let ether_type = ether_type_of(frame).ok_or_else(|| short(ETHER_HEADER_LEN))?;
    if ether_type != ETHER_TYPE_IPV4 {
        return Ok(QueueId::Normal);
    }

    let ip_buf = &frame[ETHER_HEADER_LEN..];
    let ip = Ipv4Header::parse(ip_buf).ok_or_else(|| short(MIN_CLASSIFY_LEN))?;

    let mut queue_id = QueueId::from_tos(ip.tos);
    match ip.protocol {
        IP_PROTO_UDP if is_dhcp_datagram(&ip, ip_buf) => {
            queue_id = QueueId::Vip;
        }
        IP_PROTO_TCP => {
            queue_id = if is_tcp_control_segment(&ip, ip_buf) {
                QueueId::TcpAck
            } else {
                QueueId::TcpData
            };
        }
        _ => {}
    }
    Ok(queue_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{
        build_fragmented_udp_frame, build_ipv4_tcp_frame, build_ipv4_udp_frame,
    };

    #[test]
    fn test_parse_ipv4_header_fields() {
        let frame = build_ipv4_udp_frame(0xE0, 68, 67, 240);
        let header = Ipv4Header::parse(&frame[ETHER_HEADER_LEN..]).unwrap();

        assert_eq!(header.header_len, 20);
        assert_eq!(header.tos, 0xE0);
        assert_eq!(header.total_len, 20 + 8 + 240);
        assert_eq!(header.protocol, IP_PROTO_UDP);
        assert!(!header.is_fragmented());
    }

    #[test]
    fn test_parse_rejects_truncated_header() {
        let frame = build_ipv4_udp_frame(0, 68, 67, 0);
        assert!(Ipv4Header::parse(&frame[ETHER_HEADER_LEN..frame.len() - 20]).is_none());
    }

    #[test]
    fn test_parse_rejects_short_ihl() {
        let mut frame = build_ipv4_udp_frame(0, 68, 67, 0);
        frame[ETHER_HEADER_LEN] = 0x43; // IHL 3 words, below the minimum 5
        assert!(Ipv4Header::parse(&frame[ETHER_HEADER_LEN..]).is_none());
    }

    #[test]
    fn test_fragmented_flag_detection() {
        let frame = build_fragmented_udp_frame(0, 68, 67);
        let header = Ipv4Header::parse(&frame[ETHER_HEADER_LEN..]).unwrap();
        assert!(header.is_fragmented());
    }

    #[test]
    fn test_dhcp_ports_match_either_side() {
        for (src, dst) in [(67, 5000), (68, 5000), (5000, 67), (5000, 68)] {
            let frame = build_ipv4_udp_frame(0, src, dst, 8);
            let ip_buf = &frame[ETHER_HEADER_LEN..];
            let ip = Ipv4Header::parse(ip_buf).unwrap();
            assert!(is_dhcp_datagram(&ip, ip_buf), "ports {src}->{dst}");
        }

        let frame = build_ipv4_udp_frame(0, 5000, 6000, 8);
        let ip_buf = &frame[ETHER_HEADER_LEN..];
        let ip = Ipv4Header::parse(ip_buf).unwrap();
        assert!(!is_dhcp_datagram(&ip, ip_buf));
    }

    #[test]
    fn test_tcp_control_segment_check() {
        let ack = build_ipv4_tcp_frame(0, 0);
        let ip_buf = &ack[ETHER_HEADER_LEN..];
        let ip = Ipv4Header::parse(ip_buf).unwrap();
        assert!(is_tcp_control_segment(&ip, ip_buf));

        let data = build_ipv4_tcp_frame(0, 1);
        let ip_buf = &data[ETHER_HEADER_LEN..];
        let ip = Ipv4Header::parse(ip_buf).unwrap();
        assert!(!is_tcp_control_segment(&ip, ip_buf));
    }

    #[test]
    fn test_minimum_length_boundary() {
        // 34 zero bytes: long enough to classify, unknown type, normal class.
        let at_minimum = [0u8; MIN_CLASSIFY_LEN];
        assert_eq!(queue_id_for_frame(&at_minimum).unwrap(), QueueId::Normal);

        let below_minimum = [0u8; MIN_CLASSIFY_LEN - 1];
        match queue_id_for_frame(&below_minimum) {
            Err(FlowControlError::FrameTooShort { len, need }) => {
                assert_eq!(len, MIN_CLASSIFY_LEN - 1);
                assert_eq!(need, MIN_CLASSIFY_LEN);
            }
            other => panic!("expected FrameTooShort, got {other:?}"),
        }
    }
}
