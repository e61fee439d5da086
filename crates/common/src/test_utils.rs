//! Test utilities shared across crates
//!
//! Provides mock descriptor snapshots, hand-built Ethernet frames for
//! classifier tests, and helper functions for async tests.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_snapshot;
//!
//! # fn main() {
//! let snapshot = create_mock_snapshot(1, 5, 0x1234, 0x5678);
//! assert_eq!(snapshot.fields.vendor_id, 0x1234);
//! # }
//! ```

use protocol::{DeviceFields, DeviceKey, DeviceSnapshot, InterfaceChangeRequest, InterfaceDesc};
use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock DeviceSnapshot for testing
///
/// The device carries one mass-storage style interface numbered 0.
///
/// # Example
/// ```
/// use common::test_utils::create_mock_snapshot;
///
/// let snapshot = create_mock_snapshot(1, 5, 0x1234, 0x5678);
/// assert_eq!(snapshot.bus_num, 1);
/// assert_eq!(snapshot.interfaces.len(), 1);
/// ```
pub fn create_mock_snapshot(
    bus_num: u8,
    dev_num: u8,
    vendor_id: u16,
    product_id: u16,
) -> DeviceSnapshot {
    DeviceSnapshot {
        key: DeviceKey::from_bus_dev(bus_num, dev_num),
        dev_num,
        bus_num,
        fields: DeviceFields {
            vendor_id,
            product_id,
            bcd_device_low: 0x0100,
            bcd_device_high: 0x0100,
            class: 0x00,
            sub_class: 0x00,
            protocol: 0x00,
        },
        interfaces: vec![InterfaceDesc {
            class: 0x08,
            sub_class: 0x06,
            protocol: 0x50,
            number: 0,
        }],
    }
}

/// Create a mock interface descriptor
pub fn create_mock_interface(class: u8, sub_class: u8, protocol: u8, number: u8) -> InterfaceDesc {
    InterfaceDesc {
        class,
        sub_class,
        protocol,
        number,
    }
}

/// Create a composite device snapshot with the given interface triples
///
/// Interface numbers are assigned in order starting at 0.
pub fn create_composite_snapshot(
    bus_num: u8,
    dev_num: u8,
    interfaces: &[(u8, u8, u8)],
) -> DeviceSnapshot {
    let mut snapshot = create_mock_snapshot(bus_num, dev_num, 0x2717, 0x4106);
    snapshot.interfaces = interfaces
        .iter()
        .enumerate()
        .map(|(number, &(class, sub_class, protocol))| InterfaceDesc {
            class,
            sub_class,
            protocol,
            number: number as u8,
        })
        .collect();
    snapshot
}

/// Create a snapshot whose device class is the vendor-specific sentinel
pub fn create_vendor_class_snapshot(
    bus_num: u8,
    dev_num: u8,
    vendor_id: u16,
    product_id: u16,
) -> DeviceSnapshot {
    let mut snapshot = create_mock_snapshot(bus_num, dev_num, vendor_id, product_id);
    snapshot.fields.class = 0xFF;
    snapshot.interfaces = vec![InterfaceDesc {
        class: 0xFF,
        sub_class: 0x42,
        protocol: 0x01,
        number: 0,
    }];
    snapshot
}

/// Create an interface change request naming one interface of a device
pub fn create_change_request(
    bus_num: u8,
    dev_num: u8,
    interface: InterfaceDesc,
) -> InterfaceChangeRequest {
    InterfaceChangeRequest {
        dev_num,
        bus_num,
        interface,
    }
}

// ============================================================================
// Crafted Ethernet frames for classifier tests
// ============================================================================

fn ether_header(ether_type: u16) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x01]); // dst
    frame.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x02]); // src
    frame.extend_from_slice(&ether_type.to_be_bytes());
    frame
}

fn ipv4_header(tos: u8, total_len: u16, flags_frag: u16, proto: u8) -> Vec<u8> {
    let mut header = Vec::with_capacity(20);
    header.push(0x45); // version 4, header length 5 words
    header.push(tos);
    header.extend_from_slice(&total_len.to_be_bytes());
    header.extend_from_slice(&0u16.to_be_bytes()); // identification
    header.extend_from_slice(&flags_frag.to_be_bytes());
    header.push(64); // ttl
    header.push(proto);
    header.extend_from_slice(&0u16.to_be_bytes()); // checksum, unused here
    header.extend_from_slice(&[192, 168, 1, 2]); // src
    header.extend_from_slice(&[192, 168, 1, 1]); // dst
    header
}

/// Build an unfragmented IPv4/UDP frame
///
/// # Arguments
/// * `tos` - IP TOS byte (precedence in the top three bits)
/// * `src_port` / `dst_port` - UDP ports (67/68 makes a DHCP frame)
/// * `payload_len` - UDP payload length in bytes
pub fn build_ipv4_udp_frame(tos: u8, src_port: u16, dst_port: u16, payload_len: u16) -> Vec<u8> {
    let udp_len = 8 + payload_len;
    let total_len = 20 + udp_len;

    let mut frame = ether_header(0x0800);
    frame.extend_from_slice(&ipv4_header(tos, total_len, 0, 17));
    frame.extend_from_slice(&src_port.to_be_bytes());
    frame.extend_from_slice(&dst_port.to_be_bytes());
    frame.extend_from_slice(&udp_len.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes()); // checksum
    frame.extend(std::iter::repeat_n(0xAA, payload_len as usize));
    frame
}

/// Build a fragmented IPv4/UDP frame (non-zero fragment offset)
pub fn build_fragmented_udp_frame(tos: u8, src_port: u16, dst_port: u16) -> Vec<u8> {
    let udp_len = 8u16;
    let total_len = 20 + udp_len;

    let mut frame = ether_header(0x0800);
    frame.extend_from_slice(&ipv4_header(tos, total_len, 0x0010, 17)); // offset 16
    frame.extend_from_slice(&src_port.to_be_bytes());
    frame.extend_from_slice(&dst_port.to_be_bytes());
    frame.extend_from_slice(&udp_len.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame
}

/// Build an IPv4/TCP frame
///
/// `payload_len` of zero makes a content-less control segment (a pure ACK):
/// the IP total length equals the IP header plus the TCP header.
pub fn build_ipv4_tcp_frame(tos: u8, payload_len: u16) -> Vec<u8> {
    let total_len = 20 + 20 + payload_len;

    let mut frame = ether_header(0x0800);
    frame.extend_from_slice(&ipv4_header(tos, total_len, 0, 6));
    frame.extend_from_slice(&5000u16.to_be_bytes()); // src port
    frame.extend_from_slice(&80u16.to_be_bytes()); // dst port
    frame.extend_from_slice(&0u32.to_be_bytes()); // seq
    frame.extend_from_slice(&0u32.to_be_bytes()); // ack
    frame.push(0x50); // data offset 5 words
    frame.push(0x10); // ACK flag
    frame.extend_from_slice(&1024u16.to_be_bytes()); // window
    frame.extend_from_slice(&0u16.to_be_bytes()); // checksum
    frame.extend_from_slice(&0u16.to_be_bytes()); // urgent
    frame.extend(std::iter::repeat_n(0x55, payload_len as usize));
    frame
}

/// Build an ARP frame (non-IP ether type)
pub fn build_arp_frame() -> Vec<u8> {
    let mut frame = ether_header(0x0806);
    frame.extend_from_slice(&[0u8; 28]); // ARP body, contents irrelevant
    frame
}

/// Build a frame shorter than any valid Ethernet+IP header
pub fn build_runt_frame(len: usize) -> Vec<u8> {
    vec![0u8; len]
}

// ============================================================================
// Async helpers
// ============================================================================

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mock_snapshot() {
        let snapshot = create_mock_snapshot(2, 7, 0x1234, 0x5678);

        assert_eq!(snapshot.key, DeviceKey::from_bus_dev(2, 7));
        assert_eq!(snapshot.fields.vendor_id, 0x1234);
        assert_eq!(snapshot.fields.product_id, 0x5678);
        assert_eq!(snapshot.interfaces.len(), 1);
    }

    #[test]
    fn test_composite_snapshot_numbers_interfaces() {
        let snapshot =
            create_composite_snapshot(1, 2, &[(0x0A, 0, 0), (0x02, 0x06, 0), (0x03, 0, 0)]);

        assert_eq!(snapshot.interfaces.len(), 3);
        for (idx, interface) in snapshot.interfaces.iter().enumerate() {
            assert_eq!(interface.number as usize, idx);
        }
        assert_eq!(snapshot.interfaces[1].class, 0x02);
    }

    #[test]
    fn test_vendor_class_snapshot_sets_sentinel() {
        let snapshot = create_vendor_class_snapshot(1, 3, 0x0e8d, 0x7961);
        assert_eq!(snapshot.fields.class, 0xFF);
    }

    #[test]
    fn test_udp_frame_layout() {
        let frame = build_ipv4_udp_frame(0xE0, 68, 67, 240);

        // Ether type
        assert_eq!(&frame[12..14], &[0x08, 0x00]);
        // TOS byte
        assert_eq!(frame[15], 0xE0);
        // Protocol is UDP
        assert_eq!(frame[23], 17);
        // Dst port at ether(14) + ip(20) + 2
        assert_eq!(u16::from_be_bytes([frame[36], frame[37]]), 67);
        // Frame length matches the IP total length
        let total_len = u16::from_be_bytes([frame[16], frame[17]]) as usize;
        assert_eq!(frame.len(), 14 + total_len);
    }

    #[test]
    fn test_pure_ack_tcp_frame_has_no_content() {
        let frame = build_ipv4_tcp_frame(0, 0);
        let total_len = u16::from_be_bytes([frame[16], frame[17]]);
        assert_eq!(total_len, 40); // 20 IP + 20 TCP, nothing else
        assert_eq!(frame.len(), 14 + 40);
    }

    #[test]
    fn test_fragmented_frame_offset_nonzero() {
        let frame = build_fragmented_udp_frame(0, 68, 67);
        let flags_frag = u16::from_be_bytes([frame[20], frame[21]]);
        assert_ne!(flags_frag & 0x1FFF, 0);
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(result.is_err());
    }
}
