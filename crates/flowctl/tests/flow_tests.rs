//! Integration tests for frame classification, bounded class queues, and
//! the drain scheduler

use common::test_utils::{
    build_arp_frame, build_fragmented_udp_frame, build_ipv4_tcp_frame, build_ipv4_udp_frame,
    build_runt_frame,
};
use flowctl::{
    AP_TX_DRAIN_ORDER, Direction, FlowControlError, FlowControlModule, FlowControlOps, NetBuf,
    NetBufQueue, QUEUE_ID_COUNT, QueueId, RX_DRAIN_ORDER, STA_TX_DRAIN_ORDER, queue_id_for_frame,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Test helpers
// ============================================================================

/// Vendor ops that fully drain each hand-off and record what they saw
struct RecordingOps {
    sta_mode: AtomicBool,
    tx_calls: Mutex<Vec<(u32, Vec<u8>)>>,
    rx_calls: Mutex<Vec<(u32, Vec<u8>)>>,
}

impl RecordingOps {
    fn new(sta_mode: bool) -> Arc<Self> {
        Arc::new(Self {
            sta_mode: AtomicBool::new(sta_mode),
            tx_calls: Mutex::new(Vec::new()),
            rx_calls: Mutex::new(Vec::new()),
        })
    }

    fn tx_count(&self) -> usize {
        self.tx_calls.lock().unwrap().len()
    }

    fn rx_count(&self) -> usize {
        self.rx_calls.lock().unwrap().len()
    }

    /// Priority ids in the order the TX passes handed classes over
    fn tx_priority_sequence(&self) -> Vec<u32> {
        self.tx_calls.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    fn rx_priority_sequence(&self) -> Vec<u32> {
        self.rx_calls.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }
}

impl FlowControlOps for RecordingOps {
    fn is_device_sta_or_p2p_client(&self) -> bool {
        self.sta_mode.load(Ordering::Relaxed)
    }

    fn tx_data_packet(&self, queue: &mut NetBufQueue, priority_id: u32) {
        let mut tags = Vec::new();
        while let Some(nb) = queue.dequeue() {
            tags.push(nb.data()[0]);
        }
        self.tx_calls.lock().unwrap().push((priority_id, tags));
    }

    fn rx_data_packet(&self, queue: &mut NetBufQueue, priority_id: u32) {
        let mut tags = Vec::new();
        while let Some(nb) = queue.dequeue() {
            tags.push(nb.data()[0]);
        }
        self.rx_calls.lock().unwrap().push((priority_id, tags));
    }

    fn tx_priority_id(&self, id: QueueId) -> u32 {
        id.index() as u32
    }

    // Offset so tests can tell the two paths apart.
    fn rx_priority_id(&self, id: QueueId) -> u32 {
        100 + id.index() as u32
    }
}

fn tagged(tag: u8) -> NetBuf {
    NetBuf::from_slice(&[tag])
}

fn wait_for<F: FnMut() -> bool>(mut cond: F) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached within 2s");
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn test_dhcp_override_beats_tos_mapping() {
    // TOS 0 would map to best effort, but a DHCP frame must ride VIP.
    let frame = build_ipv4_udp_frame(0x00, 67, 68, 300);
    let id = queue_id_for_frame(&frame).unwrap();

    assert_eq!(id, QueueId::Vip);
    assert_ne!(id, QueueId::Be);
}

#[test]
fn test_tos_precedence_maps_plain_udp() {
    let cases = [
        (0x00, QueueId::Be),
        (0x20, QueueId::Bk),
        (0x40, QueueId::Bk),
        (0x60, QueueId::Be),
        (0x80, QueueId::Vi),
        (0xA0, QueueId::Vi),
        (0xC0, QueueId::Vo),
        (0xE0, QueueId::Vo),
    ];
    for (tos, expected) in cases {
        let frame = build_ipv4_udp_frame(tos, 5000, 6000, 64);
        assert_eq!(
            queue_id_for_frame(&frame).unwrap(),
            expected,
            "tos {tos:#04x}"
        );
    }
}

#[test]
fn test_fragmented_dhcp_falls_back_to_tos_class() {
    let frame = build_fragmented_udp_frame(0x00, 68, 67);
    assert_eq!(queue_id_for_frame(&frame).unwrap(), QueueId::Be);
}

#[test]
fn test_tcp_splits_on_payload_not_tos() {
    let pure_ack = build_ipv4_tcp_frame(0x00, 0);
    assert_eq!(queue_id_for_frame(&pure_ack).unwrap(), QueueId::TcpAck);

    let data = build_ipv4_tcp_frame(0x00, 512);
    assert_eq!(queue_id_for_frame(&data).unwrap(), QueueId::TcpData);

    // Voice-precedence TOS still classifies TCP by content.
    let voice_tos_data = build_ipv4_tcp_frame(0xE0, 512);
    assert_eq!(queue_id_for_frame(&voice_tos_data).unwrap(), QueueId::TcpData);
}

#[test]
fn test_arp_rides_the_normal_class() {
    assert_eq!(
        queue_id_for_frame(&build_arp_frame()).unwrap(),
        QueueId::Normal
    );
}

#[test]
fn test_runt_frame_is_refused() {
    let err = queue_id_for_frame(&build_runt_frame(20)).unwrap_err();
    assert!(matches!(
        err,
        FlowControlError::FrameTooShort { len: 20, need: 34 }
    ));
}

// ============================================================================
// Bounded class queues
// ============================================================================

#[test]
fn test_threshold_two_drops_first_of_three() {
    let ops = RecordingOps::new(true);
    let mut module = FlowControlModule::new(ops, [2; QUEUE_ID_COUNT]);

    for tag in [1, 2, 3] {
        module.enqueue(Direction::Tx, QueueId::Normal, tagged(tag));
    }

    let queue = module.queue(Direction::Tx, QueueId::Normal);
    assert_eq!(queue.len(), 2);

    let mut retained = Vec::new();
    while let Some(nb) = queue.dequeue() {
        retained.push(nb.data()[0]);
    }
    assert_eq!(retained, vec![2, 3], "the first buffer must be gone");

    module.shutdown().unwrap();
}

#[test]
fn test_classified_enqueue_lands_in_matching_queue() {
    let ops = RecordingOps::new(true);
    let mut module = FlowControlModule::new(ops, [8; QUEUE_ID_COUNT]);

    let dhcp = build_ipv4_udp_frame(0x00, 67, 68, 300);
    let id = module
        .enqueue_frame(Direction::Tx, NetBuf::from_slice(&dhcp))
        .unwrap();

    assert_eq!(id, QueueId::Vip);
    assert_eq!(module.queue(Direction::Tx, QueueId::Vip).len(), 1);

    // Refused frames land nowhere.
    let result = module.enqueue_frame(Direction::Tx, NetBuf::from_slice(&build_runt_frame(10)));
    assert!(result.is_err());
    for id in QueueId::ALL {
        let expected = if id == QueueId::Vip { 1 } else { 0 };
        assert_eq!(module.queue(Direction::Tx, id).len(), expected);
    }

    module.shutdown().unwrap();
}

// ============================================================================
// Drain scheduler
// ============================================================================

#[test]
fn test_station_tx_pass_follows_sta_order() {
    let ops = RecordingOps::new(true);
    let mut module = FlowControlModule::new(ops.clone(), [0; QUEUE_ID_COUNT]);

    for id in QueueId::ALL {
        module.enqueue(Direction::Tx, id, tagged(id.index() as u8));
    }
    module.schedule(Direction::Tx);
    wait_for(|| ops.tx_count() == QUEUE_ID_COUNT);

    let expected: Vec<u32> = STA_TX_DRAIN_ORDER
        .iter()
        .map(|id| id.index() as u32)
        .collect();
    assert_eq!(ops.tx_priority_sequence(), expected);

    // Each hand-off carried exactly the one tagged buffer of its class.
    for (priority_id, tags) in ops.tx_calls.lock().unwrap().iter() {
        assert_eq!(tags.as_slice(), &[*priority_id as u8]);
    }

    module.shutdown().unwrap();
}

#[test]
fn test_ap_tx_pass_moves_tcp_ahead_of_media() {
    let ops = RecordingOps::new(false);
    let mut module = FlowControlModule::new(ops.clone(), [0; QUEUE_ID_COUNT]);

    for id in [QueueId::Vo, QueueId::Vi, QueueId::TcpAck, QueueId::TcpData] {
        module.enqueue(Direction::Tx, id, tagged(id.index() as u8));
    }
    module.schedule(Direction::Tx);
    wait_for(|| ops.tx_count() == 4);

    let expected: Vec<u32> = AP_TX_DRAIN_ORDER
        .iter()
        .filter(|id| {
            matches!(
                id,
                QueueId::Vo | QueueId::Vi | QueueId::TcpAck | QueueId::TcpData
            )
        })
        .map(|id| id.index() as u32)
        .collect();
    assert_eq!(ops.tx_priority_sequence(), expected);
    assert_eq!(
        expected[0],
        QueueId::TcpAck.index() as u32,
        "AP role drains TCP ack first"
    );

    module.shutdown().unwrap();
}

#[test]
fn test_rx_pass_uses_station_order_for_every_role() {
    let ops = RecordingOps::new(false);
    let mut module = FlowControlModule::new(ops.clone(), [0; QUEUE_ID_COUNT]);

    for id in QueueId::ALL {
        module.enqueue(Direction::Rx, id, tagged(id.index() as u8));
    }
    module.schedule(Direction::Rx);
    wait_for(|| ops.rx_count() == QUEUE_ID_COUNT);

    let expected: Vec<u32> = RX_DRAIN_ORDER
        .iter()
        .map(|id| 100 + id.index() as u32)
        .collect();
    assert_eq!(ops.rx_priority_sequence(), expected);

    module.shutdown().unwrap();
}

#[test]
fn test_tx_pass_leaves_rx_queues_alone() {
    let ops = RecordingOps::new(true);
    let mut module = FlowControlModule::new(ops.clone(), [0; QUEUE_ID_COUNT]);

    module.enqueue(Direction::Tx, QueueId::Be, tagged(1));
    module.enqueue(Direction::Rx, QueueId::Be, tagged(2));
    module.schedule(Direction::Tx);
    wait_for(|| ops.tx_count() == 1);

    assert_eq!(ops.rx_count(), 0);
    assert_eq!(module.queue(Direction::Rx, QueueId::Be).len(), 1);

    module.shutdown().unwrap();
}

#[test]
fn test_vendor_leftovers_return_for_next_pass() {
    /// Drains exactly one buffer per hand-off
    struct SingleShotOps {
        taken: Mutex<Vec<u8>>,
    }

    impl FlowControlOps for SingleShotOps {
        fn is_device_sta_or_p2p_client(&self) -> bool {
            true
        }
        fn tx_data_packet(&self, queue: &mut NetBufQueue, _priority_id: u32) {
            if let Some(nb) = queue.dequeue() {
                self.taken.lock().unwrap().push(nb.data()[0]);
            }
        }
        fn rx_data_packet(&self, _queue: &mut NetBufQueue, _priority_id: u32) {}
        fn tx_priority_id(&self, id: QueueId) -> u32 {
            id.index() as u32
        }
        fn rx_priority_id(&self, id: QueueId) -> u32 {
            id.index() as u32
        }
    }

    let ops = Arc::new(SingleShotOps {
        taken: Mutex::new(Vec::new()),
    });
    let mut module = FlowControlModule::new(ops.clone(), [8; QUEUE_ID_COUNT]);

    module.enqueue(Direction::Tx, QueueId::Vo, tagged(1));
    module.enqueue(Direction::Tx, QueueId::Vo, tagged(2));

    module.schedule(Direction::Tx);
    // The leftover returns to its queue only after the hand-off finishes.
    wait_for(|| {
        ops.taken.lock().unwrap().len() == 1 && module.queue(Direction::Tx, QueueId::Vo).len() == 1
    });

    module.schedule(Direction::Tx);
    wait_for(|| ops.taken.lock().unwrap().len() == 2);
    assert_eq!(*ops.taken.lock().unwrap(), vec![1, 2]);
    assert!(module.queue(Direction::Tx, QueueId::Vo).is_empty());

    module.shutdown().unwrap();
}

#[test]
fn test_schedule_after_shutdown_is_inert() {
    let ops = RecordingOps::new(true);
    let mut module = FlowControlModule::new(ops.clone(), [8; QUEUE_ID_COUNT]);

    module.shutdown().unwrap();

    module.enqueue(Direction::Tx, QueueId::Be, tagged(1));
    module.schedule(Direction::Tx);
    std::thread::sleep(Duration::from_millis(50));

    // No thread is left to drain; the buffer just sits in its queue.
    assert_eq!(ops.tx_count(), 0);
    assert_eq!(module.queue(Direction::Tx, QueueId::Be).len(), 1);
}
