//! Traffic classes and the bounded per-class queues
//!
//! Nine traffic classes per direction, each backed by a [`FlowControlQueue`]
//! that bounds its depth with a drop-oldest policy. The drain-order tables
//! decide which class the scheduler empties first.

use crate::netbuf::{NetBuf, NetBufQueue};
use std::fmt;
use std::sync::Mutex;
use tracing::debug;

/// Number of traffic classes
pub const QUEUE_ID_COUNT: usize = 9;
/// Number of flow directions
pub const DIRECTION_COUNT: usize = 2;

/// Traffic class of a queued frame
///
/// The numeric order is the wire/storage order; drain priority comes from
/// the per-direction tables, not from these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum QueueId {
    /// Control frames
    Ctrl = 0,
    /// Must-not-drop management traffic such as DHCP
    Vip,
    /// Non-IP traffic
    Normal,
    /// TCP segments carrying payload
    TcpData,
    /// Content-less TCP control segments
    TcpAck,
    /// Background
    Bk,
    /// Best effort
    Be,
    /// Video
    Vi,
    /// Voice
    Vo,
}

impl QueueId {
    /// Every class, in numeric order
    pub const ALL: [QueueId; QUEUE_ID_COUNT] = [
        QueueId::Ctrl,
        QueueId::Vip,
        QueueId::Normal,
        QueueId::TcpData,
        QueueId::TcpAck,
        QueueId::Bk,
        QueueId::Be,
        QueueId::Vi,
        QueueId::Vo,
    ];

    /// Map an IP TOS byte to a class by its precedence bits
    ///
    /// Precedence values past the end of the table default to voice.
    pub fn from_tos(tos: u8) -> QueueId {
        const TOS_TABLE: [QueueId; 6] = [
            QueueId::Be,
            QueueId::Bk,
            QueueId::Bk,
            QueueId::Be,
            QueueId::Vi,
            QueueId::Vi,
        ];
        let precedence = (tos >> 5) as usize;
        TOS_TABLE.get(precedence).copied().unwrap_or(QueueId::Vo)
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Frame direction through the flow-control module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Direction {
    Tx = 0,
    Rx = 1,
}

impl Direction {
    pub const ALL: [Direction; DIRECTION_COUNT] = [Direction::Tx, Direction::Rx];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Tx => write!(f, "TX"),
            Direction::Rx => write!(f, "RX"),
        }
    }
}

/// TX drain order when the device runs as a station or P2P client
pub const STA_TX_DRAIN_ORDER: [QueueId; QUEUE_ID_COUNT] = [
    QueueId::Ctrl,
    QueueId::Vip,
    QueueId::Vo,
    QueueId::Vi,
    QueueId::TcpAck,
    QueueId::TcpData,
    QueueId::Be,
    QueueId::Bk,
    QueueId::Normal,
];

/// TX drain order for every other role; TCP moves ahead of the media classes
pub const AP_TX_DRAIN_ORDER: [QueueId; QUEUE_ID_COUNT] = [
    QueueId::Ctrl,
    QueueId::Vip,
    QueueId::TcpAck,
    QueueId::TcpData,
    QueueId::Vo,
    QueueId::Vi,
    QueueId::Be,
    QueueId::Bk,
    QueueId::Normal,
];

/// RX drain order, shared by every role
pub const RX_DRAIN_ORDER: [QueueId; QUEUE_ID_COUNT] = [
    QueueId::Ctrl,
    QueueId::Vip,
    QueueId::Vo,
    QueueId::Vi,
    QueueId::TcpAck,
    QueueId::TcpData,
    QueueId::Be,
    QueueId::Bk,
    QueueId::Normal,
];

/// Queue state behind the per-class lock
#[derive(Debug, Default)]
struct QueueState {
    bufs: NetBufQueue,
    /// Packets accepted since the queue last went empty
    pkt_count: u64,
    /// Buffers evicted by the drop-oldest policy
    dropped: u64,
}

/// One bounded traffic-class queue
///
/// With a non-zero threshold T the queue keeps at most T buffers: an
/// enqueue at capacity first evicts the oldest buffer (drop-oldest, never
/// drop-newest). A zero threshold leaves the queue unbounded.
#[derive(Debug)]
pub struct FlowControlQueue {
    id: QueueId,
    threshold: usize,
    state: Mutex<QueueState>,
}

impl FlowControlQueue {
    pub fn new(id: QueueId, threshold: usize) -> Self {
        Self {
            id,
            threshold,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Add a buffer, evicting the oldest first when the queue is full
    ///
    /// The packet counter restarts whenever the queue fills from empty.
    pub fn enqueue(&self, nb: NetBuf) {
        let mut state = self.state.lock().unwrap();
        if self.threshold > 0 && state.bufs.len() >= self.threshold {
            state.bufs.dequeue();
            state.dropped += 1;
            debug!(
                "{:?} queue full at {}, dropped oldest (total dropped: {})",
                self.id, self.threshold, state.dropped
            );
        }
        if state.bufs.is_empty() {
            state.pkt_count = 0;
        }
        state.bufs.enqueue(nb);
        state.pkt_count += 1;
    }

    /// Remove and return the oldest buffer
    pub fn dequeue(&self) -> Option<NetBuf> {
        self.state.lock().unwrap().bufs.dequeue()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().bufs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().bufs.is_empty()
    }

    /// Packets accepted since the queue last went empty
    pub fn packet_count(&self) -> u64 {
        self.state.lock().unwrap().pkt_count
    }

    /// Buffers evicted by the drop-oldest policy
    pub fn dropped(&self) -> u64 {
        self.state.lock().unwrap().dropped
    }

    /// Hand the queued buffers to `f` without holding the class lock
    ///
    /// The whole backlog is swapped out first, so `f` may block or enqueue
    /// freely. Buffers `f` leaves behind go back in front of anything that
    /// arrived while `f` ran, keeping FIFO age order.
    pub fn drain_with<F: FnOnce(&mut NetBufQueue)>(&self, f: F) {
        let mut taken = std::mem::take(&mut self.state.lock().unwrap().bufs);
        f(&mut taken);
        if !taken.is_empty() {
            self.state.lock().unwrap().bufs.prepend(taken);
        }
    }
}

/// The nine class queues of one direction
#[derive(Debug)]
pub struct QueueSet {
    queues: [FlowControlQueue; QUEUE_ID_COUNT],
}

impl QueueSet {
    /// Build the class queues from per-class thresholds
    pub fn new(thresholds: [usize; QUEUE_ID_COUNT]) -> Self {
        Self {
            queues: QueueId::ALL.map(|id| FlowControlQueue::new(id, thresholds[id.index()])),
        }
    }

    /// Build with one threshold shared by every class
    pub fn uniform(threshold: usize) -> Self {
        Self::new([threshold; QUEUE_ID_COUNT])
    }

    pub fn queue(&self, id: QueueId) -> &FlowControlQueue {
        &self.queues[id.index()]
    }
}
