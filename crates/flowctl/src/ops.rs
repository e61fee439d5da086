//! Vendor operations contract

use crate::netbuf::NetBufQueue;
use crate::queues::QueueId;

/// Vendor-supplied packet operations
///
/// One implementation is registered when the flow-control module is built.
/// Drain passes call into it from the TX and RX threads, so implementations
/// must be `Send + Sync` and keep any mutable state behind interior
/// mutability.
pub trait FlowControlOps: Send + Sync {
    /// Whether the device currently runs as a station or P2P client
    ///
    /// Checked once per TX drain pass to pick the priority ordering.
    fn is_device_sta_or_p2p_client(&self) -> bool;

    /// Transmit the buffers the drain pass hands over
    ///
    /// `queue` is the whole backlog of one traffic class. Buffers left in it
    /// return to the class queue and are offered again on the next pass.
    fn tx_data_packet(&self, queue: &mut NetBufQueue, priority_id: u32);

    /// Deliver received buffers up the stack
    ///
    /// Same hand-over contract as [`tx_data_packet`](Self::tx_data_packet).
    fn rx_data_packet(&self, queue: &mut NetBufQueue, priority_id: u32);

    /// Vendor priority id for a class on the TX path
    fn tx_priority_id(&self, id: QueueId) -> u32;

    /// Vendor priority id for a class on the RX path
    fn rx_priority_id(&self, id: QueueId) -> u32;
}
