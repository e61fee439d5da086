//! WLAN flow-control engine
//!
//! Classifies Ethernet frames into nine traffic classes, buffers them per
//! class with bounded drop-oldest depth, and drains them on dedicated TX and
//! RX threads in role-dependent priority order through a registered vendor
//! operations trait. Frames ride in [`NetBuf`]s, three-segment buffers that
//! prepend and strip headers without copying.
//!
//! # Example
//!
//! ```
//! use flowctl::{Direction, FlowControlModule, FlowControlOps, NetBuf, NetBufQueue, QueueId};
//! use std::sync::Arc;
//!
//! struct NullOps;
//!
//! impl FlowControlOps for NullOps {
//!     fn is_device_sta_or_p2p_client(&self) -> bool {
//!         true
//!     }
//!     fn tx_data_packet(&self, queue: &mut NetBufQueue, _priority_id: u32) {
//!         queue.clear();
//!     }
//!     fn rx_data_packet(&self, queue: &mut NetBufQueue, _priority_id: u32) {
//!         queue.clear();
//!     }
//!     fn tx_priority_id(&self, id: QueueId) -> u32 {
//!         id.index() as u32
//!     }
//!     fn rx_priority_id(&self, id: QueueId) -> u32 {
//!         id.index() as u32
//!     }
//! }
//!
//! let mut module = FlowControlModule::new(Arc::new(NullOps), [8; flowctl::QUEUE_ID_COUNT]);
//!
//! let frame = vec![0u8; 64]; // zero ether type, classifies as normal
//! let id = module
//!     .enqueue_frame(Direction::Tx, NetBuf::from_slice(&frame))
//!     .unwrap();
//! assert_eq!(id, QueueId::Normal);
//!
//! module.schedule(Direction::Tx);
//! module.shutdown().unwrap();
//! ```

pub mod error;
pub mod ether;
pub mod netbuf;
pub mod ops;
pub mod queues;
pub mod task;

pub use error::{FlowControlError, Result};
pub use ether::{ETHER_HEADER_LEN, IPV4_MIN_HEADER_LEN, MIN_CLASSIFY_LEN, queue_id_for_frame};
pub use netbuf::{NetBuf, NetBufQueue};
pub use ops::FlowControlOps;
pub use queues::{
    AP_TX_DRAIN_ORDER, DIRECTION_COUNT, Direction, FlowControlQueue, QUEUE_ID_COUNT, QueueId,
    QueueSet, RX_DRAIN_ORDER, STA_TX_DRAIN_ORDER,
};
pub use task::{FlowControlModule, TaskPhase};
