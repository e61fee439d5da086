//! Wire protocol for the USB PnP notification pipeline
//!
//! This crate defines the contract between the PnP notification producer and
//! the loader service: the dispatch command vocabulary, the match-info
//! payload describing a device and its interfaces, and the checksummed
//! [`ServiceFrame`] envelope the payloads travel in. Frames are serialized
//! with postcard and can be length-prefixed for byte streams.
//!
//! # Example
//!
//! ```
//! use protocol::{CommandId, MatchInfoTable, ServiceFrame};
//! use protocol::{decode_framed, encode_framed};
//!
//! // Wrap a payload in a frame
//! let info = MatchInfoTable::test_sample();
//! let frame = ServiceFrame::new(CommandId::AddTest, &info).unwrap();
//!
//! // Length-prefixed for a byte stream
//! let framed = encode_framed(&frame).unwrap();
//!
//! // Back out the other side
//! let decoded = decode_framed(&framed).unwrap();
//! let opened: MatchInfoTable = decoded.open().unwrap();
//! assert_eq!(opened, info);
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod types;

pub use codec::{
    MAX_FRAME_SIZE, decode_frame, decode_framed, encode_frame, encode_framed, read_framed,
    write_framed,
};
pub use error::{ProtocolError, Result};
pub use messages::{ServiceFrame, frame_checksum};
pub use types::{
    CommandId, DISPATCH_ACK, DeviceFields, DeviceId, DeviceKey, DeviceSnapshot, DriverRegistration,
    InterfaceChangeRequest, InterfaceDesc, LOADER_SERVICE_NAME, MatchInfoTable, RemovalScope,
    TEST_BUS_NUM, TEST_DEV_NUM,
};
