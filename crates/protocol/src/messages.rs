//! Service frame envelope
//!
//! Every dispatch toward the loader service is one [`ServiceFrame`]: the
//! command id, the postcard-encoded payload as an opaque byte blob, and a
//! CRC32 over both. The payload stays opaque at the envelope level so the
//! channel does not need to know which payload type each command carries;
//! the receiver picks the concrete type when it calls [`ServiceFrame::open`].

use crate::error::{ProtocolError, Result};
use crate::types::CommandId;
use crc32fast::Hasher;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One command envelope on the service channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFrame {
    /// Dispatch command id
    pub cmd: CommandId,
    /// Postcard-encoded payload for `cmd`
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    /// CRC32 over the command id byte and the payload bytes
    pub checksum: u32,
}

impl ServiceFrame {
    /// Build a frame by encoding `payload` and computing its checksum
    pub fn new<T: Serialize>(cmd: CommandId, payload: &T) -> Result<Self> {
        let payload = postcard::to_allocvec(payload)?;
        let checksum = frame_checksum(cmd, &payload);
        Ok(Self {
            cmd,
            payload,
            checksum,
        })
    }

    /// Verify the checksum and decode the payload as `T`
    pub fn open<T: DeserializeOwned>(&self) -> Result<T> {
        self.verify()?;
        postcard::from_bytes(&self.payload).map_err(ProtocolError::from)
    }

    /// Verify the checksum without decoding
    pub fn verify(&self) -> Result<()> {
        let computed = frame_checksum(self.cmd, &self.payload);
        if computed != self.checksum {
            return Err(ProtocolError::ChecksumMismatch {
                expected: self.checksum,
                computed,
            });
        }
        Ok(())
    }
}

/// Compute the CRC32 covering a command id and its payload bytes
#[inline]
pub fn frame_checksum(cmd: CommandId, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[cmd as u8]);
    hasher.update(payload);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MatchInfoTable, RemovalScope};

    #[test]
    fn test_frame_open_returns_payload() {
        let info = MatchInfoTable::test_sample();
        let frame = ServiceFrame::new(CommandId::AddTest, &info).unwrap();

        assert!(frame.verify().is_ok());
        let opened: MatchInfoTable = frame.open().unwrap();
        assert_eq!(opened, info);
    }

    #[test]
    fn test_checksum_covers_command_id() {
        let info = MatchInfoTable::test_sample();
        let frame = ServiceFrame::new(CommandId::AddTest, &info).unwrap();

        // Same payload under a different command must not verify
        let forged = ServiceFrame {
            cmd: CommandId::RemoveTest,
            payload: frame.payload.clone(),
            checksum: frame.checksum,
        };
        assert!(matches!(
            forged.verify(),
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_corrupted_payload_is_rejected() {
        let mut info = MatchInfoTable::test_sample();
        info.removal = Some(RemovalScope::Interface);
        let mut frame = ServiceFrame::new(CommandId::RemoveInterface, &info).unwrap();

        frame.payload[0] ^= 0xFF;
        let result: Result<MatchInfoTable> = frame.open();
        assert!(matches!(
            result,
            Err(ProtocolError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_payload_frame() {
        let frame = ServiceFrame::new(CommandId::DriverRegisterDevice, &()).unwrap();
        assert!(frame.verify().is_ok());
        let _: () = frame.open().unwrap();
    }
}
