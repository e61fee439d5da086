//! PnP error types

use thiserror::Error;

/// Errors produced by the registry, notifier, and loader
#[derive(Debug, Error)]
pub enum PnpError {
    /// A request named something the tracked state does not declare
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// Lookup missed in a non-empty collection
    #[error("Not found: {0}")]
    NotFound(String),

    /// A descriptor snapshot without interfaces cannot be matched
    #[error("Device snapshot carries no interfaces")]
    NoInterfaces,

    /// The loader answered a dispatched frame with a failure status
    #[error("Dispatch rejected with status {0}")]
    DispatchRejected(i32),

    /// Downstream device-manager registration failed
    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    #[error("Channel error: {0}")]
    Channel(#[from] common::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),
}

impl PnpError {
    /// Errno-style status code carried in dispatch replies
    ///
    /// Success is the separate [`protocol::DISPATCH_ACK`] sentinel; every
    /// error maps to a small negative code.
    pub fn status_code(&self) -> i32 {
        match self {
            PnpError::NotFound(_) => -2,
            PnpError::InvalidParam(_) => -3,
            PnpError::NoInterfaces => -4,
            _ => -1,
        }
    }
}

pub type Result<T> = std::result::Result<T, PnpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PnpError::NotFound("device (1, 2)".to_string());
        assert_eq!(err.to_string(), "Not found: device (1, 2)");

        let err = PnpError::DispatchRejected(-3);
        assert_eq!(err.to_string(), "Dispatch rejected with status -3");
    }

    #[test]
    fn test_status_codes_are_negative() {
        assert_eq!(PnpError::NotFound(String::new()).status_code(), -2);
        assert_eq!(PnpError::InvalidParam(String::new()).status_code(), -3);
        assert_eq!(PnpError::NoInterfaces.status_code(), -4);
        assert_eq!(PnpError::DispatchRejected(-9).status_code(), -1);
    }
}
