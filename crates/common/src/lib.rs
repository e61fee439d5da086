//! Common utilities for usb-pnp-hub
//!
//! This crate provides shared functionality between the PnP daemon and the
//! flow-control engine: error handling, logging setup, the async channel
//! bridges connecting the notifier/loader stages, and test utilities.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{
    DispatchReceiver, DispatchRequest, DispatchSender, EventReceiver, EventSender, PnpEvent,
    create_dispatch_channel, create_event_channel,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
