//! USB PnP notification and driver-matching pipeline
//!
//! Observes USB attach/detach (libusb hotplug plus an initial sweep), tracks
//! every known device in a registry, and announces each change as a
//! checksummed service frame to the loader endpoint. The loader matches the
//! announced descriptors against a configured rule table and registers or
//! unregisters downstream driver services, keeping a service table so
//! removals undo exactly what a match once registered.
//!
//! # Example
//!
//! ```
//! use pnp::{Config, LoggingDeviceManager, PnpService};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = Config::default();
//! let service = PnpService::start(&config, Arc::new(LoggingDeviceManager));
//!
//! // Nothing is attached yet; the report pass walks an empty set.
//! service.report().await.unwrap();
//! service.shutdown().await;
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hotplug;
pub mod loader;
pub mod notifier;
pub mod registry;
pub mod service;

pub use config::{Config, FlowControlSettings, MatchRule};
pub use error::{PnpError, Result};
pub use loader::{DeviceManagerOps, Loader, LoggingDeviceManager, MatchEngine};
pub use notifier::Notifier;
pub use registry::{AttachedSet, DeviceRecord, DeviceStatus, Registry};
pub use service::{PnpCore, PnpService};
