//! Notification worker thread
//!
//! Consumes queued [`PnpEvent`]s, turns each into a checksummed service
//! frame, and dispatches it to the loader endpoint, blocking on the status
//! reply. Registry status transitions happen here, strictly in event order,
//! so the record lifecycle always mirrors what the loader has actually
//! acknowledged.

use crate::error::{PnpError, Result};
use crate::registry::{AttachedSet, DeviceStatus, Registry};
use common::{DispatchSender, EventReceiver, PnpEvent};
use protocol::{
    CommandId, DISPATCH_ACK, DeviceKey, DeviceSnapshot, InterfaceChangeRequest, MatchInfoTable,
    RemovalScope, ServiceFrame, encode_framed,
};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// The notifier worker
///
/// Owns the event receiver end; everything else is shared with the service
/// front end and the hotplug observer.
pub struct Notifier {
    registry: Arc<Registry>,
    attached: Arc<AttachedSet>,
    receiver: EventReceiver,
    dispatch: DispatchSender,
}

impl Notifier {
    pub fn new(
        registry: Arc<Registry>,
        attached: Arc<AttachedSet>,
        receiver: EventReceiver,
        dispatch: DispatchSender,
    ) -> Self {
        Self {
            registry,
            attached,
            receiver,
            dispatch,
        }
    }

    /// Run the worker on its own named thread
    pub fn spawn(self) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name("pnp-notifier".to_string())
            .spawn(move || self.run())
            .expect("Failed to spawn notifier thread")
    }

    fn run(self) {
        info!("Notifier running");

        loop {
            let event = match self.receiver.recv_blocking() {
                Ok(event) => event,
                Err(_) => {
                    debug!("Event channel closed");
                    break;
                }
            };
            if matches!(event, PnpEvent::Shutdown) {
                break;
            }
            if let Err(e) = self.handle_event(event) {
                // One event's failure never stops the worker.
                warn!("Event handling failed: {}", e);
            }
        }

        info!("Notifier stopped");
    }

    fn handle_event(&self, event: PnpEvent) -> Result<()> {
        match event {
            PnpEvent::AddDevice { snapshot } => self.on_add_device(snapshot),
            PnpEvent::RemoveDevice { key } => self.on_remove_device(key),
            PnpEvent::AddInterface { request } => self.on_interface_change(request, false),
            PnpEvent::RemoveInterface { request } => self.on_interface_change(request, true),
            PnpEvent::Report => self.on_report(),
            PnpEvent::AddTest => {
                self.dispatch_info(CommandId::AddTest, &MatchInfoTable::test_sample())
            }
            PnpEvent::RemoveTest => {
                let mut sample = MatchInfoTable::test_sample();
                sample.removal = Some(RemovalScope::Device);
                self.dispatch_info(CommandId::RemoveTest, &sample)
            }
            PnpEvent::Shutdown => Ok(()),
        }
    }

    /// Announce a freshly tracked device
    ///
    /// A rejected announcement rolls the tracking record back so a later
    /// re-attach starts from a clean slate.
    fn on_add_device(&self, snapshot: DeviceSnapshot) -> Result<()> {
        let record = self.registry.find(snapshot.key).ok_or_else(|| {
            PnpError::NotFound(format!("device key {:#x} not tracked", snapshot.key.0))
        })?;

        let info = MatchInfoTable::from_snapshot(record.snapshot(), None);
        match self.dispatch_info(CommandId::AddDevice, &info) {
            Ok(()) => {
                record.apply_status(DeviceStatus::Add);
                Ok(())
            }
            Err(e) => {
                error!(
                    "Add dispatch failed for device (bus={}, dev={}): {}",
                    snapshot.bus_num, snapshot.dev_num, e
                );
                let _ = self.registry.destroy(record.id());
                self.attached.remove(snapshot.key);
                Err(e)
            }
        }
    }

    /// Announce a detach and drop the record once the loader accepts it
    fn on_remove_device(&self, key: DeviceKey) -> Result<()> {
        let record = self
            .registry
            .find(key)
            .ok_or_else(|| PnpError::NotFound(format!("device key {:#x} not tracked", key.0)))?;

        record.apply_status(DeviceStatus::Remove);
        let info = MatchInfoTable::from_snapshot(record.snapshot(), Some(RemovalScope::Device));
        self.dispatch_info(CommandId::RemoveDevice, &info)?;
        self.registry.destroy(record.id())?;
        Ok(())
    }

    /// Announce an interface claim or release
    ///
    /// The add payload carries every interface still surviving so the loader
    /// can re-run composite rules; the remove payload names exactly the one
    /// released interface.
    fn on_interface_change(&self, request: InterfaceChangeRequest, removing: bool) -> Result<()> {
        let record = self
            .registry
            .find((request.bus_num, request.dev_num))
            .ok_or_else(|| {
                PnpError::NotFound(format!(
                    "no tracked device at (bus={}, dev={})",
                    request.bus_num, request.dev_num
                ))
            })?;

        record.set_interface_removed(&request.interface, removing)?;
        record.apply_status(DeviceStatus::Interface);

        let (cmd, info) = if removing {
            let mut info =
                MatchInfoTable::from_snapshot(record.snapshot(), Some(RemovalScope::Interface));
            info.interfaces = vec![request.interface];
            (CommandId::RemoveInterface, info)
        } else {
            let mut info = MatchInfoTable::from_snapshot(record.snapshot(), None);
            info.interfaces = record.surviving_interfaces();
            (CommandId::AddInterface, info)
        };
        self.dispatch_info(cmd, &info)
    }

    /// Re-announce every attached device
    ///
    /// Per-device failures are logged and skipped; the walk always finishes.
    fn on_report(&self) -> Result<()> {
        let keys = self.attached.keys();
        debug!("Reporting {} attached device(s)", keys.len());

        for key in keys {
            let Some(record) = self.registry.find(key) else {
                continue;
            };
            let info = MatchInfoTable::from_snapshot(record.snapshot(), None);
            if let Err(e) = self.dispatch_info(CommandId::ReportInterface, &info) {
                warn!("Report dispatch failed for device key {:#x}: {}", key.0, e);
            }
        }
        Ok(())
    }

    /// Frame, checksum, and dispatch one payload; block on the status reply
    fn dispatch_info(&self, cmd: CommandId, info: &MatchInfoTable) -> Result<()> {
        let frame = ServiceFrame::new(cmd, info)?;
        let framed = encode_framed(&frame)?;
        let status = self.dispatch.dispatch_blocking(framed)?;
        if status == DISPATCH_ACK {
            Ok(())
        } else {
            Err(PnpError::DispatchRejected(status))
        }
    }
}
