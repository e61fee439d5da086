//! USB hotplug observation
//!
//! Bridges libusb's hotplug callbacks onto the PnP pipeline. Devices already
//! present at startup are swept once by a manual enumeration; afterwards the
//! registered callbacks feed attach and detach observations as they happen.
//! Both paths go through [`PnpCore`], so duplicate suppression and record
//! creation behave identically no matter how a device was first seen.

use crate::error::Result;
use crate::service::PnpCore;
use protocol::{DeviceFields, DeviceKey, DeviceSnapshot, InterfaceDesc};
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Repack a decoded descriptor version into its 16-bit bcd form
fn pack_version(version: rusb::Version) -> u16 {
    let major = version.major() as u16;
    ((major / 10) << 12)
        | ((major % 10) << 8)
        | ((version.minor() as u16 & 0x0F) << 4)
        | (version.sub_minor() as u16 & 0x0F)
}

/// Take one descriptor snapshot of `device`
///
/// Reads the device descriptor and the active configuration's interface
/// descriptors (first alternate setting of each interface). A device without
/// a readable configuration yields an empty interface list; downstream
/// stages refuse those per device rather than failing the whole sweep.
pub fn snapshot_device<T: UsbContext>(device: &Device<T>) -> Result<DeviceSnapshot> {
    let descriptor = device.device_descriptor()?;
    let bus_num = device.bus_number();
    let dev_num = device.address();

    let bcd_device = pack_version(descriptor.device_version());
    let fields = DeviceFields {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        bcd_device_low: bcd_device,
        bcd_device_high: bcd_device,
        class: descriptor.class_code(),
        sub_class: descriptor.sub_class_code(),
        protocol: descriptor.protocol_code(),
    };

    let mut interfaces = Vec::new();
    match device.active_config_descriptor() {
        Ok(config) => {
            for interface in config.interfaces() {
                if let Some(desc) = interface.descriptors().next() {
                    interfaces.push(InterfaceDesc {
                        class: desc.class_code(),
                        sub_class: desc.sub_class_code(),
                        protocol: desc.protocol_code(),
                        number: desc.interface_number(),
                    });
                }
            }
        }
        Err(e) => {
            debug!(
                "No active config for device (bus={}, dev={}): {}",
                bus_num, dev_num, e
            );
        }
    }

    Ok(DeviceSnapshot {
        key: DeviceKey::from_bus_dev(bus_num, dev_num),
        dev_num,
        bus_num,
        fields,
        interfaces,
    })
}

/// Hotplug callbacks feeding the pipeline
struct PnpHotplugHandler {
    core: Arc<PnpCore>,
}

impl<T: UsbContext> Hotplug<T> for PnpHotplugHandler {
    fn device_arrived(&mut self, device: Device<T>) {
        match snapshot_device(&device) {
            Ok(snapshot) => {
                let bus_num = snapshot.bus_num;
                let dev_num = snapshot.dev_num;
                debug!("USB device arrived (bus={}, dev={})", bus_num, dev_num);
                if let Err(e) = self.core.observe_attach(snapshot) {
                    warn!(
                        "Attach handling failed (bus={}, dev={}): {}",
                        bus_num, dev_num, e
                    );
                }
            }
            Err(e) => warn!("Failed to read descriptors of arrived device: {}", e),
        }
    }

    fn device_left(&mut self, device: Device<T>) {
        let key = DeviceKey::from_bus_dev(device.bus_number(), device.address());
        debug!(
            "USB device left (bus={}, dev={})",
            device.bus_number(),
            device.address()
        );
        if let Err(e) = self.core.observe_detach(key) {
            warn!("Detach handling failed for device key {:#x}: {}", key.0, e);
        }
    }
}

/// Owns the libusb context, callback registration, and event pump
pub struct HotplugObserver {
    context: Context,
    core: Arc<PnpCore>,
    registration: Option<Registration<Context>>,
}

impl HotplugObserver {
    pub fn new(core: Arc<PnpCore>) -> Result<Self> {
        let context = Context::new()?;
        Ok(Self {
            context,
            core,
            registration: None,
        })
    }

    /// Register callbacks, sweep present devices, and start the event pump
    ///
    /// Callback registration comes first so a device arriving mid-sweep is
    /// not lost; the duplicate guard absorbs the overlap.
    pub fn start(mut self) -> Result<ObserverHandle> {
        let handler = PnpHotplugHandler {
            core: self.core.clone(),
        };
        match HotplugBuilder::new()
            .enumerate(false)
            .register(self.context.clone(), Box::new(handler))
        {
            Ok(registration) => {
                self.registration = Some(registration);
                info!("USB hotplug callbacks registered");
            }
            Err(rusb::Error::NotSupported) => {
                warn!("USB hotplug not supported here, relying on the initial sweep only");
            }
            Err(e) => return Err(e.into()),
        }

        self.sweep_present_devices()?;

        let stop = Arc::new(AtomicBool::new(false));
        let pump_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("pnp-hotplug".to_string())
            .spawn(move || {
                // The observer moves in whole so the callback registration
                // stays alive exactly as long as the pump runs.
                let observer = self;
                while !pump_stop.load(Ordering::Relaxed) {
                    if let Err(e) = observer
                        .context
                        .handle_events(Some(Duration::from_millis(250)))
                    {
                        warn!("USB event pump error, stopping: {}", e);
                        break;
                    }
                }
                debug!("USB event pump stopped");
            })
            .expect("Failed to spawn hotplug observer thread");

        Ok(ObserverHandle { handle, stop })
    }

    /// One pass over the devices already on the buses
    fn sweep_present_devices(&self) -> Result<()> {
        let devices = self.context.devices()?;
        info!("Sweeping {} present USB device(s)", devices.len());

        for device in devices.iter() {
            let snapshot = match snapshot_device(&device) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    // One unreadable device never aborts the sweep.
                    warn!(
                        "Skipping unreadable device (bus={}, dev={}): {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };
            let bus_num = snapshot.bus_num;
            let dev_num = snapshot.dev_num;
            if let Err(e) = self.core.observe_attach(snapshot) {
                warn!(
                    "Attach handling failed (bus={}, dev={}): {}",
                    bus_num, dev_num, e
                );
            }
        }
        Ok(())
    }
}

/// Handle for stopping the observer's event pump thread
pub struct ObserverHandle {
    handle: thread::JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

impl ObserverHandle {
    /// Stop the pump and wait for the thread to exit
    ///
    /// The pump polls with a 250ms timeout, so this returns promptly.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.handle.join().is_err() {
            warn!("Hotplug observer thread panicked");
        }
    }
}
