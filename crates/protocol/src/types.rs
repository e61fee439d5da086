//! PnP wire type definitions
//!
//! This module defines the types exchanged between the notification producer
//! and the loader service: device/interface descriptor snapshots, the
//! match-info payload, and the dispatch command vocabulary.

use serde::{Deserialize, Serialize};

/// Registry-assigned device identifier
///
/// Monotonically increasing for the lifetime of the registry, wrapping back
/// to zero after `i32::MAX`. Stable while the device remains tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub i32);

/// Opaque device identity key
///
/// Identifies a physical device independently of its registry id. Built from
/// the (bus, address) pair at observation time and used to correlate add and
/// remove events for the same device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceKey(pub u64);

impl DeviceKey {
    /// Derive the key from a bus number and device address
    pub fn from_bus_dev(bus_num: u8, dev_num: u8) -> Self {
        DeviceKey(((bus_num as u64) << 8) | dev_num as u64)
    }
}

/// Dispatch reply value meaning "accepted"
///
/// The loader answers every dispatched frame with an `i32` status; this
/// sentinel is success, anything else is an errno-style failure code.
pub const DISPATCH_ACK: i32 = i32::MAX;

/// Well-known name of the loader service the notifier dispatches to
pub const LOADER_SERVICE_NAME: &str = "hdf_usb_pnp_notify_service";

/// Commands understood by the loader service
///
/// The variant order is the wire order; `from_u8` accepts the raw dispatch
/// id used on the service channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandId {
    /// One or more interfaces of a tracked device became available
    AddInterface = 0,
    /// A single interface of a tracked device went away
    RemoveInterface = 1,
    /// A whole device was attached
    AddDevice = 2,
    /// A whole device was detached
    RemoveDevice = 3,
    /// Enumerate already-attached devices toward the loader
    ReportInterface = 4,
    /// Self-test add using a fixed sample payload
    AddTest = 5,
    /// Self-test remove using a fixed sample payload
    RemoveTest = 6,
    /// Loader lifecycle: register the downstream driver device
    DriverRegisterDevice = 7,
    /// Loader lifecycle: unregister the downstream driver device
    DriverUnregisterDevice = 8,
}

impl CommandId {
    /// Decode a raw dispatch id
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::AddInterface),
            1 => Some(Self::RemoveInterface),
            2 => Some(Self::AddDevice),
            3 => Some(Self::RemoveDevice),
            4 => Some(Self::ReportInterface),
            5 => Some(Self::AddTest),
            6 => Some(Self::RemoveTest),
            7 => Some(Self::DriverRegisterDevice),
            8 => Some(Self::DriverUnregisterDevice),
            _ => None,
        }
    }

    /// True for the add-direction commands (device, interface, or test)
    pub fn is_add(&self) -> bool {
        matches!(self, Self::AddDevice | Self::AddInterface | Self::AddTest)
    }

    /// True for the remove-direction commands
    pub fn is_remove(&self) -> bool {
        matches!(
            self,
            Self::RemoveDevice | Self::RemoveInterface | Self::RemoveTest
        )
    }
}

/// One interface descriptor as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDesc {
    /// Interface class
    pub class: u8,
    /// Interface subclass
    pub sub_class: u8,
    /// Interface protocol
    pub protocol: u8,
    /// Interface number within the configuration
    pub number: u8,
}

/// Device-level descriptor fields used for matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFields {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Low end of the bcdDevice revision (equal to the high end for a
    /// snapshot taken from a real device)
    pub bcd_device_low: u16,
    /// High end of the bcdDevice revision
    pub bcd_device_high: u16,
    /// Device class
    pub class: u8,
    /// Device subclass
    pub sub_class: u8,
    /// Device protocol
    pub protocol: u8,
}

/// Full descriptor snapshot of one observed device
///
/// Taken once when the device is first seen and embedded in the tracking
/// record; also the building block for every outgoing match-info payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    /// Opaque identity key
    pub key: DeviceKey,
    /// Device address on its bus
    pub dev_num: u8,
    /// Bus number
    pub bus_num: u8,
    /// Device-level descriptor fields
    pub fields: DeviceFields,
    /// Interface descriptors of the active configuration
    pub interfaces: Vec<InterfaceDesc>,
}

impl DeviceSnapshot {
    /// Look up an interface by its interface number
    pub fn interface(&self, number: u8) -> Option<&InterfaceDesc> {
        self.interfaces.iter().find(|i| i.number == number)
    }
}

/// Scope of a removal event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalScope {
    /// The whole device identified by (bus, dev) went away
    Device,
    /// A single interface went away; the payload's interface list names it
    Interface,
}

/// The match-info payload dispatched to the loader
///
/// Carries everything the loader needs to run its rule table: the device
/// identity, the device-level fields, and the interface set relevant to the
/// command (all surviving interfaces for an interface add, exactly one for
/// an interface remove, the full set otherwise).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchInfoTable {
    /// Opaque identity key of the device
    pub key: DeviceKey,
    /// Device address on its bus
    pub dev_num: u8,
    /// Bus number
    pub bus_num: u8,
    /// Device-level descriptor fields
    pub device: DeviceFields,
    /// Removal scope; `None` on the add and report paths
    pub removal: Option<RemovalScope>,
    /// Interface descriptors relevant to the command
    pub interfaces: Vec<InterfaceDesc>,
}

impl MatchInfoTable {
    /// Build a payload from a device snapshot with the full interface set
    pub fn from_snapshot(snapshot: &DeviceSnapshot, removal: Option<RemovalScope>) -> Self {
        Self {
            key: snapshot.key,
            dev_num: snapshot.dev_num,
            bus_num: snapshot.bus_num,
            device: snapshot.fields,
            removal,
            interfaces: snapshot.interfaces.clone(),
        }
    }

    /// Fixed sample payload for the self-test commands
    pub fn test_sample() -> Self {
        Self {
            key: DeviceKey::from_bus_dev(TEST_BUS_NUM, TEST_DEV_NUM),
            dev_num: TEST_DEV_NUM,
            bus_num: TEST_BUS_NUM,
            device: DeviceFields {
                vendor_id: 0x12d1,
                product_id: 0x5000,
                bcd_device_low: 0x0100,
                bcd_device_high: 0x0100,
                class: 0,
                sub_class: 0,
                protocol: 0,
            },
            removal: None,
            interfaces: vec![InterfaceDesc {
                class: 0x08,
                sub_class: 0x06,
                protocol: 0x50,
                number: 0,
            }],
        }
    }
}

/// Device address used by the self-test payload
pub const TEST_DEV_NUM: u8 = 100;
/// Bus number used by the self-test payload
pub const TEST_BUS_NUM: u8 = 200;

/// Request to flag one interface of a tracked device as added or removed
///
/// Sent by interface consumers that claim or release an interface after the
/// device itself is already tracked. The interface fields must name an
/// interface the device actually declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceChangeRequest {
    /// Device address on its bus
    pub dev_num: u8,
    /// Bus number
    pub bus_num: u8,
    /// The interface being claimed or released
    pub interface: InterfaceDesc,
}

/// Register-or-unregister request toward the downstream device manager
///
/// Built by the loader for every accepted match rule; names the driver
/// module and service to bring up plus the interface subset that matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRegistration {
    /// Driver module name from the rule
    pub module_name: String,
    /// Service name to register the device under
    pub service_name: String,
    /// Private match attribute forwarded to the driver
    pub device_match_attr: String,
    /// Device address on its bus
    pub dev_num: u8,
    /// Bus number
    pub bus_num: u8,
    /// Interface numbers covered by this registration
    pub interfaces: Vec<u8>,
}
