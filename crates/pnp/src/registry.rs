//! Device-info registry
//!
//! Tracks every USB device the pipeline currently knows about. Records are
//! created on the attach path, looked up by the notifier and the interface
//! request API, and destroyed when removal completes. Each record guards its
//! own mutable state so status transitions on one device never contend with
//! another.

use crate::error::{PnpError, Result};
use protocol::{DeviceId, DeviceKey, DeviceSnapshot, InterfaceDesc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Notification status of one tracked device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Created but not yet announced, or reset by a later event
    Init,
    /// The attach notification was dispatched and accepted
    Add,
    /// A detach notification is in flight
    Remove,
    /// An interface change notification is in flight
    Interface,
}

/// Mutable state of one record, guarded together
#[derive(Debug)]
struct RecordState {
    status: DeviceStatus,
    /// Parallel to the snapshot's interface list; true marks a released
    /// interface excluded from composite add payloads
    interface_removed: Vec<bool>,
}

/// One tracked device
///
/// The descriptor snapshot is taken once at observation time and never
/// changes; only the status and the per-interface remove flags mutate.
#[derive(Debug)]
pub struct DeviceRecord {
    id: DeviceId,
    snapshot: DeviceSnapshot,
    state: Mutex<RecordState>,
}

impl DeviceRecord {
    fn new(id: DeviceId, snapshot: DeviceSnapshot) -> Self {
        let interface_removed = vec![false; snapshot.interfaces.len()];
        Self {
            id,
            snapshot,
            state: Mutex::new(RecordState {
                status: DeviceStatus::Init,
                interface_removed,
            }),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn key(&self) -> DeviceKey {
        self.snapshot.key
    }

    pub fn snapshot(&self) -> &DeviceSnapshot {
        &self.snapshot
    }

    pub fn status(&self) -> DeviceStatus {
        self.state.lock().unwrap().status
    }

    /// Apply the status toggle for one notification event
    ///
    /// A record that is not `Init` falls back to `Init`; only an `Init`
    /// record takes the target status. Returns the status after the toggle.
    pub fn apply_status(&self, target: DeviceStatus) -> DeviceStatus {
        let mut state = self.state.lock().unwrap();
        state.status = if state.status != DeviceStatus::Init {
            DeviceStatus::Init
        } else {
            target
        };
        state.status
    }

    /// Flip the remove flag of one declared interface
    ///
    /// The request must name an interface exactly as the device declares it;
    /// anything else is an invalid parameter.
    pub fn set_interface_removed(&self, interface: &InterfaceDesc, removed: bool) -> Result<()> {
        let index = self
            .snapshot
            .interfaces
            .iter()
            .position(|declared| declared == interface)
            .ok_or_else(|| {
                PnpError::InvalidParam(format!(
                    "Interface {} not declared by device ({}, {})",
                    interface.number, self.snapshot.bus_num, self.snapshot.dev_num
                ))
            })?;
        self.state.lock().unwrap().interface_removed[index] = removed;
        Ok(())
    }

    /// Interfaces not currently flagged removed, holes compacted
    pub fn surviving_interfaces(&self) -> Vec<InterfaceDesc> {
        let state = self.state.lock().unwrap();
        self.snapshot
            .interfaces
            .iter()
            .zip(&state.interface_removed)
            .filter(|(_, removed)| !**removed)
            .map(|(desc, _)| *desc)
            .collect()
    }
}

/// Registry lookup key
///
/// Every caller-facing identity the pipeline uses resolves to one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceQuery {
    /// Bus number and device address pair
    BusDev(u8, u8),
    /// Registry-assigned id
    Id(DeviceId),
    /// Opaque device key
    Key(DeviceKey),
}

impl From<DeviceId> for DeviceQuery {
    fn from(id: DeviceId) -> Self {
        DeviceQuery::Id(id)
    }
}

impl From<DeviceKey> for DeviceQuery {
    fn from(key: DeviceKey) -> Self {
        DeviceQuery::Key(key)
    }
}

impl From<(u8, u8)> for DeviceQuery {
    fn from((bus_num, dev_num): (u8, u8)) -> Self {
        DeviceQuery::BusDev(bus_num, dev_num)
    }
}

struct RegistryInner {
    entries: HashMap<i32, Arc<DeviceRecord>>,
    next_id: i32,
}

/// Owned map of tracked devices
///
/// The map itself sits behind one lock; per-record state has its own.
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                entries: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Track a new device under the next id
    pub fn create(&self, snapshot: DeviceSnapshot) -> Arc<DeviceRecord> {
        let mut inner = self.inner.lock().unwrap();
        let id = DeviceId(inner.next_id);
        inner.next_id = if inner.next_id == i32::MAX {
            0
        } else {
            inner.next_id + 1
        };

        let record = Arc::new(DeviceRecord::new(id, snapshot));
        debug!(
            "Tracking device {:?}: bus={}, dev={}, vid={:#06x}, pid={:#06x}",
            id,
            record.snapshot.bus_num,
            record.snapshot.dev_num,
            record.snapshot.fields.vendor_id,
            record.snapshot.fields.product_id
        );
        inner.entries.insert(id.0, record.clone());
        record
    }

    /// Look a record up by any of the three identity kinds
    ///
    /// A miss is reported, not fatal; callers treat `None` as entry absent.
    pub fn find(&self, query: impl Into<DeviceQuery>) -> Option<Arc<DeviceRecord>> {
        let query = query.into();
        let inner = self.inner.lock().unwrap();
        if inner.entries.is_empty() {
            debug!("Registry is empty while looking up {:?}", query);
            return None;
        }

        let found = match query {
            DeviceQuery::Id(id) => inner.entries.get(&id.0).cloned(),
            DeviceQuery::Key(key) => inner
                .entries
                .values()
                .find(|record| record.snapshot.key == key)
                .cloned(),
            DeviceQuery::BusDev(bus_num, dev_num) => inner
                .entries
                .values()
                .find(|record| {
                    record.snapshot.bus_num == bus_num && record.snapshot.dev_num == dev_num
                })
                .cloned(),
        };
        if found.is_none() {
            debug!("No tracked device for {:?}", query);
        }
        found
    }

    /// Stop tracking a device
    ///
    /// An empty registry is trivially successful; a miss in a non-empty
    /// registry is an error.
    pub fn destroy(&self, id: DeviceId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.is_empty() {
            return Ok(());
        }
        match inner.entries.remove(&id.0) {
            Some(record) => {
                debug!(
                    "Dropped device {:?}: bus={}, dev={}",
                    id, record.snapshot.bus_num, record.snapshot.dev_num
                );
                Ok(())
            }
            None => Err(PnpError::NotFound(format!("device id {}", id.0))),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().entries.is_empty()
    }

    #[cfg(test)]
    fn set_next_id(&self, next_id: i32) {
        self.inner.lock().unwrap().next_id = next_id;
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Set of device keys currently observed attached
///
/// Guards against duplicate attach events and feeds the report enumeration.
/// Independent of the registry lock.
pub struct AttachedSet {
    keys: Mutex<HashSet<DeviceKey>>,
}

impl AttachedSet {
    pub fn new() -> Self {
        Self {
            keys: Mutex::new(HashSet::new()),
        }
    }

    /// Record an attach; `false` means the key was already present
    pub fn insert(&self, key: DeviceKey) -> bool {
        self.keys.lock().unwrap().insert(key)
    }

    /// Record a detach; `false` means the key was never attached
    pub fn remove(&self, key: DeviceKey) -> bool {
        self.keys.lock().unwrap().remove(&key)
    }

    pub fn contains(&self, key: DeviceKey) -> bool {
        self.keys.lock().unwrap().contains(&key)
    }

    /// Snapshot of the attached keys, for report enumeration
    pub fn keys(&self) -> Vec<DeviceKey> {
        self.keys.lock().unwrap().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().unwrap().is_empty()
    }
}

impl Default for AttachedSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::create_composite_snapshot;

    fn sample_snapshot(bus_num: u8, dev_num: u8) -> DeviceSnapshot {
        create_composite_snapshot(bus_num, dev_num, &[(0x08, 0x06, 0x50), (0x03, 0x00, 0x00)])
    }

    #[test]
    fn test_create_assigns_monotonic_ids() {
        let registry = Registry::new();
        let a = registry.create(sample_snapshot(1, 2));
        let b = registry.create(sample_snapshot(1, 3));

        assert_eq!(a.id(), DeviceId(1));
        assert_eq!(b.id(), DeviceId(2));
        assert_eq!(registry.len(), 2);
        assert_eq!(a.status(), DeviceStatus::Init);
    }

    #[test]
    fn test_id_wraps_at_i32_max() {
        let registry = Registry::new();
        registry.set_next_id(i32::MAX);

        let last = registry.create(sample_snapshot(1, 2));
        let wrapped = registry.create(sample_snapshot(1, 3));

        assert_eq!(last.id(), DeviceId(i32::MAX));
        assert_eq!(wrapped.id(), DeviceId(0));
    }

    #[test]
    fn test_find_is_polymorphic_and_idempotent() {
        let registry = Registry::new();
        let record = registry.create(sample_snapshot(3, 7));

        assert_eq!(registry.find(record.id()).unwrap().id(), record.id());
        assert_eq!(registry.find(record.key()).unwrap().id(), record.id());
        assert_eq!(registry.find((3u8, 7u8)).unwrap().id(), record.id());

        // Absent mutation the same query keeps answering the same way.
        assert_eq!(registry.find(record.id()).unwrap().id(), record.id());
        assert!(registry.find(DeviceId(99)).is_none());
        assert!(registry.find((9u8, 9u8)).is_none());
    }

    #[test]
    fn test_destroy_semantics() {
        let registry = Registry::new();

        // Empty registry is trivially fine.
        assert!(registry.destroy(DeviceId(5)).is_ok());

        let record = registry.create(sample_snapshot(1, 2));

        // A miss in a non-empty registry is an error.
        assert!(matches!(
            registry.destroy(DeviceId(99)),
            Err(PnpError::NotFound(_))
        ));

        registry.destroy(record.id()).unwrap();
        assert!(registry.find(record.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_status_toggle_rule() {
        let registry = Registry::new();
        let record = registry.create(sample_snapshot(1, 2));

        // Init takes the target directly.
        assert_eq!(record.apply_status(DeviceStatus::Add), DeviceStatus::Add);

        // A non-Init record falls back to Init first.
        assert_eq!(
            record.apply_status(DeviceStatus::Remove),
            DeviceStatus::Init
        );
        assert_eq!(
            record.apply_status(DeviceStatus::Remove),
            DeviceStatus::Remove
        );

        assert_eq!(
            record.apply_status(DeviceStatus::Interface),
            DeviceStatus::Init
        );
        assert_eq!(
            record.apply_status(DeviceStatus::Interface),
            DeviceStatus::Interface
        );
    }

    #[test]
    fn test_interface_remove_flags_compact_survivors() {
        let registry = Registry::new();
        let record = registry.create(sample_snapshot(1, 2));
        let declared = record.snapshot().interfaces.clone();

        assert_eq!(record.surviving_interfaces().len(), 2);

        record.set_interface_removed(&declared[0], true).unwrap();
        let surviving = record.surviving_interfaces();
        assert_eq!(surviving.len(), 1);
        assert_eq!(surviving[0].number, 1);

        record.set_interface_removed(&declared[0], false).unwrap();
        assert_eq!(record.surviving_interfaces().len(), 2);
    }

    #[test]
    fn test_undeclared_interface_is_invalid() {
        let registry = Registry::new();
        let record = registry.create(sample_snapshot(1, 2));

        let bogus = InterfaceDesc {
            class: 0xFF,
            sub_class: 0,
            protocol: 0,
            number: 9,
        };
        assert!(matches!(
            record.set_interface_removed(&bogus, true),
            Err(PnpError::InvalidParam(_))
        ));

        // Same number, different class is still undeclared.
        let mut near_miss = record.snapshot().interfaces[0];
        near_miss.class = 0xE0;
        assert!(matches!(
            record.set_interface_removed(&near_miss, true),
            Err(PnpError::InvalidParam(_))
        ));
    }

    #[test]
    fn test_attached_set_duplicate_guard() {
        let set = AttachedSet::new();
        let key = DeviceKey::from_bus_dev(1, 2);

        assert!(set.insert(key));
        assert!(!set.insert(key), "second attach of the same key is a dup");
        assert!(set.contains(key));

        assert!(set.remove(key));
        assert!(!set.remove(key));
        assert!(set.is_empty());
    }
}
