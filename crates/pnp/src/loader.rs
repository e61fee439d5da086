//! PnP match/loader service
//!
//! Consumes dispatched service frames, matches descriptor snapshots against
//! the configured rule table, and registers/unregisters downstream device
//! services. A registered-service table correlates later removals with the
//! registrations they undo and keeps interface-scoped removals re-addable.

use crate::config::MatchRule;
use crate::error::{PnpError, Result};
use common::DispatchReceiver;
use protocol::{
    CommandId, DISPATCH_ACK, DeviceFields, DeviceKey, DriverRegistration, InterfaceDesc,
    MatchInfoTable, ServiceFrame, decode_framed,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Device class value reserved for vendor-specific behavior
const USB_CLASS_VENDOR_SPEC: u8 = 0xFF;

/// Module name the loader registers its own device under
const LOADER_MODULE_NAME: &str = "usb_pnp_loader";

/// Downstream device-manager operations
///
/// The loader stays agnostic of how services actually come up; hosts
/// register an implementation once at construction.
pub trait DeviceManagerOps: Send + Sync {
    /// Bring up the driver service described by `registration`
    fn register_device(&self, registration: &DriverRegistration) -> Result<()>;

    /// Tear down the driver service described by `registration`
    fn unregister_device(&self, registration: &DriverRegistration) -> Result<()>;
}

/// Device manager that only logs, for hosts without a downstream manager
pub struct LoggingDeviceManager;

impl DeviceManagerOps for LoggingDeviceManager {
    fn register_device(&self, registration: &DriverRegistration) -> Result<()> {
        info!(
            "Register device: module='{}' service='{}' bus={} dev={} interfaces={:?}",
            registration.module_name,
            registration.service_name,
            registration.bus_num,
            registration.dev_num,
            registration.interfaces
        );
        Ok(())
    }

    fn unregister_device(&self, registration: &DriverRegistration) -> Result<()> {
        info!(
            "Unregister device: module='{}' service='{}' bus={} dev={}",
            registration.module_name,
            registration.service_name,
            registration.bus_num,
            registration.dev_num
        );
        Ok(())
    }
}

/// Lifecycle state of one registered service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceStatus {
    Add,
    Remove,
}

/// One successfully registered device/service combination
#[derive(Debug, Clone)]
struct ServiceEntry {
    module_name: String,
    service_name: String,
    device_match_attr: String,
    status: ServiceStatus,
    key: DeviceKey,
    dev_num: u8,
    bus_num: u8,
    /// Interface numbers covered by the registration; removal correlates
    /// interface-scoped events against this list
    interfaces: Vec<u8>,
}

impl ServiceEntry {
    fn registration(&self) -> DriverRegistration {
        DriverRegistration {
            module_name: self.module_name.clone(),
            service_name: self.service_name.clone(),
            device_match_attr: self.device_match_attr.clone(),
            dev_num: self.dev_num,
            bus_num: self.bus_num,
            interfaces: self.interfaces.clone(),
        }
    }
}

/// Per-rule scratch state for the current matching pass
#[derive(Debug)]
struct RuleState {
    class_mask: Vec<bool>,
    sub_class_mask: Vec<bool>,
    protocol_mask: Vec<bool>,
    number_mask: Vec<bool>,
    /// Accept latch; a set latch blocks re-matching until the pass resets
    accepted: bool,
}

impl RuleState {
    fn new(rule: &MatchRule) -> Self {
        Self {
            class_mask: vec![false; rule.interface_class.len()],
            sub_class_mask: vec![false; rule.interface_sub_class.len()],
            protocol_mask: vec![false; rule.interface_protocol.len()],
            number_mask: vec![false; rule.interface_number.len()],
            accepted: false,
        }
    }

    fn reset(&mut self) {
        self.class_mask.fill(false);
        self.sub_class_mask.fill(false);
        self.protocol_mask.fill(false);
        self.number_mask.fill(false);
        self.accepted = false;
    }
}

struct ActiveRule {
    rule: MatchRule,
    state: RuleState,
}

/// Check `value` against one selector array, recording the matched slot
///
/// An empty selector is a wildcard. Recorded slots stay recorded even when a
/// later selector misses; the pass reset clears them.
fn record_selector(selector: &[u8], mask: &mut [bool], value: u8) -> bool {
    if selector.is_empty() {
        return true;
    }
    match selector.iter().position(|&candidate| candidate == value) {
        Some(index) => {
            mask[index] = true;
            true
        }
        None => false,
    }
}

/// Device-level gate of one rule against snapshot fields
///
/// Every pinned field must equal the snapshot's; the bcdDevice bounds pin
/// each end of the revision range independently. Rules that go on to match
/// interfaces are rejected for vendor-specific devices unless they also pin
/// the vendor id.
fn device_fields_match(rule: &MatchRule, fields: &DeviceFields) -> bool {
    if rule.needs_interface_match()
        && fields.class == USB_CLASS_VENDOR_SPEC
        && rule.vendor_id.is_none()
    {
        return false;
    }
    if let Some(vendor_id) = rule.vendor_id
        && fields.vendor_id != vendor_id
    {
        return false;
    }
    if let Some(product_id) = rule.product_id
        && fields.product_id != product_id
    {
        return false;
    }
    if let Some(low) = rule.bcd_device_low
        && fields.bcd_device_low < low
    {
        return false;
    }
    if let Some(high) = rule.bcd_device_high
        && fields.bcd_device_high > high
    {
        return false;
    }
    if let Some(class) = rule.device_class
        && fields.class != class
    {
        return false;
    }
    if let Some(sub_class) = rule.device_sub_class
        && fields.sub_class != sub_class
    {
        return false;
    }
    if let Some(protocol) = rule.device_protocol
        && fields.protocol != protocol
    {
        return false;
    }
    true
}

/// The rule-matching core of the loader
///
/// Owns the configured rules, their per-pass scratch state, and the
/// registered-service table. Single-threaded; the loader task is its only
/// driver.
pub struct MatchEngine {
    rules: Vec<ActiveRule>,
    table: Vec<ServiceEntry>,
    ops: Arc<dyn DeviceManagerOps>,
    own_registration: DriverRegistration,
}

impl MatchEngine {
    pub fn new(rules: Vec<MatchRule>, loader_service: &str, ops: Arc<dyn DeviceManagerOps>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let state = RuleState::new(&rule);
                ActiveRule { rule, state }
            })
            .collect();
        Self {
            rules,
            table: Vec::new(),
            ops,
            own_registration: DriverRegistration {
                module_name: LOADER_MODULE_NAME.to_string(),
                service_name: loader_service.to_string(),
                device_match_attr: String::new(),
                dev_num: 0,
                bus_num: 0,
                interfaces: Vec::new(),
            },
        }
    }

    /// Name the loader's own device registers under
    pub fn service_name(&self) -> &str {
        &self.own_registration.service_name
    }

    pub fn registered_count(&self) -> usize {
        self.table.len()
    }

    /// True when `service_name` is registered with add status for `key`
    pub fn is_service_active(&self, service_name: &str, key: DeviceKey) -> bool {
        self.table.iter().any(|entry| {
            entry.service_name == service_name
                && entry.key == key
                && entry.status == ServiceStatus::Add
        })
    }

    /// Verify and handle one service frame
    pub fn handle_frame(&mut self, frame: &ServiceFrame) -> Result<()> {
        match frame.cmd {
            CommandId::AddDevice | CommandId::AddInterface | CommandId::ReportInterface => {
                let info: MatchInfoTable = frame.open()?;
                self.handle_add(frame.cmd, &info)
            }
            CommandId::RemoveDevice | CommandId::RemoveInterface => {
                let info: MatchInfoTable = frame.open()?;
                self.handle_remove(frame.cmd, &info)
            }
            CommandId::AddTest | CommandId::RemoveTest => {
                let info: MatchInfoTable = frame.open()?;
                self.handle_test(frame.cmd, &info)
            }
            CommandId::DriverRegisterDevice => {
                frame.verify()?;
                self.ops.register_device(&self.own_registration)
            }
            CommandId::DriverUnregisterDevice => {
                frame.verify()?;
                self.ops.unregister_device(&self.own_registration)
            }
        }
    }

    /// One add-direction matching pass over the whole rule table
    ///
    /// Report frames run the same pass; the already-active skip keeps the
    /// enumeration of long-attached devices from double-registering.
    fn handle_add(&mut self, cmd: CommandId, info: &MatchInfoTable) -> Result<()> {
        if info.interfaces.is_empty() {
            self.reset_pass_state();
            return Err(PnpError::NoInterfaces);
        }

        let mut matched_any = false;
        for index in 0..self.rules.len() {
            let Some(numbers) = self.match_rule(index, info) else {
                continue;
            };
            matched_any = true;
            if let Err(e) = self.register_match(index, info, numbers) {
                // One rule's failure never aborts the rest of the pass.
                error!(
                    "Registration for service '{}' failed: {}",
                    self.rules[index].rule.service_name, e
                );
            }
        }

        if !matched_any {
            debug!(
                "{:?}: no rule matched device (bus={}, dev={}, vid={:#06x}, pid={:#06x})",
                cmd, info.bus_num, info.dev_num, info.device.vendor_id, info.device.product_id
            );
        }
        self.reset_pass_state();
        Ok(())
    }

    /// Evaluate one rule against the payload
    ///
    /// Returns the interface numbers the registration should cover: the
    /// matched interface for selector rules, the payload's whole set for
    /// device-only rules.
    fn match_rule(&mut self, index: usize, info: &MatchInfoTable) -> Option<Vec<u8>> {
        if !device_fields_match(&self.rules[index].rule, &info.device) {
            return None;
        }

        if self.rules[index].rule.needs_interface_match() {
            for interface in &info.interfaces {
                if self.match_interface(index, interface) {
                    return Some(vec![interface.number]);
                }
            }
            return None;
        }

        let active = &mut self.rules[index];
        if active.state.accepted {
            return None;
        }
        active.state.accepted = true;
        Some(info.interfaces.iter().map(|i| i.number).collect())
    }

    /// Check one interface against a rule's selector arrays
    ///
    /// First match wins; the accept latch blocks every later interface of
    /// the same pass.
    fn match_interface(&mut self, index: usize, interface: &InterfaceDesc) -> bool {
        let active = &mut self.rules[index];
        if active.state.accepted {
            return false;
        }

        let class_ok = record_selector(
            &active.rule.interface_class,
            &mut active.state.class_mask,
            interface.class,
        );
        let sub_class_ok = record_selector(
            &active.rule.interface_sub_class,
            &mut active.state.sub_class_mask,
            interface.sub_class,
        );
        let protocol_ok = record_selector(
            &active.rule.interface_protocol,
            &mut active.state.protocol_mask,
            interface.protocol,
        );
        let number_ok = record_selector(
            &active.rule.interface_number,
            &mut active.state.number_mask,
            interface.number,
        );

        if class_ok && sub_class_ok && protocol_ok && number_ok {
            active.state.accepted = true;
            true
        } else {
            false
        }
    }

    /// Register one accepted rule, correlating with the service table
    fn register_match(&mut self, index: usize, info: &MatchInfoTable, numbers: Vec<u8>) -> Result<()> {
        let rule = &self.rules[index].rule;
        let registration = DriverRegistration {
            module_name: rule.module_name.clone(),
            service_name: rule.service_name.clone(),
            device_match_attr: rule.device_match_attr.clone(),
            dev_num: info.dev_num,
            bus_num: info.bus_num,
            interfaces: numbers.clone(),
        };

        if let Some(entry) = self.table.iter_mut().find(|entry| {
            entry.key == info.key
                && entry.dev_num == info.dev_num
                && entry.bus_num == info.bus_num
                && entry.service_name == registration.service_name
        }) {
            match entry.status {
                ServiceStatus::Add => {
                    debug!(
                        "Service '{}' already active for device (bus={}, dev={}), skipping",
                        entry.service_name, info.bus_num, info.dev_num
                    );
                    return Ok(());
                }
                ServiceStatus::Remove => {
                    self.ops.register_device(&registration)?;
                    entry.status = ServiceStatus::Add;
                    entry.interfaces = numbers;
                    info!(
                        "Re-registered service '{}' for device (bus={}, dev={})",
                        registration.service_name, info.bus_num, info.dev_num
                    );
                    return Ok(());
                }
            }
        }

        self.ops.register_device(&registration)?;
        info!(
            "Registered service '{}' for device (bus={}, dev={}), interfaces {:?}",
            registration.service_name, info.bus_num, info.dev_num, registration.interfaces
        );
        self.table.push(ServiceEntry {
            module_name: registration.module_name,
            service_name: registration.service_name,
            device_match_attr: registration.device_match_attr,
            status: ServiceStatus::Add,
            key: info.key,
            dev_num: info.dev_num,
            bus_num: info.bus_num,
            interfaces: numbers,
        });
        Ok(())
    }

    /// Undo registrations for a removed device or interface
    ///
    /// Interface-scoped removals keep their table entry with remove status
    /// so a later interface add can re-register without re-matching history.
    fn handle_remove(&mut self, cmd: CommandId, info: &MatchInfoTable) -> Result<()> {
        let interface_scoped = cmd == CommandId::RemoveInterface;
        let removed_number = if interface_scoped {
            let interface = info.interfaces.first().ok_or_else(|| {
                PnpError::InvalidParam("Interface remove payload names no interface".to_string())
            })?;
            Some(interface.number)
        } else {
            None
        };

        let mut found = false;
        let mut index = 0;
        while index < self.table.len() {
            if self.table[index].key != info.key {
                index += 1;
                continue;
            }
            if let Some(number) = removed_number
                && !self.table[index].interfaces.contains(&number)
            {
                index += 1;
                continue;
            }

            found = true;
            let registration = self.table[index].registration();
            if let Err(e) = self.ops.unregister_device(&registration) {
                error!(
                    "Unregister for service '{}' failed: {}",
                    registration.service_name, e
                );
            }

            if interface_scoped {
                self.table[index].status = ServiceStatus::Remove;
                info!(
                    "Service '{}' marked removed for device (bus={}, dev={})",
                    registration.service_name, info.bus_num, info.dev_num
                );
                index += 1;
            } else {
                self.table.remove(index);
                info!(
                    "Unregistered service '{}' for device (bus={}, dev={})",
                    registration.service_name, info.bus_num, info.dev_num
                );
            }
        }

        if !found {
            return Err(PnpError::NotFound(format!(
                "no registered service for device key {:#x}",
                info.key.0
            )));
        }
        Ok(())
    }

    /// Dry matching pass for the self-test commands; nothing is dispatched
    fn handle_test(&mut self, cmd: CommandId, info: &MatchInfoTable) -> Result<()> {
        let mut matched = Vec::new();
        for index in 0..self.rules.len() {
            if self.match_rule(index, info).is_some() {
                matched.push(self.rules[index].rule.service_name.clone());
            }
        }
        self.reset_pass_state();
        info!(
            "Self-test {:?} against sample (bus={}, dev={}) matched {:?}",
            cmd, info.bus_num, info.dev_num, matched
        );
        Ok(())
    }

    /// Clear every rule's matched-slot masks and accept latch
    fn reset_pass_state(&mut self) {
        for active in &mut self.rules {
            active.state.reset();
        }
    }
}

/// The loader service endpoint
///
/// Answers every dispatched frame with a status: [`DISPATCH_ACK`] on
/// success, the error's errno-style code otherwise.
pub struct Loader {
    engine: MatchEngine,
    receiver: DispatchReceiver,
}

impl Loader {
    pub fn new(
        rules: Vec<MatchRule>,
        loader_service: &str,
        ops: Arc<dyn DeviceManagerOps>,
        receiver: DispatchReceiver,
    ) -> Self {
        Self {
            engine: MatchEngine::new(rules, loader_service, ops),
            receiver,
        }
    }

    /// Consume dispatched frames until every sender is gone
    pub async fn run(mut self) {
        info!("Loader service '{}' ready", self.engine.service_name());

        while let Ok(request) = self.receiver.recv().await {
            let status = match self.handle_framed(&request.framed) {
                Ok(()) => DISPATCH_ACK,
                Err(e) => {
                    error!("Loader rejected frame: {}", e);
                    e.status_code()
                }
            };
            if request.reply.send(status).is_err() {
                warn!("Dispatch reply dropped, notifier gone");
            }
        }

        info!("Loader service '{}' stopped", self.engine.service_name());
    }

    fn handle_framed(&mut self, framed: &[u8]) -> Result<()> {
        let frame = decode_framed(framed)?;
        self.engine.handle_frame(&frame)
    }
}
