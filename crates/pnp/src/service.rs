//! PnP service orchestration
//!
//! Wires the pipeline together: registry and attached set, the event channel
//! into the notifier thread, the dispatch channel into the loader task, and
//! optionally the USB hotplug observer. [`PnpCore`] is the shared state plus
//! the event entry points; [`PnpService`] owns the running pieces and tears
//! them down in order.

use crate::config::Config;
use crate::error::{PnpError, Result};
use crate::hotplug::{HotplugObserver, ObserverHandle};
use crate::loader::{DeviceManagerOps, Loader};
use crate::notifier::Notifier;
use crate::registry::{AttachedSet, Registry};
use common::{EventSender, PnpEvent, create_dispatch_channel, create_event_channel};
use protocol::{DeviceId, DeviceKey, DeviceSnapshot, InterfaceChangeRequest};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info};

/// Shared pipeline state and the event entry points
///
/// Cloned into the hotplug observer and held by the service front end. The
/// attach/detach entry points are callable from plain threads; the request
/// API is async.
pub struct PnpCore {
    registry: Arc<Registry>,
    attached: Arc<AttachedSet>,
    events: EventSender,
}

impl PnpCore {
    fn new(registry: Arc<Registry>, attached: Arc<AttachedSet>, events: EventSender) -> Self {
        Self {
            registry,
            attached,
            events,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn attached(&self) -> &AttachedSet {
        &self.attached
    }

    /// Track an arriving device and queue its announcement
    ///
    /// Duplicate observations of the same key are ignored and answer `None`.
    /// When queueing fails the just-created record is rolled back so the
    /// device can attach cleanly later.
    pub fn observe_attach(&self, snapshot: DeviceSnapshot) -> Result<Option<DeviceId>> {
        if !self.attached.insert(snapshot.key) {
            debug!(
                "Duplicate attach for device key {:#x} ignored",
                snapshot.key.0
            );
            return Ok(None);
        }

        let record = self.registry.create(snapshot.clone());
        if let Err(e) = self.events.send_blocking(PnpEvent::AddDevice { snapshot }) {
            let _ = self.registry.destroy(record.id());
            self.attached.remove(record.key());
            return Err(e.into());
        }
        Ok(Some(record.id()))
    }

    /// Queue the announcement for a departing device
    ///
    /// Detaches for keys never observed attached are ignored.
    pub fn observe_detach(&self, key: DeviceKey) -> Result<()> {
        if !self.attached.remove(key) {
            debug!("Detach for unobserved device key {:#x} ignored", key.0);
            return Ok(());
        }
        self.events.send_blocking(PnpEvent::RemoveDevice { key })?;
        Ok(())
    }

    /// Queue an interface claim or release
    ///
    /// The request must address a tracked device and name an interface that
    /// device actually declares.
    pub async fn queue_interface_change(
        &self,
        request: InterfaceChangeRequest,
        removing: bool,
    ) -> Result<()> {
        let record = self
            .registry
            .find((request.bus_num, request.dev_num))
            .ok_or_else(|| {
                PnpError::NotFound(format!(
                    "no tracked device at (bus={}, dev={})",
                    request.bus_num, request.dev_num
                ))
            })?;
        if !record.snapshot().interfaces.contains(&request.interface) {
            return Err(PnpError::InvalidParam(format!(
                "Interface {} not declared by device (bus={}, dev={})",
                request.interface.number, request.bus_num, request.dev_num
            )));
        }

        let event = if removing {
            PnpEvent::RemoveInterface { request }
        } else {
            PnpEvent::AddInterface { request }
        };
        self.events.send(event).await?;
        Ok(())
    }

    /// Queue a re-announcement of every attached device
    pub async fn report(&self) -> Result<()> {
        self.events.send(PnpEvent::Report).await?;
        Ok(())
    }

    /// Queue the fixed add self-test sample
    pub async fn add_test(&self) -> Result<()> {
        self.events.send(PnpEvent::AddTest).await?;
        Ok(())
    }

    /// Queue the fixed remove self-test sample
    pub async fn remove_test(&self) -> Result<()> {
        self.events.send(PnpEvent::RemoveTest).await?;
        Ok(())
    }
}

/// The running PnP pipeline
///
/// Constructed by [`PnpService::start`]; must be taken down through
/// [`PnpService::shutdown`], otherwise the notifier thread keeps running.
pub struct PnpService {
    core: Arc<PnpCore>,
    notifier: Option<thread::JoinHandle<()>>,
    loader: Option<tokio::task::JoinHandle<()>>,
    observer: Option<ObserverHandle>,
}

impl PnpService {
    /// Wire the channels and start the notifier thread and loader task
    ///
    /// Requires a running Tokio runtime; the loader endpoint is spawned onto
    /// it. The hotplug observer is separate, see [`attach_observer`].
    ///
    /// [`attach_observer`]: PnpService::attach_observer
    pub fn start(config: &Config, ops: Arc<dyn DeviceManagerOps>) -> Self {
        let registry = Arc::new(Registry::new());
        let attached = Arc::new(AttachedSet::new());
        let (events, event_rx) = create_event_channel();
        let (dispatch_tx, dispatch_rx) = create_dispatch_channel();

        let core = Arc::new(PnpCore::new(registry.clone(), attached.clone(), events));

        let loader = Loader::new(
            config.pnp.match_rules.clone(),
            &config.pnp.loader_service,
            ops,
            dispatch_rx,
        );
        let loader = tokio::spawn(loader.run());

        let notifier = Notifier::new(registry, attached, event_rx, dispatch_tx).spawn();

        info!("PnP service started");
        Self {
            core,
            notifier: Some(notifier),
            loader: Some(loader),
            observer: None,
        }
    }

    pub fn core(&self) -> &Arc<PnpCore> {
        &self.core
    }

    /// Start observing real USB buses
    ///
    /// Enumerates present devices once and registers hotplug callbacks.
    /// Separate from [`PnpService::start`] so hosts without bus access, and
    /// tests, can drive the pipeline through [`PnpCore`] alone.
    pub fn attach_observer(&mut self) -> Result<()> {
        let observer = HotplugObserver::new(self.core.clone())?;
        self.observer = Some(observer.start()?);
        Ok(())
    }

    /// Queue an interface claim for a tracked device
    pub async fn add_interface(&self, request: InterfaceChangeRequest) -> Result<()> {
        self.core.queue_interface_change(request, false).await
    }

    /// Queue an interface release for a tracked device
    pub async fn remove_interface(&self, request: InterfaceChangeRequest) -> Result<()> {
        self.core.queue_interface_change(request, true).await
    }

    /// Re-announce every attached device toward the loader
    pub async fn report(&self) -> Result<()> {
        self.core.report().await
    }

    /// Stop everything, in dependency order
    ///
    /// The observer goes first so no new observations arrive, then the
    /// notifier drains up to the shutdown event, and finally the loader ends
    /// when the notifier's dispatch sender is gone.
    pub async fn shutdown(mut self) {
        info!("PnP service stopping");

        if let Some(observer) = self.observer.take() {
            observer.shutdown();
        }

        if self.core.events.send(PnpEvent::Shutdown).await.is_err() {
            debug!("Notifier already gone at shutdown");
        }
        if let Some(handle) = self.notifier.take()
            && handle.join().is_err()
        {
            error!("Notifier thread panicked");
        }

        if let Some(handle) = self.loader.take()
            && let Err(e) = handle.await
        {
            error!("Loader task failed: {}", e);
        }

        info!("PnP service stopped");
    }
}
