//! Async channel bridges between the Tokio runtime and the PnP threads
//!
//! Two bounded channels connect the pipeline stages. The event channel feeds
//! the notifier thread with queued [`PnpEvent`]s; producers post from either
//! async context (service API) or blocking context (hotplug observer). The
//! dispatch channel carries framed payloads from the notifier thread to the
//! loader endpoint, with a oneshot reply per frame carrying the loader's
//! status answer.
//!
//! Events are consumed strictly in channel order; a burst of posts queues up
//! instead of overwriting a single pending slot, so an add immediately
//! followed by a remove delivers both.

use async_channel::{Receiver, Sender, bounded};
use protocol::{DeviceKey, DeviceSnapshot, InterfaceChangeRequest};

/// Queued PnP events consumed by the notifier thread
#[derive(Debug, Clone)]
pub enum PnpEvent {
    /// A whole device was attached; carries the descriptor snapshot taken
    /// at observation time
    AddDevice {
        /// Snapshot of the attached device
        snapshot: DeviceSnapshot,
    },

    /// A whole device was detached
    RemoveDevice {
        /// Identity key recorded when the device was added
        key: DeviceKey,
    },

    /// A consumer claimed one interface of a tracked device
    AddInterface {
        /// Which device and which interface
        request: InterfaceChangeRequest,
    },

    /// A consumer released one interface of a tracked device
    RemoveInterface {
        /// Which device and which interface
        request: InterfaceChangeRequest,
    },

    /// Enumerate already-attached devices toward the loader
    Report,

    /// Self-test: dispatch the fixed add sample
    AddTest,

    /// Self-test: dispatch the fixed remove sample
    RemoveTest,

    /// Stop the notifier thread after draining nothing further
    Shutdown,
}

/// One framed payload awaiting the loader's status reply
#[derive(Debug)]
pub struct DispatchRequest {
    /// Length-prefixed frame bytes
    pub framed: Vec<u8>,
    /// Status reply channel; the loader answers every frame
    pub reply: tokio::sync::oneshot::Sender<i32>,
}

/// Producer face of the event channel
///
/// Cloneable; usable from async tasks and from plain threads.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<PnpEvent>,
}

impl EventSender {
    /// Post an event from async context
    pub async fn send(&self, event: PnpEvent) -> crate::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Post an event from a blocking thread
    pub fn send_blocking(&self, event: PnpEvent) -> crate::Result<()> {
        self.tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Consumer face of the event channel, held by the notifier thread
pub struct EventReceiver {
    rx: Receiver<PnpEvent>,
}

impl EventReceiver {
    /// Block until the next event arrives
    ///
    /// Errors only when every sender is gone, which the notifier treats the
    /// same as an explicit shutdown.
    pub fn recv_blocking(&self) -> crate::Result<PnpEvent> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the bounded event channel
pub fn create_event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = bounded(256);
    (EventSender { tx }, EventReceiver { rx })
}

/// Producer face of the dispatch channel, held by the notifier thread
#[derive(Clone)]
pub struct DispatchSender {
    tx: Sender<DispatchRequest>,
}

impl DispatchSender {
    /// Send a frame and block until the loader answers with a status
    pub fn dispatch_blocking(&self, framed: Vec<u8>) -> crate::Result<i32> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.tx
            .send_blocking(DispatchRequest { framed, reply })
            .map_err(|e| crate::Error::Channel(e.to_string()))?;
        rx.blocking_recv()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send a frame from async context and await the loader's status
    pub async fn dispatch(&self, framed: Vec<u8>) -> crate::Result<i32> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.tx
            .send(DispatchRequest { framed, reply })
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))?;
        rx.await.map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Consumer face of the dispatch channel, held by the loader endpoint
pub struct DispatchReceiver {
    rx: Receiver<DispatchRequest>,
}

impl DispatchReceiver {
    /// Await the next frame
    pub async fn recv(&self) -> crate::Result<DispatchRequest> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Block until the next frame arrives
    pub fn recv_blocking(&self) -> crate::Result<DispatchRequest> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the bounded dispatch channel
pub fn create_dispatch_channel() -> (DispatchSender, DispatchReceiver) {
    let (tx, rx) = bounded(256);
    (DispatchSender { tx }, DispatchReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_channel_bridges_async_to_thread() {
        let (sender, receiver) = create_event_channel();

        let handle = std::thread::spawn(move || {
            let event = receiver.recv_blocking().unwrap();
            matches!(event, PnpEvent::Report)
        });

        sender.send(PnpEvent::Report).await.unwrap();
        assert!(handle.join().unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dispatch_reply_roundtrip() {
        let (sender, receiver) = create_dispatch_channel();

        // Loader side answers with the frame length as a status
        let loader = tokio::spawn(async move {
            let request = receiver.recv().await.unwrap();
            let status = request.framed.len() as i32;
            request.reply.send(status).unwrap();
        });

        // Notifier side runs on a plain thread
        let notifier = std::thread::spawn(move || sender.dispatch_blocking(vec![1, 2, 3]));

        let status = notifier.join().unwrap().unwrap();
        assert_eq!(status, 3);
        loader.await.unwrap();
    }

    #[test]
    fn test_event_order_is_preserved() {
        let (sender, receiver) = create_event_channel();

        sender
            .send_blocking(PnpEvent::AddDevice {
                snapshot: protocol::DeviceSnapshot {
                    key: DeviceKey(1),
                    dev_num: 1,
                    bus_num: 1,
                    fields: protocol::DeviceFields {
                        vendor_id: 0,
                        product_id: 0,
                        bcd_device_low: 0,
                        bcd_device_high: 0,
                        class: 0,
                        sub_class: 0,
                        protocol: 0,
                    },
                    interfaces: vec![],
                },
            })
            .unwrap();
        sender
            .send_blocking(PnpEvent::RemoveDevice { key: DeviceKey(1) })
            .unwrap();

        // Both events are delivered, in order; nothing is overwritten
        assert!(matches!(
            receiver.recv_blocking().unwrap(),
            PnpEvent::AddDevice { .. }
        ));
        assert!(matches!(
            receiver.recv_blocking().unwrap(),
            PnpEvent::RemoveDevice { .. }
        ));
    }
}
