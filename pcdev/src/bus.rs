//! Bus event runtime
//!
//! The bus side of the driver: attach and detach events arrive as requests
//! on a channel and are answered through a oneshot. Every event runs on the
//! blocking pool, so a detach that waits for sessions to drain never stalls
//! the loop, and events for different slots proceed concurrently.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::config::StaticRecord;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::record::DeviceInfo;
use crate::tree::TreeNode;

/// A device instance became available
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttachEvent {
    /// Matched against the identifier table or the tree kinds
    pub kind: String,
    /// Instance number assigned by the bus; also the slot of the device
    #[serde(default)]
    pub sequence_id: usize,
    #[serde(default)]
    pub static_record: Option<StaticRecord>,
    #[serde(default)]
    pub tree_node: Option<TreeNode>,
}

/// A device instance went away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DetachEvent {
    pub sequence_id: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Attach(AttachEvent),
    Detach(DetachEvent),
}

impl BusEvent {
    #[must_use]
    pub fn sequence_id(&self) -> usize {
        match self {
            Self::Attach(event) => event.sequence_id,
            Self::Detach(event) => event.sequence_id,
        }
    }
}

/// Answer to a [`BusEvent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusReply {
    Attached(DeviceInfo),
    Detached,
}

/// Event together with the channel its answer goes to
pub struct BusRequest {
    pub event: BusEvent,
    pub response: oneshot::Sender<Result<BusReply>>,
}

/// An event that has been processed
pub struct BusCompletion {
    sequence_id: usize,
    result: Result<BusReply>,
    response: oneshot::Sender<Result<BusReply>>,
}

/// Type alias for event futures
pub type BusFuture = Pin<Box<dyn Future<Output = BusCompletion> + Send>>;

/// Delivers bus events to a [`Driver`]
pub struct BusRuntime<H: Host + 'static> {
    driver: Arc<Driver<H>>,
    /// Channel to send requests to this runtime (None after `run()` starts)
    bus_tx: Option<mpsc::UnboundedSender<BusRequest>>,
    request_rx: mpsc::UnboundedReceiver<BusRequest>,
}

impl<H: Host + 'static> BusRuntime<H> {
    pub fn new(driver: Arc<Driver<H>>) -> Self {
        let (bus_tx, request_rx) = mpsc::unbounded_channel();
        Self {
            driver,
            bus_tx: Some(bus_tx),
            request_rx,
        }
    }

    /// Get a client for sending events
    ///
    /// # Errors
    /// `ShutDown` once `run()` has started.
    pub fn client(&self) -> Result<BusClient> {
        let tx = self.bus_tx.as_ref().ok_or(Error::ShutDown)?;
        Ok(BusClient { tx: tx.clone() })
    }

    fn handle_event(
        &self,
        event: BusEvent,
        response: oneshot::Sender<Result<BusReply>>,
    ) -> BusFuture {
        let sequence_id = event.sequence_id();
        let driver = Arc::clone(&self.driver);
        trace!(sequence_id, "spawning event handler");

        let handle = tokio::task::spawn_blocking(move || match event {
            BusEvent::Attach(event) => driver.attach(&event).map(BusReply::Attached),
            BusEvent::Detach(event) => driver
                .detach_timeout(event.sequence_id, driver.settings().detach_timeout())
                .map(|()| BusReply::Detached),
        });

        Box::pin(async move {
            let result = handle.await.unwrap_or_else(|e| {
                Err(Error::Host {
                    op: "bus event",
                    reason: e.to_string(),
                })
            });
            BusCompletion {
                sequence_id,
                result,
                response,
            }
        })
    }

    fn handle_completion(completion: BusCompletion) {
        match &completion.result {
            Ok(reply) => debug!(sequence_id = completion.sequence_id, ?reply, "event done"),
            Err(e) => warn!(sequence_id = completion.sequence_id, error = %e, "event failed"),
        }
        let _ = completion.response.send(completion.result);
    }

    /// Main event loop
    ///
    /// Returns once every client is dropped and all events are answered.
    pub async fn run(mut self) {
        // Drop our copy of the sender so the channel closes with the last client
        drop(self.bus_tx.take());

        let mut pending: FuturesUnordered<BusFuture> = FuturesUnordered::new();
        let mut request_rx_open = true;

        loop {
            if !request_rx_open && pending.is_empty() {
                info!("no more bus events, exiting");
                break;
            }

            tokio::select! {
                request = self.request_rx.recv(), if request_rx_open => {
                    if let Some(BusRequest { event, response }) = request {
                        let fut = self.handle_event(event, response);
                        pending.push(fut);
                    } else {
                        debug!("bus channel closed");
                        request_rx_open = false;
                    }
                }

                Some(completion) = pending.next(), if !pending.is_empty() => {
                    Self::handle_completion(completion);
                }
            }
        }
    }
}

/// Sending side of the bus
#[derive(Clone)]
pub struct BusClient {
    tx: mpsc::UnboundedSender<BusRequest>,
}

impl BusClient {
    /// Deliver an event and wait for its answer
    ///
    /// # Errors
    /// The driver's error, or `ShutDown` if the runtime is gone.
    pub async fn send(&self, event: BusEvent) -> Result<BusReply> {
        let (response, rx) = oneshot::channel();
        self.tx
            .send(BusRequest { event, response })
            .map_err(|_| Error::ShutDown)?;
        rx.await.map_err(|_| Error::ShutDown)?
    }

    /// # Errors
    /// See [`Driver::attach`].
    pub async fn attach(&self, event: AttachEvent) -> Result<DeviceInfo> {
        match self.send(BusEvent::Attach(event)).await? {
            BusReply::Attached(info) => Ok(info),
            BusReply::Detached => Err(Error::Host {
                op: "attach",
                reason: "unexpected reply".to_string(),
            }),
        }
    }

    /// # Errors
    /// See [`Driver::detach_timeout`].
    pub async fn detach(&self, sequence_id: usize) -> Result<()> {
        self.send(BusEvent::Detach(DetachEvent { sequence_id }))
            .await
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memhost::MemHost;
    use crate::settings::DriverSettings;

    fn attach_event(slot: usize) -> AttachEvent {
        AttachEvent {
            kind: "pcdev-C1x".to_string(),
            sequence_id: slot,
            static_record: Some(StaticRecord {
                size: 32,
                perm: 0x11,
                serial_number: format!("SN{slot}"),
            }),
            tree_node: None,
        }
    }

    #[tokio::test]
    async fn test_events_round_trip() {
        let host = Arc::new(MemHost::new());
        let driver = Arc::new(Driver::setup(host, DriverSettings::default()).unwrap());
        let runtime = BusRuntime::new(Arc::clone(&driver));
        let client = runtime.client().unwrap();
        let task = tokio::spawn(runtime.run());

        let info = client.attach(attach_event(3)).await.unwrap();
        assert_eq!(info.slot, 3);
        assert_eq!(driver.total_devices(), 1);

        client.detach(3).await.unwrap();
        assert_eq!(driver.total_devices(), 0);

        drop(client);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_errors_are_forwarded() {
        let host = Arc::new(MemHost::new());
        let driver = Arc::new(Driver::setup(host, DriverSettings::default()).unwrap());
        let runtime = BusRuntime::new(Arc::clone(&driver));
        let client = runtime.client().unwrap();
        let task = tokio::spawn(runtime.run());

        let mut event = attach_event(0);
        event.static_record = None;
        assert_eq!(client.attach(event).await, Err(Error::NoConfigData));

        drop(client);
        task.await.unwrap();
    }
}
