//! Interrupt channel dispatch
//!
//! Service requests raised by [`DeviceCore`](crate::DeviceCore) are
//! published on a broadcast channel. An [`InterruptDispatcher`] forwards
//! them to an [`InterruptSink`], which in a deployment is the outbound RPC
//! client that calls the client's `device_intr_srq`.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vxi_core::ServiceRequest;

use crate::error::InterruptError;

/// Receiver of service requests
#[async_trait]
pub trait InterruptSink: Send + Sync {
    async fn deliver(&self, request: ServiceRequest) -> Result<(), InterruptError>;
}

/// Sink that forwards service requests into an mpsc channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ServiceRequest>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ServiceRequest>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving end of a channel of `capacity`
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServiceRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl InterruptSink for ChannelSink {
    async fn deliver(&self, request: ServiceRequest) -> Result<(), InterruptError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| InterruptError::Closed)
    }
}

/// Background task forwarding service requests to a sink
pub struct InterruptDispatcher {
    handle: JoinHandle<()>,
}

impl InterruptDispatcher {
    /// Start forwarding from `requests` to `sink`
    ///
    /// The task ends when the request channel closes or the sink reports
    /// [`InterruptError::Closed`].
    pub fn spawn<S>(mut requests: broadcast::Receiver<ServiceRequest>, sink: S) -> Self
    where
        S: InterruptSink + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                match requests.recv().await {
                    Ok(request) => {
                        debug!(
                            link_id = %request.link_id,
                            device = %request.device,
                            status = request.status,
                            "Delivering service request"
                        );
                        match sink.deliver(request).await {
                            Ok(()) => {}
                            Err(InterruptError::Closed) => {
                                info!("Interrupt sink closed");
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Interrupt dispatcher lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Service request channel closed");
                        break;
                    }
                }
            }
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop forwarding
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for InterruptDispatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vxi_core::LinkId;

    fn request(status: u8) -> ServiceRequest {
        ServiceRequest {
            link_id: LinkId(1),
            device: "inst0".to_string(),
            handle: b"h".to_vec(),
            status,
        }
    }

    #[tokio::test]
    async fn test_forwards_to_channel_sink() {
        let (tx, rx) = broadcast::channel(8);
        let (sink, mut delivered) = ChannelSink::channel(8);
        let _dispatcher = InterruptDispatcher::spawn(rx, sink);

        tx.send(request(0x60)).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), delivered.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, request(0x60));
    }

    #[tokio::test]
    async fn test_stops_when_sink_closed() {
        let (tx, rx) = broadcast::channel(8);
        let (sink, delivered) = ChannelSink::channel(1);
        drop(delivered);
        let dispatcher = InterruptDispatcher::spawn(rx, sink);

        tx.send(request(0x40)).unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !dispatcher.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
