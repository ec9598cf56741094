//! Shared kernel channel.
//!
//! One channel is shared by every cell controller on a page. It fans the
//! kernel's frames out to all controllers and funnels their requests into a
//! single outbound queue:
//!
//! ```text
//! ┌──────────────┐   send()   ┌───────────────┐  next_outbound()  ┌──────────┐
//! │ Controller A │ ─────────→ │               │ ────────────────→ │          │
//! ├──────────────┤            │ SharedChannel │                   │ Endpoint │
//! │ Controller B │ ←───────── │   (fan-out)   │ ←──────────────── │          │
//! └──────────────┘   events   └───────────────┘     deliver()     └──────────┘
//! ```
//!
//! Frames and connectivity transitions travel on one ordered stream of
//! [`Inbound`] events, so a controller sees a close exactly where it happened
//! relative to the frames around it.
//!
//! The transport side holds the [`ChannelEndpoint`]. Framing, sockets and
//! reconnection live behind it and are not handled here.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Connectivity of the channel, using WebSocket ready-state names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Transport is being established
    Connecting,
    /// Frames can flow
    Open,
    /// Transport is gone
    Closed,
}

impl ConnectionStatus {
    /// Wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CONNECTING" => Ok(Self::Connecting),
            "OPEN" => Ok(Self::Open),
            "CLOSED" => Ok(Self::Closed),
            other => Err(Error::UnknownConnectivity(other.to_string())),
        }
    }
}

/// Inbound event, in the order the transport produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame from the kernel
    Frame(String),
    /// The channel moved to a new connectivity
    Connectivity(ConnectionStatus),
}

/// What a cell controller needs from the transport.
pub trait Channel: Send + Sync {
    /// Queue a text frame for the kernel. Fire-and-forget: failures surface
    /// only as a connectivity change.
    fn send(&self, frame: String);

    /// Subscribe to inbound frames and connectivity transitions, in one
    /// arrival order.
    fn subscribe(&self) -> broadcast::Receiver<Inbound>;

    /// Current connectivity.
    fn connectivity(&self) -> ConnectionStatus;
}

/// Configuration for a shared channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Inbound events buffered per subscriber before the oldest are dropped.
    pub inbound_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 1024,
        }
    }
}

impl ChannelConfig {
    /// Set the inbound buffer capacity (at least 1).
    #[must_use]
    pub fn with_inbound_capacity(mut self, capacity: usize) -> Self {
        self.inbound_capacity = capacity.max(1);
        self
    }
}

/// State shared by both halves of a channel.
#[derive(Debug)]
struct Inner {
    inbound: broadcast::Sender<Inbound>,
    connectivity: watch::Sender<ConnectionStatus>,
}

impl Inner {
    /// Move to `status`, publishing the transition if it is one.
    /// Returns the previous connectivity when it changed.
    fn transition(&self, status: ConnectionStatus) -> Option<ConnectionStatus> {
        let mut previous = None;
        self.connectivity.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            previous = Some(std::mem::replace(current, status));
            // Published under the watch lock so concurrent transitions keep
            // the order they were recorded in.
            let _ = self.inbound.send(Inbound::Connectivity(status));
            true
        });
        previous
    }

    fn status(&self) -> ConnectionStatus {
        *self.connectivity.borrow()
    }
}

/// Controller-side handle of a shared channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SharedChannel {
    outbound: mpsc::UnboundedSender<String>,
    inner: Arc<Inner>,
}

/// Transport-side handle of a shared channel.
#[derive(Debug)]
pub struct ChannelEndpoint {
    outbound: mpsc::UnboundedReceiver<String>,
    inner: Arc<Inner>,
}

impl SharedChannel {
    /// Create an open channel and its transport endpoint.
    pub fn new(config: ChannelConfig) -> (Self, ChannelEndpoint) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound, _) = broadcast::channel(config.inbound_capacity.max(1));
        let inner = Arc::new(Inner {
            inbound,
            connectivity: watch::Sender::new(ConnectionStatus::Open),
        });

        let channel = Self {
            outbound: outbound_tx,
            inner: Arc::clone(&inner),
        };
        let endpoint = ChannelEndpoint {
            outbound: outbound_rx,
            inner,
        };
        (channel, endpoint)
    }
}

impl Channel for SharedChannel {
    fn send(&self, frame: String) {
        if self.outbound.send(frame).is_err()
            && self.inner.transition(ConnectionStatus::Closed).is_some()
        {
            warn!("Channel endpoint dropped, marking channel CLOSED");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<Inbound> {
        self.inner.inbound.subscribe()
    }

    fn connectivity(&self) -> ConnectionStatus {
        self.inner.status()
    }
}

impl ChannelEndpoint {
    /// Wait for the next outbound frame. `None` once every controller-side
    /// handle is dropped.
    pub async fn next_outbound(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Take an outbound frame if one is queued.
    pub fn try_next_outbound(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// Drain every queued outbound frame.
    pub fn drain_outbound(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = self.try_next_outbound() {
            frames.push(frame);
        }
        frames
    }

    /// Hand an inbound frame to every subscribed controller.
    /// Returns how many subscribers it reached.
    pub fn deliver(&self, frame: impl Into<String>) -> usize {
        match self.inner.inbound.send(Inbound::Frame(frame.into())) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("Inbound frame dropped, no subscribers");
                0
            }
        }
    }

    /// Publish a connectivity change. Every transition reaches subscribers
    /// as its own event, however quickly the next one follows.
    pub fn set_connectivity(&self, status: ConnectionStatus) {
        if let Some(previous) = self.inner.transition(status) {
            info!("Channel connectivity {} -> {}", previous, status);
        }
    }

    /// Mark the channel closed.
    pub fn close(&self) {
        self.set_connectivity(ConnectionStatus::Closed);
    }

    /// Current connectivity.
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut broadcast::Receiver<Inbound>) -> Vec<Inbound> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn connectivity_names() {
        assert_eq!(ConnectionStatus::Closed.to_string(), "CLOSED");
        assert_eq!("OPEN".parse::<ConnectionStatus>().unwrap(), ConnectionStatus::Open);
        assert!(matches!(
            "closed".parse::<ConnectionStatus>(),
            Err(Error::UnknownConnectivity(_))
        ));
    }

    #[test]
    fn config_builder() {
        assert_eq!(ChannelConfig::default().inbound_capacity, 1024);
        assert_eq!(ChannelConfig::default().with_inbound_capacity(0).inbound_capacity, 1);
        assert_eq!(ChannelConfig::default().with_inbound_capacity(8).inbound_capacity, 8);
    }

    #[test]
    fn outbound_frames_keep_order() {
        let (channel, mut endpoint) = SharedChannel::new(ChannelConfig::default());
        let other = channel.clone();
        channel.send("a".into());
        other.send("b".into());
        channel.send("c".into());
        assert_eq!(endpoint.drain_outbound(), vec!["a", "b", "c"]);
        assert_eq!(endpoint.try_next_outbound(), None);
    }

    #[test]
    fn inbound_fans_out() {
        let (channel, endpoint) = SharedChannel::new(ChannelConfig::default());
        let mut first = channel.subscribe();
        let mut second = channel.subscribe();

        assert_eq!(endpoint.deliver("one"), 2);
        assert_eq!(first.try_recv().unwrap(), Inbound::Frame("one".into()));
        assert_eq!(second.try_recv().unwrap(), Inbound::Frame("one".into()));
    }

    #[test]
    fn deliver_without_subscribers() {
        let (_channel, endpoint) = SharedChannel::new(ChannelConfig::default());
        assert_eq!(endpoint.deliver("lost"), 0);
    }

    #[test]
    fn close_is_observed() {
        let (channel, endpoint) = SharedChannel::new(ChannelConfig::default());
        let mut rx = channel.subscribe();
        assert_eq!(channel.connectivity(), ConnectionStatus::Open);

        endpoint.close();
        assert_eq!(drain(&mut rx), vec![Inbound::Connectivity(ConnectionStatus::Closed)]);
        assert_eq!(channel.connectivity(), ConnectionStatus::Closed);
        assert_eq!(endpoint.status(), ConnectionStatus::Closed);
    }

    #[test]
    fn quick_transitions_are_all_published() {
        let (channel, endpoint) = SharedChannel::new(ChannelConfig::default());
        let mut rx = channel.subscribe();

        endpoint.close();
        endpoint.close();
        endpoint.set_connectivity(ConnectionStatus::Connecting);
        endpoint.set_connectivity(ConnectionStatus::Open);

        assert_eq!(
            drain(&mut rx),
            vec![
                Inbound::Connectivity(ConnectionStatus::Closed),
                Inbound::Connectivity(ConnectionStatus::Connecting),
                Inbound::Connectivity(ConnectionStatus::Open),
            ]
        );
        assert_eq!(channel.connectivity(), ConnectionStatus::Open);
    }

    #[test]
    fn frames_and_transitions_share_one_order() {
        let (channel, endpoint) = SharedChannel::new(ChannelConfig::default());
        let mut rx = channel.subscribe();

        endpoint.deliver("before");
        endpoint.close();
        endpoint.deliver("after");

        assert_eq!(
            drain(&mut rx),
            vec![
                Inbound::Frame("before".into()),
                Inbound::Connectivity(ConnectionStatus::Closed),
                Inbound::Frame("after".into()),
            ]
        );
    }

    #[test]
    fn send_after_endpoint_drop_closes() {
        let (channel, endpoint) = SharedChannel::new(ChannelConfig::default());
        let mut rx = channel.subscribe();
        drop(endpoint);

        channel.send("nobody listens".into());
        channel.send("still nobody".into());
        assert_eq!(channel.connectivity(), ConnectionStatus::Closed);
        assert_eq!(drain(&mut rx), vec![Inbound::Connectivity(ConnectionStatus::Closed)]);
    }

    #[test]
    fn next_outbound_waits_for_frame() {
        let (channel, mut endpoint) = SharedChannel::new(ChannelConfig::default());
        channel.send("ping".into());
        let frame = tokio_test::block_on(endpoint.next_outbound());
        assert_eq!(frame.as_deref(), Some("ping"));

        drop(channel);
        assert_eq!(tokio_test::block_on(endpoint.next_outbound()), None);
    }
}
