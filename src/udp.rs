//! An optional tokio-based driver around the endpoint core for applications
//!  that do not want to wire up the event loop themselves. It listens on a
//!  UdpSocket, keeps one [`Endpoint`] per peer address, drives the periodic
//!  housekeeping tick, and fans the core's notifications out to an async
//!  [`MessageDispatcher`].
//!
//! The core stays clock-free: the driver feeds it the time elapsed since the
//!  driver was constructed.

use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use rustc_hash::FxHashMap;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{debug, error, info, span, trace, Instrument, Level};
use uuid::Uuid;

use crate::config::EndpointConfig;
use crate::endpoint::Endpoint;
use crate::listener::EndpointListener;
use crate::packet_sink::PacketSink;
use crate::stats::EndpointStats;

/// Application-side callbacks, invoked from the driver's loops.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageDispatcher: Send + Sync + 'static {
    async fn on_message(&self, from: SocketAddr, msg_buf: &[u8]);

    async fn on_ack(&self, peer: SocketAddr, sequence: u16);

    async fn on_loss(&self, peer: SocketAddr, sequence: u16);
}

/// Sink handing finished wire packets to the shared socket. `try_send_to`
///  never blocks; a datagram dropped because the socket is not ready is
///  handled like any other datagram loss.
struct UdpSink {
    socket: Arc<UdpSocket>,
    peer_addr: SocketAddr,
}
impl PacketSink for UdpSink {
    fn send_packet(&self, packet: &[u8]) {
        trace!("UDP socket: sending packet to {:?}", self.peer_addr);

        if let Err(e) = self.socket.try_send_to(packet, self.peer_addr) {
            error!("error sending UDP packet to {:?}: {}", self.peer_addr, e);
        }
    }
}

enum EndpointEvent {
    Received(Vec<u8>),
    Acked(u16),
    Lost(u16),
}

/// Adapter between the core's synchronous listener and the async
///  dispatcher: notifications are buffered while the per-peer lock is held
///  and dispatched after it is released.
#[derive(Default)]
struct EventCollector {
    events: StdMutex<Vec<EndpointEvent>>,
}
impl EventCollector {
    fn drain(&self) -> Vec<EndpointEvent> {
        std::mem::take(&mut *self.events.lock().expect("event collector mutex poisoned"))
    }

    fn push(&self, event: EndpointEvent) {
        self.events.lock().expect("event collector mutex poisoned").push(event);
    }
}
impl EndpointListener for EventCollector {
    fn on_packet_received(&self, payload: &[u8]) {
        self.push(EndpointEvent::Received(payload.to_vec()));
    }

    fn on_packet_acked(&self, sequence: u16) {
        self.push(EndpointEvent::Acked(sequence));
    }

    fn on_packet_lost(&self, sequence: u16) {
        self.push(EndpointEvent::Lost(sequence));
    }
}

struct UdpPeer {
    endpoint: Endpoint,
    events: Arc<EventCollector>,
}

pub struct UdpEndpoint {
    socket: Arc<UdpSocket>,
    config: Arc<EndpointConfig>,
    dispatcher: Arc<dyn MessageDispatcher>,
    peers: Mutex<FxHashMap<SocketAddr, UdpPeer>>,
    epoch: Instant,
}

impl UdpEndpoint {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        config: Arc<EndpointConfig>,
        dispatcher: Arc<dyn MessageDispatcher>,
    ) -> anyhow::Result<UdpEndpoint> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("bound receive socket to {:?}", socket.local_addr()?);

        Ok(UdpEndpoint {
            socket,
            config,
            dispatcher,
            peers: Default::default(),
            epoch: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    pub async fn send_to(&self, to: SocketAddr, payload: &[u8]) -> anyhow::Result<u16> {
        let now = self.now();
        let events;
        let sequence;
        {
            let mut peers = self.peers.lock().await;
            let peer = self.get_or_create_peer(&mut peers, to)?;
            sequence = peer.endpoint.send(now, payload)?;
            events = peer.events.drain();
        }
        self.dispatch(to, events).await;
        Ok(sequence)
    }

    pub async fn peer_stats(&self, peer_addr: SocketAddr) -> Option<EndpointStats> {
        self.peers.lock().await
            .get(&peer_addr)
            .map(|peer| peer.endpoint.stats())
    }

    /// Receive loop - this function never returns, it runs until the task
    ///  driving it is dropped
    pub async fn recv_loop(&self) {
        info!("starting receive loop");

        let mut buf = vec![0u8; 65536];
        loop {
            let (num_read, from) = match self.socket.recv_from(&mut buf).await {
                Ok(x) => {
                    x
                }
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };

            let correlation_id = Uuid::new_v4();
            let span = span!(Level::TRACE, "packet_received", ?correlation_id);
            self.handle_packet(from, &buf[..num_read]).instrument(span).await;
        }
    }

    async fn handle_packet(&self, from: SocketAddr, packet: &[u8]) {
        trace!("received packet from {:?} ({} bytes)", from, packet.len());

        let now = self.now();
        let events = {
            let mut peers = self.peers.lock().await;
            let peer = match self.get_or_create_peer(&mut peers, from) {
                Ok(peer) => peer,
                Err(e) => {
                    error!("could not initialize endpoint for peer {:?}: {}", from, e);
                    return;
                }
            };
            peer.endpoint.receive(now, packet);
            peer.events.drain()
        };
        self.dispatch(from, events).await;
    }

    /// Housekeeping loop driving the loss sweep and bandwidth windows of
    ///  every peer endpoint - this function never returns either
    pub async fn update_loop(&self) {
        let mut tick = interval(self.config.update_interval);
        loop {
            tick.tick().await;

            let now = self.now();
            let mut dispatches = Vec::new();
            {
                let mut peers = self.peers.lock().await;
                for (&peer_addr, peer) in peers.iter_mut() {
                    peer.endpoint.update(now);
                    let events = peer.events.drain();
                    if !events.is_empty() {
                        dispatches.push((peer_addr, events));
                    }
                }
            }
            for (peer_addr, events) in dispatches {
                self.dispatch(peer_addr, events).await;
            }
        }
    }

    fn get_or_create_peer<'a>(
        &self,
        peers: &'a mut FxHashMap<SocketAddr, UdpPeer>,
        peer_addr: SocketAddr,
    ) -> anyhow::Result<&'a mut UdpPeer> {
        match peers.entry(peer_addr) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                debug!("initializing endpoint for peer {:?}", peer_addr);
                let events = Arc::new(EventCollector::default());
                let endpoint = Endpoint::new(
                    self.config.clone(),
                    Arc::new(UdpSink {
                        socket: self.socket.clone(),
                        peer_addr,
                    }),
                    events.clone(),
                )?;
                Ok(e.insert(UdpPeer { endpoint, events }))
            }
        }
    }

    async fn dispatch(&self, peer_addr: SocketAddr, events: Vec<EndpointEvent>) {
        for event in events {
            match event {
                EndpointEvent::Received(payload) => self.dispatcher.on_message(peer_addr, &payload).await,
                EndpointEvent::Acked(sequence) => self.dispatcher.on_ack(peer_addr, sequence).await,
                EndpointEvent::Lost(sequence) => self.dispatcher.on_loss(peer_addr, sequence).await,
            }
        }
    }
}
