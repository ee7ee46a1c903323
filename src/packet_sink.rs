#[cfg(test)] use mockall::automock;
use tracing::{error, trace};

/// This is an abstraction for handing finished wire packets to the actual
///  datagram transport, introduced to keep all I/O out of the endpoint core
///  and to facilitate mocking for testing
#[cfg_attr(test, automock)]
pub trait PacketSink: Send + Sync + 'static {
    fn send_packet(&self, packet: &[u8]);
}

/// Sink backed by a connected UDP socket. Send errors are logged and
///  swallowed - a dropped datagram is exactly what the reliability layer
///  exists to detect.
impl PacketSink for std::net::UdpSocket {
    fn send_packet(&self, packet: &[u8]) {
        trace!("UDP socket: sending packet ({} bytes)", packet.len());

        if let Err(e) = self.send(packet) {
            error!("error sending UDP packet: {}", e);
        }
    }
}
