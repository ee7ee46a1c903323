//! A connectionless acknowledgment layer on top of an unreliable datagram
//!  transport (typically UDP). It tells a sender which of its datagrams
//!  arrived at the peer and which were lost, with low latency and strictly
//!  bounded memory - without imposing ordering or resending anything on its
//!  own.
//!
//! ## Design goals
//!
//! * The abstraction is sending / receiving *datagrams* (defined-length
//!   chunks of data), not streams of bytes
//! * Every outgoing packet carries acknowledgment information for recently
//!   received packets, so acks piggyback on regular traffic and cost no
//!   extra datagrams
//!   * one header acknowledges up to 33 packets (the latest received
//!     sequence number plus 32 bits of history), which tolerates loss and
//!     reordering of the ack-carrying packets themselves as long as gaps
//!     stay below 32 packets
//! * The layer classifies sent packets as *acked* or *lost* and reports
//!   that to the caller - what to do about a lost packet (resend, drop,
//!   send newer state instead) is deliberately left to the application
//! * Payloads larger than a configured threshold are split into numbered
//!   fragments and transparently reassembled on the receiving side
//!   * incomplete fragment sets are discarded when newer packets push them
//!     out of the reassembly window - partial reassemblies can never
//!     accumulate without bound
//! * All state lives in fixed-capacity circular buffers allocated up front;
//!   adversarial loss or reordering patterns cannot grow memory
//! * The core is a single-threaded, synchronous state machine: it performs
//!   no I/O, spawns no tasks and never reads a clock - the caller feeds it
//!   the current time, which makes all timing behavior deterministic and
//!   testable
//! * Socket handling is behind a small trait; an optional tokio-based UDP
//!   driver is provided for applications that do not want to wire up the
//!   event loop themselves
//!
//! ## Header
//!
//! Packet header - all numbers in network byte order (BE):
//! ```ascii
//! 0:  flags (8 bits):
//!     * bit 0: fragment - the packet is one fragment of a larger payload
//!     * bits 1-7: unused, must be 0
//! 1:  sequence (u16): sequence number of this packet (fragments of one
//!      payload all carry the packet's sequence number)
//! 3:  ack (u16): the latest sequence number received from the peer
//! 5:  ack bits (u32): bit k set means `ack - (k + 1)` was received, too
//! — only if the fragment flag is set —
//! 9:  fragment id (u8)
//! 10: fragment count minus one (u8) - a payload splits into 1..=256
//!      fragments
//! *:  payload
//! ```
//!
//! ## Non-goals
//!
//! * guaranteed or in-order delivery - this is a classification layer, not
//!   TCP
//! * congestion control beyond exposing RTT / jitter / loss / bandwidth
//!   estimates
//! * encryption and checksumming - assumed to be handled by an adjacent
//!   layer
//! * multiplexing of logical streams

pub mod config;
pub mod endpoint;
mod fragmentation;
pub mod listener;
pub mod packet_header;
pub mod packet_sink;
pub mod safe_converter;
pub mod sequence;
pub mod sequence_buffer;
pub mod stats;
pub mod udp;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor(unsafe)]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
