//! The endpoint is the place where all other parts of the protocol come
//!  together: it stamps outgoing payloads with sequence numbers and ack
//!  headers, fragments oversized payloads, parses incoming packets, matches
//!  acknowledgments against the sent-packet window, reassembles fragments,
//!  and maintains the RTT / jitter / loss / bandwidth estimators.
//!
//! The endpoint is a synchronous, single-writer state machine: `send`,
//!  `receive` and `update` never block and perform no I/O - finished wire
//!  packets go to a [`PacketSink`], received payloads and ack/loss
//!  classifications are raised on an [`EndpointListener`], and the current
//!  time is passed in by the caller. Loss is declared in exactly one place:
//!  the periodic sweep in `update`, once a sent packet stayed unacknowledged
//!  past an RTT-derived timeout. A missing ack alone is never enough, which
//!  makes the classification robust against lost or reordered ack headers.

use std::cmp;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use bytes::{BufMut, BytesMut};
use tracing::{debug, trace};

use crate::config::EndpointConfig;
use crate::fragmentation::{FragmentOutcome, ReassemblyData};
use crate::listener::EndpointListener;
use crate::packet_header::{PacketHeader, PacketKind};
use crate::packet_sink::PacketSink;
use crate::safe_converter::PrecheckedCast;
use crate::sequence_buffer::SequenceBuffer;
use crate::stats::{EndpointCounters, EndpointStats, Ewma, RateWindow};

/// record for a packet this side transmitted, held until it is classified
///  as acked or lost
#[derive(Clone, Debug, Default)]
struct SentPacketData {
    send_time: Duration,
    /// wire bytes, summed across fragments for a fragmented packet
    packet_bytes: u32,
    acked: bool,
}

/// record for a packet this side received, feeding the outgoing ack
///  bitfields and duplicate detection
#[derive(Clone, Debug, Default)]
struct ReceivedPacketData {
    receive_time: Duration,
    packet_bytes: u32,
}

pub struct Endpoint {
    config: Arc<EndpointConfig>,
    sink: Arc<dyn PacketSink>,
    listener: Arc<dyn EndpointListener>,

    /// the next outgoing sequence number
    sequence: u16,
    sent_packets: SequenceBuffer<SentPacketData>,
    received_packets: SequenceBuffer<ReceivedPacketData>,
    reassembly: SequenceBuffer<ReassemblyData>,

    rtt: Ewma,
    jitter: Ewma,
    packet_loss: Ewma,
    sent_bandwidth: RateWindow,
    received_bandwidth: RateWindow,
    acked_bandwidth: RateWindow,
    counters: EndpointCounters,
}

impl Endpoint {
    pub fn new(
        config: Arc<EndpointConfig>,
        sink: Arc<dyn PacketSink>,
        listener: Arc<dyn EndpointListener>,
    ) -> anyhow::Result<Endpoint> {
        config.validate()?;

        Ok(Endpoint {
            sequence: 0,
            sent_packets: SequenceBuffer::new(config.sent_packets_buffer_size),
            received_packets: SequenceBuffer::new(config.received_packets_buffer_size),
            reassembly: SequenceBuffer::new(config.fragment_reassembly_buffer_size),
            rtt: Ewma::new(config.rtt_smoothing_factor),
            jitter: Ewma::new(config.rtt_smoothing_factor),
            packet_loss: Ewma::new(config.packet_loss_smoothing_factor),
            sent_bandwidth: RateWindow::new(config.bandwidth_window, config.bandwidth_smoothing_factor),
            received_bandwidth: RateWindow::new(config.bandwidth_window, config.bandwidth_smoothing_factor),
            acked_bandwidth: RateWindow::new(config.bandwidth_window, config.bandwidth_smoothing_factor),
            counters: EndpointCounters::default(),
            config,
            sink,
            listener,
        })
    }

    /// the sequence number the next call to `send` will assign
    pub fn next_packet_sequence(&self) -> u16 {
        self.sequence
    }

    /// Sends a payload: assigns the next sequence number, stamps every
    ///  outgoing unit with the current ack information, fragments payloads
    ///  above the configured threshold, records the packet as
    ///  awaiting acknowledgment, and hands the wire bytes to the sink.
    ///  Returns the assigned sequence number.
    pub fn send(&mut self, now: Duration, payload: &[u8]) -> anyhow::Result<u16> {
        if payload.is_empty() {
            bail!("payload must not be empty");
        }
        if payload.len() > self.config.max_packet_size {
            self.counters.packets_too_large_to_send += 1;
            debug!("payload of {} bytes exceeds the maximum packet size of {} - rejecting", payload.len(), self.config.max_packet_size);
            bail!("payload too large: {} bytes, maximum is {}", payload.len(), self.config.max_packet_size);
        }

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        let (ack, ack_bits) = self.received_packets.ack_info();

        let fragmented = payload.len() > self.config.fragment_above;
        let mut packets = Vec::new();
        if !fragmented {
            let mut buf = BytesMut::with_capacity(PacketHeader::REGULAR_SERIALIZED_LEN + payload.len());
            PacketHeader::regular(sequence, ack, ack_bits).ser(&mut buf);
            buf.put_slice(payload);
            packets.push(buf);
        }
        else {
            let chunks: Vec<&[u8]> = payload.chunks(self.config.fragment_size).collect();
            if chunks.len() > self.config.max_fragments {
                self.counters.packets_too_large_to_send += 1;
                bail!("payload too large: {} bytes would need {} fragments, maximum is {}",
                    payload.len(), chunks.len(), self.config.max_fragments);
            }
            let fragment_count: u16 = chunks.len().prechecked_cast();
            for (fragment_id, chunk) in chunks.into_iter().enumerate() {
                let mut buf = BytesMut::with_capacity(PacketHeader::FRAGMENT_SERIALIZED_LEN + chunk.len());
                PacketHeader::fragment(sequence, ack, ack_bits, fragment_id.prechecked_cast(), fragment_count).ser(&mut buf);
                buf.put_slice(chunk);
                packets.push(buf);
            }
        }

        let total_bytes: usize = packets.iter().map(|p| p.len()).sum();
        let entry = self.sent_packets
            .insert(sequence, SentPacketData {
                send_time: now,
                packet_bytes: total_bytes.prechecked_cast(),
                acked: false,
            })
            .expect("this is a bug: a freshly assigned sequence number must fit the send window");
        let packet_bytes = entry.packet_bytes;

        self.counters.packets_sent += 1;
        if fragmented {
            self.counters.fragments_sent += packets.len() as u64;
            trace!("sending packet #{} as {} fragments ({} bytes total)", sequence, packets.len(), total_bytes);
        }
        else {
            trace!("sending packet #{} ({} bytes)", sequence, total_bytes);
        }
        self.sent_bandwidth.add(now, packet_bytes);

        for packet in &packets {
            self.sink.send_packet(packet);
        }

        Ok(sequence)
    }

    /// Processes wire bytes received from the peer. Malformed input is
    ///  counted and dropped, never an error - nothing that arrives on the
    ///  wire may crash the endpoint.
    pub fn receive(&mut self, now: Duration, packet: &[u8]) {
        let mut buf = packet;
        let header = match PacketHeader::deser(&mut buf) {
            Ok(header) => header,
            Err(e) => {
                self.counters.packets_invalid += 1;
                debug!("received packet with unparsable header - dropping: {}", e);
                return;
            }
        };
        let wire_bytes: u32 = packet.len().prechecked_cast();

        match header.kind {
            PacketKind::Regular => self.receive_regular(now, &header, buf, wire_bytes),
            PacketKind::Fragment { fragment_id, fragment_count } => {
                self.receive_fragment(now, &header, fragment_id, fragment_count, buf, wire_bytes)
            }
        }
    }

    fn receive_regular(&mut self, now: Duration, header: &PacketHeader, payload: &[u8], wire_bytes: u32) {
        if let Some(previous) = self.received_packets.find(header.sequence) {
            self.counters.packets_stale += 1;
            trace!("received duplicate packet #{}, first seen {:?} ago - dropping",
                header.sequence, now.saturating_sub(previous.receive_time));
            return;
        }
        let Some(entry) = self.received_packets.insert(header.sequence, ReceivedPacketData {
            receive_time: now,
            packet_bytes: wire_bytes,
        })
        else {
            self.counters.packets_stale += 1;
            debug!("received packet #{} is outside the receive window - dropping", header.sequence);
            return;
        };
        let packet_bytes = entry.packet_bytes;

        self.received_bandwidth.add(now, packet_bytes);
        self.process_acks(now, header.ack, header.ack_bits);

        self.counters.packets_received += 1;
        trace!("received packet #{} ({} payload bytes)", header.sequence, payload.len());
        self.listener.on_packet_received(payload);
    }

    fn receive_fragment(
        &mut self,
        now: Duration,
        header: &PacketHeader,
        fragment_id: u8,
        fragment_count: u16,
        payload: &[u8],
        wire_bytes: u32,
    ) {
        if fragment_count as usize > self.config.max_fragments {
            self.counters.fragments_invalid += 1;
            debug!("fragment for packet #{} declares {} fragments, configured maximum is {} - dropping",
                header.sequence, fragment_count, self.config.max_fragments);
            return;
        }
        if self.received_packets.exists(header.sequence) {
            // the reassembly already completed; late copies are duplicates
            self.counters.packets_stale += 1;
            trace!("received fragment for already delivered packet #{} - dropping", header.sequence);
            return;
        }

        // every fragment carries the full ack header, so acknowledgment
        //  information survives the loss of individual fragments
        self.process_acks(now, header.ack, header.ack_bits);

        if !self.reassembly.exists(header.sequence) {
            let inserted = self.reassembly.insert(
                header.sequence,
                ReassemblyData::new(now, fragment_count, self.config.fragment_size),
            );
            if inserted.is_none() {
                self.counters.packets_stale += 1;
                debug!("fragment for packet #{} is outside the reassembly window - dropping", header.sequence);
                return;
            }
        }

        let entry = self.reassembly
            .find_mut(header.sequence)
            .expect("this is a bug: the reassembly entry was just inserted or found");
        match entry.accept(fragment_id, fragment_count, payload, wire_bytes) {
            FragmentOutcome::Corrupt => {
                self.counters.fragments_invalid += 1;
                self.reassembly.remove(header.sequence);
                return;
            }
            FragmentOutcome::Duplicate => {
                trace!("duplicate fragment {} for packet #{} - ignoring", fragment_id, header.sequence);
                return;
            }
            FragmentOutcome::Stored => {
                self.counters.fragments_received += 1;
                self.received_bandwidth.add(now, wire_bytes);
            }
        }

        let entry = self.reassembly
            .find_mut(header.sequence)
            .expect("this is a bug: a stored fragment implies a resident entry");
        if !entry.is_complete() {
            return;
        }
        let reassembled = entry.take_payload();
        let total_wire_bytes = entry.wire_bytes();
        let reassembly_time = now.saturating_sub(entry.first_fragment_time());
        self.reassembly.remove(header.sequence);
        trace!("reassembled packet #{} from {} fragments in {:?}", header.sequence, fragment_count, reassembly_time);

        if self.received_packets
            .insert(header.sequence, ReceivedPacketData {
                receive_time: now,
                packet_bytes: total_wire_bytes,
            })
            .is_none()
        {
            self.counters.packets_stale += 1;
            debug!("reassembled packet #{} is outside the receive window - dropping", header.sequence);
            return;
        }

        self.counters.packets_received += 1;
        self.listener.on_packet_received(&reassembled);
    }

    fn process_acks(&mut self, now: Duration, ack: u16, ack_bits: u32) {
        self.process_ack(now, ack);
        for k in 0..32u16 {
            if ack_bits & (1u32 << k) != 0 {
                self.process_ack(now, ack.wrapping_sub(k + 1));
            }
        }
    }

    fn process_ack(&mut self, now: Duration, sequence: u16) {
        let Some(entry) = self.sent_packets.find_mut(sequence) else {
            // outside the send window: never sent recently, already acked,
            //  or already declared lost - expected under loss and reordering
            return;
        };
        if entry.acked {
            return;
        }
        entry.acked = true;
        let send_time = entry.send_time;
        let packet_bytes = entry.packet_bytes;
        self.sent_packets.remove(sequence);

        let rtt_sample = now.saturating_sub(send_time).as_secs_f64();
        self.rtt.fold(rtt_sample);
        self.jitter.fold((rtt_sample - self.rtt.get()).abs());
        self.acked_bandwidth.add(now, packet_bytes);
        self.packet_loss.fold(0.0);

        self.counters.packets_acked += 1;
        trace!("packet #{} acked, rtt sample {:.1} ms", sequence, rtt_sample * 1000.0);
        self.listener.on_packet_acked(sequence);
    }

    /// Periodic housekeeping, driven by the caller on a regular tick: sweeps
    ///  the sent-packet window for packets past the loss timeout, and rolls
    ///  the bandwidth measurement windows. This sweep is the only place a
    ///  packet is declared lost.
    pub fn update(&mut self, now: Duration) {
        let timeout = self.loss_timeout();

        let mut lost = Vec::new();
        for index in 0..self.sent_packets.capacity() {
            if let Some((sequence, entry)) = self.sent_packets.entry_at(index) {
                if !entry.acked && now.saturating_sub(entry.send_time) >= timeout {
                    lost.push(sequence);
                }
            }
        }
        for sequence in lost {
            self.sent_packets.remove(sequence);
            self.packet_loss.fold(100.0);
            self.counters.packets_lost += 1;
            debug!("packet #{} stayed unacknowledged past the loss timeout of {:?} - declaring it lost", sequence, timeout);
            self.listener.on_packet_lost(sequence);
        }

        self.sent_bandwidth.update(now);
        self.received_bandwidth.update(now);
        self.acked_bandwidth.update(now);
    }

    fn loss_timeout(&self) -> Duration {
        let rtt_based = Duration::from_secs_f64(self.rtt.get() * self.config.loss_timeout_rtt_multiplier);
        cmp::max(self.config.min_loss_timeout, rtt_based)
    }

    /// Clears all three packet windows and the estimators. The outgoing
    ///  sequence counter and the lifetime counters are preserved - reusing
    ///  sequence numbers would confuse a live peer, and the counters are
    ///  cumulative statistics.
    pub fn reset(&mut self) {
        debug!("resetting endpoint state");
        self.sent_packets.reset();
        self.received_packets.reset();
        self.reassembly.reset();
        self.rtt.reset();
        self.jitter.reset();
        self.packet_loss.reset();
        self.sent_bandwidth.reset();
        self.received_bandwidth.reset();
        self.acked_bandwidth.reset();
    }

    pub fn stats(&self) -> EndpointStats {
        EndpointStats {
            rtt: Duration::from_secs_f64(self.rtt.get()),
            jitter: Duration::from_secs_f64(self.jitter.get()),
            packet_loss_pct: self.packet_loss.get(),
            sent_bandwidth_kbps: self.sent_bandwidth.rate_kbps(),
            received_bandwidth_kbps: self.received_bandwidth.rate_kbps(),
            acked_bandwidth_kbps: self.acked_bandwidth.rate_kbps(),
        }
    }

    pub fn counters(&self) -> &EndpointCounters {
        &self.counters
    }
}
