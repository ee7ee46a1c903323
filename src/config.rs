use std::time::Duration;

use anyhow::bail;

/// Configuration for an [`crate::endpoint::Endpoint`]. All sizing is fixed
///  here at construction time - the endpoint never allocates beyond what
///  these values imply, no matter what arrives on the wire.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    /// The largest payload that `send` accepts. Bigger payloads are rejected
    ///  at send time rather than fragmented without bound; must fit into
    ///  `fragment_size * max_fragments`.
    pub max_packet_size: usize,

    /// Payloads up to this size go out as a single packet; anything bigger
    ///  is split into fragments.
    ///
    /// In an ideal world, we would discover the MTU and derive this
    ///  threshold from it, but discovery is unreliable in the presence of
    ///  surprising network hardware. The responsibility for choosing a
    ///  transport-safe value therefore stays with the application.
    pub fragment_above: usize,

    /// The payload slice per fragment. Every fragment except the last is
    ///  exactly this size.
    pub fragment_size: usize,

    /// Upper bound on the number of fragments per packet (at most 256 - the
    ///  wire format encodes the count in a single byte).
    pub max_fragments: usize,

    /// Capacity of the buffer tracking sent packets awaiting
    ///  acknowledgment. A packet whose ack arrives after more than this many
    ///  newer packets were sent can no longer be matched and counts as lost.
    pub sent_packets_buffer_size: usize,

    /// Capacity of the buffer tracking received packets, which feeds the
    ///  outgoing ack bitfields and duplicate detection.
    pub received_packets_buffer_size: usize,

    /// Capacity of the buffer tracking in-progress fragment reassemblies.
    ///  Incomplete reassemblies are silently discarded once this many newer
    ///  packets have arrived.
    pub fragment_reassembly_buffer_size: usize,

    /// Exponential smoothing factor for the RTT and jitter estimators, in
    ///  (0, 1]. Small values smooth aggressively.
    pub rtt_smoothing_factor: f64,

    /// Exponential smoothing factor for the packet loss percentage.
    pub packet_loss_smoothing_factor: f64,

    /// Exponential smoothing factor for the bandwidth estimators.
    pub bandwidth_smoothing_factor: f64,

    /// Length of the measurement window for the sent / received / acked
    ///  bandwidth estimators.
    pub bandwidth_window: Duration,

    /// Floor for the loss-sweep timeout. A sent packet is declared lost once
    ///  it stayed unacknowledged for `max(min_loss_timeout, rtt *
    ///  loss_timeout_rtt_multiplier)`; the floor keeps the sweep meaningful
    ///  before the first RTT sample exists.
    pub min_loss_timeout: Duration,

    /// Multiplier applied to the smoothed RTT for the loss-sweep timeout.
    pub loss_timeout_rtt_multiplier: f64,

    /// Housekeeping cadence used by the UDP driver to call
    ///  [`crate::endpoint::Endpoint::update`]. Callers driving the endpoint
    ///  themselves are free to ignore it.
    pub update_interval: Duration,
}

impl Default for EndpointConfig {
    fn default() -> EndpointConfig {
        EndpointConfig {
            max_packet_size: 16 * 1024,
            fragment_above: 1024,
            fragment_size: 1024,
            max_fragments: 256,
            sent_packets_buffer_size: 256,
            received_packets_buffer_size: 256,
            fragment_reassembly_buffer_size: 64,
            rtt_smoothing_factor: 0.0025,
            packet_loss_smoothing_factor: 0.1,
            bandwidth_smoothing_factor: 0.1,
            bandwidth_window: Duration::from_secs(1),
            min_loss_timeout: Duration::from_millis(250),
            loss_timeout_rtt_multiplier: 3.0,
            update_interval: Duration::from_millis(100),
        }
    }
}

impl EndpointConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_packet_size == 0 {
            bail!("max packet size must be positive");
        }
        if self.fragment_size == 0 {
            bail!("fragment size must be positive");
        }
        if self.max_fragments == 0 || self.max_fragments > 256 {
            bail!("max fragments must be in 1..=256, was {}", self.max_fragments);
        }
        if self.fragment_above > self.max_packet_size {
            bail!("fragment threshold {} exceeds max packet size {}", self.fragment_above, self.max_packet_size);
        }
        if self.max_packet_size > self.fragment_size * self.max_fragments {
            bail!("max packet size {} does not fit into {} fragments of {} bytes",
                self.max_packet_size, self.max_fragments, self.fragment_size);
        }
        if self.sent_packets_buffer_size == 0
            || self.received_packets_buffer_size == 0
            || self.fragment_reassembly_buffer_size == 0
        {
            bail!("buffer capacities must be positive");
        }
        for (name, factor) in [
            ("rtt", self.rtt_smoothing_factor),
            ("packet loss", self.packet_loss_smoothing_factor),
            ("bandwidth", self.bandwidth_smoothing_factor),
        ] {
            if !(factor > 0.0 && factor <= 1.0) {
                bail!("{} smoothing factor must be in (0, 1], was {}", name, factor);
            }
        }
        if self.bandwidth_window.is_zero() {
            bail!("bandwidth window must be nonzero");
        }
        if self.min_loss_timeout.is_zero() {
            bail!("min loss timeout must be nonzero");
        }
        if self.loss_timeout_rtt_multiplier < 1.0 {
            bail!("loss timeout rtt multiplier must be at least 1, was {}", self.loss_timeout_rtt_multiplier);
        }
        if self.update_interval.is_zero() {
            bail!("update interval must be nonzero");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EndpointConfig::default().validate().is_ok());
    }

    #[rstest]
    #[case::zero_max_packet_size(EndpointConfig { max_packet_size: 0, fragment_above: 0, ..Default::default() })]
    #[case::zero_fragment_size(EndpointConfig { fragment_size: 0, ..Default::default() })]
    #[case::zero_max_fragments(EndpointConfig { max_fragments: 0, ..Default::default() })]
    #[case::too_many_fragments(EndpointConfig { max_fragments: 257, ..Default::default() })]
    #[case::fragment_above_exceeds_max(EndpointConfig { fragment_above: 32 * 1024, ..Default::default() })]
    #[case::max_packet_does_not_fit_fragments(EndpointConfig { max_fragments: 4, ..Default::default() })]
    #[case::zero_sent_buffer(EndpointConfig { sent_packets_buffer_size: 0, ..Default::default() })]
    #[case::zero_received_buffer(EndpointConfig { received_packets_buffer_size: 0, ..Default::default() })]
    #[case::zero_reassembly_buffer(EndpointConfig { fragment_reassembly_buffer_size: 0, ..Default::default() })]
    #[case::zero_rtt_smoothing(EndpointConfig { rtt_smoothing_factor: 0.0, ..Default::default() })]
    #[case::rtt_smoothing_above_one(EndpointConfig { rtt_smoothing_factor: 1.5, ..Default::default() })]
    #[case::zero_bandwidth_window(EndpointConfig { bandwidth_window: Duration::ZERO, ..Default::default() })]
    #[case::zero_min_loss_timeout(EndpointConfig { min_loss_timeout: Duration::ZERO, ..Default::default() })]
    #[case::low_loss_multiplier(EndpointConfig { loss_timeout_rtt_multiplier: 0.5, ..Default::default() })]
    #[case::zero_update_interval(EndpointConfig { update_interval: Duration::ZERO, ..Default::default() })]
    fn test_validate_rejects(#[case] config: EndpointConfig) {
        assert!(config.validate().is_err());
    }
}
