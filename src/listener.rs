#[cfg(test)] use mockall::automock;

/// Notifications raised by the endpoint core. Calls happen synchronously
///  from within `receive` and `update` on the caller's thread.
#[cfg_attr(test, automock)]
pub trait EndpointListener: Send + Sync + 'static {
    /// a complete payload arrived - either a single packet or a finished
    ///  reassembly
    fn on_packet_received(&self, payload: &[u8]);

    /// the peer acknowledged the packet sent with this sequence number
    fn on_packet_acked(&self, sequence: u16);

    /// the packet sent with this sequence number stayed unacknowledged past
    ///  the loss timeout - whether to resend is the application's decision
    fn on_packet_lost(&self, sequence: u16);
}
