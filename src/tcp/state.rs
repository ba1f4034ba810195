/// A coarse, display-only view of where a connection sits in the handshake
/// and shutdown sequence. The connection supervisor itself is driven by
/// structural facts (has the peer's ISN been latched, has our FIN been
/// acked, has the peer's FIN been delivered) rather than by this enum; it
/// exists so callers and logs have RFC 793 names to point at. Distinctions
/// that make no difference to the supervisor's behavior — `FinWait1` versus
/// `FinWait2`, `Closing` versus `LastAck` — collapse here, since nothing
/// downstream needs to tell them apart.
///
/// - `Listen`: waiting for a connection request from any remote TCP and port.
/// - `SynSent`: we have sent our SYN, waiting for the peer's SYN+ACK.
/// - `Established`: an open connection; data flows in both directions.
/// - `FinWait2`: our FIN has been sent and fully acked; waiting for the
///   remote's FIN.
/// - `CloseWait`: the remote has closed; waiting for our side to finish.
/// - `TimeWait`: both sides have finished; lingering to absorb a
///   retransmitted FIN from the peer before going inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Listen,
    SynSent,
    Established,
    FinWait2,
    CloseWait,
    TimeWait,
}
