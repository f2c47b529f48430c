/// Observations reported by the link layer to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSignal {
    /// Handshake with the collector succeeded.
    Opened,
    /// A probe or write failed; the link must be re-established.
    Lost,
    /// The agent closed the link on purpose.
    Closed,
}
