use crate::{ConnectionEvent, ConnectionState, LinkSignal};

/// Pure transition function: applies a link signal to the connection state and
/// returns the event to publish, if the state actually changed.
pub fn update(state: ConnectionState, signal: LinkSignal) -> (ConnectionState, Option<ConnectionEvent>) {
    match (state, signal) {
        (ConnectionState::Disconnected, LinkSignal::Opened) => {
            (ConnectionState::Connected, Some(ConnectionEvent::Connected))
        }
        (ConnectionState::Connected, LinkSignal::Lost | LinkSignal::Closed) => (
            ConnectionState::Disconnected,
            Some(ConnectionEvent::Disconnected),
        ),
        // Re-opening an open link or losing a closed one is not a transition.
        (state, _) => (state, None),
    }
}
