use std::sync::{Arc, Mutex, PoisonError};

use agent_logging::{agent_debug, agent_info, agent_warn};
use harvester_core::{update, ConnectionEvent, ConnectionState, HarvestEnvelope, LinkSignal};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::{HarvestError, Link, TransportSettings};

const EVENT_CAPACITY: usize = 32;

struct Outgoing {
    event_name: String,
    envelope: HarvestEnvelope,
}

/// Connection state plus the channel its transitions are published on.
struct Connection {
    state: Mutex<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    lost: Notify,
}

impl Connection {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, signal: LinkSignal) -> Option<ConnectionEvent> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.transition(&mut state, signal)
    }

    /// Applies `Opened` unless `cancel` fired. Checked under the state lock,
    /// so a concurrent `close` either sees `Connected` or prevents it.
    fn open(&self, cancel: &CancellationToken) -> Option<ConnectionEvent> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if cancel.is_cancelled() {
            return None;
        }
        self.transition(&mut state, LinkSignal::Opened)
    }

    fn transition(&self, state: &mut ConnectionState, signal: LinkSignal) -> Option<ConnectionEvent> {
        let (next, event) = update(*state, signal);
        *state = next;
        if let Some(event) = event {
            // Published under the lock so subscribers see transitions in order.
            let _ = self.events.send(event);
            if signal == LinkSignal::Lost {
                // Wakes only a waiting supervisor; no permit is stored.
                self.lost.notify_waiters();
            }
        }
        event
    }
}

struct Shared {
    connection: Arc<Connection>,
    link: Arc<dyn Link>,
    settings: TransportSettings,
    outbox: mpsc::UnboundedSender<Outgoing>,
    supervisor: Mutex<Option<CancellationToken>>,
    runtime: Handle,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let supervisor = self.supervisor.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = supervisor.take() {
            token.cancel();
        }
    }
}

/// One logical connection to the collector.
///
/// Starts `Disconnected`. [`Transport::connect`] starts a supervisor that
/// performs the handshake, probes the link while connected and reconnects
/// after a loss. Sends are fire-and-forget and dropped while disconnected.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

impl Transport {
    /// Must be called from within a tokio runtime.
    pub fn new(link: Arc<dyn Link>, settings: TransportSettings) -> Result<Self, HarvestError> {
        let runtime = Handle::try_current().map_err(|_| HarvestError::NoRuntime)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let connection = Arc::new(Connection {
            state: Mutex::new(ConnectionState::Disconnected),
            events,
            lost: Notify::new(),
        });

        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        runtime.spawn(drain_outbox(connection.clone(), link.clone(), outbox_rx));

        Ok(Self {
            shared: Arc::new(Shared {
                connection,
                link,
                settings,
                outbox,
                supervisor: Mutex::new(None),
                runtime,
            }),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Receives every transition from the moment of subscription on.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.connection.events.subscribe()
    }

    /// Starts connecting. Idempotent while a supervisor is running.
    pub fn connect(&self) {
        let mut supervisor = self
            .shared
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if supervisor.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return;
        }

        let token = CancellationToken::new();
        *supervisor = Some(token.clone());
        self.shared.runtime.spawn(supervise(
            self.shared.connection.clone(),
            self.shared.link.clone(),
            self.shared.settings.clone(),
            token,
        ));
    }

    /// Stops reconnecting and drops the connection.
    pub fn close(&self) {
        let token = self
            .shared
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
        }
        if self.shared.connection.apply(LinkSignal::Closed).is_some() {
            agent_info!("transport closed");
        }
    }

    /// Queues `envelope` for delivery, or drops it when not connected.
    pub fn send(&self, event_name: &str, envelope: HarvestEnvelope) {
        if !self.is_connected() {
            agent_debug!("dropping {} event: transport disconnected", event_name);
            return;
        }
        let outgoing = Outgoing {
            event_name: event_name.to_string(),
            envelope,
        };
        if self.shared.outbox.send(outgoing).is_err() {
            agent_debug!("dropping {} event: outbox closed", event_name);
        }
    }
}

async fn supervise(
    connection: Arc<Connection>,
    link: Arc<dyn Link>,
    settings: TransportSettings,
    cancel: CancellationToken,
) {
    loop {
        if !connection.state().is_connected() {
            let handshake = timeout(settings.connect_timeout(), link.open());
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = handshake => outcome,
            };
            match outcome {
                Ok(Ok(())) => {
                    if connection.open(&cancel).is_some() {
                        agent_info!("connected to collector");
                    }
                    continue;
                }
                Ok(Err(err)) => agent_debug!("collector handshake failed: {}", err),
                Err(_) => agent_debug!("collector handshake timed out"),
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep(settings.reconnect_delay()) => {}
            }
            continue;
        }

        // Registered before the state check so a loss in between is not missed.
        let lost = connection.lost.notified();
        tokio::pin!(lost);
        lost.as_mut().enable();
        if !connection.state().is_connected() {
            continue;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            // A failed write already flipped the state; loop around to reconnect.
            _ = &mut lost => {}
            _ = sleep(settings.heartbeat_interval()) => {
                let probe = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    probe = timeout(settings.request_timeout(), link.open()) => probe,
                };
                if !matches!(probe, Ok(Ok(()))) && connection.apply(LinkSignal::Lost).is_some() {
                    agent_warn!("collector heartbeat failed; reconnecting");
                }
            }
        }
    }
    agent_debug!("transport supervisor stopped");
}

async fn drain_outbox(
    connection: Arc<Connection>,
    link: Arc<dyn Link>,
    mut outbox: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(Outgoing {
        event_name,
        envelope,
    }) = outbox.recv().await
    {
        if !connection.state().is_connected() {
            agent_debug!("dropping queued {} event: transport disconnected", event_name);
            continue;
        }
        if let Err(err) = link.emit(&event_name, &envelope).await {
            agent_warn!("failed to deliver {} event: {}", event_name, err);
            connection.apply(LinkSignal::Lost);
        }
    }
}
