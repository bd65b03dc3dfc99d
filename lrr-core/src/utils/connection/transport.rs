//! Transport dispatcher for the agent link.
//!
//! A [`TransportContext`] owns everything the two network loops share: the
//! bounded outbound queue, the inbound callback table, the link status and
//! the shutdown signals. It is created by the program root, configured with
//! `&mut` access (handler registration) and then shared by reference with
//! the send loop, the receive loop and every telemetry producer.

use alloc::boxed::Box;
use core::{cell::Cell, future::poll_fn, net::SocketAddrV4};

use embassy_futures::select::{select, Either};
use embassy_sync::{
    blocking_mutex::{raw::RawMutex, Mutex},
    channel::{Channel, TrySendError},
    signal::Signal,
};
use embassy_time::{Duration, Timer};
use hashbrown::{hash_map::Entry, HashMap};

use super::{
    config::{self, ConfigError, KeyValueStore, PEER_POLL_BACKOFF},
    messages::{self, DecodeError, Envelope, MessageKind, MAX_DATAGRAM_SIZE},
    status::{ConnectionStatus, StatusCell, StatusIndicator},
    udp::DatagramSocket,
};

/// Envelopes that can wait for the send loop.
pub const OUTBOUND_CAPACITY: usize = 25;
/// UDP port used locally and on the agent.
pub const AGENT_PORT: u16 = 8001;
/// Pause after a failed socket read before trying again.
pub const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Tunables of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfig {
    pub port: u16,
    pub peer_poll_backoff: Duration,
    pub recv_error_backoff: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: AGENT_PORT,
            peer_poll_backoff: PEER_POLL_BACKOFF,
            recv_error_backoff: RECV_ERROR_BACKOFF,
        }
    }
}

/// Steady-state transport failures. None of them stop a loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// `try_enqueue` found the outbound queue at capacity.
    QueueFull,
    /// The transport is shutting down and no longer accepts envelopes.
    ShuttingDown,
    /// A handler is already registered for this kind.
    HandlerConflict(MessageKind),
    /// A datagram decoded to a kind nobody listens for.
    NoHandler(MessageKind),
    Decode(DecodeError),
}

/// Inbound message handler. Runs inline on the receive loop.
pub type Handler<'a> = Box<dyn Fn(&Envelope) + Send + Sync + 'a>;

/// Message kind to handler routing, one handler per kind.
#[derive(Default)]
pub struct CallbackTable<'a> {
    handlers: HashMap<MessageKind, Handler<'a>>,
}

impl<'a> CallbackTable<'a> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Install `handler` for `kind`. An existing registration is kept and
    /// reported as a conflict.
    pub fn register(
        &mut self,
        kind: MessageKind,
        handler: Handler<'a>,
    ) -> Result<(), TransportError> {
        match self.handlers.entry(kind) {
            Entry::Occupied(_) => Err(TransportError::HandlerConflict(kind)),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    pub fn get(
        &self,
        kind: MessageKind,
    ) -> Option<&Handler<'a>> {
        self.handlers.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Shared state of the agent link.
pub struct TransportContext<'a, M: RawMutex> {
    config: TransportConfig,
    outbound: Channel<M, Envelope, OUTBOUND_CAPACITY>,
    callbacks: CallbackTable<'a>,
    status: StatusCell,
    /// Set once by `shutdown`. Envelopes are only admitted while holding
    /// this lock, so nothing enters the queue after the flag is raised.
    stopping: Mutex<M, Cell<bool>>,
    stop_send: Signal<M, ()>,
    stop_recv: Signal<M, ()>,
}

impl<'a, M: RawMutex> TransportContext<'a, M> {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            outbound: Channel::new(),
            callbacks: CallbackTable::new(),
            status: StatusCell::new(),
            stopping: Mutex::new(Cell::new(false)),
            stop_send: Signal::new(),
            stop_recv: Signal::new(),
        }
    }

    /// Register the handler for one message kind.
    ///
    /// Requires exclusive access, so every handler is in place before the
    /// loops start sharing the context.
    pub fn register<F>(
        &mut self,
        kind: MessageKind,
        handler: F,
    ) -> Result<(), TransportError>
    where
        F: Fn(&Envelope) + Send + Sync + 'a,
    {
        self.callbacks.register(kind, Box::new(handler))?;
        tracing::debug!(?kind, "registered inbound handler");
        Ok(())
    }

    /// Queue an envelope for the send loop, waiting while the queue is full.
    ///
    /// Fails with [`TransportError::ShuttingDown`] once `shutdown` has been
    /// called, including for a caller that was waiting for space.
    pub async fn enqueue(
        &self,
        mut envelope: Envelope,
    ) -> Result<(), TransportError> {
        loop {
            match self.admit(envelope)? {
                None => return Ok(()),
                Some(rejected) => envelope = rejected,
            }
            poll_fn(|cx| self.outbound.poll_ready_to_send(cx)).await;
        }
    }

    /// Queue an envelope without waiting.
    pub fn try_enqueue(
        &self,
        envelope: Envelope,
    ) -> Result<(), TransportError> {
        match self.admit(envelope)? {
            None => Ok(()),
            Some(_) => Err(TransportError::QueueFull),
        }
    }

    /// Push `envelope` unless stopping. A full queue hands it back.
    fn admit(
        &self,
        envelope: Envelope,
    ) -> Result<Option<Envelope>, TransportError> {
        self.stopping.lock(|stopping| {
            if stopping.get() {
                return Err(TransportError::ShuttingDown);
            }
            match self.outbound.try_send(envelope) {
                Ok(()) => Ok(None),
                Err(TrySendError::Full(envelope)) => Ok(Some(envelope)),
            }
        })
    }

    /// Envelopes currently waiting to be sent.
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.lock(Cell::get)
    }

    /// Ask both loops to finish. The send loop flushes whatever is queued
    /// before returning; later enqueues fail with `ShuttingDown`.
    pub fn shutdown(&self) {
        if self.stopping.lock(|stopping| stopping.replace(true)) {
            return;
        }
        tracing::info!(queued = self.queued(), "transport shutting down");
        self.stop_send.signal(());
        self.stop_recv.signal(());
    }

    /// Wait for the agent address, bind the local socket and mark the link
    /// connected. Every failure on the way is retried after a backoff.
    pub async fn connect<S, K, I>(
        &self,
        socket: &mut S,
        store: &mut K,
        indicator: &mut I,
    ) -> SocketAddrV4
    where
        S: DatagramSocket,
        K: KeyValueStore,
        I: StatusIndicator,
    {
        self.set_status(ConnectionStatus::Disconnected, indicator);
        let peer =
            config::wait_for_peer(store, self.config.port, self.config.peer_poll_backoff).await;

        while self.bind(socket).is_err() {
            Timer::after(self.config.peer_poll_backoff).await;
        }
        self.set_status(ConnectionStatus::Connected, indicator);
        tracing::info!(%peer, "socket created, communicating with agent");
        peer
    }

    fn bind<S: DatagramSocket>(
        &self,
        socket: &mut S,
    ) -> Result<(), ConfigError> {
        match socket.bind_port(self.config.port) {
            Ok(()) => {
                tracing::info!(port = self.config.port, "socket bound");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(?error, port = self.config.port, "socket unable to bind");
                Err(ConfigError::Bind)
            }
        }
    }

    fn set_status<I: StatusIndicator>(
        &self,
        status: ConnectionStatus,
        indicator: &mut I,
    ) {
        self.status.set(status);
        indicator.set_status(status);
        tracing::info!(?status, "agent link status");
    }

    /// Decode one datagram and hand it to its handler.
    ///
    /// Undecodable or unroutable datagrams are logged and dropped; no handler
    /// runs for them.
    pub fn dispatch(
        &self,
        datagram: &[u8],
    ) -> Result<MessageKind, TransportError> {
        let envelope = messages::decode(datagram).map_err(|error| {
            tracing::warn!(?error, len = datagram.len(), "decode failed, datagram dropped");
            TransportError::Decode(error)
        })?;

        let kind = envelope.kind();
        let handler = self.callbacks.get(kind).ok_or_else(|| {
            tracing::error!(?kind, "no handler registered, datagram dropped");
            TransportError::NoHandler(kind)
        })?;
        handler(&envelope);
        tracing::trace!(?kind, "inbound message dispatched");
        Ok(kind)
    }

    /// Transmit queued envelopes to `peer` in FIFO order until shutdown,
    /// then flush the queue and return.
    pub async fn send_loop<S: DatagramSocket>(
        &self,
        socket: &S,
        peer: SocketAddrV4,
    ) {
        let mut wire = [0u8; MAX_DATAGRAM_SIZE];
        tracing::info!(%peer, "send loop started");

        loop {
            let next = select(self.outbound.receive(), self.stop_send.wait()).await;
            match next {
                Either::First(envelope) => self.transmit(socket, peer, &envelope, &mut wire).await,
                Either::Second(()) => break,
            }
        }

        while let Ok(envelope) = self.outbound.try_receive() {
            self.transmit(socket, peer, &envelope, &mut wire).await;
        }
        tracing::info!("send loop stopped");
    }

    async fn transmit<S: DatagramSocket>(
        &self,
        socket: &S,
        peer: SocketAddrV4,
        envelope: &Envelope,
        wire: &mut [u8],
    ) {
        let datagram = match messages::encode(envelope, wire) {
            Ok(datagram) => datagram,
            Err(error) => {
                tracing::error!(?error, kind = ?envelope.kind(), "failed to serialize message");
                return;
            }
        };
        if let Err(error) = socket.send_datagram(datagram, peer).await {
            tracing::warn!(?error, len = datagram.len(), "datagram send failed");
        }
    }

    /// Read datagrams and dispatch them in arrival order until shutdown.
    ///
    /// A handler finishes before the next datagram is read. Socket errors
    /// are retried after a backoff.
    pub async fn receive_loop<S: DatagramSocket>(
        &self,
        socket: &S,
    ) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        tracing::info!(port = self.config.port, "receive loop started");

        loop {
            let next = select(socket.recv_datagram(&mut buf), self.stop_recv.wait()).await;
            match next {
                Either::First(Ok(len)) => {
                    let _ = self.dispatch(&buf[..len]);
                }
                Either::First(Err(error)) => {
                    tracing::warn!(?error, "recvfrom failed");
                    Timer::after(self.config.recv_error_backoff).await;
                }
                Either::Second(()) => break,
            }
        }
        tracing::info!("receive loop stopped");
    }
}
