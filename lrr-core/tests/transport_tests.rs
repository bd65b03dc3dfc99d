use core::{
    convert::Infallible,
    net::{Ipv4Addr, SocketAddrV4},
    sync::atomic::{AtomicUsize, Ordering},
};
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    sync::Mutex,
};

use embassy_futures::{
    block_on,
    join::{join, join3},
    select::{select, Either},
    yield_now,
};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Duration;
use lrr_core::utils::{
    connection::{
        config::{resolve_peer, ConfigError, KeyValueStore, AGENT_IP_KEY},
        messages::{decode, encode, DecodeError, DriveTelemetry, Envelope, MessageKind, TwistCmd},
        status::{ConnectionStatus, StatusIndicator},
        telemetry::publish_loop,
        transport::{TransportConfig, TransportContext, TransportError, AGENT_PORT, OUTBOUND_CAPACITY},
        udp::DatagramSocket,
    },
    controllers::DriveState,
    math::kinematics::DifferentialKinematics,
};

type Ctx<'a> = TransportContext<'a, CriticalSectionRawMutex>;

const AGENT: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 50), AGENT_PORT);

fn fast_config() -> TransportConfig {
    TransportConfig {
        port: AGENT_PORT,
        peer_poll_backoff: Duration::from_millis(1),
        recv_error_backoff: Duration::from_millis(1),
    }
}

/// Socket fed from a script; blocks forever once the script is exhausted.
#[derive(Default)]
struct MockSocket {
    inbound: RefCell<VecDeque<Vec<u8>>>,
    sent: RefCell<Vec<(Vec<u8>, SocketAddrV4)>>,
    bind_failures: Cell<u32>,
    recv_failures: Cell<u32>,
    bound: Cell<Option<u16>>,
}

impl MockSocket {
    fn with_inbound(datagrams: Vec<Vec<u8>>) -> Self {
        MockSocket {
            inbound: RefCell::new(datagrams.into()),
            ..Default::default()
        }
    }

    fn sent_envelopes(&self) -> Vec<Envelope> {
        self.sent
            .borrow()
            .iter()
            .map(|(bytes, _)| decode(bytes).unwrap())
            .collect()
    }
}

impl DatagramSocket for MockSocket {
    type Error = &'static str;

    fn bind_port(
        &mut self,
        port: u16,
    ) -> Result<(), Self::Error> {
        if self.bind_failures.get() > 0 {
            self.bind_failures.set(self.bind_failures.get() - 1);
            return Err("address in use");
        }
        self.bound.set(Some(port));
        Ok(())
    }

    async fn send_datagram(
        &self,
        datagram: &[u8],
        peer: SocketAddrV4,
    ) -> Result<(), Self::Error> {
        self.sent.borrow_mut().push((datagram.to_vec(), peer));
        Ok(())
    }

    async fn recv_datagram(
        &self,
        buf: &mut [u8],
    ) -> Result<usize, Self::Error> {
        if self.recv_failures.get() > 0 {
            self.recv_failures.set(self.recv_failures.get() - 1);
            return Err("recvfrom failed");
        }
        let next = self.inbound.borrow_mut().pop_front();
        match next {
            Some(datagram) => {
                buf[..datagram.len()].copy_from_slice(&datagram);
                Ok(datagram.len())
            }
            None => core::future::pending().await,
        }
    }
}

/// Store that misses a few polls before the address shows up.
struct ScriptedStore {
    misses: u32,
    value: Option<&'static str>,
    polls: u32,
}

impl KeyValueStore for ScriptedStore {
    type Error = Infallible;

    fn get_str<'b>(
        &mut self,
        key: &str,
        buf: &'b mut [u8],
    ) -> Result<Option<&'b str>, Infallible> {
        assert_eq!(key, AGENT_IP_KEY);
        self.polls += 1;
        if self.misses > 0 {
            self.misses -= 1;
            return Ok(None);
        }
        match self.value {
            Some(value) => {
                let len = value.len().min(buf.len());
                buf[..len].copy_from_slice(&value.as_bytes()[..len]);
                Ok(core::str::from_utf8(&buf[..len]).ok())
            }
            None => Ok(None),
        }
    }
}

#[derive(Default)]
struct RecordingIndicator(Vec<ConnectionStatus>);

impl StatusIndicator for RecordingIndicator {
    fn set_status(
        &mut self,
        status: ConnectionStatus,
    ) {
        self.0.push(status);
    }
}

fn telemetry(sequence: u32) -> Envelope {
    Envelope::Telemetry(DriveTelemetry {
        sequence,
        ..Default::default()
    })
}

fn wire(envelope: &Envelope) -> Vec<u8> {
    let mut buf = [0u8; 256];
    encode(envelope, &mut buf).unwrap().to_vec()
}

fn twist(
    linear: f32,
    angular: f32,
) -> Envelope {
    Envelope::TwistCmd(TwistCmd { linear, angular })
}

#[test]
fn test_send_loop_preserves_fifo_order() {
    let ctx = Ctx::new(fast_config());
    let socket = MockSocket::default();

    let producer = async {
        for sequence in 0..100 {
            ctx.enqueue(telemetry(sequence)).await.unwrap();
        }
        ctx.shutdown();
    };
    block_on(join(producer, ctx.send_loop(&socket, AGENT)));

    let sent = socket.sent_envelopes();
    assert_eq!(sent.len(), 100);
    for (expected, envelope) in sent.iter().enumerate() {
        assert_eq!(*envelope, telemetry(expected as u32));
    }
    assert!(socket.sent.borrow().iter().all(|(_, peer)| *peer == AGENT));
}

#[test]
fn test_try_enqueue_reports_full_queue() {
    let ctx = Ctx::new(fast_config());
    for sequence in 0..OUTBOUND_CAPACITY as u32 {
        ctx.try_enqueue(telemetry(sequence)).unwrap();
    }
    assert_eq!(ctx.try_enqueue(telemetry(99)), Err(TransportError::QueueFull));
    assert_eq!(ctx.queued(), OUTBOUND_CAPACITY);
}

#[test]
fn test_enqueue_waits_while_full() {
    let ctx = Ctx::new(fast_config());
    for sequence in 0..OUTBOUND_CAPACITY as u32 {
        ctx.try_enqueue(telemetry(sequence)).unwrap();
    }

    let raced = block_on(select(ctx.enqueue(telemetry(99)), yield_now()));
    assert!(matches!(raced, Either::Second(())));
    assert_eq!(ctx.queued(), OUTBOUND_CAPACITY);
}

#[test]
fn test_shutdown_flushes_queue() {
    let ctx = Ctx::new(fast_config());
    let socket = MockSocket::default();
    for sequence in 0..3 {
        ctx.try_enqueue(telemetry(sequence)).unwrap();
    }
    ctx.shutdown();
    ctx.shutdown();
    assert!(ctx.is_stopping());

    block_on(ctx.send_loop(&socket, AGENT));
    assert_eq!(socket.sent_envelopes(), vec![telemetry(0), telemetry(1), telemetry(2)]);
    assert_eq!(ctx.queued(), 0);
}

#[test]
fn test_enqueue_after_shutdown_is_refused() {
    let ctx = Ctx::new(fast_config());
    let socket = MockSocket::default();
    ctx.try_enqueue(telemetry(0)).unwrap();
    ctx.shutdown();
    block_on(ctx.send_loop(&socket, AGENT));

    assert_eq!(ctx.try_enqueue(telemetry(1)), Err(TransportError::ShuttingDown));
    assert_eq!(block_on(ctx.enqueue(telemetry(2))), Err(TransportError::ShuttingDown));
    assert_eq!(ctx.queued(), 0);
    assert_eq!(socket.sent_envelopes(), vec![telemetry(0)]);
}

#[test]
fn test_shutdown_releases_waiting_producer() {
    let ctx = Ctx::new(fast_config());
    let socket = MockSocket::default();
    for sequence in 0..OUTBOUND_CAPACITY as u32 {
        ctx.try_enqueue(telemetry(sequence)).unwrap();
    }

    let (waiting, _, _) = block_on(join3(
        ctx.enqueue(telemetry(99)),
        async { ctx.shutdown() },
        ctx.send_loop(&socket, AGENT),
    ));

    assert_eq!(waiting, Err(TransportError::ShuttingDown));
    let sent = socket.sent_envelopes();
    assert_eq!(sent.len(), OUTBOUND_CAPACITY);
    assert!(!sent.contains(&telemetry(99)));
    assert_eq!(ctx.queued(), 0);
}

#[test]
fn test_malformed_datagrams_invoke_no_handler() {
    let calls = AtomicUsize::new(0);
    let mut ctx = Ctx::new(fast_config());
    ctx.register(MessageKind::TwistCmd, |_| {
        calls.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    let valid = wire(&twist(0.5, 0.0));
    assert_eq!(
        ctx.dispatch(&[]),
        Err(TransportError::Decode(DecodeError::Empty))
    );
    assert_eq!(
        ctx.dispatch(&[7, 1, 2, 3]),
        Err(TransportError::Decode(DecodeError::UnknownKind(7)))
    );
    assert_eq!(
        ctx.dispatch(&valid[..4]),
        Err(TransportError::Decode(DecodeError::Truncated))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(ctx.dispatch(&valid), Ok(MessageKind::TwistCmd));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unrouted_kind_is_reported() {
    let ctx = Ctx::new(fast_config());
    assert_eq!(
        ctx.dispatch(&wire(&telemetry(1))),
        Err(TransportError::NoHandler(MessageKind::Telemetry))
    );
}

#[test]
fn test_duplicate_registration_keeps_first_handler() {
    let first = AtomicUsize::new(0);
    let second = AtomicUsize::new(0);
    let mut ctx = Ctx::new(fast_config());

    ctx.register(MessageKind::TwistCmd, |_| {
        first.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();
    let conflict = ctx.register(MessageKind::TwistCmd, |_| {
        second.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(conflict, Err(TransportError::HandlerConflict(MessageKind::TwistCmd)));

    ctx.dispatch(&wire(&twist(0.1, 0.0))).unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
}

#[test]
fn test_receive_loop_applies_twist_and_skips_garbage() {
    let drive = DriveState::new(DifferentialKinematics::default());
    let mut ctx = Ctx::new(fast_config());
    ctx.register(MessageKind::TwistCmd, |envelope| {
        if let Envelope::TwistCmd(cmd) = envelope {
            drive.apply_twist(cmd);
        }
    })
    .unwrap();

    let socket = MockSocket::with_inbound(vec![
        vec![0xff, 0x00],
        wire(&telemetry(4)),
        vec![1, 0, 0],
        wire(&twist(1.0, 0.0)),
    ]);
    ctx.shutdown();
    block_on(ctx.receive_loop(&socket));

    let left = drive.left.commanded_velocity();
    assert!(left > 0.0);
    assert_eq!(left, drive.right.commanded_velocity());
    assert!(socket.inbound.borrow().is_empty());
}

#[test]
fn test_receive_loop_dispatches_in_arrival_order() {
    let order = Mutex::new(Vec::new());
    let mut ctx = Ctx::new(fast_config());
    ctx.register(MessageKind::TwistCmd, |envelope| {
        if let Envelope::TwistCmd(cmd) = envelope {
            order.lock().unwrap().push(cmd.linear);
        }
    })
    .unwrap();

    let socket = MockSocket::with_inbound(
        (1..=5).map(|i| wire(&twist(i as f32, 0.0))).collect(),
    );
    ctx.shutdown();
    block_on(ctx.receive_loop(&socket));

    assert_eq!(*order.lock().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn test_receive_errors_are_retried() {
    let calls = AtomicUsize::new(0);
    let mut ctx = Ctx::new(fast_config());
    ctx.register(MessageKind::TwistCmd, |_| {
        calls.fetch_add(1, Ordering::SeqCst);
    })
    .unwrap();

    let socket = MockSocket::with_inbound(vec![wire(&twist(0.2, 0.1))]);
    socket.recv_failures.set(2);
    ctx.shutdown();
    block_on(ctx.receive_loop(&socket));

    assert_eq!(socket.recv_failures.get(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_connect_waits_for_agent_address() {
    let ctx = Ctx::new(fast_config());
    let mut socket = MockSocket::default();
    socket.bind_failures.set(1);
    let mut store = ScriptedStore {
        misses: 3,
        value: Some("192.168.1.50"),
        polls: 0,
    };
    let mut indicator = RecordingIndicator::default();

    assert_eq!(ctx.status(), ConnectionStatus::Disconnected);
    let peer = block_on(ctx.connect(&mut socket, &mut store, &mut indicator));

    assert_eq!(peer, AGENT);
    assert_eq!(store.polls, 4);
    assert_eq!(socket.bound.get(), Some(AGENT_PORT));
    assert_eq!(
        indicator.0,
        vec![ConnectionStatus::Disconnected, ConnectionStatus::Connected]
    );
    assert_eq!(ctx.status(), ConnectionStatus::Connected);
}

#[test]
fn test_resolve_peer_validates_stored_address() {
    let mut missing = ScriptedStore {
        misses: 0,
        value: None,
        polls: 0,
    };
    assert_eq!(resolve_peer(&mut missing, AGENT_PORT), Err(ConfigError::MissingPeer));

    let mut garbage = ScriptedStore {
        misses: 0,
        value: Some("not-an-ip"),
        polls: 0,
    };
    assert_eq!(resolve_peer(&mut garbage, AGENT_PORT), Err(ConfigError::InvalidAddress));

    let mut padded = ScriptedStore {
        misses: 0,
        value: Some(" 10.0.0.7\n"),
        polls: 0,
    };
    assert_eq!(
        resolve_peer(&mut padded, 9000),
        Ok(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 7), 9000))
    );
}

#[test]
fn test_publish_loop_streams_sequenced_telemetry() {
    let drive = DriveState::new(DifferentialKinematics::default());
    drive.left.set_commanded_velocity(4.0);
    let ctx = Ctx::new(fast_config());
    let socket = MockSocket::default();

    let stopper = async {
        while ctx.queued() < 3 {
            yield_now().await;
        }
        ctx.shutdown();
    };
    block_on(join(publish_loop(&ctx, &drive, Duration::from_millis(1)), stopper));
    block_on(ctx.send_loop(&socket, AGENT));

    let sent = socket.sent_envelopes();
    assert!(sent.len() >= 3);
    for (expected, envelope) in sent.iter().enumerate() {
        match envelope {
            Envelope::Telemetry(packet) => {
                assert_eq!(packet.sequence, expected as u32);
                assert_eq!(packet.left.commanded_velocity, 4.0);
            }
            other => panic!("unexpected envelope {other:?}"),
        }
    }
}

#[test]
fn test_publish_loop_stops_without_queueing_after_shutdown() {
    let drive = DriveState::new(DifferentialKinematics::default());
    let ctx = Ctx::new(fast_config());

    block_on(join(publish_loop(&ctx, &drive, Duration::from_millis(1)), async {
        ctx.shutdown()
    }));
    assert_eq!(ctx.queued(), 0);

    // Already stopped: returns without waiting for a tick.
    block_on(publish_loop(&ctx, &drive, Duration::from_secs(60)));
    assert_eq!(ctx.queued(), 0);
}
