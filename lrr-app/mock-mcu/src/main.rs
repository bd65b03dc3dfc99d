mod sim;

use std::{collections::HashMap, convert::Infallible};

use clap::Parser;
use embassy_executor::{Executor, Spawner};
use embassy_futures::join::join;
use embassy_net::{
    udp::{PacketMetadata, UdpSocket},
    Config, Ipv4Address, Ipv4Cidr, Runner, Stack, StackResources, StaticConfigV4,
};
use embassy_net_tuntap::TunTapDevice;
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, signal::Signal};
use embassy_time::{Duration, Timer};
use heapless::Vec;
use lrr_core::{
    mk_static,
    utils::{
        connection::{
            config::{KeyValueStore, AGENT_IP_KEY},
            telemetry::{publish_loop, TELEMETRY_PERIOD},
            ConnectionStatus, Envelope, MessageKind, StatusIndicator, TransportConfig,
        },
        controllers::{
            EncoderTracker, ForwardChannel, Motor, MotorError, MotorState, PidConfig,
            RegulatorError, VelocityRegulator, CONTROL_PERIOD, PULSES_PER_REVOLUTION,
        },
        dk, DriveState, TransportContext,
    },
};
use rand_core::{OsRng, TryRngCore};
use static_cell::StaticCell;
use tracing::{error, info, warn};

use sim::{SimCounter, SimPin, SimPwm, SimWheel};

type Ctx = TransportContext<'static, CriticalSectionRawMutex>;
type Regulator = VelocityRegulator<'static, SimPin, SimPwm, SimCounter>;
type StopSignal = Signal<CriticalSectionRawMutex, ()>;

static LEFT_WHEEL: SimWheel = SimWheel::new();
static RIGHT_WHEEL: SimWheel = SimWheel::new();

#[derive(Parser)]
#[clap(version = "1.0")]
struct Opts
{
    /// TAP device name
    #[clap(long, default_value = "tap0")]
    tap: String,
    /// use a static IP instead of DHCP
    #[clap(long)]
    static_ip: bool,
    /// agent IPv4 address, as if provisioned into NVS
    #[clap(long)]
    agent_ip: Option<String>,
    /// shut down gracefully after this many seconds
    #[clap(long)]
    run_for: Option<u64>,
}

/// In-memory stand-in for the NVS partition.
struct MemoryStore(HashMap<&'static str, String>);

impl KeyValueStore for MemoryStore {
    type Error = Infallible;

    fn get_str<'b>(
        &mut self,
        key: &str,
        buf: &'b mut [u8],
    ) -> Result<Option<&'b str>, Infallible> {
        let Some(value) = self.0.get(key) else {
            return Ok(None);
        };
        let len = value.len().min(buf.len());
        buf[..len].copy_from_slice(&value.as_bytes()[..len]);
        Ok(core::str::from_utf8(&buf[..len]).ok())
    }
}

/// Status "LED" that logs to the console.
struct ConsoleIndicator;

impl StatusIndicator for ConsoleIndicator {
    fn set_status(
        &mut self,
        status: ConnectionStatus,
    ) {
        info!(?status, "status indicator");
    }
}

#[derive(Debug)]
enum BringUpError {
    Motor(MotorError<Infallible>),
    Regulator(RegulatorError),
}

fn regulator(
    name: &'static str,
    wheel: &'static SimWheel,
    state: &'static MotorState,
    forward: ForwardChannel,
) -> Result<Regulator, BringUpError> {
    let encoder = EncoderTracker::new(wheel.counter(), PULSES_PER_REVOLUTION)
        .map_err(|e| BringUpError::Motor(MotorError::Encoder(e)))?;
    let motor = Motor::new(wheel.enable_pin(), wheel.pwm_a(), wheel.pwm_b(), forward, encoder)
        .map_err(BringUpError::Motor)?;
    VelocityRegulator::new(name, motor, PidConfig::default(), state, CONTROL_PERIOD)
        .map_err(BringUpError::Regulator)
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, TunTapDevice>) -> ! {
    runner.run().await
}

#[embassy_executor::task(pool_size = 2)]
async fn control_task(
    mut regulator: Regulator,
    stop: &'static StopSignal,
) {
    regulator.run(stop).await;
}

#[embassy_executor::task]
async fn link_task(
    stack: Stack<'static>,
    ctx: &'static Ctx,
    mut store: MemoryStore,
) {
    let mut rx_meta = [PacketMetadata::EMPTY; 16];
    let mut rx_buffer = [0u8; 4096];
    let mut tx_meta = [PacketMetadata::EMPTY; 16];
    let mut tx_buffer = [0u8; 4096];
    let mut socket = UdpSocket::new(stack, &mut rx_meta, &mut rx_buffer, &mut tx_meta, &mut tx_buffer);

    info!("Waiting for network link...");
    stack.wait_config_up().await;
    if let Some(config) = stack.config_v4() {
        info!(address = %config.address, "network configured");
    }

    let peer = ctx.connect(&mut socket, &mut store, &mut ConsoleIndicator).await;
    join(ctx.send_loop(&socket, peer), ctx.receive_loop(&socket)).await;
    info!("agent link closed");
}

#[embassy_executor::task]
async fn telemetry_task(
    ctx: &'static Ctx,
    drive: &'static DriveState,
) {
    publish_loop(ctx, drive, TELEMETRY_PERIOD).await;
}

#[embassy_executor::task]
async fn shutdown_task(
    ctx: &'static Ctx,
    drive: &'static DriveState,
    stops: &'static [StopSignal; 2],
    after: Duration,
) {
    Timer::after(after).await;
    let (linear, angular) = drive.body_velocity();
    info!(linear, angular, "run time elapsed, stopping");
    drive.stop();
    ctx.shutdown();
    for stop in stops {
        stop.signal(());
    }
}

#[embassy_executor::task]
async fn main_task(spawner: Spawner) {
    let opts: Opts = Opts::parse();

    // Drive base: shared state, then one regulator per simulated wheel.
    let drive: &'static DriveState = mk_static!(DriveState, DriveState::new(dk::default()));
    let stops: &'static [StopSignal; 2] = mk_static!([StopSignal; 2], [Signal::new(), Signal::new()]);

    let wheels = [
        ("left", &LEFT_WHEEL, &drive.left, ForwardChannel::A, &stops[0]),
        ("right", &RIGHT_WHEEL, &drive.right, ForwardChannel::B, &stops[1]),
    ];
    for (name, wheel, state, forward, stop) in wheels {
        match regulator(name, wheel, state, forward) {
            Ok(reg) => {
                if let Err(e) = spawner.spawn(control_task(reg, stop)) {
                    error!(motor = name, ?e, "failed to spawn control task");
                }
            }
            Err(e) => error!(motor = name, ?e, "motor bring-up failed"),
        }
    }

    // Transport: handlers are registered before the context is shared.
    let ctx = mk_static!(Ctx, TransportContext::new(TransportConfig::default()));
    let twist = ctx.register(MessageKind::TwistCmd, move |envelope| {
        if let Envelope::TwistCmd(cmd) = envelope {
            drive.apply_twist(cmd);
        }
    });
    if let Err(e) = twist {
        error!(?e, "failed to register twist handler");
    }
    let ctx: &'static Ctx = ctx;

    let mut entries = HashMap::new();
    match opts.agent_ip {
        Some(ip) => {
            entries.insert(AGENT_IP_KEY, ip);
        }
        None => warn!(key = AGENT_IP_KEY, "agent address not provisioned, link will wait for it"),
    }

    // Network
    let device = match TunTapDevice::new(&opts.tap) {
        Ok(device) => device,
        Err(e) => {
            error!(tap = %opts.tap, %e, "failed to open TAP device");
            return;
        }
    };
    let config = if opts.static_ip {
        Config::ipv4_static(StaticConfigV4 {
            address: Ipv4Cidr::new(Ipv4Address::new(192, 168, 69, 2), 24),
            dns_servers: Vec::new(),
            gateway: Some(Ipv4Address::new(192, 168, 69, 1)),
        })
    } else {
        Config::dhcpv4(Default::default())
    };
    let mut seed_buf = [0; 8];
    if let Err(e) = OsRng.try_fill_bytes(&mut seed_buf) {
        warn!(%e, "no OS entropy, using a fixed network seed");
    }
    let seed = u64::from_le_bytes(seed_buf);

    let resources = mk_static!(StackResources<3>, StackResources::<3>::new());
    let (stack, runner) = embassy_net::new(device, config, resources, seed);

    let spawned = [
        spawner.spawn(net_task(runner)),
        spawner.spawn(link_task(stack, ctx, MemoryStore(entries))),
        spawner.spawn(telemetry_task(ctx, drive)),
    ];
    for result in spawned {
        if let Err(e) = result {
            error!(?e, "failed to spawn task");
        }
    }

    if let Some(secs) = opts.run_for {
        if let Err(e) = spawner.spawn(shutdown_task(ctx, drive, stops, Duration::from_secs(secs))) {
            error!(?e, "failed to spawn shutdown task");
        }
    }
    info!(port = ctx.config().port, "drive base running");
}

static EXECUTOR: StaticCell<Executor> = StaticCell::new();

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let executor = EXECUTOR.init(Executor::new());
    executor.run(|spawner| {
        if let Err(e) = spawner.spawn(main_task(spawner)) {
            error!(?e, "failed to spawn main task");
        }
    });
}
