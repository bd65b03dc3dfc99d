//! Fixed-period velocity regulation of one wheel.
//!
//! Every tick reads the encoder, estimates wheel velocity, runs the
//! incremental PID on the velocity error and applies the resulting power.
//! A failed tick never stops the loop: the previous power stays on the
//! bridge and the motor's fault flag is raised until a tick succeeds again.

use embassy_futures::select::{select, Either};
use embassy_sync::{blocking_mutex::raw::RawMutex, signal::Signal};
use embassy_time::{Duration, Ticker};
use embedded_hal::{digital::OutputPin, pwm::SetDutyCycle};

use super::{
    encoder::PulseCounter,
    motor::Motor,
    pid::{IncrementalPid, PidConfig, PidError},
    state::MotorState,
};

/// 100 Hz control loop.
pub const CONTROL_PERIOD: Duration = Duration::from_millis(10);

/// Construction-time misconfiguration of a regulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegulatorError {
    /// The control period rounds to zero microseconds.
    ZeroPeriod,
}

/// Why a control tick was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFault {
    EncoderRead,
    Pid(PidError),
    Actuation,
}

/// Closed-loop velocity controller for one [`Motor`].
pub struct VelocityRegulator<'a, EN, PWM, C> {
    name: &'static str,
    motor: Motor<EN, PWM, C>,
    pid: IncrementalPid,
    state: &'a MotorState,
    period: Duration,
    period_secs: f32,
}

impl<'a, EN, PWM, C> VelocityRegulator<'a, EN, PWM, C>
where
    EN: OutputPin,
    PWM: SetDutyCycle,
    C: PulseCounter,
{
    /// The period must be at least one microsecond; velocity is estimated
    /// by dividing by it.
    pub fn new(
        name: &'static str,
        motor: Motor<EN, PWM, C>,
        pid: PidConfig,
        state: &'a MotorState,
        period: Duration,
    ) -> Result<Self, RegulatorError> {
        let micros = period.as_micros();
        if micros == 0 {
            return Err(RegulatorError::ZeroPeriod);
        }
        Ok(Self {
            name,
            motor,
            pid: IncrementalPid::new(pid),
            state,
            period,
            period_secs: micros as f32 / 1_000_000.0,
        })
    }

    /// Run one control step.
    ///
    /// On failure the fault flag is raised and the bridge keeps the last
    /// power that was successfully applied.
    pub fn tick(&mut self) -> Result<f32, ControlFault> {
        match self.step() {
            Ok(power) => {
                self.state.set_fault(false);
                Ok(power)
            }
            Err(fault) => {
                tracing::warn!(motor = self.name, ?fault, "control tick failed, holding power");
                self.state.set_fault(true);
                Err(fault)
            }
        }
    }

    fn step(&mut self) -> Result<f32, ControlFault> {
        let encoder = self.motor.encoder_mut();
        let delta = encoder.read_delta().map_err(|error| {
            tracing::debug!(?error, "encoder read failed");
            ControlFault::EncoderRead
        })?;
        let reported = encoder.pulses_to_rad(delta) / self.period_secs;
        self.state.set_reported_velocity(reported);

        let error = self.state.commanded_velocity() - reported;
        let checkpoint = self.pid.clone();
        let power = self.pid.compute(error).map_err(ControlFault::Pid)?;

        // The PID only advances when its output actually reached the bridge.
        if let Err(error) = self.motor.apply(power) {
            tracing::debug!(?error, "motor actuation failed");
            self.pid = checkpoint;
            return Err(ControlFault::Actuation);
        }
        self.state.set_commanded_power(power);
        tracing::trace!(motor = self.name, delta, reported, power, "control tick");
        Ok(power)
    }

    /// Tick every control period until `stop` is signalled, then leave the
    /// motor unpowered, its encoder on hold and the driver disabled.
    pub async fn run<M: RawMutex>(
        &mut self,
        stop: &Signal<M, ()>,
    ) {
        if let Err(error) = self.motor.set_enabled(true) {
            tracing::error!(motor = self.name, ?error, "failed to enable motor driver");
            self.state.set_fault(true);
        }
        tracing::info!(
            motor = self.name,
            period_ms = self.period.as_millis(),
            "velocity loop started"
        );

        let mut ticker = Ticker::every(self.period);
        loop {
            match select(ticker.next(), stop.wait()).await {
                Either::First(()) => {
                    let _ = self.tick();
                }
                Either::Second(()) => break,
            }
        }

        self.halt();
        tracing::info!(motor = self.name, "velocity loop stopped");
    }

    fn halt(&mut self) {
        self.pid.reset();
        if let Err(error) = self.motor.apply(0.0) {
            tracing::warn!(motor = self.name, ?error, "failed to zero motor power");
        }
        if let Err(error) = self.motor.set_enabled(false) {
            tracing::warn!(motor = self.name, ?error, "failed to disable motor driver");
        }
        self.state.set_commanded_power(0.0);
    }

    pub fn motor(&self) -> &Motor<EN, PWM, C> {
        &self.motor
    }

    pub fn motor_mut(&mut self) -> &mut Motor<EN, PWM, C> {
        &mut self.motor
    }

    pub fn pid(&self) -> &IncrementalPid {
        &self.pid
    }

    pub fn state(&self) -> &MotorState {
        self.state
    }
}
