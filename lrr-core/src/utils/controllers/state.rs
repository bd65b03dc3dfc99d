//! Per-motor values shared between the control loop and the network tasks.
//!
//! The receive handler writes the velocity setpoint while the control tick
//! reads it; the control tick publishes its estimate and power for telemetry.
//! Every field is an independent atomic scalar, so neither side blocks.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::utils::connection::messages::MotorTelemetry;

/// An `f32` stored as its bit pattern in an `AtomicU32`.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub const fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(
        &self,
        value: f32,
    ) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Setpoint and last-computed values of one wheel.
#[derive(Debug)]
pub struct MotorState {
    /// Target wheel velocity (rad/s), set externally.
    commanded_velocity: AtomicF32,
    /// Velocity estimated on the last tick (rad/s).
    reported_velocity: AtomicF32,
    /// Power applied on the last good tick, in `[-1.0, 1.0]`.
    commanded_power: AtomicF32,
    /// Raised when a tick failed and the previous power was held.
    fault: AtomicBool,
}

impl Default for MotorState {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorState {
    pub const fn new() -> Self {
        Self {
            commanded_velocity: AtomicF32::new(0.0),
            reported_velocity: AtomicF32::new(0.0),
            commanded_power: AtomicF32::new(0.0),
            fault: AtomicBool::new(false),
        }
    }

    pub fn set_commanded_velocity(
        &self,
        velocity: f32,
    ) {
        self.commanded_velocity.store(velocity);
    }

    pub fn commanded_velocity(&self) -> f32 {
        self.commanded_velocity.load()
    }

    pub fn reported_velocity(&self) -> f32 {
        self.reported_velocity.load()
    }

    pub fn commanded_power(&self) -> f32 {
        self.commanded_power.load()
    }

    pub fn fault(&self) -> bool {
        self.fault.load(Ordering::Relaxed)
    }

    pub(crate) fn set_reported_velocity(
        &self,
        velocity: f32,
    ) {
        self.reported_velocity.store(velocity);
    }

    pub(crate) fn set_commanded_power(
        &self,
        power: f32,
    ) {
        self.commanded_power.store(power);
    }

    pub(crate) fn set_fault(
        &self,
        fault: bool,
    ) {
        self.fault.store(fault, Ordering::Relaxed);
    }

    /// Snapshot for the telemetry packet.
    pub fn telemetry(&self) -> MotorTelemetry {
        MotorTelemetry {
            commanded_velocity: self.commanded_velocity(),
            reported_velocity: self.reported_velocity(),
            commanded_power: self.commanded_power(),
            fault: self.fault(),
        }
    }
}
