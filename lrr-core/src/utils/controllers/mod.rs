//! Module Exports
//!
//! This file exports the modules that make up the wheel control loop.
//!
//! - `encoder`: single-channel pulse counting and displacement
//! - `pid`: incremental PID regulator
//! - `motor`: two-channel PWM actuation with encoder direction switching
//! - `regulator`: the periodic velocity loop tying the three together
//! - `state`: atomics shared with the network tasks

pub mod encoder;
pub mod motor;
pub mod pid;
pub mod regulator;
pub mod state;

use core::sync::atomic::{AtomicU32, Ordering};

pub use encoder::{EdgeAction, EncoderTracker, PulseCounter, PULSES_PER_REVOLUTION};
pub use motor::{DutyPair, ForwardChannel, Motor, MotorError};
pub use pid::{IncrementalPid, PidConfig};
pub use regulator::{ControlFault, RegulatorError, VelocityRegulator, CONTROL_PERIOD};
pub use state::MotorState;

use crate::utils::{
    connection::messages::{DriveTelemetry, TwistCmd},
    math::kinematics::DifferentialKinematics,
};

/// Shared state of the two-wheeled drive base.
///
/// Lives for the whole program and is handed by reference to the control
/// loops, the inbound command handler and the telemetry task.
pub struct DriveState {
    pub left: MotorState,
    pub right: MotorState,
    kinematics: DifferentialKinematics,
    sequence: AtomicU32,
}

impl DriveState {
    pub const fn new(kinematics: DifferentialKinematics) -> Self {
        DriveState {
            left: MotorState::new(),
            right: MotorState::new(),
            kinematics,
            sequence: AtomicU32::new(0),
        }
    }

    /// Resolve a body twist into wheel setpoints.
    pub fn apply_twist(
        &self,
        cmd: &TwistCmd,
    ) {
        let (left, right) = self
            .kinematics
            .compute_wheel_velocities(cmd.linear, cmd.angular);
        if !(left.is_finite() && right.is_finite()) {
            tracing::warn!(?cmd, "ignoring non-finite velocity command");
            return;
        }
        self.left.set_commanded_velocity(left);
        self.right.set_commanded_velocity(right);
        tracing::debug!(left, right, "wheel setpoints updated");
    }

    /// Zero both setpoints.
    pub fn stop(&self) {
        self.left.set_commanded_velocity(0.0);
        self.right.set_commanded_velocity(0.0);
    }

    /// Body velocity `(linear, angular)` estimated from the last ticks.
    pub fn body_velocity(&self) -> (f32, f32) {
        self.kinematics.compute_body_velocity(
            self.left.reported_velocity(),
            self.right.reported_velocity(),
        )
    }

    /// Build the next telemetry packet, advancing the sequence number.
    pub fn telemetry(&self) -> DriveTelemetry {
        DriveTelemetry {
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            left: self.left.telemetry(),
            right: self.right.telemetry(),
        }
    }
}
