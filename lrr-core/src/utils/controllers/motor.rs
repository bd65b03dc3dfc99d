//! Two-channel PWM motor actuation.
//!
//! A motor is driven through an H-bridge with one PWM input per direction and
//! a separate enable line. Applying a signed power selects the active channel
//! and tells the encoder which way to count.

use embedded_hal::{
    digital::{self, Error as _, OutputPin},
    pwm::{self, Error as _, SetDutyCycle},
};

use super::encoder::{EdgeAction, EncoderError, EncoderTracker, PulseCounter};

/// Duty cycle of both bridge inputs, always written together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DutyPair {
    pub forward: u16,
    pub reverse: u16,
}

/// Errors that can occur while driving a motor.
#[derive(Debug)]
pub enum MotorError<E: core::fmt::Debug> {
    Enable(digital::ErrorKind),
    Pwm(pwm::ErrorKind),
    Encoder(EncoderError<E>),
}

/// Which physical PWM input drives the wheel forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardChannel {
    #[default]
    A,
    B,
}

/// Map a signed power onto a duty pair and an encoder edge action.
///
/// Power is clamped to `[-1.0, 1.0]`; NaN is treated as zero.
pub fn drive_for(
    power: f32,
    max_forward: u16,
    max_reverse: u16,
) -> (DutyPair, EdgeAction) {
    let power = if power.is_nan() { 0.0 } else { power.clamp(-1.0, 1.0) };

    if power > 0.0 {
        let duty = DutyPair {
            forward: scale(power, max_forward),
            reverse: 0,
        };
        (duty, EdgeAction::Increase)
    } else if power < 0.0 {
        let duty = DutyPair {
            forward: 0,
            reverse: scale(-power, max_reverse),
        };
        (duty, EdgeAction::Decrease)
    } else {
        (DutyPair::default(), EdgeAction::Hold)
    }
}

fn scale(
    magnitude: f32,
    full_scale: u16,
) -> u16 {
    (magnitude * f32::from(full_scale)) as u16
}

/// A single wheel: enable line, forward/reverse PWM channels and its encoder.
pub struct Motor<EN, PWM, C> {
    enable: EN,
    forward: PWM,
    reverse: PWM,
    encoder: EncoderTracker<C>,
    duty: DutyPair,
    enabled: bool,
}

impl<EN, PWM, C> Motor<EN, PWM, C>
where
    EN: OutputPin,
    PWM: SetDutyCycle,
    C: PulseCounter,
{
    /// Bring a motor up in a safe state: disabled, zero duty, encoder on hold.
    ///
    /// `pwm_a`/`pwm_b` are the two bridge inputs; `forward` selects which of
    /// them drives the wheel forward.
    pub fn new(
        enable: EN,
        pwm_a: PWM,
        pwm_b: PWM,
        forward: ForwardChannel,
        encoder: EncoderTracker<C>,
    ) -> Result<Self, MotorError<C::Error>> {
        let (forward, reverse) = match forward {
            ForwardChannel::A => (pwm_a, pwm_b),
            ForwardChannel::B => (pwm_b, pwm_a),
        };
        let mut motor = Self {
            enable,
            forward,
            reverse,
            encoder,
            duty: DutyPair::default(),
            enabled: true,
        };
        motor.set_enabled(false)?;
        motor.apply(0.0)?;
        Ok(motor)
    }

    /// Gate the motor driver. Independent from the power command.
    pub fn set_enabled(
        &mut self,
        enabled: bool,
    ) -> Result<(), MotorError<C::Error>> {
        if enabled {
            self.enable.set_high()
        } else {
            self.enable.set_low()
        }
        .map_err(|e| MotorError::Enable(e.kind()))?;
        self.enabled = enabled;
        tracing::debug!(enabled, "motor enable line set");
        Ok(())
    }

    /// Apply a signed power in `[-1.0, 1.0]`.
    ///
    /// All or nothing: on error the bridge is put back to the last committed
    /// pair, and [`Motor::duty`] and the encoder direction keep describing it.
    pub fn apply(
        &mut self,
        power: f32,
    ) -> Result<DutyPair, MotorError<C::Error>> {
        let (duty, action) = drive_for(
            power,
            self.forward.max_duty_cycle(),
            self.reverse.max_duty_cycle(),
        );

        self.write_channels(duty).map_err(MotorError::Pwm)?;
        if let Err(error) = self.encoder.set_edge_action(action) {
            let committed = self.duty;
            if let Err(kind) = self.write_channels(committed) {
                tracing::error!(?kind, ?committed, "failed to restore bridge duty");
            }
            return Err(MotorError::Encoder(error));
        }
        self.duty = duty;
        Ok(duty)
    }

    /// Write both channels, releasing the one that goes to zero first so both
    /// inputs are never high together. If the second write fails the first
    /// channel is restored to its committed duty.
    fn write_channels(
        &mut self,
        duty: DutyPair,
    ) -> Result<(), pwm::ErrorKind> {
        let committed = self.duty;
        let (first, first_duty, first_committed, second, second_duty) = if duty.forward == 0 {
            (
                &mut self.forward,
                duty.forward,
                committed.forward,
                &mut self.reverse,
                duty.reverse,
            )
        } else {
            (
                &mut self.reverse,
                duty.reverse,
                committed.reverse,
                &mut self.forward,
                duty.forward,
            )
        };

        first.set_duty_cycle(first_duty).map_err(|e| e.kind())?;
        if let Err(e) = second.set_duty_cycle(second_duty) {
            if let Err(rollback) = first.set_duty_cycle(first_committed) {
                tracing::error!(kind = ?rollback.kind(), "failed to roll back pwm channel");
            }
            return Err(e.kind());
        }
        Ok(())
    }

    /// Last duty pair committed to both channels.
    pub fn duty(&self) -> DutyPair {
        self.duty
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn encoder(&self) -> &EncoderTracker<C> {
        &self.encoder
    }

    pub fn encoder_mut(&mut self) -> &mut EncoderTracker<C> {
        &mut self.encoder
    }
}
