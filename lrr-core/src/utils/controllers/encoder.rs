//! Single-channel encoder tracking on top of a hardware pulse counter.
//!
//! The TT motor encoders emit one pulse per slot with no quadrature phase, so
//! the counter cannot tell which way the wheel turns. The motor actuator
//! supplies the direction through [`EdgeAction`] and freezes counting at zero
//! drive.
//!
//! A wheel that is back-driven while the counter holds is not observed; that
//! displacement is lost by construction.

use core::f32::consts::PI;

/// Encoder slots per output-shaft revolution.
pub const PULSES_PER_REVOLUTION: f32 = 30.0;

/// How the pulse counter reacts to an encoder edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeAction {
    /// Count up (forward drive).
    Increase,
    /// Count down (reverse drive).
    Decrease,
    /// Ignore edges.
    Hold,
}

/// A hardware pulse-count unit.
///
/// The raw count is a signed 16-bit value that wraps at the type limits.
pub trait PulseCounter {
    type Error: core::fmt::Debug;

    /// Read the live count.
    fn count(&mut self) -> Result<i16, Self::Error>;

    /// Select what the unit does on each edge.
    fn set_edge_action(
        &mut self,
        action: EdgeAction,
    ) -> Result<(), Self::Error>;
}

/// Errors raised by the encoder tracker.
#[derive(Debug)]
pub enum EncoderError<E: core::fmt::Debug> {
    /// The counter could not be read.
    Read(E),
    /// The edge action could not be applied.
    Configure(E),
}

/// Converts a wrapping pulse count into per-tick displacement.
pub struct EncoderTracker<C> {
    counter: C,
    last_count: i16,
    action: EdgeAction,
    pulses_per_revolution: f32,
}

impl<C> EncoderTracker<C>
where
    C: PulseCounter,
{
    /// Take ownership of `counter`, put it on hold and snapshot its count.
    pub fn new(
        mut counter: C,
        pulses_per_revolution: f32,
    ) -> Result<Self, EncoderError<C::Error>> {
        counter
            .set_edge_action(EdgeAction::Hold)
            .map_err(EncoderError::Configure)?;
        let last_count = counter.count().map_err(EncoderError::Read)?;

        Ok(Self {
            counter,
            last_count,
            action: EdgeAction::Hold,
            pulses_per_revolution,
        })
    }

    /// Pulses counted since the previous call.
    ///
    /// The snapshot is replaced by the live count on every successful read,
    /// so each pulse lands in exactly one tick. Deltas are taken modulo the
    /// 16-bit counter range.
    pub fn read_delta(&mut self) -> Result<i16, EncoderError<C::Error>> {
        let current = self.counter.count().map_err(EncoderError::Read)?;
        let delta = current.wrapping_sub(self.last_count);
        self.last_count = current;
        Ok(delta)
    }

    /// Point the counter in the direction of applied drive.
    pub fn set_edge_action(
        &mut self,
        action: EdgeAction,
    ) -> Result<(), EncoderError<C::Error>> {
        if action == self.action {
            return Ok(());
        }
        self.counter
            .set_edge_action(action)
            .map_err(EncoderError::Configure)?;
        tracing::trace!(?action, "encoder edge action changed");
        self.action = action;
        Ok(())
    }

    /// Angular displacement in radians for a pulse delta.
    pub fn pulses_to_rad(
        &self,
        pulses: i16,
    ) -> f32 {
        f32::from(pulses) / self.pulses_per_revolution * (2.0 * PI)
    }

    pub fn edge_action(&self) -> EdgeAction {
        self.action
    }

    pub fn last_count(&self) -> i16 {
        self.last_count
    }

    /// Consume the tracker and return the underlying counter.
    pub fn free(self) -> C {
        self.counter
    }
}
