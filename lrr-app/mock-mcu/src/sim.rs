//! Simulated drive hardware for running the firmware on a host.
//!
//! Each wheel is a first-order plant whose speed chases the net bridge duty.
//! The encoder only sees speed magnitude and counts in whatever direction the
//! motor driver last selected, like the single-channel TT encoders.

use core::{
    convert::Infallible,
    sync::atomic::{AtomicBool, AtomicU16, Ordering},
};

use embassy_time::Instant;
use embedded_hal::{
    digital::{self, OutputPin},
    pwm::{self, SetDutyCycle},
};
use lrr_core::utils::controllers::{EdgeAction, PulseCounter};

/// 10-bit LEDC resolution.
pub const MAX_DUTY: u16 = 1024;
/// Encoder rate at full duty, in pulses per second.
const FULL_SPEED_PPS: f32 = 300.0;
/// Plant time constant in seconds.
const TIME_CONSTANT: f32 = 0.15;

/// Bridge inputs of one simulated wheel.
#[derive(Debug, Default)]
pub struct SimWheel {
    enabled: AtomicBool,
    duty_a: AtomicU16,
    duty_b: AtomicU16,
}

impl SimWheel {
    pub const fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            duty_a: AtomicU16::new(0),
            duty_b: AtomicU16::new(0),
        }
    }

    pub fn pwm_a(&'static self) -> SimPwm {
        SimPwm { duty: &self.duty_a }
    }

    pub fn pwm_b(&'static self) -> SimPwm {
        SimPwm { duty: &self.duty_b }
    }

    pub fn enable_pin(&'static self) -> SimPin {
        SimPin {
            level: &self.enabled,
        }
    }

    pub fn counter(&'static self) -> SimCounter {
        SimCounter {
            wheel: self,
            action: EdgeAction::Hold,
            speed: 0.0,
            pending: 0.0,
            count: 0,
            last_update: Instant::now(),
        }
    }

    /// Net drive in `[-1.0, 1.0]` at the bridge output.
    fn drive(&self) -> f32 {
        if !self.enabled.load(Ordering::Relaxed) {
            return 0.0;
        }
        let a = f32::from(self.duty_a.load(Ordering::Relaxed));
        let b = f32::from(self.duty_b.load(Ordering::Relaxed));
        (a - b) / f32::from(MAX_DUTY)
    }
}

pub struct SimPwm {
    duty: &'static AtomicU16,
}

impl pwm::ErrorType for SimPwm {
    type Error = Infallible;
}

impl SetDutyCycle for SimPwm {
    fn max_duty_cycle(&self) -> u16 {
        MAX_DUTY
    }

    fn set_duty_cycle(
        &mut self,
        duty: u16,
    ) -> Result<(), Infallible> {
        self.duty.store(duty.min(MAX_DUTY), Ordering::Relaxed);
        Ok(())
    }
}

pub struct SimPin {
    level: &'static AtomicBool,
}

impl digital::ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.level.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.level.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Pulse counter integrating the wheel plant on every access.
pub struct SimCounter {
    wheel: &'static SimWheel,
    action: EdgeAction,
    /// Signed wheel speed in pulses per second.
    speed: f32,
    /// Fractional pulses not counted yet.
    pending: f32,
    count: i16,
    last_update: Instant,
}

impl SimCounter {
    fn advance(&mut self) {
        let now = Instant::now();
        let dt = (now - self.last_update).as_micros() as f32 / 1_000_000.0;
        self.last_update = now;

        let target = self.wheel.drive() * FULL_SPEED_PPS;
        self.speed += (target - self.speed) * (dt / TIME_CONSTANT).min(1.0);
        self.pending += self.speed.abs() * dt;

        let whole = self.pending.trunc();
        self.pending -= whole;
        let pulses = whole as i16;
        self.count = match self.action {
            EdgeAction::Increase => self.count.wrapping_add(pulses),
            EdgeAction::Decrease => self.count.wrapping_sub(pulses),
            EdgeAction::Hold => self.count,
        };
    }
}

impl PulseCounter for SimCounter {
    type Error = Infallible;

    fn count(&mut self) -> Result<i16, Infallible> {
        self.advance();
        Ok(self.count)
    }

    fn set_edge_action(
        &mut self,
        action: EdgeAction,
    ) -> Result<(), Infallible> {
        self.advance();
        self.action = action;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time};

    use super::*;

    fn spin(ms: u64) {
        thread::sleep(time::Duration::from_millis(ms));
    }

    #[test]
    fn driven_wheel_counts_in_selected_direction() {
        static WHEEL: SimWheel = SimWheel::new();
        WHEEL.enable_pin().set_high().unwrap();
        WHEEL.pwm_a().set_duty_cycle(MAX_DUTY).unwrap();

        let mut counter = WHEEL.counter();
        counter.set_edge_action(EdgeAction::Decrease).unwrap();
        for _ in 0..10 {
            spin(20);
            counter.count().unwrap();
        }
        assert!(counter.count().unwrap() < 0);
    }

    #[test]
    fn held_counter_ignores_motion() {
        static WHEEL: SimWheel = SimWheel::new();
        WHEEL.enable_pin().set_high().unwrap();
        WHEEL.pwm_b().set_duty_cycle(MAX_DUTY).unwrap();

        let mut counter = WHEEL.counter();
        spin(100);
        assert_eq!(counter.count().unwrap(), 0);
    }

    #[test]
    fn disabled_bridge_does_not_drive() {
        static WHEEL: SimWheel = SimWheel::new();
        WHEEL.pwm_a().set_duty_cycle(MAX_DUTY).unwrap();
        assert_eq!(WHEEL.drive(), 0.0);
    }
}
