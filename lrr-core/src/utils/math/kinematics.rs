//! Kinematics utilities for two-wheeled differential-drive robots.
//!
//! The `DifferentialKinematics` struct maps a body twist (linear and angular
//! velocity) onto per-wheel angular velocities and inverts wheel measurements
//! back to body velocities.
//!
//! # Example
//! ```rust
//! use lrr_core::utils::math::kinematics::DifferentialKinematics;
//! let kin = DifferentialKinematics::new(0.0325, 0.135);
//! let (left, right) = kin.compute_wheel_velocities(0.2, 0.0);
//! assert_eq!(left, right);
//! ```

/// Wheel radius of the stock TT gear-motor wheels (m).
pub const DEFAULT_WHEEL_RADIUS: f32 = 0.0325;
/// Distance between the two wheel contact points (m).
pub const DEFAULT_TRACK_WIDTH: f32 = 0.135;

/// Represents the kinematics of a two-wheeled differential-drive robot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferentialKinematics {
    /// Radius of each wheel (m)
    wheel_radius: f32,
    /// Left-to-right wheel separation (m)
    track_width: f32,
}

impl Default for DifferentialKinematics {
    fn default() -> Self {
        Self::new(DEFAULT_WHEEL_RADIUS, DEFAULT_TRACK_WIDTH)
    }
}

impl DifferentialKinematics {
    /// Instantiate with a given wheel radius and track width.
    pub const fn new(
        wheel_radius: f32,
        track_width: f32,
    ) -> Self {
        Self {
            wheel_radius,
            track_width,
        }
    }

    /// Compute wheel angular velocities (rad/s) to achieve the desired twist.
    ///
    /// `linear` is forward speed in m/s and `angular` is yaw rate in rad/s
    /// (positive = counter-clockwise). Returns `(left, right)`.
    pub fn compute_wheel_velocities(
        &self,
        linear: f32,
        angular: f32,
    ) -> (f32, f32) {
        let half_track = self.track_width / 2.0;
        let left = (linear - angular * half_track) / self.wheel_radius;
        let right = (linear + angular * half_track) / self.wheel_radius;
        (clamp_small(left, 1e-6), clamp_small(right, 1e-6))
    }

    /// Recover body velocities from measured wheel speeds (rad/s).
    ///
    /// # Returns
    ///
    /// `(linear, angular)` in m/s and rad/s.
    pub fn compute_body_velocity(
        &self,
        left: f32,
        right: f32,
    ) -> (f32, f32) {
        let linear = self.wheel_radius * (left + right) / 2.0;
        let angular = self.wheel_radius * (right - left) / self.track_width;
        (linear, angular)
    }
}

fn clamp_small(
    v: f32,
    eps: f32,
) -> f32 {
    if libm::fabsf(v) < eps {
        0.0
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_line_drives_both_wheels_equally() {
        let kin = DifferentialKinematics::new(0.05, 0.2);
        let (left, right) = kin.compute_wheel_velocities(1.0, 0.0);
        assert!(libm::fabsf(left - 20.0) < 1e-4);
        assert_eq!(left, right);
    }

    #[test]
    fn positive_yaw_speeds_up_right_wheel() {
        let kin = DifferentialKinematics::new(0.05, 0.2);
        let (left, right) = kin.compute_wheel_velocities(0.0, 1.0);
        assert!(left < 0.0);
        assert!(right > 0.0);
        assert!(libm::fabsf(left + right) < 1e-6);
    }

    #[test]
    fn test_compute_wheel_velocities_zero() {
        let kin = DifferentialKinematics::default();
        assert_eq!(kin.compute_wheel_velocities(0.0, 0.0), (0.0, 0.0));
    }

    #[test]
    fn test_round_trip_body_velocity() {
        let kin = DifferentialKinematics::new(0.0325, 0.135);
        let (left, right) = kin.compute_wheel_velocities(0.42, -1.3);
        let (linear, angular) = kin.compute_body_velocity(left, right);
        assert!(libm::fabsf(linear - 0.42) < 1e-4);
        assert!(libm::fabsf(angular + 1.3) < 1e-4);
    }
}
