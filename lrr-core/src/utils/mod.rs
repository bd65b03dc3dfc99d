//! Utility re-exports and helper macros for the LRR drive base.
//!
//! This module re-exports the control loop, transport, and kinematics
//! components:
//!
//! - `connection`: UDP transport, wire messages and peer configuration
//! - `controllers`: encoder tracking, PID regulation and motor actuation
//! - `math`: differential-drive kinematics
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod connection;
pub mod controllers;
pub mod math;

pub use connection::transport::TransportContext;
pub use controllers::DriveState;
pub use embassy_time::*;
pub use math::kinematics::DifferentialKinematics as dk;
#[doc(hidden)]
pub use static_cell;

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: $crate::utils::static_cell::StaticCell<$t> =
            $crate::utils::static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
