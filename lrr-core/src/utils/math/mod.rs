//! Math utilities for the LRR drive base.
//!
//! This module provides kinematics calculations for a two-wheeled differential drive.

pub mod kinematics;
