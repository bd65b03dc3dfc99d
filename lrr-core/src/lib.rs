//! Drive-base control core for the LRR two-wheeled robot on no-std embedded platforms.
//!
//! For a runnable host build, see the `lrr-app/mock-mcu` binary.
#![no_std]

extern crate alloc;

pub mod utils;
