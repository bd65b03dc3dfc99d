//! Link status as seen by the rest of the firmware.

use core::sync::atomic::{AtomicU8, Ordering};

/// Connection state of the agent link.
///
/// The link only ever moves from `Disconnected` to `Connected`; transmit and
/// receive errors are contained by the loops and do not demote it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    Disconnected = 0,
    Connected = 1,
}

/// External indicator (status LED, display, log) told about link changes.
pub trait StatusIndicator {
    fn set_status(
        &mut self,
        status: ConnectionStatus,
    );
}

/// Lock-free holder for the current [`ConnectionStatus`].
#[derive(Debug)]
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub const fn new() -> Self {
        Self(AtomicU8::new(ConnectionStatus::Disconnected as u8))
    }

    pub fn get(&self) -> ConnectionStatus {
        match self.0.load(Ordering::Acquire) {
            1 => ConnectionStatus::Connected,
            _ => ConnectionStatus::Disconnected,
        }
    }

    pub fn set(
        &self,
        status: ConnectionStatus,
    ) {
        self.0.store(status as u8, Ordering::Release);
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}
