//! Periodic drive telemetry.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Ticker};

use super::{
    messages::Envelope,
    transport::{TransportContext, TransportError},
};
use crate::utils::controllers::DriveState;

/// 10 Hz status packets.
pub const TELEMETRY_PERIOD: Duration = Duration::from_millis(100);

/// Enqueue a telemetry packet every `period` until the transport shuts down.
///
/// Uses the non-blocking enqueue so a stalled link cannot back up into this
/// task; a full queue is reported and the packet is not sent. Nothing is
/// produced once shutdown has begun, even mid-period.
pub async fn publish_loop<M: RawMutex>(
    ctx: &TransportContext<'_, M>,
    drive: &DriveState,
    period: Duration,
) {
    let mut ticker = Ticker::every(period);
    while !ctx.is_stopping() {
        ticker.next().await;
        if ctx.is_stopping() {
            break;
        }
        let packet = drive.telemetry();
        match ctx.try_enqueue(Envelope::Telemetry(packet)) {
            Ok(()) => {}
            Err(TransportError::ShuttingDown) => break,
            Err(error) => {
                tracing::warn!(?error, sequence = packet.sequence, "telemetry not queued")
            }
        }
    }
    tracing::debug!("telemetry publisher stopped");
}
