//! Discovery rounds: the host periodically broadcasts Init, opens a Burst window for node
//! replies, then closes it with Silence, which marks every listening node as discovered.

use std::sync::Arc;
use std::time::Duration;

use rblb_core::{BusCore, Clock, Command, PacketHandler, SendError, Transport};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Time between Init and Burst; lets nodes reset their discovered flag.
const INIT_SETTLE: Duration = Duration::from_millis(10);
/// How long nodes get to answer the Burst before Silence.
const BURST_WINDOW: Duration = Duration::from_millis(100);

pub async fn run_discovery<T, K, H>(core: Arc<Mutex<BusCore<T, K, H>>>, interval: Duration)
where
    T: Transport,
    K: Clock,
    H: PacketHandler,
{
    loop {
        match run_round(&core, INIT_SETTLE, BURST_WINDOW).await {
            Ok(()) => {
                let stats = core.lock().await.reader_stats();
                info!(
                    frames = stats.frames,
                    checksum_errors = stats.checksum_errors,
                    timeouts = stats.timeouts,
                    "discovery round complete"
                );
            }
            Err(e) => warn!(error = %e, "discovery round aborted"),
        }
        tokio::time::sleep(interval).await;
    }
}

/// One Init / Burst / Silence sequence. The lock is released between steps so replies
/// arriving during the window are processed.
pub async fn run_round<T, K, H>(
    core: &Mutex<BusCore<T, K, H>>,
    settle: Duration,
    window: Duration,
) -> Result<(), SendError>
where
    T: Transport,
    K: Clock,
    H: PacketHandler,
{
    core.lock()
        .await
        .send_discovery(Command::DiscoveryInit, &[])?;
    tokio::time::sleep(settle).await;
    core.lock()
        .await
        .send_discovery(Command::DiscoveryBurst, &[])?;
    debug!(window_ms = window.as_millis() as u64, "burst window open");
    tokio::time::sleep(window).await;
    core.lock()
        .await
        .send_discovery(Command::DiscoverySilence, &[])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rblb_core::{decode_packet, Crc16, Header, Uid};
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn round_broadcasts_three_discovery_frames() {
        let wire = Arc::new(StdMutex::new(Vec::<u8>::new()));
        let sink = wire.clone();
        let bus = BusCore::new(
            Uid::HOST,
            move |bytes: &[u8]| sink.lock().unwrap().extend_from_slice(bytes),
            || 0u32,
            |_: &Header, _: &[u8]| {},
        );
        let core = Mutex::new(bus);

        run_round(&core, Duration::from_millis(1), Duration::from_millis(1))
            .await
            .unwrap();

        let wire = wire.lock().unwrap().clone();
        let frame_len = wire.len() / 3;
        let commands: Vec<Command> = wire
            .chunks(frame_len)
            .map(|frame| {
                let (header, payload) = decode_packet(&Crc16, frame).unwrap();
                assert_eq!(header.address, Uid::BROADCAST);
                assert!(payload.is_empty());
                header.kind()
            })
            .collect();
        assert_eq!(
            commands,
            vec![
                Command::DiscoveryInit,
                Command::DiscoveryBurst,
                Command::DiscoverySilence
            ]
        );
    }
}
