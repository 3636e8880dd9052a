//! Voice egress: the only writer of the voice socket.
//!
//! Mix packets arrive from the mixer thread over a channel; whenever the
//! channel stays quiet past the keepalive gap, a one-byte heartbeat goes out
//! to every in-voice client instead. The task ends when the last packet
//! sender is gone.

use crate::constants::HEARTBEAT_BYTE;
use crate::server::mixer::VoicePacket;
use crate::server::Shared;
use flume::Receiver;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, instrument, trace, warn};

#[instrument(skip_all)]
pub(crate) async fn runner(shared: Arc<Shared>, socket: Arc<UdpSocket>, packets: Receiver<VoicePacket>) {
    info!("Voice egress started.");

    let heartbeat = [HEARTBEAT_BYTE];
    let mut keepalive_at = Instant::now() + shared.config.keepalive_gap;

    loop {
        match timeout_at(keepalive_at, packets.recv_async()).await {
            Err(_) => {
                trace!("Sending voice keepalives.");
                for addr in shared.registry.voice_recipients() {
                    if let Err(e) = socket.send_to(&heartbeat, addr).await {
                        warn!("Keepalive send error to {}: {}", addr, e);
                    }
                }
                keepalive_at += shared.config.keepalive_gap;
            },
            Ok(Ok(packet)) => {
                if let Err(e) = socket.send_to(&packet.payload, packet.addr).await {
                    error!("Voice packet send error to {}: {}", packet.addr, e);
                }
            },
            Ok(Err(_)) => break,
        }
    }

    info!("Voice egress stopped.");
}
