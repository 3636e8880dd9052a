//! The janitor: drops voice-idle clients back to plain online presence.
//!
//! Only voice participation is timed out; the signalling side of a client
//! lives until `/exit`, session invalidation, or server shutdown.

use crate::protocol::{self, Presence};
use crate::server::Shared;
use flume::Receiver;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval_at, Instant as TokioInstant};
use tracing::{info, instrument};

#[instrument(skip_all)]
pub(crate) async fn runner(shared: Arc<Shared>, stop: Receiver<()>) {
    info!("Janitor started.");

    let sweep_gap = shared.config.client_timeout / 2;
    let mut ticker = interval_at(TokioInstant::now() + sweep_gap, sweep_gap);

    loop {
        tokio::select! {
            _ = ticker.tick() => sweep(&shared).await,
            _ = stop.recv_async() => break,
        }
    }

    info!("Janitor stopped.");
}

async fn sweep(shared: &Shared) {
    let timeout = shared.config.client_timeout;
    let now = Instant::now();

    let mut evicted = Vec::new();
    {
        let mut clients = shared.registry.write();
        for record in clients.values_mut() {
            if record.in_voice && now.duration_since(record.last_voice_activity) > timeout {
                record.in_voice = false;
                record.voice_bound = false;
                record.presence = Presence::Online;
                evicted.push(record.username.clone());
            }
        }
    }

    for username in evicted {
        shared.talkers.remove(&username);
        info!("Dropping {} from the voice chat: idle past {:?}.", username, timeout);
        shared
            .broadcast(&protocol::status_update(&username, Presence::Online), None)
            .await;
    }
}
