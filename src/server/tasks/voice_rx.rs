//! Voice ingress: reads opus datagrams, binds remote voice addresses to
//! clients, decodes, and feeds the talker table.
//!
//! Errors here are never fatal to a session: bad packets are adversarial
//! input on an open UDP port, so everything questionable is dropped and the
//! loop moves on.

use crate::audio;
use crate::constants::{FRAME_SIZE, HEARTBEAT_BYTE, MAX_PACKET_SIZE};
use crate::server::Shared;
use flume::Receiver;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tracing::{debug, error, info, instrument};

#[instrument(skip_all)]
pub(crate) async fn runner(shared: Arc<Shared>, socket: Arc<UdpSocket>, stop: Receiver<()>) {
    info!("Voice ingress started.");

    // One byte larger than the ceiling so oversized datagrams are seen as
    // oversized instead of silently truncated.
    let mut buffer = [0u8; MAX_PACKET_SIZE + 1];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buffer) => {
                match received {
                    Ok((len, addr)) => process(&shared, &buffer[..len], addr),
                    Err(e) => {
                        error!("Fatal voice socket error: {}", e);
                        break;
                    },
                }
            }
            _ = stop.recv_async() => break,
        }
    }

    info!("Voice ingress stopped.");
}

fn process(shared: &Shared, datagram: &[u8], addr: SocketAddr) {
    let mut clients = shared.registry.write();

    // An already-bound sender matches by exact address. Otherwise this is
    // the first packet of some in-voice client behind the same IP as its
    // signalling socket: bind it. Binding happens once per voice session so
    // concurrent clients on one host cannot steal each other's slot.
    let key = clients
        .values()
        .find(|c| c.voice_addr == addr)
        .map(|c| c.addr)
        .or_else(|| {
            clients
                .values()
                .find(|c| c.in_voice && !c.voice_bound && c.addr.ip() == addr.ip())
                .map(|c| c.addr)
        });
    let Some(key) = key else {
        return;
    };
    let Some(record) = clients.get_mut(&key) else {
        return;
    };
    if !record.in_voice {
        return;
    }
    if !record.voice_bound {
        debug!("Bound voice address {} to {}.", addr, record.username);
        record.voice_addr = addr;
        record.voice_bound = true;
    }

    record.last_voice_activity = Instant::now();

    if datagram.len() == 1 && datagram[0] == HEARTBEAT_BYTE {
        return;
    }
    if datagram.len() > MAX_PACKET_SIZE {
        return;
    }

    let mut pcm = [0i16; FRAME_SIZE];
    let decoded = match record.decoder.lock().decode(Some(datagram), &mut pcm[..], false) {
        Ok(samples) => samples,
        Err(e) => {
            debug!("Dropping undecodable packet from {}: {:?}", record.username, e);
            return;
        },
    };
    if decoded != FRAME_SIZE {
        return;
    }

    let mut frame = vec![0.0f32; FRAME_SIZE];
    audio::i16_to_f32(&pcm, &mut frame);

    let username = record.username.clone();
    drop(clients);
    shared.talkers.submit(&username, frame);
}
