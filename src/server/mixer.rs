//! The mixing thread and its talker table.
//!
//! The mixer is a synchronous context due to its compute-bound nature: a
//! dedicated thread marches a 20 ms deadline with a spin sleeper, and on
//! every tick turns the latest frame of each talker into one personalized
//! mix per listener. Each mix excludes the listener's own contribution,
//! which is what keeps echo out of the system. Mixing once per tick with
//! the latest frame bounds server-side jitter to a single tick regardless
//! of arrival timing.
//!
//! Encoded packets are handed to the voice egress task over a channel; the
//! mixer itself never touches the socket. A panic inside a tick is caught,
//! logged, and answered by restarting the loop. The mixer is the only
//! component that restarts itself.

use crate::audio;
use crate::constants::{FRAME_SIZE, MAX_PACKET_SIZE};
use crate::server::Shared;
use flume::{Receiver, Sender, TryRecvError};
use parking_lot::RwLock;
use spin_sleep::SpinSleeper;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{error, info};

/// One encoded mix on its way to a listener's voice address.
pub(crate) struct VoicePacket {
    pub addr: SocketAddr,
    pub payload: Vec<u8>,
}

/// Latest decoded frame per talker, keyed by username so the table never
/// holds a handle into the client registry. Whoever removes a client also
/// removes its entry here.
#[derive(Default)]
pub(crate) struct TalkerTable {
    inner: RwLock<HashMap<String, Vec<f32>>>,
}

impl TalkerTable {
    /// Stores `frame` as the talker's current contribution, replacing any
    /// previous one. Frames of the wrong length are discarded.
    pub fn submit(&self, username: &str, frame: Vec<f32>) {
        if frame.len() != FRAME_SIZE {
            return;
        }
        self.inner.write().insert(username.to_owned(), frame);
    }

    pub fn remove(&self, username: &str) {
        self.inner.write().remove(username);
    }

    pub fn snapshot(&self) -> HashMap<String, Vec<f32>> {
        self.inner.read().clone()
    }
}

/// Sums `sources` with a uniform `1/N` scale, then soft-clips with `tanh`
/// if any output sample exceeds unit magnitude. Returns `None` when there
/// is nothing to mix or the sources disagree on frame length.
pub fn mix(sources: &[&[f32]]) -> Option<Vec<f32>> {
    let (first, rest) = sources.split_first()?;
    let frame_len = first.len();
    if rest.iter().any(|s| s.len() != frame_len) {
        return None;
    }

    let scale = 1.0 / sources.len() as f32;
    let mut mixed = vec![0.0f32; frame_len];
    for source in sources {
        for (acc, sample) in mixed.iter_mut().zip(source.iter()) {
            *acc += sample * scale;
        }
    }

    if mixed.iter().any(|s| s.abs() > 1.0) {
        for sample in &mut mixed {
            *sample = sample.tanh();
        }
    }

    Some(mixed)
}

/// Every talker frame except the listener's own.
fn sources_for<'a>(frames: &'a HashMap<String, Vec<f32>>, listener: &str) -> Vec<&'a [f32]> {
    frames
        .iter()
        .filter(|(talker, _)| talker.as_str() != listener)
        .map(|(_, frame)| frame.as_slice())
        .collect()
}

pub(crate) fn spawn(
    shared: Arc<Shared>,
    out: Sender<VoicePacket>,
    stop: Receiver<()>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        info!("Mixer started.");
        loop {
            let outcome = catch_unwind(AssertUnwindSafe(|| run(&shared, &out, &stop)));
            match outcome {
                Ok(()) => break,
                Err(_) => error!("Mixer panicked; restarting."),
            }
        }
        info!("Mixer finished.");
    })
}

fn run(shared: &Shared, out: &Sender<VoicePacket>, stop: &Receiver<()>) {
    let sleeper = SpinSleeper::default();
    let interval = shared.config.mix_interval;
    let mut deadline = Instant::now() + interval;
    let mut packet = [0u8; MAX_PACKET_SIZE];

    loop {
        match stop.try_recv() {
            Err(TryRecvError::Empty) => {},
            _ => break,
        }

        sleeper.sleep(deadline.saturating_duration_since(Instant::now()));
        deadline += interval;

        if !cycle(shared, out, &mut packet) {
            break;
        }
    }
}

/// One mixer tick. Returns `false` once the egress channel is gone.
fn cycle(shared: &Shared, out: &Sender<VoicePacket>, packet: &mut [u8; MAX_PACKET_SIZE]) -> bool {
    let frames = shared.talkers.snapshot();
    if frames.is_empty() {
        return true;
    }

    let mut outbound = Vec::new();
    {
        let clients = shared.registry.read();
        for client in clients.values() {
            // A listener must be in voice with a confirmed return address.
            if !client.in_voice || !client.voice_bound {
                continue;
            }

            let sources = sources_for(&frames, &client.username);
            if sources.is_empty() {
                continue;
            }

            let Some(mixed) = mix(&sources) else {
                // Talker frames are length-checked on submit; a mismatch
                // here is a bug, and the whole tick is abandoned.
                error!("Frame length mismatch in talker table; aborting tick.");
                return true;
            };

            let mut pcm = [0i16; FRAME_SIZE];
            audio::f32_to_i16(&mixed, &mut pcm);

            let mut encoder = client.encoder.lock();
            match encoder.encode(&pcm, &mut packet[..]) {
                Ok(len) if len > 0 => outbound.push(VoicePacket {
                    addr: client.voice_addr,
                    payload: packet[..len].to_vec(),
                }),
                Ok(_) => {},
                Err(e) => error!("Failed to encode mix for {}: {:?}", client.username, e),
            }
        }
    }

    for pkt in outbound {
        if out.send(pkt).is_err() {
            return false;
        }
    }

    true
}
