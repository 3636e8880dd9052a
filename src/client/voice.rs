//! The client's voice session: three threads around one UDP socket.
//!
//! Capture reads device blocks into an accumulator, carves out 960-sample
//! frames, conditions, encodes, and sends. Playback reads datagrams under a
//! 500 ms deadline, decodes, conditions, and feeds the jitter buffer, paced
//! out to the sink once enough frames have pooled. A third thread emits the
//! 1 Hz keepalive. All three watch one stop channel and are joined before
//! the session hands the socket back.

use crate::audio;
use crate::client::conditioner::FrameConditioner;
use crate::client::device::{CaptureSource, PlaybackSink};
use crate::client::jitter::JitterBuffer;
use crate::constants::{
    CAPTURE_POLL, CHANNELS, CLIENT_BITRATE, CLIENT_COMPLEXITY, CLIENT_EXPECTED_LOSS,
    CLIENT_HEARTBEAT_GAP, FRAME_SIZE, HEARTBEAT_BYTE, JITTER_CAPACITY, JITTER_PLAYBACK_THRESHOLD,
    MAX_PACKET_SIZE, SAMPLE_RATE,
};
use crate::error::Result;
use audiopus::coder::{Decoder as OpusDecoder, Encoder as OpusEncoder};
use audiopus::Application;
use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

pub(crate) struct VoiceSession {
    stop: Option<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl VoiceSession {
    /// Builds the codec pair and spawns the three session threads. The
    /// socket must already be connected to the server's voice port.
    pub fn start(
        socket: UdpSocket,
        capture: Box<dyn CaptureSource>,
        playback: Box<dyn PlaybackSink>,
    ) -> Result<Self> {
        let mut encoder = OpusEncoder::new(SAMPLE_RATE, CHANNELS, Application::Voip)?;
        encoder.set_bitrate(CLIENT_BITRATE)?;
        encoder.set_complexity(CLIENT_COMPLEXITY)?;
        encoder.set_inband_fec(true)?;
        encoder.set_packet_loss_perc(CLIENT_EXPECTED_LOSS)?;
        let decoder = OpusDecoder::new(SAMPLE_RATE, CHANNELS)?;

        let (stop_tx, stop_rx) = flume::bounded::<()>(0);

        let capture_socket = socket.try_clone()?;
        let heartbeat_socket = socket.try_clone()?;

        let mut handles = Vec::with_capacity(3);
        handles.push(thread::Builder::new().name("voice-capture".into()).spawn({
            let stop = stop_rx.clone();
            move || {
                info!("Capture pipeline started.");
                capture_loop(capture_socket, capture, encoder, stop);
                info!("Capture pipeline stopped.");
            }
        })?);
        handles.push(thread::Builder::new().name("voice-playback".into()).spawn({
            let stop = stop_rx.clone();
            move || {
                info!("Playback pipeline started.");
                playback_loop(socket, playback, decoder, stop);
                info!("Playback pipeline stopped.");
            }
        })?);
        handles.push(
            thread::Builder::new()
                .name("voice-heartbeat".into())
                .spawn(move || heartbeat_loop(heartbeat_socket, stop_rx))?,
        );

        Ok(Self {
            stop: Some(stop_tx),
            handles,
        })
    }

    /// Signals every thread and waits for all of them.
    pub fn stop(mut self) {
        self.stop.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn stopped(stop: &Receiver<()>) -> bool {
    !matches!(stop.try_recv(), Err(TryRecvError::Empty))
}

fn capture_loop(
    socket: UdpSocket,
    mut source: Box<dyn CaptureSource>,
    mut encoder: OpusEncoder,
    stop: Receiver<()>,
) {
    let mut accumulator: Vec<f32> = Vec::with_capacity(FRAME_SIZE * 3);
    let mut conditioner = FrameConditioner::new();
    let mut frame = Vec::with_capacity(FRAME_SIZE);
    let mut pcm = [0i16; FRAME_SIZE];
    let mut encoded = [0u8; MAX_PACKET_SIZE];

    while !stopped(&stop) {
        let block = match source.read_block() {
            Ok(block) => block,
            Err(e) => {
                warn!("Capture source failed: {}", e);
                break;
            },
        };
        accumulator.extend_from_slice(&block);

        while accumulator.len() >= FRAME_SIZE {
            frame.clear();
            frame.extend(accumulator.drain(..FRAME_SIZE));
            conditioner.process(&mut frame);
            audio::f32_to_i16(&frame, &mut pcm);

            match encoder.encode(&pcm, &mut encoded[..]) {
                Ok(len) if len > 0 && len <= MAX_PACKET_SIZE => {
                    if let Err(e) = socket.send(&encoded[..len]) {
                        warn!("Voice send error: {}", e);
                    }
                },
                Ok(_) => {},
                Err(e) => debug!("Encode error: {:?}", e),
            }
        }

        thread::sleep(CAPTURE_POLL);
    }
}

fn playback_loop(
    socket: UdpSocket,
    mut sink: Box<dyn PlaybackSink>,
    mut decoder: OpusDecoder,
    stop: Receiver<()>,
) {
    let mut jitter = JitterBuffer::new(JITTER_CAPACITY);
    let mut conditioner = FrameConditioner::new();
    let mut incoming = [0u8; MAX_PACKET_SIZE + 1];
    let mut pcm = [0i16; FRAME_SIZE];

    while !stopped(&stop) {
        let len = match socket.recv(&mut incoming) {
            Ok(len) => len,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                warn!("Voice receive error: {}", e);
                break;
            },
        };

        if len == 1 && incoming[0] == HEARTBEAT_BYTE {
            continue;
        }

        let decoded = match decoder.decode(Some(&incoming[..len]), &mut pcm[..], false) {
            Ok(samples) => samples,
            Err(_) => continue,
        };
        if decoded != FRAME_SIZE {
            continue;
        }

        let mut frame = vec![0.0f32; FRAME_SIZE];
        audio::i16_to_f32(&pcm, &mut frame);
        conditioner.process(&mut frame);
        jitter.push(frame);

        if jitter.len() >= JITTER_PLAYBACK_THRESHOLD {
            if let Some(frame) = jitter.pop() {
                if let Err(e) = sink.play(&frame) {
                    warn!("Playback sink failed: {}", e);
                    break;
                }
            }
        }
    }
}

fn heartbeat_loop(socket: UdpSocket, stop: Receiver<()>) {
    loop {
        match stop.recv_timeout(CLIENT_HEARTBEAT_GAP) {
            Err(RecvTimeoutError::Timeout) => {
                let _ = socket.send(&[HEARTBEAT_BYTE]);
            },
            _ => break,
        }
    }
}
