//! The audio device seam.
//!
//! The engine only ever sees two traits: a blocking source of captured
//! sample blocks and a sink for 20 ms playback frames. The `device` feature
//! provides [`CpalAudio`], which opens the default OS devices at 48 kHz mono
//! and bridges their callbacks over bounded channels; tests drive the same
//! channel-backed endpoints directly.

use crate::error::DeviceError;
use flume::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::time::Duration;

#[cfg(feature = "device")]
use crate::constants::SAMPLE_RATE_RAW;
#[cfg(feature = "device")]
use std::collections::VecDeque;
#[cfg(feature = "device")]
use tracing::warn;

/// A blocking source of captured audio.
pub trait CaptureSource: Send {
    /// Returns the next block of captured samples, of any length. An empty
    /// block means no data arrived yet; an error means the source is gone.
    fn read_block(&mut self) -> Result<Vec<f32>, DeviceError>;
}

/// A sink for decoded playback frames.
pub trait PlaybackSink: Send {
    fn play(&mut self, frame: &[f32]) -> Result<(), DeviceError>;
}

/// Capture endpoint fed from a channel.
pub struct ChannelCapture {
    rx: Receiver<Vec<f32>>,
}

impl CaptureSource for ChannelCapture {
    fn read_block(&mut self) -> Result<Vec<f32>, DeviceError> {
        match self.rx.recv_timeout(Duration::from_millis(100)) {
            Ok(block) => Ok(block),
            Err(RecvTimeoutError::Timeout) => Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Closed),
        }
    }
}

/// Playback endpoint draining into a channel. A full channel sheds the
/// frame; a stalled consumer must not block the receive loop.
pub struct ChannelPlayback {
    tx: Sender<Vec<f32>>,
}

impl PlaybackSink for ChannelPlayback {
    fn play(&mut self, frame: &[f32]) -> Result<(), DeviceError> {
        match self.tx.try_send(frame.to_vec()) {
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(DeviceError::Closed),
        }
    }
}

/// A producer handle plus the capture endpoint it feeds.
pub fn capture_pair(capacity: usize) -> (Sender<Vec<f32>>, ChannelCapture) {
    let (tx, rx) = flume::bounded(capacity);
    (tx, ChannelCapture { rx })
}

/// A playback endpoint plus the consumer handle it drains into.
pub fn playback_pair(capacity: usize) -> (ChannelPlayback, Receiver<Vec<f32>>) {
    let (tx, rx) = flume::bounded(capacity);
    (ChannelPlayback { tx }, rx)
}

/// Live cpal streams for the default input and output devices.
///
/// The returned endpoints are `Send` and move into the voice session; this
/// handle is not (cpal streams are pinned to their creating thread) and must
/// simply be kept alive for as long as the session runs.
#[cfg(feature = "device")]
pub struct CpalAudio {
    _input: cpal::Stream,
    _output: cpal::Stream,
}

#[cfg(feature = "device")]
impl CpalAudio {
    /// Opens both default devices at 48 kHz mono f32.
    pub fn open() -> Result<(Self, ChannelCapture, ChannelPlayback), DeviceError> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let host = cpal::default_host();
        let input_device = host.default_input_device().ok_or(DeviceError::NoDevice)?;
        let output_device = host.default_output_device().ok_or(DeviceError::NoDevice)?;

        let config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(SAMPLE_RATE_RAW as u32),
            buffer_size: cpal::BufferSize::Default,
        };

        let (capture_tx, capture) = capture_pair(32);
        let (playback, playback_rx) = playback_pair(32);

        let input = input_device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // A full channel means the encoder is behind; shed the block.
                let _ = capture_tx.try_send(data.to_vec());
            },
            |err| warn!("Capture stream error: {}", err),
            None,
        )?;

        let mut pending: VecDeque<f32> = VecDeque::new();
        let output = output_device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for slot in data.iter_mut() {
                    if pending.is_empty() {
                        if let Ok(frame) = playback_rx.try_recv() {
                            pending.extend(frame);
                        }
                    }
                    *slot = pending.pop_front().unwrap_or(0.0);
                }
            },
            |err| warn!("Playback stream error: {}", err),
            None,
        )?;

        input.play()?;
        output.play()?;

        Ok((
            Self {
                _input: input,
                _output: output,
            },
            capture,
            playback,
        ))
    }
}
