//! Constants governing transport, codec, and signal conditioning.

use audiopus::{Bitrate, Channels, SampleRate};
use std::time::Duration;

/// Sample rate of all audio, on both sides of the wire.
pub const SAMPLE_RATE: SampleRate = SampleRate::Hz48000;

/// Sample rate of all audio, on both sides of the wire.
pub const SAMPLE_RATE_RAW: usize = 48_000;

/// All audio is mono.
pub const CHANNELS: Channels = Channels::Mono;

/// Number of audio frames to be mixed and sent per second.
pub const AUDIO_FRAME_RATE: usize = 50;

/// Number of samples in one complete frame of audio (20 ms).
pub const FRAME_SIZE: usize = SAMPLE_RATE_RAW / AUDIO_FRAME_RATE;

/// Length of time between any two mixer ticks.
pub const MIX_INTERVAL: Duration = Duration::from_millis(1000 / AUDIO_FRAME_RATE as u64);

/// Maximum size of an encoded opus packet.
pub const MAX_PACKET_SIZE: usize = 1275;

/// Largest signalling datagram the dispatcher will read.
pub const CONTROL_DATAGRAM_MAX: usize = 4096;

/// Default port of the signalling socket.
pub const DEFAULT_CONTROL_PORT: u16 = 6000;

/// Default port of the voice socket.
pub const DEFAULT_VOICE_PORT: u16 = 6001;

/// Bitrate of the per-listener mix encoders on the server.
pub const SERVER_BITRATE: Bitrate = Bitrate::BitsPerSecond(96_000);

/// Encoder complexity on the server.
pub const SERVER_COMPLEXITY: u8 = 10;

/// Expected packet loss advertised to the server encoders, in percent.
pub const SERVER_EXPECTED_LOSS: u8 = 10;

/// Bitrate of the microphone encoder on the client.
pub const CLIENT_BITRATE: Bitrate = Bitrate::BitsPerSecond(32_000);

/// Encoder complexity on the client.
pub const CLIENT_COMPLEXITY: u8 = 8;

/// Expected packet loss advertised to the client encoder, in percent.
pub const CLIENT_EXPECTED_LOSS: u8 = 30;

/// A client with no voice traffic for this long is dropped from the voice
/// chat by the janitor. The janitor sweeps at half this interval.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between server keepalive heartbeats on the voice socket.
///
/// Heartbeats keep NAT mappings alive and double as liveness evidence.
pub const VOICE_KEEPALIVE_GAP: Duration = Duration::from_secs(5);

/// Delay between client heartbeats on the voice socket.
pub const CLIENT_HEARTBEAT_GAP: Duration = Duration::from_secs(1);

/// The single byte of a voice-port heartbeat datagram.
pub const HEARTBEAT_BYTE: u8 = 0x00;

/// Number of random bytes in a session token (32 hex characters).
pub const TOKEN_LENGTH: usize = 16;

/// Jitter buffer capacity, in frames (400 ms).
pub const JITTER_CAPACITY: usize = 20;

/// Frames that must be buffered before playback starts (140 ms).
pub const JITTER_PLAYBACK_THRESHOLD: usize = 7;

/// Mean-square energy above which a frame counts as voice activity.
pub const VAD_THRESHOLD: f32 = 0.002;

/// Hangover before the gate engages, in milliseconds.
pub const VAD_HANGOVER_MS: usize = 250;

/// Consecutive low-energy frames tolerated before the gate engages.
pub const VAD_HANGOVER_FRAMES: u32 = (VAD_HANGOVER_MS * AUDIO_FRAME_RATE / 1000) as u32;

/// Attenuation applied to gated frames.
pub const SOFT_GATE_FACTOR: f32 = 0.3;

/// Cutoff of the one-pole high-pass applied to every voiced frame.
pub const HIGH_PASS_CUTOFF_HZ: f32 = 100.0;

/// Peak amplitude above which a frame is scaled back down.
pub const COMPRESSION_THRESHOLD: f32 = 0.8;

/// Lower edge of the target peak band for normalization.
pub const TARGET_MIN_PEAK: f32 = 0.2;

/// Upper edge of the target peak band for normalization.
pub const TARGET_MAX_PEAK: f32 = 0.8;

/// Largest boost normalization may apply to a quiet frame.
pub const MAX_BOOST: f32 = 2.5;

/// Peak below which a frame is considered silence and left untouched.
pub const SILENCE_FLOOR: f32 = 1e-4;

/// Send and receive buffer size of the client voice socket.
pub const UDP_BUFFER_SIZE: usize = 32 * 1024;

/// Read deadline on blocking socket loops; timeouts poll the stop signal.
pub const READ_DEADLINE: Duration = Duration::from_millis(500);

/// Sleep between capture polls.
pub const CAPTURE_POLL: Duration = Duration::from_millis(5);
