//! Error and result types used across the crate.

use audiopus::Error as OpusError;
use std::fmt;
use std::io::Error as IoError;

/// The result type of most fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error returned by the server or the client engine.
#[derive(Debug)]
pub enum Error {
    /// Socket or other I/O failure.
    Io(IoError),
    /// The opus encoder or decoder rejected an operation.
    Opus(OpusError),
    /// A JSON payload could not be produced.
    Json(serde_json::Error),
    /// The system's entropy source failed while generating a session token.
    TokenEntropy,
    /// The operation needs a completed login first.
    NotAuthenticated,
    /// The client is already attached to the voice chat.
    AlreadyInVoice,
    /// The client is not attached to the voice chat.
    NotInVoice,
    /// The audio capture or playback backend failed.
    Device(DeviceError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::Opus(e) => write!(f, "opus error: {e}"),
            Error::Json(e) => write!(f, "json error: {e}"),
            Error::TokenEntropy => f.write_str("entropy source failed during token generation"),
            Error::NotAuthenticated => f.write_str("not authenticated"),
            Error::AlreadyInVoice => f.write_str("already in the voice chat"),
            Error::NotInVoice => f.write_str("not in the voice chat"),
            Error::Device(e) => write!(f, "audio device error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Opus(e) => Some(e),
            Error::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<OpusError> for Error {
    fn from(e: OpusError) -> Self {
        Error::Opus(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<DeviceError> for Error {
    fn from(e: DeviceError) -> Self {
        Error::Device(e)
    }
}

/// An error raised by an audio capture or playback backend.
#[derive(Debug)]
pub enum DeviceError {
    /// No suitable capture or playback device is available.
    NoDevice,
    /// The backend shut down and will produce or accept no more audio.
    Closed,
    #[cfg(feature = "device")]
    /// The backend could not open a stream.
    Build(cpal::BuildStreamError),
    #[cfg(feature = "device")]
    /// The backend could not start a stream.
    Play(cpal::PlayStreamError),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::NoDevice => f.write_str("no audio device available"),
            DeviceError::Closed => f.write_str("audio backend closed"),
            #[cfg(feature = "device")]
            DeviceError::Build(e) => write!(f, "failed to open audio stream: {e}"),
            #[cfg(feature = "device")]
            DeviceError::Play(e) => write!(f, "failed to start audio stream: {e}"),
        }
    }
}

impl std::error::Error for DeviceError {}

#[cfg(feature = "device")]
impl From<cpal::BuildStreamError> for DeviceError {
    fn from(e: cpal::BuildStreamError) -> Self {
        DeviceError::Build(e)
    }
}

#[cfg(feature = "device")]
impl From<cpal::PlayStreamError> for DeviceError {
    fn from(e: cpal::PlayStreamError) -> Self {
        DeviceError::Play(e)
    }
}
