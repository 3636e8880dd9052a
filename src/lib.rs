//! # Warbler
//!
//! Warbler is a real-time multi-user voice-and-text chat system built on
//! plain UDP datagrams. A central relay authenticates clients over a
//! signalling socket, fans out text and presence, and mixes the opus streams
//! of everyone in the voice chat into one personalized feed per listener,
//! each feed excluding that listener's own voice, on a strict 20 ms tick.
//!
//! The crate is split along the wire:
//! * [`server`]: the relay, with its session registry, signalling
//!   dispatcher, voice ingress/egress, and the mixing thread.
//! * [`client`]: the endpoint engine, from capture through voice-activity
//!   gated conditioning and encode/send, to receive/decode/jitter/playback.
//! * [`protocol`]: the `::`-delimited signalling format both sides speak.
//!
//! Two binaries wrap the library: `warbler-server` and (with the `device`
//! feature, which pulls in an OS audio backend) `warbler-client`.

pub mod audio;
pub mod client;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod server;

pub use crate::{
    client::{Client, ClientEvent},
    error::{Error, Result},
    protocol::{Presence, UserStatus},
    server::Server,
};
