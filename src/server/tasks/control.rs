//! The signalling dispatcher: one read loop over the control socket,
//! routing datagrams by prefix.

use crate::constants::{
    CHANNELS, CONTROL_DATAGRAM_MAX, SAMPLE_RATE, SERVER_BITRATE, SERVER_COMPLEXITY,
    SERVER_EXPECTED_LOSS,
};
use crate::protocol::{self, ClientCommand, LoginFailure, Presence};
use crate::server::auth::{self, LoginCheck, Session};
use crate::server::registry::ClientRecord;
use crate::server::Shared;
use audiopus::coder::{Decoder as OpusDecoder, Encoder as OpusEncoder};
use audiopus::Application;
use flume::Receiver;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

#[instrument(skip(shared, stop))]
pub(crate) async fn runner(shared: Arc<Shared>, stop: Receiver<()>) {
    info!("Signalling dispatcher started.");

    let mut buffer = [0u8; CONTROL_DATAGRAM_MAX];
    loop {
        tokio::select! {
            received = shared.control.recv_from(&mut buffer) => {
                match received {
                    Ok((len, addr)) => {
                        let raw = String::from_utf8_lossy(&buffer[..len]).into_owned();
                        dispatch(&shared, &raw, addr).await;
                    },
                    Err(e) => {
                        error!("Fatal signalling socket error: {}", e);
                        break;
                    },
                }
            }
            _ = stop.recv_async() => break,
        }
    }

    info!("Signalling dispatcher stopped.");
}

async fn dispatch(shared: &Shared, raw: &str, addr: SocketAddr) {
    match protocol::parse_command(raw) {
        ClientCommand::Login { username, password } => {
            handle_login(shared, &username, &password, addr).await;
        },
        ClientCommand::MalformedLogin => {
            warn!("Malformed login from {}.", addr);
            shared
                .send(&protocol::login_failure(LoginFailure::InvalidFormat), addr)
                .await;
        },
        command => {
            // Everything but LOGIN requires an authenticated sender;
            // unknown traffic is dropped without acknowledgement.
            if !shared.registry.contains(&addr) {
                return;
            }
            match command {
                ClientCommand::Exit => handle_exit(shared, addr).await,
                ClientCommand::VoiceConnect => handle_voice_connect(shared, addr).await,
                ClientCommand::VoiceDisconnect => handle_voice_disconnect(shared, addr).await,
                ClientCommand::Chat(text) => handle_chat(shared, addr, &text).await,
                ClientCommand::Login { .. } | ClientCommand::MalformedLogin => unreachable!(),
            }
        },
    }
}

fn server_codec_pair() -> crate::error::Result<(OpusEncoder, OpusDecoder)> {
    let mut encoder = OpusEncoder::new(SAMPLE_RATE, CHANNELS, Application::Voip)?;
    encoder.set_bitrate(SERVER_BITRATE)?;
    encoder.set_complexity(SERVER_COMPLEXITY)?;
    encoder.set_inband_fec(true)?;
    encoder.set_packet_loss_perc(SERVER_EXPECTED_LOSS)?;
    let decoder = OpusDecoder::new(SAMPLE_RATE, CHANNELS)?;
    Ok((encoder, decoder))
}

async fn handle_login(shared: &Shared, username: &str, password: &str, addr: SocketAddr) {
    let new_user = match shared.credentials.check_or_register(username, password) {
        LoginCheck::Accepted { new_user } => new_user,
        LoginCheck::WrongPassword => {
            info!("Refused login for {} from {}: wrong password.", username, addr);
            shared
                .send(&protocol::login_failure(LoginFailure::InvalidCredentials), addr)
                .await;
            return;
        },
    };

    // A username holds one session at a time: the previous holder loses,
    // learns why, and is gone before the new token exists.
    if let Some(old) = shared.sessions.take(username) {
        info!(
            "Session for {} superseded by {}; invalidating {}.",
            username, addr, old.addr
        );
        shared.send(&protocol::session_invalidated(), old.addr).await;
        shared.drop_client(&old.addr);
    }

    let token = match auth::generate_token() {
        Ok(token) => token,
        Err(e) => {
            error!("Token generation failed for {}: {}", username, e);
            shared
                .send(&protocol::login_failure(LoginFailure::TokenGeneration), addr)
                .await;
            return;
        },
    };

    let (encoder, decoder) = match server_codec_pair() {
        Ok(pair) => pair,
        Err(e) => {
            error!("Could not create codec pair for {}: {}", username, e);
            return;
        },
    };

    // A repeat login from the same address replaces whatever identity that
    // address held before.
    if let Some(previous) = shared.drop_client(&addr) {
        shared.sessions.remove(&previous.username, &previous.token);
    }

    shared.sessions.insert(
        username,
        Session {
            token: token.clone(),
            addr,
            login_time: Instant::now(),
        },
    );
    shared.registry.insert(ClientRecord {
        addr,
        username: username.to_owned(),
        token: token.clone(),
        voice_addr: SocketAddr::new(addr.ip(), shared.config.voice_addr.port()),
        voice_bound: false,
        in_voice: false,
        presence: Presence::Online,
        last_voice_activity: Instant::now(),
        encoder: Mutex::new(encoder),
        decoder: Mutex::new(decoder),
    });

    if new_user {
        info!("Registered new user {} from {}.", username, addr);
    } else {
        info!("User {} authenticated from {}.", username, addr);
    }

    shared.send(&protocol::login_success(&token, username), addr).await;
    shared
        .send(&protocol::user_list(&shared.registry.user_list()), addr)
        .await;
    shared
        .send(&protocol::status_update(username, Presence::Online), addr)
        .await;

    // Peers learn about the newcomer the same way the newcomer learns about
    // them: one STATUS_UPDATE per user, plus a human-readable join line.
    for (peer_addr, peer_name, peer_presence) in shared.registry.peer_statuses(addr) {
        shared
            .send(&protocol::status_update(username, Presence::Online), peer_addr)
            .await;
        shared
            .send(&format!("{username} joined the chat"), peer_addr)
            .await;
        shared
            .send(&protocol::status_update(&peer_name, peer_presence), addr)
            .await;
    }
}

async fn handle_exit(shared: &Shared, addr: SocketAddr) {
    let Some(record) = shared.drop_client(&addr) else {
        return;
    };
    shared.sessions.remove(&record.username, &record.token);
    info!("Client {} ({}) left.", record.username, addr);
    shared
        .broadcast(
            &protocol::status_update(&record.username, Presence::Offline),
            None,
        )
        .await;
}

async fn handle_voice_connect(shared: &Shared, addr: SocketAddr) {
    let Some(username) = shared.registry.set_voice(&addr, true) else {
        return;
    };
    info!("{} joined the voice chat.", username);
    shared
        .broadcast(&protocol::status_update(&username, Presence::InVoice), None)
        .await;
    shared
        .broadcast(&format!("{username} joined the voice chat"), None)
        .await;
}

async fn handle_voice_disconnect(shared: &Shared, addr: SocketAddr) {
    let Some(username) = shared.registry.set_voice(&addr, false) else {
        return;
    };
    shared.talkers.remove(&username);
    info!("{} left the voice chat.", username);
    shared
        .broadcast(&protocol::status_update(&username, Presence::Online), None)
        .await;
    shared
        .broadcast(&format!("{username} left the voice chat"), None)
        .await;
}

async fn handle_chat(shared: &Shared, addr: SocketAddr, text: &str) {
    let Some(username) = shared.registry.username_of(&addr) else {
        return;
    };
    shared
        .broadcast(&protocol::chat_line(&username, text), Some(addr))
        .await;
}
