//! The endpoint engine.
//!
//! A [`Client`] owns the signalling socket and a reader thread that turns
//! server datagrams into [`ClientEvent`]s on a channel; the front-end drives
//! the protocol through [`send_chat`](Client::send_chat),
//! [`join_voice`](Client::join_voice), [`leave_voice`](Client::leave_voice),
//! and [`exit`](Client::exit). Voice I/O lives in its own session object
//! with a stop channel and a join barrier, so leaving the voice chat
//! releases every audio resource before `VOICE_DISCONNECT` goes out.

pub mod conditioner;
pub mod device;
pub mod jitter;

mod voice;

use crate::constants::{
    CONTROL_DATAGRAM_MAX, DEFAULT_CONTROL_PORT, DEFAULT_VOICE_PORT, READ_DEADLINE, UDP_BUFFER_SIZE,
};
use crate::error::{Error, Result};
use crate::protocol::{self, Presence, ServerMessage, UserStatus};
use device::{CaptureSource, PlaybackSink};
use flume::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use socket2::{Domain, Protocol as SockProtocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};
use voice::VoiceSession;

/// Where the client connects.
#[derive(Clone, Debug)]
pub struct Config {
    pub server_ip: IpAddr,
    pub control_port: u16,
    pub voice_port: u16,
}

impl Config {
    /// Default ports on the given server.
    pub fn new(server_ip: IpAddr) -> Self {
        Self {
            server_ip,
            control_port: DEFAULT_CONTROL_PORT,
            voice_port: DEFAULT_VOICE_PORT,
        }
    }
}

/// Everything the server can tell a client, ready for a front-end.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent {
    Authenticated { username: String, token: String },
    LoginFailed(String),
    /// Another login won this username; the session is gone.
    SessionInvalidated,
    UserList(Vec<UserStatus>),
    StatusUpdate { username: String, status: Presence },
    /// A chat line or human-readable notification.
    Message(String),
    ServerShutdown(String),
    /// The signalling socket failed; the engine is dead.
    Disconnected,
}

#[derive(Default)]
struct SharedState {
    authenticated: AtomicBool,
    username: Mutex<String>,
}

/// The client engine. Dropping it tears down voice and the reader thread.
pub struct Client {
    config: Config,
    control: UdpSocket,
    state: Arc<SharedState>,
    reader_stop: Option<Sender<()>>,
    reader: Option<JoinHandle<()>>,
    voice: Option<VoiceSession>,
}

impl Client {
    /// Dials the signalling port, sends the login request, and returns the
    /// engine plus its event stream. Authentication completes when an
    /// [`ClientEvent::Authenticated`] arrives.
    pub fn connect(
        config: Config,
        username: &str,
        password: &str,
    ) -> Result<(Self, Receiver<ClientEvent>)> {
        let control = UdpSocket::bind(unspecified(config.server_ip))?;
        control.connect((config.server_ip, config.control_port))?;
        control.set_read_timeout(Some(READ_DEADLINE))?;

        control.send(protocol::login(username, password).as_bytes())?;
        info!("Login request sent for {}.", username);

        let (event_tx, event_rx) = flume::unbounded();
        let (stop_tx, stop_rx) = flume::bounded::<()>(0);
        let state = Arc::new(SharedState::default());

        let reader = thread::Builder::new().name("control-reader".into()).spawn({
            let socket = control.try_clone()?;
            let state = state.clone();
            move || read_loop(socket, state, event_tx, stop_rx)
        })?;

        Ok((
            Self {
                config,
                control,
                state,
                reader_stop: Some(stop_tx),
                reader: Some(reader),
                voice: None,
            },
            event_rx,
        ))
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.authenticated.load(Ordering::SeqCst)
    }

    /// The username the server confirmed at login.
    pub fn username(&self) -> Option<String> {
        if self.is_authenticated() {
            Some(self.state.username.lock().clone())
        } else {
            None
        }
    }

    /// Sends one chat line; the server fans it out to everyone else.
    pub fn send_chat(&self, text: &str) -> Result<()> {
        if !self.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        self.control.send(text.as_bytes())?;
        Ok(())
    }

    /// Opens the voice socket, starts the audio session, and announces
    /// `VOICE_CONNECT`.
    pub fn join_voice(
        &mut self,
        capture: Box<dyn CaptureSource>,
        playback: Box<dyn PlaybackSink>,
    ) -> Result<()> {
        if !self.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        if self.voice.is_some() {
            return Err(Error::AlreadyInVoice);
        }

        let socket = self.open_voice_socket()?;
        let session = VoiceSession::start(socket, capture, playback)?;
        self.voice = Some(session);
        self.control.send(protocol::VOICE_CONNECT.as_bytes())?;
        info!("Joined the voice chat.");
        Ok(())
    }

    /// Stops and joins the audio threads, then announces `VOICE_DISCONNECT`.
    pub fn leave_voice(&mut self) -> Result<()> {
        let session = self.voice.take().ok_or(Error::NotInVoice)?;
        session.stop();
        self.control.send(protocol::VOICE_DISCONNECT.as_bytes())?;
        info!("Left the voice chat.");
        Ok(())
    }

    pub fn in_voice(&self) -> bool {
        self.voice.is_some()
    }

    /// Leaves voice if needed, tells the server `/exit`, and tears down.
    pub fn exit(mut self) -> Result<()> {
        if let Some(session) = self.voice.take() {
            session.stop();
        }
        if self.is_authenticated() {
            let _ = self.control.send(protocol::EXIT.as_bytes());
        }
        Ok(())
    }

    /// The voice socket carries real-time traffic: 32 KiB buffers each way
    /// and a read deadline so the receive loop can watch its stop channel.
    fn open_voice_socket(&self) -> Result<UdpSocket> {
        let domain = match self.config.server_ip {
            IpAddr::V4(_) => Domain::IPV4,
            IpAddr::V6(_) => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(SockProtocol::UDP))?;
        socket.set_recv_buffer_size(UDP_BUFFER_SIZE)?;
        socket.set_send_buffer_size(UDP_BUFFER_SIZE)?;
        socket.bind(&unspecified(self.config.server_ip).into())?;

        let socket: UdpSocket = socket.into();
        socket.connect((self.config.server_ip, self.config.voice_port))?;
        socket.set_read_timeout(Some(READ_DEADLINE))?;
        Ok(socket)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(session) = self.voice.take() {
            session.stop();
        }
        // Dropping the stop sender poisons the reader; it exits at its next
        // read deadline.
        self.reader_stop.take();
        self.reader.take();
    }
}

fn unspecified(server_ip: IpAddr) -> SocketAddr {
    match server_ip {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    }
}

fn read_loop(
    socket: UdpSocket,
    state: Arc<SharedState>,
    events: Sender<ClientEvent>,
    stop: Receiver<()>,
) {
    let mut buffer = [0u8; CONTROL_DATAGRAM_MAX];

    loop {
        if !matches!(stop.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }

        let len = match socket.recv(&mut buffer) {
            Ok(len) => len,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                warn!("Signalling socket failed: {}", e);
                let _ = events.send(ClientEvent::Disconnected);
                break;
            },
        };
        let raw = String::from_utf8_lossy(&buffer[..len]);

        match protocol::parse_server_message(&raw) {
            ServerMessage::LoginSuccess { token, username } => {
                *state.username.lock() = username.clone();
                state.authenticated.store(true, Ordering::SeqCst);
                let _ = events.send(ClientEvent::Authenticated { username, token });
            },
            ServerMessage::LoginFailure(reason) => {
                let _ = events.send(ClientEvent::LoginFailed(reason));
                break;
            },
            ServerMessage::SessionInvalidated => {
                let _ = events.send(ClientEvent::SessionInvalidated);
                break;
            },
            message => {
                // Anything else is noise until the login answer arrives.
                if !state.authenticated.load(Ordering::SeqCst) {
                    continue;
                }
                match message {
                    ServerMessage::UserList(users) => {
                        let _ = events.send(ClientEvent::UserList(users));
                    },
                    ServerMessage::StatusUpdate { username, status } => {
                        let _ = events.send(ClientEvent::StatusUpdate { username, status });
                    },
                    ServerMessage::Shutdown(reason) => {
                        let _ = events.send(ClientEvent::ServerShutdown(reason));
                        break;
                    },
                    ServerMessage::Text(text) => {
                        let _ = events.send(ClientEvent::Message(text));
                    },
                    _ => {},
                }
            },
        }
    }
}
