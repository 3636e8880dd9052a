//! Voice-path scenarios: idle eviction, heartbeat handling, and the
//! mixing pipeline end to end with real opus frames.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use warbler::audio;
use warbler::constants::{
    CHANNELS, CLIENT_BITRATE, CLIENT_COMPLEXITY, CLIENT_EXPECTED_LOSS, FRAME_SIZE,
    HEARTBEAT_BYTE, MAX_PACKET_SIZE, SAMPLE_RATE, SAMPLE_RATE_RAW,
};
use warbler::protocol::{self, Presence, ServerMessage};
use warbler::server::{Config, Server, ShutdownHandle};

use audiopus::coder::{Decoder as OpusDecoder, Encoder as OpusEncoder};
use audiopus::Application;

async fn spawn_server(config: Config) -> (SocketAddr, SocketAddr, ShutdownHandle) {
    let server = Server::bind(config).await.expect("bind server");
    let control = server.control_addr();
    let voice = server.voice_addr();
    let handle = server.shutdown_handle();
    tokio::spawn(server.run());
    (control, voice, handle)
}

fn test_config() -> Config {
    Config {
        control_addr: "127.0.0.1:0".parse().unwrap(),
        voice_addr: "127.0.0.1:0".parse().unwrap(),
        // Keep server keepalives out of short receive windows.
        keepalive_gap: Duration::from_secs(60),
        ..Config::default()
    }
}

async fn client_sock(target: SocketAddr) -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(target).await.unwrap();
    socket
}

async fn settle(socket: &UdpSocket) {
    let mut buffer = [0u8; 4096];
    while timeout(Duration::from_millis(300), socket.recv(&mut buffer))
        .await
        .is_ok()
    {}
}

async fn join_voice(control: SocketAddr, username: &str) -> UdpSocket {
    let socket = client_sock(control).await;
    socket
        .send(protocol::login(username, "pw").as_bytes())
        .await
        .unwrap();
    socket.send(protocol::VOICE_CONNECT.as_bytes()).await.unwrap();
    settle(&socket).await;
    socket
}

fn client_encoder() -> OpusEncoder {
    let mut encoder = OpusEncoder::new(SAMPLE_RATE, CHANNELS, Application::Voip).unwrap();
    encoder.set_bitrate(CLIENT_BITRATE).unwrap();
    encoder.set_complexity(CLIENT_COMPLEXITY).unwrap();
    encoder.set_inband_fec(true).unwrap();
    encoder.set_packet_loss_perc(CLIENT_EXPECTED_LOSS).unwrap();
    encoder
}

/// One 20 ms frame of a tone whose frequency divides evenly into the frame,
/// so phase restarts cleanly every frame.
fn tone_frame(freq: f32, amplitude: f32) -> Vec<i16> {
    let mut float = vec![0.0f32; FRAME_SIZE];
    for (i, sample) in float.iter_mut().enumerate() {
        *sample =
            amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE_RAW as f32).sin();
    }
    let mut pcm = vec![0i16; FRAME_SIZE];
    audio::f32_to_i16(&float, &mut pcm);
    pcm
}

/// Amplitude of the `freq` component of a frame, by quadrature correlation.
fn tone_component(frame: &[f32], freq: f32) -> f32 {
    let mut re = 0.0f32;
    let mut im = 0.0f32;
    for (i, sample) in frame.iter().enumerate() {
        let phase = 2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE_RAW as f32;
        re += sample * phase.cos();
        im += sample * phase.sin();
    }
    2.0 * (re * re + im * im).sqrt() / frame.len() as f32
}

#[tokio::test]
async fn voice_idle_client_is_evicted() {
    let config = Config {
        client_timeout: Duration::from_millis(600),
        ..test_config()
    };
    let (control, _voice, _handle) = spawn_server(config).await;

    let alice = client_sock(control).await;
    alice.send(protocol::login("alice", "pw").as_bytes()).await.unwrap();
    alice.send(protocol::VOICE_CONNECT.as_bytes()).await.unwrap();
    settle(&alice).await;

    // No voice traffic at all: the janitor must put alice back online.
    let mut buffer = [0u8; 4096];
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        assert!(std::time::Instant::now() < deadline, "eviction never happened");
        let Ok(received) = timeout(Duration::from_millis(500), alice.recv(&mut buffer)).await
        else {
            continue;
        };
        let len = received.unwrap();
        let message = protocol::parse_server_message(&String::from_utf8_lossy(&buffer[..len]));
        if message
            == (ServerMessage::StatusUpdate {
                username: "alice".into(),
                status: Presence::Online,
            })
        {
            break;
        }
    }
}

#[tokio::test]
async fn heartbeats_are_not_mixed_as_audio() {
    let (control, voice, _handle) = spawn_server(test_config()).await;

    let _alice = join_voice(control, "alice").await;
    let _bob = join_voice(control, "bob").await;

    let alice_voice = client_sock(voice).await;
    let bob_voice = client_sock(voice).await;

    // Both bind with a heartbeat; neither submits any audio.
    for _ in 0..3 {
        alice_voice.send(&[HEARTBEAT_BYTE]).await.unwrap();
        bob_voice.send(&[HEARTBEAT_BYTE]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    let mut buffer = [0u8; MAX_PACKET_SIZE + 1];
    assert!(
        timeout(Duration::from_millis(500), bob_voice.recv(&mut buffer))
            .await
            .is_err(),
        "a heartbeat was mixed into an audio stream"
    );
}

#[tokio::test]
async fn oversized_voice_datagrams_are_dropped() {
    let (control, voice, _handle) = spawn_server(test_config()).await;

    let _alice = join_voice(control, "alice").await;
    let _bob = join_voice(control, "bob").await;

    let alice_voice = client_sock(voice).await;
    let bob_voice = client_sock(voice).await;
    alice_voice.send(&[HEARTBEAT_BYTE]).await.unwrap();
    bob_voice.send(&[HEARTBEAT_BYTE]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Over the opus ceiling: must not reach the mixer (or crash anything).
    let oversized = vec![0x55u8; MAX_PACKET_SIZE + 1];
    for _ in 0..5 {
        alice_voice.send(&oversized).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut buffer = [0u8; MAX_PACKET_SIZE + 1];
    assert!(
        timeout(Duration::from_millis(500), bob_voice.recv(&mut buffer))
            .await
            .is_err(),
        "an oversized datagram produced mixer output"
    );
}

#[tokio::test]
async fn mixer_excludes_each_listeners_own_tone() {
    let (control, voice, _handle) = spawn_server(test_config()).await;

    let _alice = join_voice(control, "alice").await;
    let _bob = join_voice(control, "bob").await;
    let _carol = join_voice(control, "carol").await;

    // Three talkers, one tone each. Frequencies sit on exact frame bins.
    let talkers: [(f32, f32); 3] = [(400.0, 0.3), (600.0, 0.5), (800.0, 0.7)];
    let listener_freq = talkers[0].0;
    let peer_freqs = [talkers[1].0, talkers[2].0];

    let mut sender_socks = Vec::new();
    for (freq, amplitude) in talkers {
        let sock = std::sync::Arc::new(client_sock(voice).await);
        sender_socks.push((sock, freq, amplitude));
    }
    // The listener is the first talker: its mix must carry the other two
    // tones and none of its own.
    let listener_sock = sender_socks[0].0.clone();

    for (sock, freq, amplitude) in sender_socks.drain(..) {
        tokio::spawn(async move {
            let mut encoder = client_encoder();
            let pcm = tone_frame(freq, amplitude);
            let mut packet = [0u8; MAX_PACKET_SIZE];
            let mut ticker = tokio::time::interval(Duration::from_millis(20));
            for _ in 0..100 {
                ticker.tick().await;
                let len = encoder.encode(&pcm, &mut packet[..]).unwrap();
                if sock.send(&packet[..len]).await.is_err() {
                    break;
                }
            }
        });
    }

    // Collect the decoded mix over roughly a second, skipping heartbeats.
    let mut decoder = OpusDecoder::new(SAMPLE_RATE, CHANNELS).unwrap();
    let mut received = Vec::new();
    let mut buffer = [0u8; MAX_PACKET_SIZE + 1];
    let deadline = tokio::time::Instant::now() + Duration::from_millis(1500);
    while tokio::time::Instant::now() < deadline {
        let Ok(result) = timeout(Duration::from_millis(200), listener_sock.recv(&mut buffer)).await
        else {
            continue;
        };
        let len = result.unwrap();
        if len == 1 {
            continue;
        }
        let mut pcm = [0i16; FRAME_SIZE];
        if let Ok(samples) = decoder.decode(Some(&buffer[..len]), &mut pcm[..], false) {
            if samples == FRAME_SIZE {
                let mut frame = vec![0.0f32; FRAME_SIZE];
                audio::i16_to_f32(&pcm, &mut frame);
                received.push(frame);
            }
        }
    }

    assert!(
        received.len() >= 20,
        "too few mixed frames arrived: {}",
        received.len()
    );

    // Average component amplitudes over the tail, past codec warm-up.
    let tail = &received[received.len() - 10..];
    let average = |freq: f32| {
        tail.iter().map(|f| tone_component(f, freq)).sum::<f32>() / tail.len() as f32
    };

    // Peers' tones at half their sent amplitude (uniform 1/2 scale), the
    // listener's own tone at most codec noise.
    assert!(average(peer_freqs[0]) > 0.12, "600 Hz too weak: {}", average(peer_freqs[0]));
    assert!(average(peer_freqs[1]) > 0.18, "800 Hz too weak: {}", average(peer_freqs[1]));
    assert!(
        average(listener_freq) < 0.1,
        "listener's own tone leaked into its mix: {}",
        average(listener_freq)
    );
}
