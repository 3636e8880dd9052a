//! The interactive CLI client.
//!
//! `warbler-client <server_ip> <username> <password>`, then `/voice`,
//! `/leave`, `/exit`, or any other line as a chat message.

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::net::IpAddr;
use std::thread;
use tracing_subscriber::EnvFilter;
use warbler::client::device::CpalAudio;
use warbler::client::Config;
use warbler::{Client, ClientEvent};

#[derive(Parser)]
#[command(name = "warbler-client", about = "UDP voice-and-text chat client", version)]
struct Args {
    /// Server to connect to.
    server_ip: IpAddr,
    username: String,
    password: String,
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    println!("Connecting to {} as {}...", args.server_ip, args.username);

    let (mut client, events) = Client::connect(Config::new(args.server_ip), &args.username, &args.password)?;

    let printer = thread::spawn(move || {
        for event in events.iter() {
            match event {
                ClientEvent::Authenticated { username, .. } => {
                    println!("Logged in as {username}.");
                    println!();
                    println!("Commands:");
                    println!("  /voice - join the voice chat");
                    println!("  /leave - leave the voice chat");
                    println!("  /exit  - leave the server");
                    println!("Anything else is sent as a chat message.");
                    prompt();
                },
                ClientEvent::LoginFailed(reason) => {
                    eprintln!("Login failed: {reason}");
                    std::process::exit(1);
                },
                ClientEvent::SessionInvalidated => {
                    eprintln!("Session closed: this username logged in from another location.");
                    std::process::exit(0);
                },
                ClientEvent::UserList(users) => {
                    let json = serde_json::to_string(&users).unwrap_or_else(|_| "[]".into());
                    println!("USER_LIST::{json}");
                },
                ClientEvent::StatusUpdate { username, status } => {
                    println!("STATUS_UPDATE::{username}::{status}");
                },
                ClientEvent::Message(text) => println!("{text}"),
                ClientEvent::ServerShutdown(reason) => {
                    println!("Server shut down: {reason}");
                    std::process::exit(0);
                },
                ClientEvent::Disconnected => {
                    eprintln!("Lost connection to the server.");
                    std::process::exit(1);
                },
            }
        }
    });

    let mut audio: Option<CpalAudio> = None;
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match line.trim() {
            "/voice" => {
                if client.in_voice() {
                    println!("Already in the voice chat.");
                } else {
                    match CpalAudio::open() {
                        Ok((handle, capture, playback)) => {
                            match client.join_voice(Box::new(capture), Box::new(playback)) {
                                Ok(()) => {
                                    audio = Some(handle);
                                    println!("Joined the voice chat.");
                                },
                                Err(e) => eprintln!("Could not join the voice chat: {e}"),
                            }
                        },
                        Err(e) => eprintln!("Could not open audio devices: {e}"),
                    }
                }
            },
            "/leave" => match client.leave_voice() {
                Ok(()) => {
                    audio = None;
                    println!("Left the voice chat.");
                },
                Err(e) => eprintln!("{e}"),
            },
            "/exit" => break,
            "" => {},
            text => {
                if let Err(e) = client.send_chat(text) {
                    eprintln!("Could not send message: {e}");
                }
            },
        }
        prompt();
    }

    drop(audio);
    client.exit()?;
    let _ = printer.join();
    Ok(())
}
