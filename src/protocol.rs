//! The `::`-delimited signalling wire format.
//!
//! Every signalling message is one UTF-8 datagram; fields are separated by
//! the literal `::` with no further framing. This module owns parsing in
//! both directions (commands arriving at the server, and server messages
//! arriving at a client) plus the builders for everything the server emits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Field separator of the signalling format.
pub const SEPARATOR: &str = "::";

/// Literal sent by a client entering the voice chat.
pub const VOICE_CONNECT: &str = "VOICE_CONNECT";

/// Literal sent by a client leaving the voice chat.
pub const VOICE_DISCONNECT: &str = "VOICE_DISCONNECT";

/// Literal sent by a client leaving the server for good.
pub const EXIT: &str = "/exit";

/// A user's broadcast status.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Presence {
    #[serde(rename = "online")]
    Online,
    #[serde(rename = "in-voice")]
    InVoice,
    #[serde(rename = "offline")]
    Offline,
}

impl Presence {
    /// The wire spelling of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Presence::Online => "online",
            Presence::InVoice => "in-voice",
            Presence::Offline => "offline",
        }
    }

    fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "online" => Some(Presence::Online),
            "in-voice" => Some(Presence::InVoice),
            "offline" => Some(Presence::Offline),
            _ => None,
        }
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a `USER_LIST` payload.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct UserStatus {
    pub username: String,
    pub status: Presence,
}

/// Why a login attempt was refused.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoginFailure {
    InvalidCredentials,
    InvalidFormat,
    TokenGeneration,
}

impl LoginFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            LoginFailure::InvalidCredentials => "INVALID_CREDENTIALS",
            LoginFailure::InvalidFormat => "INVALID_FORMAT",
            LoginFailure::TokenGeneration => "TOKEN_GENERATION_ERROR",
        }
    }
}

/// A datagram received on the server's signalling socket, decoded by prefix.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ClientCommand {
    /// `LOGIN::<username>::<password>`, both fields trimmed and non-empty.
    Login { username: String, password: String },
    /// A `LOGIN` datagram with the wrong number of fields or empty fields.
    MalformedLogin,
    VoiceConnect,
    VoiceDisconnect,
    Exit,
    /// Anything else is chat text from an authenticated sender.
    Chat(String),
}

/// Decodes one inbound signalling datagram.
pub fn parse_command(raw: &str) -> ClientCommand {
    let mut parts = raw.splitn(3, SEPARATOR);
    let head = parts.next().unwrap_or_default();

    if head.trim() == "LOGIN" {
        return match (parts.next(), parts.next()) {
            (Some(username), Some(password)) => {
                let username = username.trim();
                let password = password.trim();
                if username.is_empty() || password.is_empty() {
                    ClientCommand::MalformedLogin
                } else {
                    ClientCommand::Login {
                        username: username.to_owned(),
                        password: password.to_owned(),
                    }
                }
            },
            _ => ClientCommand::MalformedLogin,
        };
    }

    if raw.trim() == EXIT {
        ClientCommand::Exit
    } else if raw == VOICE_CONNECT {
        ClientCommand::VoiceConnect
    } else if raw == VOICE_DISCONNECT {
        ClientCommand::VoiceDisconnect
    } else {
        ClientCommand::Chat(raw.to_owned())
    }
}

/// Builds the login request a client sends first.
pub fn login(username: &str, password: &str) -> String {
    format!("LOGIN{SEPARATOR}{username}{SEPARATOR}{password}")
}

/// `LOGIN_SUCCESS::<token>::<username>`
pub fn login_success(token: &str, username: &str) -> String {
    format!("LOGIN_SUCCESS{SEPARATOR}{token}{SEPARATOR}{username}")
}

/// `LOGIN_FAILURE::<reason>`
pub fn login_failure(reason: LoginFailure) -> String {
    format!("LOGIN_FAILURE{SEPARATOR}{}", reason.as_str())
}

/// `ERROR::SESSION_INVALIDATED`, sent to the loser of a duplicate login.
pub fn session_invalidated() -> String {
    format!("ERROR{SEPARATOR}SESSION_INVALIDATED")
}

/// `USER_LIST::<json>`; an unserializable list degrades to `[]`.
pub fn user_list(users: &[UserStatus]) -> String {
    let json = serde_json::to_string(users).unwrap_or_else(|_| "[]".to_owned());
    format!("USER_LIST{SEPARATOR}{json}")
}

/// `STATUS_UPDATE::<username>::<status>`
pub fn status_update(username: &str, status: Presence) -> String {
    format!("STATUS_UPDATE{SEPARATOR}{username}{SEPARATOR}{status}")
}

/// `SERVER_SHUTDOWN::<reason>`
pub fn server_shutdown(reason: &str) -> String {
    format!("SERVER_SHUTDOWN{SEPARATOR}{reason}")
}

/// A chat line as fanned out to every listener: `[<username>]: <text>`.
pub fn chat_line(username: &str, text: &str) -> String {
    format!("[{username}]: {text}")
}

/// A datagram received on a client's signalling socket.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerMessage {
    LoginSuccess { token: String, username: String },
    LoginFailure(String),
    SessionInvalidated,
    UserList(Vec<UserStatus>),
    StatusUpdate { username: String, status: Presence },
    Shutdown(String),
    /// Chat lines and human-readable notifications.
    Text(String),
}

/// Decodes one server datagram. Anything that fails to parse as a tagged
/// message is surfaced verbatim as [`ServerMessage::Text`].
pub fn parse_server_message(raw: &str) -> ServerMessage {
    if let Some(rest) = raw.strip_prefix("LOGIN_SUCCESS::") {
        let mut parts = rest.splitn(2, SEPARATOR);
        if let (Some(token), Some(username)) = (parts.next(), parts.next()) {
            return ServerMessage::LoginSuccess {
                token: token.to_owned(),
                username: username.to_owned(),
            };
        }
    } else if let Some(reason) = raw.strip_prefix("LOGIN_FAILURE::") {
        return ServerMessage::LoginFailure(reason.to_owned());
    } else if raw.starts_with("ERROR::SESSION_INVALIDATED") {
        return ServerMessage::SessionInvalidated;
    } else if let Some(json) = raw.strip_prefix("USER_LIST::") {
        if let Ok(users) = serde_json::from_str::<Vec<UserStatus>>(json) {
            return ServerMessage::UserList(users);
        }
    } else if let Some(rest) = raw.strip_prefix("STATUS_UPDATE::") {
        let mut parts = rest.splitn(2, SEPARATOR);
        if let (Some(username), Some(status)) = (parts.next(), parts.next()) {
            if let Some(status) = Presence::from_wire(status) {
                return ServerMessage::StatusUpdate {
                    username: username.to_owned(),
                    status,
                };
            }
        }
    } else if let Some(reason) = raw.strip_prefix("SERVER_SHUTDOWN::") {
        return ServerMessage::Shutdown(reason.to_owned());
    }

    ServerMessage::Text(raw.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_parses_with_trimmed_fields() {
        assert_eq!(
            parse_command("LOGIN:: alice ::pw1"),
            ClientCommand::Login {
                username: "alice".into(),
                password: "pw1".into(),
            }
        );
    }

    #[test]
    fn login_with_missing_fields_is_malformed() {
        assert_eq!(parse_command("LOGIN::alice"), ClientCommand::MalformedLogin);
        assert_eq!(parse_command("LOGIN"), ClientCommand::MalformedLogin);
        assert_eq!(parse_command("LOGIN:: ::pw"), ClientCommand::MalformedLogin);
    }

    #[test]
    fn password_may_contain_the_separator() {
        // The third field is everything after the second separator.
        assert_eq!(
            parse_command("LOGIN::alice::a::b"),
            ClientCommand::Login {
                username: "alice".into(),
                password: "a::b".into(),
            }
        );
    }

    #[test]
    fn control_literals_parse_exactly() {
        assert_eq!(parse_command("VOICE_CONNECT"), ClientCommand::VoiceConnect);
        assert_eq!(parse_command("VOICE_DISCONNECT"), ClientCommand::VoiceDisconnect);
        assert_eq!(parse_command(" /exit "), ClientCommand::Exit);
        assert_eq!(
            parse_command("hello there"),
            ClientCommand::Chat("hello there".into())
        );
    }

    #[test]
    fn user_list_json_shape() {
        let users = vec![
            UserStatus {
                username: "alice".into(),
                status: Presence::Online,
            },
            UserStatus {
                username: "bob".into(),
                status: Presence::InVoice,
            },
        ];
        assert_eq!(
            user_list(&users),
            r#"USER_LIST::[{"username":"alice","status":"online"},{"username":"bob","status":"in-voice"}]"#
        );
    }

    #[test]
    fn server_messages_round_trip() {
        assert_eq!(
            parse_server_message(&login_success("deadbeef", "alice")),
            ServerMessage::LoginSuccess {
                token: "deadbeef".into(),
                username: "alice".into(),
            }
        );
        assert_eq!(
            parse_server_message(&login_failure(LoginFailure::InvalidCredentials)),
            ServerMessage::LoginFailure("INVALID_CREDENTIALS".into())
        );
        assert_eq!(
            parse_server_message(&session_invalidated()),
            ServerMessage::SessionInvalidated
        );
        assert_eq!(
            parse_server_message(&status_update("bob", Presence::InVoice)),
            ServerMessage::StatusUpdate {
                username: "bob".into(),
                status: Presence::InVoice,
            }
        );
        assert_eq!(
            parse_server_message(&server_shutdown("going down")),
            ServerMessage::Shutdown("going down".into())
        );
        assert_eq!(
            parse_server_message("[alice]: hi"),
            ServerMessage::Text("[alice]: hi".into())
        );
    }

    #[test]
    fn user_list_parses_back() {
        let users = vec![UserStatus {
            username: "carol".into(),
            status: Presence::Offline,
        }];
        assert_eq!(
            parse_server_message(&user_list(&users)),
            ServerMessage::UserList(users)
        );
    }

    #[test]
    fn malformed_status_update_degrades_to_text() {
        assert_eq!(
            parse_server_message("STATUS_UPDATE::bob::sleeping"),
            ServerMessage::Text("STATUS_UPDATE::bob::sleeping".into())
        );
    }
}
