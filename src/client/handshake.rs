//! Client-side connect, negotiate, login/register, and the character
//! selection screen. Everything here is strictly sequential: one request
//! in flight, one reply expected.

use tokio::net::TcpStream;
use tokio_rustls::rustls::ServerName;
use tracing::{debug, info, warn};

use crate::common::error::{AuthError, ConnectionError, ConnectionResult, ProtocolError};
use crate::config::types::ClientConfig;
use crate::protocol::credentials;
use crate::protocol::packets::codec::MessageCodec;
use crate::protocol::packets::messages::{CharacterSummary, Message};
use crate::protocol::packets::types::{
    bad_login, ACCEPT_FLAG_NO_REGISTER, ENGINE_MAJOR, ENGINE_MINOR, PROTOCOL_REVISION,
    PROTOCOL_SIGNATURE,
};
use crate::protocol::secure::{client_connector, CertificateTrust};
use crate::protocol::transport::{Conn, StreamIo};

/// What the server advertised in `ConnectionAccepted`.
#[derive(Debug, Clone)]
pub struct ServerGreeting {
    pub server_name: String,
    pub news_url: String,
    pub update_url: String,
    pub registration_enabled: bool,
}

/// A negotiated connection sitting at the login screen.
pub struct Lobby {
    pub(crate) conn: Conn,
    pub(crate) trust: CertificateTrust,
    greeting: ServerGreeting,
    next_serial: u32,
    /// Characters reported by the last list refresh.
    characters: Vec<CharacterSummary>,
    timeout: std::time::Duration,
    keep_alive: std::time::Duration,
}

impl Lobby {
    /// Connects over TCP and negotiates the protocol.
    pub async fn connect(config: &ClientConfig) -> ConnectionResult<Self> {
        info!(host = %config.host, port = config.port, "connecting");
        let stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(|e| ConnectionError::ConnectFailed {
                host: config.host.clone(),
                port: config.port,
                source: e,
            })?;
        stream.set_nodelay(true).ok();
        let trust = if config.pinned_certificate.is_empty() {
            CertificateTrust::AcceptAny
        } else {
            CertificateTrust::PinnedSha256(decode_hex(&config.pinned_certificate)?)
        };
        let mut lobby =
            Lobby::negotiate(Conn::plain(stream, MessageCodec::new()), trust).await?;
        lobby.timeout = std::time::Duration::from_secs(config.timeout_secs);
        lobby.keep_alive = std::time::Duration::from_secs(config.keep_alive_secs);
        Ok(lobby)
    }

    /// Negotiates over an already-established byte stream.
    ///
    /// Used by tests to run the whole protocol over an in-memory duplex.
    pub async fn negotiate_stream<S: StreamIo + 'static>(
        stream: S,
        trust: CertificateTrust,
    ) -> ConnectionResult<Self> {
        Lobby::negotiate(Conn::plain(stream, MessageCodec::new()), trust).await
    }

    async fn negotiate(mut conn: Conn, trust: CertificateTrust) -> ConnectionResult<Self> {
        conn.send(Message::NegotiateConnection {
            signature: PROTOCOL_SIGNATURE,
            revision: PROTOCOL_REVISION,
            major: ENGINE_MAJOR,
            minor: ENGINE_MINOR,
        })
        .await?;

        match next(&mut conn).await? {
            Message::ConnectionAccepted {
                flags,
                server_name,
                news_url,
                update_url,
            } => {
                info!(server = %server_name, "connection accepted");
                Ok(Lobby {
                    conn,
                    trust,
                    greeting: ServerGreeting {
                        server_name,
                        news_url,
                        update_url,
                        registration_enabled: flags & ACCEPT_FLAG_NO_REGISTER == 0,
                    },
                    next_serial: 1,
                    characters: Vec::new(),
                    timeout: std::time::Duration::from_secs(60),
                    keep_alive: std::time::Duration::from_secs(30),
                })
            }
            Message::ConnectionRejected { code } => Err(ConnectionError::Rejected { code }),
            other => Err(unexpected("ConnectionAccepted", other)),
        }
    }

    pub fn greeting(&self) -> &ServerGreeting {
        &self.greeting
    }

    /// Characters from the most recent list refresh.
    pub fn characters(&self) -> &[CharacterSummary] {
        &self.characters
    }

    fn serial(&mut self) -> u32 {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1);
        serial
    }

    /// Logs in with the challenge-response exchange under TLS.
    pub async fn login(&mut self, username: &str, password: &str) -> ConnectionResult<()> {
        self.conn.send(Message::StartLogin {
            username: username.to_string(),
        })
        .await?;
        let connector = client_connector(self.trust.clone());
        let server_name =
            ServerName::try_from("localhost").map_err(|e| ProtocolError::tls(e.to_string()))?;
        self.conn.wrap_client(&connector, server_name).await?;

        let (challenge, salt) = match self.next_reply().await? {
            Message::LoginChallenge { challenge, salt } => (challenge, salt),
            Message::UserNotFound => {
                self.conn.unwrap_tls()?;
                return Err(AuthError::UserNotFound.into());
            }
            Message::BadLogin { reason } if reason == bad_login::TRY_AGAIN_LATER => {
                self.conn.unwrap_tls()?;
                return Err(AuthError::RateLimited.into());
            }
            other => return Err(unexpected("LoginChallenge", other)),
        };

        let passhash = credentials::compute_passhash(&salt, password);
        let solution = credentials::compute_solution(&challenge, &passhash);
        let serial = self.serial();
        self.conn
            .send(Message::FinishLogin { serial, solution })
            .await?;

        match self.next_reply().await? {
            Message::Success { .. } => {
                self.conn.unwrap_tls()?;
                // The server holds its plaintext greeting until this frame
                // confirms the TLS layer is down on this side too.
                self.conn.send(Message::KeepAlive).await?;
                debug!(username, "logged in");
                self.settle(std::time::Duration::from_millis(200)).await
            }
            Message::Failed { .. } => {
                self.conn.unwrap_tls()?;
                Err(AuthError::BadCredentials.into())
            }
            Message::BadLogin { reason } if reason == bad_login::CHALLENGE_EXPIRED => {
                self.conn.unwrap_tls()?;
                Err(AuthError::ChallengeExpired.into())
            }
            Message::BadLogin { .. } => Err(AuthError::TooManyAttempts.into()),
            other => Err(unexpected("Success", other)),
        }
    }

    /// Registers a fresh account; on success the server logs it in too.
    pub async fn register(
        &mut self,
        username: &str,
        password: &str,
        email: &str,
    ) -> ConnectionResult<()> {
        let salt = credentials::generate_salt();
        let passhash = credentials::compute_passhash(&salt, password);
        let serial = self.serial();
        self.conn
            .send(Message::Register {
                serial,
                username: username.to_string(),
                salt: salt.to_vec(),
                passhash: passhash.to_vec(),
                email: email.to_string(),
            })
            .await?;
        match self.next_reply().await? {
            Message::Success { .. } => {
                info!(username, "account registered");
                self.settle(std::time::Duration::from_millis(200)).await
            }
            Message::Failed { reason, .. } => Err(AuthError::RegistrationRejected(reason).into()),
            other => Err(unexpected("Success", other)),
        }
    }

    /// Handles a push packet that can arrive between replies.
    ///
    /// The character list is rebuilt from `StartCharacterList` followed by
    /// one `AvailableCharacter` per character; there is no terminator, so
    /// the list is whatever has arrived when the stream goes quiet.
    fn absorb_push(&mut self, message: Message) -> bool {
        match message {
            Message::KeepAlive => true,
            Message::ServerInformation { entries } => {
                for entry in entries {
                    // Unknown information codes are ignorable.
                    debug!(code = entry.code, value = %entry.value, "server info");
                }
                true
            }
            Message::StartCharacterList => {
                self.characters.clear();
                true
            }
            Message::AvailableCharacter(character) => {
                self.characters.push(character);
                true
            }
            _ => false,
        }
    }

    /// Waits for the next reply-class packet, absorbing pushes on the way.
    async fn next_reply(&mut self) -> ConnectionResult<Message> {
        loop {
            match self.conn.next().await {
                None => return Err(ConnectionError::ConnectionClosed),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(message)) => {
                    if !self.absorb_push(message.clone()) {
                        return Ok(message);
                    }
                }
            }
        }
    }

    /// Absorbs pushes until the stream is idle for `window`.
    ///
    /// Used after replies whose follow-up pushes (the character list) have
    /// no terminator packet.
    pub async fn settle(&mut self, window: std::time::Duration) -> ConnectionResult<()> {
        loop {
            match tokio::time::timeout(window, self.conn.next()).await {
                Err(_) => return Ok(()),
                Ok(None) => return Err(ConnectionError::ConnectionClosed),
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(Some(Ok(message))) => {
                    if !self.absorb_push(message.clone()) {
                        return Err(unexpected("push packet", message));
                    }
                }
            }
        }
    }

    /// Asks the server to delete a character and refreshes the list.
    pub async fn delete_character(&mut self, name: &str) -> ConnectionResult<()> {
        let serial = self.serial();
        self.conn
            .send(Message::DeleteCharacter {
                serial,
                name: name.to_string(),
            })
            .await?;
        match self.next_reply().await? {
            Message::Success { .. } => {
                // The server follows up with a full list refresh.
                self.settle(std::time::Duration::from_millis(200)).await
            }
            Message::Failed { reason, .. } => Err(ConnectionError::RequestFailed(reason)),
            other => Err(unexpected("Success", other)),
        }
    }

    /// Runs the two-step creation flow and returns the new character.
    pub async fn create_character(
        &mut self,
        name: &str,
        stats: [u16; 6],
        sprites: [u32; 4],
    ) -> ConnectionResult<CharacterSummary> {
        let serial = self.serial();
        self.conn
            .send(Message::StartCreateCharacter { serial })
            .await?;
        match self.next_reply().await? {
            Message::Success { .. } => {}
            Message::Failed { reason, .. } => {
                return Err(ConnectionError::RequestFailed(reason))
            }
            other => return Err(unexpected("Success", other)),
        }
        let stat_points = match self.next_reply().await? {
            Message::NewCharacterOptions { stat_points, .. } => stat_points,
            other => return Err(unexpected("NewCharacterOptions", other)),
        };
        let spent: u32 = stats.iter().map(|s| u32::from(*s)).sum();
        if spent != stat_points {
            warn!(spent, stat_points, "stat spend does not match the budget");
        }

        let serial = self.serial();
        self.conn
            .send(Message::FinishCreateCharacter {
                serial,
                name: name.to_string(),
                stats,
                sprites,
            })
            .await?;
        match self.next_reply().await? {
            Message::Success { .. } => {}
            Message::Failed { reason, .. } => {
                return Err(ConnectionError::RequestFailed(reason))
            }
            other => return Err(unexpected("Success", other)),
        }
        // The new character arrives as a list push.
        self.settle(std::time::Duration::from_millis(200)).await?;
        self.characters
            .iter()
            .find(|character| character.name.eq_ignore_ascii_case(name))
            .cloned()
            .ok_or(ConnectionError::ConnectionClosed)
    }

    /// Selects a character and hands the connection to a gameplay session.
    pub async fn select_character(
        mut self,
        name: &str,
    ) -> ConnectionResult<crate::client::session::Session> {
        let serial = self.serial();
        self.conn
            .send(Message::SelectCharacter {
                serial,
                name: name.to_string(),
            })
            .await?;
        match self.next_reply().await? {
            Message::Success { .. } => {
                info!(character = name, "entering the world");
                Ok(crate::client::session::Session::start(
                    self.conn,
                    self.timeout,
                    self.keep_alive,
                ))
            }
            Message::Failed { reason, .. } => Err(ConnectionError::RequestFailed(reason)),
            other => Err(unexpected("Success", other)),
        }
    }

    /// Tells the server we are leaving and drops the connection.
    pub async fn disconnect(mut self) -> ConnectionResult<()> {
        self.conn.send(Message::Disconnect).await?;
        Ok(())
    }
}

async fn next(conn: &mut Conn) -> ConnectionResult<Message> {
    loop {
        match conn.next().await {
            None => return Err(ConnectionError::ConnectionClosed),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(Message::KeepAlive)) => continue,
            Some(Ok(message)) => return Ok(message),
        }
    }
}

fn unexpected(expected: &'static str, got: Message) -> ConnectionError {
    ProtocolError::UnexpectedPacket {
        expected,
        got: got.name(),
    }
    .into()
}

fn decode_hex(hex: &str) -> Result<Vec<u8>, ConnectionError> {
    if hex.len() % 2 != 0 {
        return Err(ProtocolError::tls("odd-length fingerprint").into());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| ProtocolError::tls("invalid fingerprint hex").into())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_fingerprints_decode() {
        assert_eq!(decode_hex("0aff").unwrap(), vec![0x0A, 0xFF]);
        assert!(decode_hex("0af").is_err());
        assert!(decode_hex("zz").is_err());
    }
}
