//! Per-connection task: state machine, auth exchange, keep-alive and
//! timeout discipline.

use std::net::IpAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::common::error::{ProtocolResult, StorageError};
use crate::protocol::packets::messages::Message;
use crate::protocol::packets::types::{
    bad_login, create_fail, reject, ACCEPT_FLAG_NO_REGISTER, ENGINE_MAJOR, ENGINE_MINOR,
    PROTOCOL_REVISION, PROTOCOL_SIGNATURE,
};
use crate::protocol::transport::Conn;
use crate::server::auth::{LoginStart, LoginVerdict, PendingChallenge, RegisterVerdict};
use crate::server::characters::{summarize, CreateVerdict};
use crate::server::ServerContext;

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingNegotiation,
    Negotiated,
    CharacterSelect,
    CharacterCreate,
    Active,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::AwaitingNegotiation => "AwaitingNegotiation",
            State::Negotiated => "Negotiated",
            State::CharacterSelect => "CharacterSelect",
            State::CharacterCreate => "CharacterCreate",
            State::Active => "Active",
        }
    }
}

/// What a packet handler decided about the connection's future.
enum Outcome {
    Continue,
    Close,
}

/// One accepted connection, driven to completion by [`Connection::run`].
pub struct Connection {
    id: u64,
    ip: IpAddr,
    conn: Conn,
    ctx: Arc<ServerContext>,
    state: State,
    account: Option<String>,
    character_name: Option<String>,
    map: String,
    x: i32,
    y: i32,
    last_login_attempt: Option<Instant>,
    login_failures: u32,
    create_in_progress: bool,
    push_rx: mpsc::UnboundedReceiver<Message>,
}

impl Connection {
    /// `push_rx` is the receiving half of the channel registered with the
    /// connection registry; broadcasts buffer there until the session is
    /// Active.
    pub fn new(
        id: u64,
        ip: IpAddr,
        conn: Conn,
        ctx: Arc<ServerContext>,
        push_rx: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Connection {
            id,
            ip,
            conn,
            ctx,
            state: State::AwaitingNegotiation,
            account: None,
            character_name: None,
            map: String::new(),
            x: 0,
            y: 0,
            last_login_attempt: None,
            login_failures: 0,
            create_in_progress: false,
            push_rx,
        }
    }

    /// Drives the connection until it closes, then cleans up registry state.
    pub async fn run(mut self) {
        let result = self.run_inner().await;
        if let Err(e) = result {
            warn!(connection = self.id, error = %e, "connection error");
        }
        if self.state == State::Active {
            self.ctx
                .registry
                .broadcast_except(self.id, Message::DeleteObject {
                    object_id: self.id as u32,
                })
                .await;
        }
        self.ctx.registry.remove(self.id).await;
        info!(connection = self.id, "connection closed");
    }

    async fn run_inner(&mut self) -> ProtocolResult<()> {
        let timeout = self.ctx.config.limits.timeout();
        let keep_alive = self.ctx.config.limits.keep_alive();
        let mut last_inbound = Instant::now();
        let mut last_outbound = Instant::now();
        let mut tick = interval_at(
            Instant::now() + std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
        );

        loop {
            tokio::select! {
                frame = self.conn.next() => {
                    match frame {
                        None => {
                            debug!(connection = self.id, "peer closed the stream");
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            warn!(connection = self.id, error = %e, "dropping connection");
                            return Ok(());
                        }
                        Some(Ok(message)) => {
                            last_inbound = Instant::now();
                            match self.handle(message, &mut last_inbound, &mut last_outbound).await? {
                                Outcome::Continue => {}
                                Outcome::Close => return Ok(()),
                            }
                        }
                    }
                }
                Some(push) = self.push_rx.recv() => {
                    // Pushes are only delivered to gameplay sessions.
                    if self.state == State::Active {
                        self.conn.send(push).await?;
                        last_outbound = Instant::now();
                    }
                }
                _ = tick.tick() => {
                    let now = Instant::now();
                    if now.duration_since(last_inbound) > timeout {
                        info!(connection = self.id, "peer silent too long, closing");
                        return Ok(());
                    }
                    if now.duration_since(last_outbound) >= keep_alive {
                        self.conn.send(Message::KeepAlive).await?;
                        last_outbound = now;
                    }
                }
            }
        }
    }

    async fn handle(
        &mut self,
        message: Message,
        last_inbound: &mut Instant,
        last_outbound: &mut Instant,
    ) -> ProtocolResult<Outcome> {
        // Legal everywhere past negotiation.
        match &message {
            Message::KeepAlive if self.state != State::AwaitingNegotiation => {
                return Ok(Outcome::Continue);
            }
            Message::Disconnect if self.state != State::AwaitingNegotiation => {
                debug!(connection = self.id, "peer requested disconnect");
                return Ok(Outcome::Close);
            }
            _ => {}
        }

        let outcome = match (self.state, message) {
            (State::AwaitingNegotiation, Message::NegotiateConnection { signature, revision, major, minor }) => {
                self.handle_negotiation(signature, revision, major, minor).await?
            }
            (State::Negotiated, Message::StartLogin { username }) => {
                self.handle_login(username, last_inbound).await?
            }
            (State::Negotiated, Message::Register { serial, username, salt, passhash, email }) => {
                self.handle_register(serial, username, salt, passhash, email)
                    .await?
            }
            (State::CharacterSelect, Message::SelectCharacter { serial, name }) => {
                self.handle_select(serial, name).await?
            }
            (State::CharacterSelect, Message::DeleteCharacter { serial, name }) => {
                self.handle_delete(serial, name).await?
            }
            (State::CharacterSelect, Message::StartCreateCharacter { serial }) => {
                self.handle_start_create(serial).await?
            }
            (State::CharacterCreate, Message::FinishCreateCharacter { serial, name, stats, sprites }) => {
                self.handle_finish_create(serial, name, stats, sprites)
                    .await?
            }
            (State::Active, Message::SendMessage { text }) => self.handle_chat(text).await?,
            (State::Active, Message::GetMapCrc { serial, map }) => {
                self.handle_map_crc(serial, map).await?
            }
            (State::Active, Message::GetMap { serial, map }) => {
                self.handle_get_map(serial, map).await?
            }
            (State::Active, Message::InteractObject { serial, object_id }) => {
                debug!(connection = self.id, object_id, "interaction with unknown object");
                self.conn
                    .send(Message::InvalidRequest { serial, reason: 0 })
                    .await?;
                Outcome::Continue
            }
            (State::Active, Message::StartMovement { direction }) => {
                self.handle_start_movement(direction).await?
            }
            (State::Active, Message::EndMovement { x, y }) => {
                self.handle_end_movement(x, y).await?
            }
            (state, message) => {
                // Protocol violation: close without a reply.
                warn!(
                    connection = self.id,
                    state = state.name(),
                    packet = message.name(),
                    "illegal packet for state"
                );
                return Ok(Outcome::Close);
            }
        };
        *last_outbound = Instant::now();
        Ok(outcome)
    }

    async fn handle_negotiation(
        &mut self,
        signature: [u8; 2],
        revision: u16,
        major: u16,
        minor: u16,
    ) -> ProtocolResult<Outcome> {
        let code = if signature != PROTOCOL_SIGNATURE {
            Some(reject::SIGNATURE)
        } else if revision != PROTOCOL_REVISION {
            Some(reject::REVISION)
        } else if major != ENGINE_MAJOR || minor != ENGINE_MINOR {
            Some(reject::OUTDATED)
        } else {
            None
        };
        if let Some(code) = code {
            warn!(connection = self.id, code, "negotiation rejected");
            self.conn.send(Message::ConnectionRejected { code }).await?;
            return Ok(Outcome::Close);
        }

        let identity = &self.ctx.config.identity;
        let mut flags = 0u8;
        if !self.ctx.config.auth.registration_enabled {
            flags |= ACCEPT_FLAG_NO_REGISTER;
        }
        self.conn
            .send(Message::ConnectionAccepted {
                flags,
                server_name: identity.server_name.clone(),
                news_url: identity.news_url.clone(),
                update_url: identity.update_url.clone(),
            })
            .await?;
        self.state = State::Negotiated;
        debug!(connection = self.id, "negotiation complete");
        Ok(Outcome::Continue)
    }

    /// The whole TLS-wrapped login exchange, driven sequentially.
    ///
    /// The client starts its TLS handshake immediately after sending
    /// `StartLogin`, so every verdict in this window (including the rate
    /// limit) is delivered under TLS before the layer comes off again.
    async fn handle_login(
        &mut self,
        username: String,
        last_inbound: &mut Instant,
    ) -> ProtocolResult<Outcome> {
        self.conn.wrap_server(&self.ctx.tls).await?;

        let now = Instant::now();
        let rate_limited = self
            .last_login_attempt
            .map(|at| now.duration_since(at) < self.ctx.config.auth.login_delay())
            .unwrap_or(false);
        self.last_login_attempt = Some(now);
        if rate_limited {
            debug!(connection = self.id, "login rate limited");
            self.conn
                .send(Message::BadLogin {
                    reason: bad_login::TRY_AGAIN_LATER,
                })
                .await?;
            self.conn.unwrap_tls()?;
            return Ok(Outcome::Continue);
        }

        let start = match self.ctx.auth.start_login(&username).await {
            Ok(start) => start,
            Err(e) => return self.auth_storage_failure(e, 0).await,
        };
        let (challenge, salt) = match start {
            LoginStart::Challenge { challenge, salt } => (challenge, salt),
            LoginStart::UnknownAccount => {
                self.conn.send(Message::UserNotFound).await?;
                self.conn.unwrap_tls()?;
                return Ok(Outcome::Continue);
            }
        };

        let pending = PendingChallenge {
            username: username.clone(),
            challenge,
            issued: Instant::now(),
        };
        self.conn
            .send(Message::LoginChallenge { challenge, salt })
            .await?;

        // Wait for the solution; the overall silence timeout still applies.
        let timeout = self.ctx.config.limits.timeout();
        let (serial, solution) = loop {
            let frame = tokio::time::timeout(timeout, self.conn.next()).await;
            match frame {
                Err(_) | Ok(None) => {
                    info!(connection = self.id, "peer vanished during login");
                    return Ok(Outcome::Close);
                }
                Ok(Some(Err(e))) => {
                    warn!(connection = self.id, error = %e, "bad frame during login");
                    return Ok(Outcome::Close);
                }
                Ok(Some(Ok(Message::KeepAlive))) => {
                    *last_inbound = Instant::now();
                    continue;
                }
                Ok(Some(Ok(Message::Disconnect))) => return Ok(Outcome::Close),
                Ok(Some(Ok(Message::FinishLogin { serial, solution }))) => {
                    *last_inbound = Instant::now();
                    break (serial, solution);
                }
                Ok(Some(Ok(other))) => {
                    warn!(
                        connection = self.id,
                        packet = other.name(),
                        "illegal packet during login"
                    );
                    return Ok(Outcome::Close);
                }
            }
        };

        let verdict = match self
            .ctx
            .auth
            .finish_login(&pending, &solution, Instant::now())
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => return self.auth_storage_failure(e, serial).await,
        };
        match verdict {
            LoginVerdict::Expired => {
                self.conn
                    .send(Message::BadLogin {
                        reason: bad_login::CHALLENGE_EXPIRED,
                    })
                    .await?;
                self.conn.unwrap_tls()?;
                Ok(Outcome::Continue)
            }
            LoginVerdict::WrongSolution | LoginVerdict::AccountDisabled => {
                self.login_failures += 1;
                if self.login_failures >= self.ctx.config.auth.max_login_failures {
                    warn!(connection = self.id, "too many login failures, closing");
                    self.conn
                        .send(Message::BadLogin {
                            reason: bad_login::TOO_MANY_ATTEMPTS,
                        })
                        .await?;
                    return Ok(Outcome::Close);
                }
                self.conn
                    .send(Message::Failed { serial, reason: 0 })
                    .await?;
                self.conn.unwrap_tls()?;
                Ok(Outcome::Continue)
            }
            LoginVerdict::Accepted => {
                if !self.ctx.registry.bind_account(self.id, &username).await {
                    // Account already online elsewhere.
                    self.conn
                        .send(Message::Failed { serial, reason: 0 })
                        .await?;
                    self.conn.unwrap_tls()?;
                    return Ok(Outcome::Continue);
                }
                self.conn
                    .send(Message::Success { serial, reason: 0 })
                    .await?;
                self.conn.unwrap_tls()?;
                // The client's TLS layer is still up until it has read the
                // Success record; no plaintext may be sent at it before its
                // confirming plaintext KeepAlive arrives.
                loop {
                    let frame = tokio::time::timeout(timeout, self.conn.next()).await;
                    match frame {
                        Err(_) | Ok(None) => {
                            info!(connection = self.id, "peer vanished after login");
                            return Ok(Outcome::Close);
                        }
                        Ok(Some(Err(e))) => {
                            warn!(connection = self.id, error = %e, "bad frame after login");
                            return Ok(Outcome::Close);
                        }
                        Ok(Some(Ok(Message::KeepAlive))) => {
                            *last_inbound = Instant::now();
                            break;
                        }
                        Ok(Some(Ok(Message::Disconnect))) => return Ok(Outcome::Close),
                        Ok(Some(Ok(other))) => {
                            warn!(
                                connection = self.id,
                                packet = other.name(),
                                "illegal packet after login"
                            );
                            return Ok(Outcome::Close);
                        }
                    }
                }
                self.account = Some(username.to_lowercase());
                self.login_failures = 0;
                self.state = State::CharacterSelect;
                self.send_motd().await?;
                self.send_character_list().await?;
                Ok(Outcome::Continue)
            }
        }
    }

    async fn auth_storage_failure(
        &mut self,
        e: StorageError,
        serial: u32,
    ) -> ProtocolResult<Outcome> {
        warn!(connection = self.id, error = %e, "storage failure during auth");
        self.conn.send(Message::Failed { serial, reason: 0 }).await?;
        self.conn.unwrap_tls()?;
        Ok(Outcome::Continue)
    }

    async fn handle_register(
        &mut self,
        serial: u32,
        username: String,
        salt: Vec<u8>,
        passhash: Vec<u8>,
        email: String,
    ) -> ProtocolResult<Outcome> {
        let verdict = match self
            .ctx
            .auth
            .register(&username, &salt, &passhash, &email, Some(self.ip))
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(connection = self.id, error = %e, "storage failure during register");
                self.conn.send(Message::Failed { serial, reason: 0 }).await?;
                return Ok(Outcome::Continue);
            }
        };
        match verdict {
            RegisterVerdict::Rejected(reason) => {
                self.conn.send(Message::Failed { serial, reason }).await?;
                Ok(Outcome::Continue)
            }
            RegisterVerdict::Accepted => {
                if !self.ctx.registry.bind_account(self.id, &username).await {
                    self.conn.send(Message::Failed { serial, reason: 0 }).await?;
                    return Ok(Outcome::Continue);
                }
                self.conn.send(Message::Success { serial, reason: 0 }).await?;
                // Registration logs the fresh account straight in.
                self.account = Some(username.to_lowercase());
                self.state = State::CharacterSelect;
                self.send_motd().await?;
                self.send_character_list().await?;
                Ok(Outcome::Continue)
            }
        }
    }

    fn account(&self) -> &str {
        // Only called from states reachable after login.
        self.account.as_deref().unwrap_or_default()
    }

    async fn send_motd(&mut self) -> ProtocolResult<()> {
        let motd = &self.ctx.config.identity.motd;
        if motd.is_empty() {
            return Ok(());
        }
        self.conn
            .send(Message::ServerInformation {
                entries: vec![crate::protocol::packets::messages::InfoEntry {
                    code: crate::protocol::packets::types::server_info::MESSAGE_OF_THE_DAY,
                    value: motd.clone(),
                }],
            })
            .await
    }

    async fn send_character_list(&mut self) -> ProtocolResult<()> {
        let username = self.account().to_string();
        let list = match self.ctx.characters.list(&username).await {
            Ok(list) => list,
            Err(e) => {
                warn!(connection = self.id, error = %e, "character list unavailable");
                Vec::new()
            }
        };
        self.conn.send(Message::StartCharacterList).await?;
        for character in list {
            self.conn.send(Message::AvailableCharacter(character)).await?;
        }
        Ok(())
    }

    async fn handle_select(&mut self, serial: u32, name: String) -> ProtocolResult<Outcome> {
        let username = self.account().to_string();
        match self.ctx.characters.select(&username, &name).await {
            Ok(Some(record)) => {
                self.conn.send(Message::Success { serial, reason: 0 }).await?;
                self.character_name = Some(record.name.clone());
                self.map = record.map.clone();
                self.x = record.x;
                self.y = record.y;
                self.state = State::Active;
                info!(
                    connection = self.id,
                    character = %record.name,
                    "entering the world"
                );
                self.ctx
                    .registry
                    .broadcast_except(
                        self.id,
                        Message::AddObject {
                            object_id: self.id as u32,
                            kind: 0,
                            x: self.x,
                            y: self.y,
                            sprite: record.sprites[0],
                            name: record.name,
                        },
                    )
                    .await;
                Ok(Outcome::Continue)
            }
            Ok(None) => {
                self.conn.send(Message::Failed { serial, reason: 0 }).await?;
                Ok(Outcome::Continue)
            }
            Err(e) => {
                warn!(connection = self.id, error = %e, "storage failure during select");
                self.conn.send(Message::Failed { serial, reason: 0 }).await?;
                Ok(Outcome::Continue)
            }
        }
    }

    async fn handle_delete(&mut self, serial: u32, name: String) -> ProtocolResult<Outcome> {
        let username = self.account().to_string();
        match self.ctx.characters.delete(&username, &name).await {
            Ok(Some(remaining)) => {
                self.conn.send(Message::Success { serial, reason: 0 }).await?;
                // Full list refresh after every deletion.
                self.conn.send(Message::StartCharacterList).await?;
                for character in remaining {
                    self.conn.send(Message::AvailableCharacter(character)).await?;
                }
                Ok(Outcome::Continue)
            }
            Ok(None) => {
                self.conn.send(Message::Failed { serial, reason: 0 }).await?;
                Ok(Outcome::Continue)
            }
            Err(e) => {
                warn!(connection = self.id, error = %e, "storage failure during delete");
                self.conn.send(Message::Failed { serial, reason: 0 }).await?;
                Ok(Outcome::Continue)
            }
        }
    }

    async fn handle_start_create(&mut self, serial: u32) -> ProtocolResult<Outcome> {
        let username = self.account().to_string();
        let free = self
            .ctx
            .characters
            .has_free_slot(&username)
            .await
            .unwrap_or(false);
        if !free {
            self.conn.send(Message::Failed { serial, reason: 0 }).await?;
            return Ok(Outcome::Continue);
        }
        self.conn.send(Message::Success { serial, reason: 0 }).await?;
        self.conn
            .send(Message::NewCharacterOptions {
                serial,
                stat_points: self.ctx.config.auth.starting_stat_points,
            })
            .await?;
        self.create_in_progress = true;
        self.state = State::CharacterCreate;
        Ok(Outcome::Continue)
    }

    async fn handle_finish_create(
        &mut self,
        serial: u32,
        name: String,
        stats: [u16; 6],
        sprites: [u32; 4],
    ) -> ProtocolResult<Outcome> {
        // Creation always returns to the selection screen.
        self.state = State::CharacterSelect;
        if !self.create_in_progress {
            self.conn
                .send(Message::Failed {
                    serial,
                    reason: create_fail::NOT_IN_PROGRESS,
                })
                .await?;
            return Ok(Outcome::Continue);
        }
        self.create_in_progress = false;

        let username = self.account().to_string();
        match self.ctx.characters.create(&username, &name, stats, sprites).await {
            Ok(CreateVerdict::Created(record)) => {
                self.conn.send(Message::Success { serial, reason: 0 }).await?;
                self.conn
                    .send(Message::AvailableCharacter(summarize(&record)))
                    .await?;
                Ok(Outcome::Continue)
            }
            Ok(CreateVerdict::Rejected(reason)) => {
                self.conn.send(Message::Failed { serial, reason }).await?;
                Ok(Outcome::Continue)
            }
            Err(e) => {
                warn!(connection = self.id, error = %e, "storage failure during create");
                self.conn.send(Message::Failed { serial, reason: 0 }).await?;
                Ok(Outcome::Continue)
            }
        }
    }

    async fn handle_chat(&mut self, text: String) -> ProtocolResult<Outcome> {
        if text.is_empty() {
            return Ok(Outcome::Continue);
        }
        let sender = self.character_name.clone().unwrap_or_default();
        let message = Message::ShowMessage { sender, text };
        // The sender sees its own line too.
        self.conn.send(message.clone()).await?;
        self.ctx.registry.broadcast_except(self.id, message).await;
        Ok(Outcome::Continue)
    }

    async fn handle_map_crc(&mut self, serial: u32, map: String) -> ProtocolResult<Outcome> {
        match self.ctx.maps.checksum(&map).await {
            Ok(Some(checksum)) => {
                self.conn.send(Message::MapCrc { serial, checksum }).await?;
            }
            Ok(None) => {
                self.conn.send(Message::Failed { serial, reason: 0 }).await?;
            }
            Err(e) => {
                warn!(connection = self.id, error = %e, "map store failure");
                self.conn.send(Message::Failed { serial, reason: 0 }).await?;
            }
        }
        Ok(Outcome::Continue)
    }

    async fn handle_get_map(&mut self, serial: u32, map: String) -> ProtocolResult<Outcome> {
        match self.ctx.maps.fetch(&map).await {
            Ok(record) => {
                self.conn
                    .send(Message::MapReply {
                        serial,
                        map: record.map(|r| r.payload),
                    })
                    .await?;
            }
            Err(e) => {
                warn!(connection = self.id, error = %e, "map store failure");
                self.conn.send(Message::Failed { serial, reason: 0 }).await?;
            }
        }
        Ok(Outcome::Continue)
    }

    async fn handle_start_movement(&mut self, direction: u8) -> ProtocolResult<Outcome> {
        let (dx, dy) = match direction {
            0 => (0, -1),
            1 => (1, 0),
            2 => (0, 1),
            3 => (-1, 0),
            _ => {
                self.conn
                    .send(Message::MovementInvalid {
                        x: self.x,
                        y: self.y,
                    })
                    .await?;
                return Ok(Outcome::Continue);
            }
        };
        let (nx, ny) = (self.x + dx, self.y + dy);
        if !self.position_in_bounds(nx, ny).await {
            self.conn
                .send(Message::MovementInvalid {
                    x: self.x,
                    y: self.y,
                })
                .await?;
            return Ok(Outcome::Continue);
        }
        self.x = nx;
        self.y = ny;
        self.conn.send(Message::MovementValid).await?;
        self.ctx
            .registry
            .broadcast_except(
                self.id,
                Message::UpdateObject {
                    object_id: self.id as u32,
                    x: nx,
                    y: ny,
                    direction,
                },
            )
            .await;
        Ok(Outcome::Continue)
    }

    async fn handle_end_movement(&mut self, x: i32, y: i32) -> ProtocolResult<Outcome> {
        if x == self.x && y == self.y {
            self.conn.send(Message::MovementValid).await?;
        } else {
            // Client drifted; snap it back to the authoritative position.
            self.conn
                .send(Message::MovementInvalid {
                    x: self.x,
                    y: self.y,
                })
                .await?;
        }
        Ok(Outcome::Continue)
    }

    async fn position_in_bounds(&self, x: i32, y: i32) -> bool {
        if x < 0 || y < 0 {
            return false;
        }
        match self.ctx.maps.fetch(&self.map).await {
            Ok(Some(record)) => {
                (x as u32) < record.payload.width && (y as u32) < record.payload.height
            }
            // No map loaded for this character: nothing to bound against.
            Ok(None) => true,
            Err(_) => false,
        }
    }
}
