//! The Active gameplay session: a background task multiplexing inbound
//! packets, outbound commands, keep-alives, and request timeouts.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::common::error::{ConnectionError, ConnectionResult};
use crate::correlator::{Correlator, ReplyOutcome};
use crate::protocol::packets::messages::{InventoryEntry, MapPayload, Message};
use crate::protocol::packets::types::server_info;
use crate::protocol::transport::Conn;

/// Something the server told us mid-session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Chat { sender: String, text: String },
    ObjectAdded { object_id: u32, kind: u8, x: i32, y: i32, sprite: u32, name: String },
    ObjectRemoved { object_id: u32 },
    ObjectMoved { object_id: u32, x: i32, y: i32, direction: u8 },
    Stats { level: u16, stats: [u16; 6], hp: u32, max_hp: u32, mp: u32, max_mp: u32 },
    Inventory(Vec<InventoryEntry>),
    MessageOfTheDay(String),
    MovementAccepted,
    MovementCorrected { x: i32, y: i32 },
    /// The session ended; no further events follow.
    Closed { reason: CloseReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ServerDisconnect,
    Timeout,
    ConnectionLost,
}

enum Command {
    /// Fire-and-forget packet.
    Push(Message),
    /// Correlated request; the serial is stamped in the session task.
    Request {
        message: Message,
        reply_to: oneshot::Sender<ReplyOutcome>,
        timeout: Option<Duration>,
    },
    Close,
}

/// Handle to a running session task.
pub struct Session {
    cmd_tx: mpsc::UnboundedSender<Command>,
    event_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Session {
    /// Spawns the session loop over an Active connection.
    pub(crate) fn start(conn: Conn, timeout: Duration, keep_alive: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(session_loop(conn, cmd_rx, event_tx, timeout, keep_alive));
        Session { cmd_tx, event_rx }
    }

    /// Next event from the server; `None` after `Closed` is consumed.
    pub async fn event(&mut self) -> Option<SessionEvent> {
        self.event_rx.recv().await
    }

    pub fn chat(&self, text: impl Into<String>) -> ConnectionResult<()> {
        self.push(Message::SendMessage { text: text.into() })
    }

    pub fn start_movement(&self, direction: u8) -> ConnectionResult<()> {
        self.push(Message::StartMovement { direction })
    }

    pub fn end_movement(&self, x: i32, y: i32) -> ConnectionResult<()> {
        self.push(Message::EndMovement { x, y })
    }

    fn push(&self, message: Message) -> ConnectionResult<()> {
        self.cmd_tx
            .send(Command::Push(message))
            .map_err(|_| ConnectionError::ConnectionClosed)
    }

    /// Submits a correlated request and waits for its outcome.
    pub async fn request(&self, message: Message) -> ConnectionResult<ReplyOutcome> {
        self.submit(message, None).await
    }

    /// Like [`Session::request`], with a per-request reply deadline instead
    /// of the session default.
    pub async fn request_with_timeout(
        &self,
        message: Message,
        timeout: Duration,
    ) -> ConnectionResult<ReplyOutcome> {
        self.submit(message, Some(timeout)).await
    }

    async fn submit(
        &self,
        message: Message,
        timeout: Option<Duration>,
    ) -> ConnectionResult<ReplyOutcome> {
        let (reply_to, reply) = oneshot::channel();
        self.cmd_tx
            .send(Command::Request {
                message,
                reply_to,
                timeout,
            })
            .map_err(|_| ConnectionError::ConnectionClosed)?;
        reply.await.map_err(|_| ConnectionError::ConnectionClosed)
    }

    /// Attempts to interact with a world object.
    pub async fn interact(&self, object_id: u32) -> ConnectionResult<ReplyOutcome> {
        self.request(Message::InteractObject {
            serial: 0,
            object_id,
        })
        .await
    }

    /// Revalidates a cached map; `Ok(None)` means the server has no such map.
    pub async fn map_checksum(&self, map: impl Into<String>) -> ConnectionResult<Option<u32>> {
        let outcome = self
            .request(Message::GetMapCrc {
                serial: 0,
                map: map.into(),
            })
            .await?;
        match outcome {
            ReplyOutcome::Reply(Message::MapCrc { checksum, .. }) => Ok(Some(checksum)),
            ReplyOutcome::Failed { .. } => Ok(None),
            ReplyOutcome::TimedOut => Err(ConnectionError::Timeout),
            ReplyOutcome::ConnectionClosed => Err(ConnectionError::ConnectionClosed),
            other => {
                warn!(?other, "unexpected map checksum outcome");
                Err(ConnectionError::ConnectionClosed)
            }
        }
    }

    /// Fetches a full map transfer.
    pub async fn fetch_map(&self, map: impl Into<String>) -> ConnectionResult<Option<MapPayload>> {
        let outcome = self
            .request(Message::GetMap {
                serial: 0,
                map: map.into(),
            })
            .await?;
        match outcome {
            ReplyOutcome::Reply(Message::MapReply { map, .. }) => Ok(map),
            ReplyOutcome::TimedOut => Err(ConnectionError::Timeout),
            ReplyOutcome::ConnectionClosed => Err(ConnectionError::ConnectionClosed),
            other => {
                warn!(?other, "unexpected map reply outcome");
                Err(ConnectionError::ConnectionClosed)
            }
        }
    }

    /// Ends the session politely.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

async fn session_loop(
    mut conn: Conn,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    timeout: Duration,
    keep_alive: Duration,
) {
    let mut correlator = Correlator::new();
    let mut last_inbound = Instant::now();
    let mut last_outbound = Instant::now();
    let mut tick = interval_at(
        Instant::now() + Duration::from_secs(1),
        Duration::from_secs(1),
    );

    let reason = loop {
        tokio::select! {
            frame = conn.next() => {
                match frame {
                    None => break CloseReason::ConnectionLost,
                    Some(Err(e)) => {
                        warn!(error = %e, "session stream error");
                        break CloseReason::ConnectionLost;
                    }
                    Some(Ok(message)) => {
                        last_inbound = Instant::now();
                        if message == Message::Disconnect {
                            break CloseReason::ServerDisconnect;
                        }
                        handle_inbound(message, &mut correlator, &event_tx);
                    }
                }
            }
            command = cmd_rx.recv() => {
                match command {
                    None | Some(Command::Close) => {
                        let _ = conn.send(Message::Disconnect).await;
                        break CloseReason::ServerDisconnect;
                    }
                    Some(Command::Push(message)) => {
                        if conn.send(message).await.is_err() {
                            break CloseReason::ConnectionLost;
                        }
                        last_outbound = Instant::now();
                    }
                    Some(Command::Request { mut message, reply_to, timeout }) => {
                        let serial = correlator.register_with_deadline(reply_to, timeout);
                        if !message.set_serial(serial) {
                            debug!(packet = message.name(), "request packet has no serial field");
                        }
                        if conn.send(message).await.is_err() {
                            break CloseReason::ConnectionLost;
                        }
                        last_outbound = Instant::now();
                    }
                }
            }
            _ = tick.tick() => {
                let now = Instant::now();
                correlator.expire(now);
                if now.duration_since(last_inbound) > timeout {
                    info!("server silent too long, dropping session");
                    break CloseReason::Timeout;
                }
                if now.duration_since(last_outbound) >= keep_alive {
                    if conn.send(Message::KeepAlive).await.is_err() {
                        break CloseReason::ConnectionLost;
                    }
                    last_outbound = now;
                }
            }
        }
    };

    correlator.cancel_all();
    let _ = event_tx.send(SessionEvent::Closed { reason });
}

fn handle_inbound(
    message: Message,
    correlator: &mut Correlator,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
) {
    if message.reply_serial().is_some() {
        // Late replies after a timeout are logged inside the correlator.
        correlator.resolve(message);
        return;
    }
    let event = match message {
        Message::KeepAlive => return,
        Message::ShowMessage { sender, text } => SessionEvent::Chat { sender, text },
        Message::AddObject {
            object_id,
            kind,
            x,
            y,
            sprite,
            name,
        } => SessionEvent::ObjectAdded {
            object_id,
            kind,
            x,
            y,
            sprite,
            name,
        },
        Message::DeleteObject { object_id } => SessionEvent::ObjectRemoved { object_id },
        Message::UpdateObject {
            object_id,
            x,
            y,
            direction,
        } => SessionEvent::ObjectMoved {
            object_id,
            x,
            y,
            direction,
        },
        Message::UpdateStats {
            level,
            stats,
            hp,
            max_hp,
            mp,
            max_mp,
        } => SessionEvent::Stats {
            level,
            stats,
            hp,
            max_hp,
            mp,
            max_mp,
        },
        Message::UpdateInventory { entries } => SessionEvent::Inventory(entries),
        Message::ServerInformation { entries } => {
            for entry in entries {
                if entry.code == server_info::MESSAGE_OF_THE_DAY {
                    let _ = event_tx.send(SessionEvent::MessageOfTheDay(entry.value));
                } else {
                    debug!(code = entry.code, "ignoring unknown server info code");
                }
            }
            return;
        }
        Message::MovementValid => SessionEvent::MovementAccepted,
        Message::MovementInvalid { x, y } => SessionEvent::MovementCorrected { x, y },
        other => {
            warn!(packet = other.name(), "unexpected packet in session");
            return;
        }
    };
    let _ = event_tx.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::codec::MessageCodec;

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out_on_its_own_deadline() {
        let (near, far) = tokio::io::duplex(4096);
        // Long session defaults so only the per-request deadline can fire.
        let session = Session::start(
            Conn::plain(near, MessageCodec::new()),
            Duration::from_secs(600),
            Duration::from_secs(600),
        );

        let start = Instant::now();
        let outcome = session
            .request_with_timeout(
                Message::GetMapCrc {
                    serial: 0,
                    map: "harbor".into(),
                },
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ReplyOutcome::TimedOut);
        // The sweep runs on a one second tick.
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(8));
        drop(far);
    }
}
