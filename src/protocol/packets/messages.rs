//! Typed packet bodies for every packet in the catalog.
//!
//! Bodies are schema-delimited: fixed-width fields first, then every
//! variable-length field in declared order. There is no per-field length
//! prefix ahead of fixed fields, so decoding must consume fields in the
//! exact order they are declared here.

use bytes::{Buf, BytesMut};

use crate::common::error::{WireError, WireResult};
use crate::protocol::packets::types::{self, packet_name};
use crate::protocol::wire;

/// One character as listed during character selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterSummary {
    pub name: String,
    pub level: u16,
    pub stats: [u16; 6],
    pub sprites: [u32; 4],
}

impl CharacterSummary {
    fn encode(&self, buf: &mut BytesMut) {
        wire::put_u16(buf, self.level);
        for stat in self.stats {
            wire::put_u16(buf, stat);
        }
        for sprite in self.sprites {
            wire::put_u32(buf, sprite);
        }
        wire::put_string(buf, &self.name);
    }

    fn decode(buf: &mut impl Buf) -> WireResult<Self> {
        let level = wire::get_u16(buf)?;
        let mut stats = [0u16; 6];
        for stat in &mut stats {
            *stat = wire::get_u16(buf)?;
        }
        let mut sprites = [0u32; 4];
        for sprite in &mut sprites {
            *sprite = wire::get_u32(buf)?;
        }
        let name = wire::get_string(buf, types::MAX_CHARACTER_NAME_LEN)?;
        Ok(CharacterSummary {
            name,
            level,
            stats,
            sprites,
        })
    }
}

/// Tile data for a full map transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapPayload {
    pub version: u32,
    pub width: u32,
    pub height: u32,
    pub tiles: Vec<u32>,
}

/// One inventory slot in an `UpdateInventory` push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    pub slot: u16,
    pub item_id: u32,
    pub quantity: u16,
}

/// One `ServerInformation` entry. Unknown codes are ignorable by clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoEntry {
    pub code: u16,
    pub value: String,
}

/// A fully-typed protocol packet body, one variant per packet type.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    NegotiateConnection {
        signature: [u8; 2],
        revision: u16,
        major: u16,
        minor: u16,
    },
    ConnectionAccepted {
        flags: u8,
        server_name: String,
        news_url: String,
        update_url: String,
    },
    ConnectionRejected {
        code: u8,
    },
    KeepAlive,
    Success {
        serial: u32,
        reason: u16,
    },
    Failed {
        serial: u32,
        reason: u16,
    },
    StartLogin {
        username: String,
    },
    LoginChallenge {
        challenge: [u8; 32],
        salt: [u8; 16],
    },
    FinishLogin {
        serial: u32,
        solution: [u8; 64],
    },
    Register {
        serial: u32,
        username: String,
        salt: Vec<u8>,
        passhash: Vec<u8>,
        email: String,
    },
    AvailableCharacter(CharacterSummary),
    StartCreateCharacter {
        serial: u32,
    },
    NewCharacterOptions {
        serial: u32,
        stat_points: u32,
    },
    FinishCreateCharacter {
        serial: u32,
        name: String,
        stats: [u16; 6],
        sprites: [u32; 4],
    },
    SelectCharacter {
        serial: u32,
        name: String,
    },
    SendMessage {
        text: String,
    },
    ShowMessage {
        sender: String,
        text: String,
    },
    AddObject {
        object_id: u32,
        kind: u8,
        x: i32,
        y: i32,
        sprite: u32,
        name: String,
    },
    DeleteObject {
        object_id: u32,
    },
    UpdateObject {
        object_id: u32,
        x: i32,
        y: i32,
        direction: u8,
    },
    GetMapCrc {
        serial: u32,
        map: String,
    },
    MapCrc {
        serial: u32,
        checksum: u32,
    },
    GetMap {
        serial: u32,
        map: String,
    },
    MapReply {
        serial: u32,
        map: Option<MapPayload>,
    },
    InteractObject {
        serial: u32,
        object_id: u32,
    },
    UpdateStats {
        level: u16,
        stats: [u16; 6],
        hp: u32,
        max_hp: u32,
        mp: u32,
        max_mp: u32,
    },
    UpdateInventory {
        entries: Vec<InventoryEntry>,
    },
    Disconnect,
    StartMovement {
        direction: u8,
    },
    EndMovement {
        x: i32,
        y: i32,
    },
    MovementValid,
    MovementInvalid {
        x: i32,
        y: i32,
    },
    ServerInformation {
        entries: Vec<InfoEntry>,
    },
    BadLogin {
        reason: u8,
    },
    DeleteCharacter {
        serial: u32,
        name: String,
    },
    StartCharacterList,
    InvalidRequest {
        serial: u32,
        reason: u16,
    },
    UserNotFound,
}

impl Message {
    /// Wire packet type for this message.
    pub fn packet_type(&self) -> u16 {
        match self {
            Message::NegotiateConnection { .. } => types::NEGOTIATE_CONNECTION,
            Message::ConnectionAccepted { .. } => types::CONNECTION_ACCEPTED,
            Message::ConnectionRejected { .. } => types::CONNECTION_REJECTED,
            Message::KeepAlive => types::KEEP_ALIVE,
            Message::Success { .. } => types::SUCCESS,
            Message::Failed { .. } => types::FAILED,
            Message::StartLogin { .. } => types::START_LOGIN,
            Message::LoginChallenge { .. } => types::LOGIN_CHALLENGE,
            Message::FinishLogin { .. } => types::FINISH_LOGIN,
            Message::Register { .. } => types::REGISTER,
            Message::AvailableCharacter(_) => types::AVAILABLE_CHARACTER,
            Message::StartCreateCharacter { .. } => types::START_CREATE_CHARACTER,
            Message::NewCharacterOptions { .. } => types::NEW_CHARACTER_OPTIONS,
            Message::FinishCreateCharacter { .. } => types::FINISH_CREATE_CHARACTER,
            Message::SelectCharacter { .. } => types::SELECT_CHARACTER,
            Message::SendMessage { .. } => types::SEND_MESSAGE,
            Message::ShowMessage { .. } => types::SHOW_MESSAGE,
            Message::AddObject { .. } => types::ADD_OBJECT,
            Message::DeleteObject { .. } => types::DELETE_OBJECT,
            Message::UpdateObject { .. } => types::UPDATE_OBJECT,
            Message::GetMapCrc { .. } => types::GET_MAP_CRC,
            Message::MapCrc { .. } => types::MAP_CRC,
            Message::GetMap { .. } => types::GET_MAP,
            Message::MapReply { .. } => types::MAP_REPLY,
            Message::InteractObject { .. } => types::INTERACT_OBJECT,
            Message::UpdateStats { .. } => types::UPDATE_STATS,
            Message::UpdateInventory { .. } => types::UPDATE_INVENTORY,
            Message::Disconnect => types::DISCONNECT,
            Message::StartMovement { .. } => types::START_MOVEMENT,
            Message::EndMovement { .. } => types::END_MOVEMENT,
            Message::MovementValid => types::MOVEMENT_VALID,
            Message::MovementInvalid { .. } => types::MOVEMENT_INVALID,
            Message::ServerInformation { .. } => types::SERVER_INFORMATION,
            Message::BadLogin { .. } => types::BAD_LOGIN,
            Message::DeleteCharacter { .. } => types::DELETE_CHARACTER,
            Message::StartCharacterList => types::START_CHARACTER_LIST,
            Message::InvalidRequest { .. } => types::INVALID_REQUEST,
            Message::UserNotFound => types::USER_NOT_FOUND,
        }
    }

    /// Human-readable packet name.
    pub fn name(&self) -> &'static str {
        packet_name(self.packet_type())
    }

    /// If this is a reply-class packet, its leading request serial.
    pub fn reply_serial(&self) -> Option<u32> {
        match self {
            Message::Success { serial, .. }
            | Message::Failed { serial, .. }
            | Message::InvalidRequest { serial, .. }
            | Message::NewCharacterOptions { serial, .. }
            | Message::MapCrc { serial, .. }
            | Message::MapReply { serial, .. } => Some(*serial),
            _ => None,
        }
    }

    /// Stamps the correlation serial into a request-class message.
    ///
    /// Returns false for message types that do not carry a serial.
    pub fn set_serial(&mut self, new: u32) -> bool {
        match self {
            Message::FinishLogin { serial, .. }
            | Message::Register { serial, .. }
            | Message::StartCreateCharacter { serial }
            | Message::FinishCreateCharacter { serial, .. }
            | Message::SelectCharacter { serial, .. }
            | Message::DeleteCharacter { serial, .. }
            | Message::GetMapCrc { serial, .. }
            | Message::GetMap { serial, .. }
            | Message::InteractObject { serial, .. } => {
                *serial = new;
                true
            }
            _ => false,
        }
    }

    /// Encodes the body (header excluded) into `buf`.
    pub fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            Message::NegotiateConnection {
                signature,
                revision,
                major,
                minor,
            } => {
                buf.extend_from_slice(signature);
                wire::put_u16(buf, *revision);
                wire::put_u16(buf, *major);
                wire::put_u16(buf, *minor);
            }
            Message::ConnectionAccepted {
                flags,
                server_name,
                news_url,
                update_url,
            } => {
                wire::put_u8(buf, *flags);
                wire::put_string(buf, server_name);
                wire::put_string(buf, news_url);
                wire::put_string(buf, update_url);
            }
            Message::ConnectionRejected { code } => wire::put_u8(buf, *code),
            Message::KeepAlive
            | Message::Disconnect
            | Message::MovementValid
            | Message::StartCharacterList
            | Message::UserNotFound => {}
            Message::Success { serial, reason }
            | Message::Failed { serial, reason }
            | Message::InvalidRequest { serial, reason } => {
                wire::put_u32(buf, *serial);
                wire::put_u16(buf, *reason);
            }
            Message::StartLogin { username } => wire::put_string(buf, username),
            Message::LoginChallenge { challenge, salt } => {
                buf.extend_from_slice(challenge);
                buf.extend_from_slice(salt);
            }
            Message::FinishLogin { serial, solution } => {
                wire::put_u32(buf, *serial);
                buf.extend_from_slice(solution);
            }
            Message::Register {
                serial,
                username,
                salt,
                passhash,
                email,
            } => {
                wire::put_u32(buf, *serial);
                wire::put_string(buf, username);
                wire::put_blob(buf, salt);
                wire::put_blob(buf, passhash);
                wire::put_string(buf, email);
            }
            Message::AvailableCharacter(character) => character.encode(buf),
            Message::StartCreateCharacter { serial } => wire::put_u32(buf, *serial),
            Message::NewCharacterOptions {
                serial,
                stat_points,
            } => {
                wire::put_u32(buf, *serial);
                wire::put_u32(buf, *stat_points);
            }
            Message::FinishCreateCharacter {
                serial,
                name,
                stats,
                sprites,
            } => {
                wire::put_u32(buf, *serial);
                for stat in stats {
                    wire::put_u16(buf, *stat);
                }
                for sprite in sprites {
                    wire::put_u32(buf, *sprite);
                }
                wire::put_string(buf, name);
            }
            Message::SelectCharacter { serial, name }
            | Message::DeleteCharacter { serial, name } => {
                wire::put_u32(buf, *serial);
                wire::put_string(buf, name);
            }
            Message::SendMessage { text } => wire::put_string(buf, text),
            Message::ShowMessage { sender, text } => {
                wire::put_string(buf, sender);
                wire::put_string(buf, text);
            }
            Message::AddObject {
                object_id,
                kind,
                x,
                y,
                sprite,
                name,
            } => {
                wire::put_u32(buf, *object_id);
                wire::put_u8(buf, *kind);
                wire::put_i32(buf, *x);
                wire::put_i32(buf, *y);
                wire::put_u32(buf, *sprite);
                wire::put_string(buf, name);
            }
            Message::DeleteObject { object_id } => wire::put_u32(buf, *object_id),
            Message::UpdateObject {
                object_id,
                x,
                y,
                direction,
            } => {
                wire::put_u32(buf, *object_id);
                wire::put_i32(buf, *x);
                wire::put_i32(buf, *y);
                wire::put_u8(buf, *direction);
            }
            Message::GetMapCrc { serial, map } | Message::GetMap { serial, map } => {
                wire::put_u32(buf, *serial);
                wire::put_string(buf, map);
            }
            Message::MapCrc { serial, checksum } => {
                wire::put_u32(buf, *serial);
                wire::put_u32(buf, *checksum);
            }
            Message::MapReply { serial, map } => {
                wire::put_u32(buf, *serial);
                match map {
                    Some(payload) => {
                        wire::put_u8(buf, 1);
                        wire::put_u32(buf, payload.version);
                        wire::put_u32(buf, payload.width);
                        wire::put_u32(buf, payload.height);
                        let mut raw = Vec::with_capacity(payload.tiles.len() * 4);
                        for tile in &payload.tiles {
                            raw.extend_from_slice(&tile.to_le_bytes());
                        }
                        wire::put_blob(buf, &raw);
                    }
                    None => wire::put_u8(buf, 0),
                }
            }
            Message::InteractObject { serial, object_id } => {
                wire::put_u32(buf, *serial);
                wire::put_u32(buf, *object_id);
            }
            Message::UpdateStats {
                level,
                stats,
                hp,
                max_hp,
                mp,
                max_mp,
            } => {
                wire::put_u16(buf, *level);
                for stat in stats {
                    wire::put_u16(buf, *stat);
                }
                wire::put_u32(buf, *hp);
                wire::put_u32(buf, *max_hp);
                wire::put_u32(buf, *mp);
                wire::put_u32(buf, *max_mp);
            }
            Message::UpdateInventory { entries } => {
                wire::put_u16(buf, entries.len() as u16);
                for entry in entries {
                    wire::put_u16(buf, entry.slot);
                    wire::put_u32(buf, entry.item_id);
                    wire::put_u16(buf, entry.quantity);
                }
            }
            Message::StartMovement { direction } => wire::put_u8(buf, *direction),
            Message::EndMovement { x, y } | Message::MovementInvalid { x, y } => {
                wire::put_i32(buf, *x);
                wire::put_i32(buf, *y);
            }
            Message::ServerInformation { entries } => {
                wire::put_u16(buf, entries.len() as u16);
                for entry in entries {
                    wire::put_u16(buf, entry.code);
                    wire::put_string(buf, &entry.value);
                }
            }
            Message::BadLogin { reason } => wire::put_u8(buf, *reason),
        }
    }

    /// Decodes the body for `packet_type` from `buf`, consuming exactly the
    /// fields the schema declares.
    pub fn decode_body(packet_type: u16, buf: &mut impl Buf) -> WireResult<Message> {
        let message = match packet_type {
            types::NEGOTIATE_CONNECTION => Message::NegotiateConnection {
                signature: wire::get_fixed::<2>(buf)?,
                revision: wire::get_u16(buf)?,
                major: wire::get_u16(buf)?,
                minor: wire::get_u16(buf)?,
            },
            types::CONNECTION_ACCEPTED => Message::ConnectionAccepted {
                flags: wire::get_u8(buf)?,
                server_name: wire::get_string(buf, types::MAX_SERVER_NAME_LEN)?,
                news_url: wire::get_string(buf, types::MAX_URL_LEN)?,
                update_url: wire::get_string(buf, types::MAX_URL_LEN)?,
            },
            types::CONNECTION_REJECTED => Message::ConnectionRejected {
                code: wire::get_u8(buf)?,
            },
            types::KEEP_ALIVE => Message::KeepAlive,
            types::SUCCESS => Message::Success {
                serial: wire::get_u32(buf)?,
                reason: wire::get_u16(buf)?,
            },
            types::FAILED => Message::Failed {
                serial: wire::get_u32(buf)?,
                reason: wire::get_u16(buf)?,
            },
            types::START_LOGIN => Message::StartLogin {
                username: wire::get_string(buf, types::MAX_USERNAME_LEN)?,
            },
            types::LOGIN_CHALLENGE => Message::LoginChallenge {
                challenge: wire::get_fixed::<32>(buf)?,
                salt: wire::get_fixed::<16>(buf)?,
            },
            types::FINISH_LOGIN => Message::FinishLogin {
                serial: wire::get_u32(buf)?,
                solution: wire::get_fixed::<64>(buf)?,
            },
            types::REGISTER => Message::Register {
                serial: wire::get_u32(buf)?,
                username: wire::get_string(buf, types::MAX_USERNAME_LEN)?,
                salt: wire::get_blob(buf, types::PASSHASH_LEN)?,
                passhash: wire::get_blob(buf, types::PASSHASH_LEN * 2)?,
                email: wire::get_string(buf, types::MAX_EMAIL_LEN)?,
            },
            types::AVAILABLE_CHARACTER => {
                Message::AvailableCharacter(CharacterSummary::decode(buf)?)
            }
            types::START_CREATE_CHARACTER => Message::StartCreateCharacter {
                serial: wire::get_u32(buf)?,
            },
            types::NEW_CHARACTER_OPTIONS => Message::NewCharacterOptions {
                serial: wire::get_u32(buf)?,
                stat_points: wire::get_u32(buf)?,
            },
            types::FINISH_CREATE_CHARACTER => {
                let serial = wire::get_u32(buf)?;
                let mut stats = [0u16; 6];
                for stat in &mut stats {
                    *stat = wire::get_u16(buf)?;
                }
                let mut sprites = [0u32; 4];
                for sprite in &mut sprites {
                    *sprite = wire::get_u32(buf)?;
                }
                let name = wire::get_string(buf, types::MAX_CHARACTER_NAME_LEN)?;
                Message::FinishCreateCharacter {
                    serial,
                    name,
                    stats,
                    sprites,
                }
            }
            types::SELECT_CHARACTER => Message::SelectCharacter {
                serial: wire::get_u32(buf)?,
                name: wire::get_string(buf, types::MAX_CHARACTER_NAME_LEN)?,
            },
            types::SEND_MESSAGE => Message::SendMessage {
                text: wire::get_string(buf, types::MAX_CHAT_LEN)?,
            },
            types::SHOW_MESSAGE => Message::ShowMessage {
                sender: wire::get_string(buf, types::MAX_CHARACTER_NAME_LEN)?,
                text: wire::get_string(buf, types::MAX_CHAT_LEN)?,
            },
            types::ADD_OBJECT => Message::AddObject {
                object_id: wire::get_u32(buf)?,
                kind: wire::get_u8(buf)?,
                x: wire::get_i32(buf)?,
                y: wire::get_i32(buf)?,
                sprite: wire::get_u32(buf)?,
                name: wire::get_string(buf, types::MAX_CHARACTER_NAME_LEN)?,
            },
            types::DELETE_OBJECT => Message::DeleteObject {
                object_id: wire::get_u32(buf)?,
            },
            types::UPDATE_OBJECT => Message::UpdateObject {
                object_id: wire::get_u32(buf)?,
                x: wire::get_i32(buf)?,
                y: wire::get_i32(buf)?,
                direction: wire::get_u8(buf)?,
            },
            types::GET_MAP_CRC => Message::GetMapCrc {
                serial: wire::get_u32(buf)?,
                map: wire::get_string(buf, types::MAX_MAP_NAME_LEN)?,
            },
            types::MAP_CRC => Message::MapCrc {
                serial: wire::get_u32(buf)?,
                checksum: wire::get_u32(buf)?,
            },
            types::GET_MAP => Message::GetMap {
                serial: wire::get_u32(buf)?,
                map: wire::get_string(buf, types::MAX_MAP_NAME_LEN)?,
            },
            types::MAP_REPLY => {
                let serial = wire::get_u32(buf)?;
                let found = wire::get_u8(buf)?;
                let map = match found {
                    0 => None,
                    1 => {
                        let version = wire::get_u32(buf)?;
                        let width = wire::get_u32(buf)?;
                        let height = wire::get_u32(buf)?;
                        let raw = wire::get_blob(buf, wire::MAX_FIELD_SIZE)?;
                        if raw.len() % 4 != 0 {
                            return Err(WireError::corrupt("tile array not u32-aligned"));
                        }
                        let tiles = raw
                            .chunks_exact(4)
                            .map(|chunk| {
                                u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
                            })
                            .collect();
                        Some(MapPayload {
                            version,
                            width,
                            height,
                            tiles,
                        })
                    }
                    other => {
                        return Err(WireError::corrupt(format!(
                            "invalid MapReply found flag {other}"
                        )))
                    }
                };
                Message::MapReply { serial, map }
            }
            types::INTERACT_OBJECT => Message::InteractObject {
                serial: wire::get_u32(buf)?,
                object_id: wire::get_u32(buf)?,
            },
            types::UPDATE_STATS => {
                let level = wire::get_u16(buf)?;
                let mut stats = [0u16; 6];
                for stat in &mut stats {
                    *stat = wire::get_u16(buf)?;
                }
                Message::UpdateStats {
                    level,
                    stats,
                    hp: wire::get_u32(buf)?,
                    max_hp: wire::get_u32(buf)?,
                    mp: wire::get_u32(buf)?,
                    max_mp: wire::get_u32(buf)?,
                }
            }
            types::UPDATE_INVENTORY => {
                let count = wire::get_u16(buf)?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    entries.push(InventoryEntry {
                        slot: wire::get_u16(buf)?,
                        item_id: wire::get_u32(buf)?,
                        quantity: wire::get_u16(buf)?,
                    });
                }
                Message::UpdateInventory { entries }
            }
            types::DISCONNECT => Message::Disconnect,
            types::START_MOVEMENT => Message::StartMovement {
                direction: wire::get_u8(buf)?,
            },
            types::END_MOVEMENT => Message::EndMovement {
                x: wire::get_i32(buf)?,
                y: wire::get_i32(buf)?,
            },
            types::MOVEMENT_VALID => Message::MovementValid,
            types::MOVEMENT_INVALID => Message::MovementInvalid {
                x: wire::get_i32(buf)?,
                y: wire::get_i32(buf)?,
            },
            types::SERVER_INFORMATION => {
                let count = wire::get_u16(buf)?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    entries.push(InfoEntry {
                        code: wire::get_u16(buf)?,
                        value: wire::get_string(buf, types::MAX_INFO_VALUE_LEN)?,
                    });
                }
                Message::ServerInformation { entries }
            }
            types::BAD_LOGIN => Message::BadLogin {
                reason: wire::get_u8(buf)?,
            },
            types::DELETE_CHARACTER => Message::DeleteCharacter {
                serial: wire::get_u32(buf)?,
                name: wire::get_string(buf, types::MAX_CHARACTER_NAME_LEN)?,
            },
            types::START_CHARACTER_LIST => Message::StartCharacterList,
            types::INVALID_REQUEST => Message::InvalidRequest {
                serial: wire::get_u32(buf)?,
                reason: wire::get_u16(buf)?,
            },
            types::USER_NOT_FOUND => Message::UserNotFound,
            other => return Err(WireError::UnknownPacketType(other)),
        };
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn round_trip(message: Message) {
        let mut buf = BytesMut::new();
        message.encode_body(&mut buf);
        let mut rd = Bytes::from(buf.to_vec());
        let decoded = Message::decode_body(message.packet_type(), &mut rd).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(rd.remaining(), 0, "decode must consume the full body");
    }

    #[test]
    fn negotiate_connection_round_trip() {
        round_trip(Message::NegotiateConnection {
            signature: types::PROTOCOL_SIGNATURE,
            revision: 1,
            major: 1,
            minor: 0,
        });
    }

    #[test]
    fn connection_accepted_round_trip() {
        round_trip(Message::ConnectionAccepted {
            flags: 0,
            server_name: "Test Server".into(),
            news_url: String::new(),
            update_url: String::new(),
        });
    }

    #[test]
    fn register_salt_length_is_not_enforced_on_the_wire() {
        // Field validation is a server concern; a 15-byte salt must survive
        // transport so the server can answer Failed{1}.
        round_trip(Message::Register {
            serial: 9,
            username: "newuser".into(),
            salt: vec![0xAB; 15],
            passhash: vec![0xCD; 64],
            email: "new@example.com".into(),
        });
    }

    #[test]
    fn character_summary_round_trip() {
        round_trip(Message::AvailableCharacter(CharacterSummary {
            name: "Aria".into(),
            level: 12,
            stats: [5, 6, 7, 8, 9, 10],
            sprites: [1, 2, 3, 4],
        }));
    }

    #[test]
    fn map_reply_round_trip() {
        round_trip(Message::MapReply {
            serial: 77,
            map: Some(MapPayload {
                version: 2,
                width: 3,
                height: 2,
                tiles: vec![1, 2, 3, 4, 5, 6],
            }),
        });
        round_trip(Message::MapReply {
            serial: 78,
            map: None,
        });
    }

    #[test]
    fn server_information_round_trip() {
        round_trip(Message::ServerInformation {
            entries: vec![
                InfoEntry {
                    code: types::server_info::MESSAGE_OF_THE_DAY,
                    value: "Welcome!".into(),
                },
                InfoEntry {
                    code: 42,
                    value: "ZnV0dXJlIGRhdGE=".into(),
                },
            ],
        });
    }

    #[test]
    fn truncated_body_reports_truncated() {
        let mut buf = BytesMut::new();
        Message::SelectCharacter {
            serial: 1,
            name: "Aria".into(),
        }
        .encode_body(&mut buf);
        let mut partial = Bytes::from(buf[..buf.len() - 2].to_vec());
        assert!(matches!(
            Message::decode_body(types::SELECT_CHARACTER, &mut partial),
            Err(WireError::Truncated)
        ));
    }

    #[test]
    fn unknown_packet_type_is_rejected() {
        let mut rd = Bytes::from_static(&[0, 0, 0, 0]);
        assert!(matches!(
            Message::decode_body(200, &mut rd),
            Err(WireError::UnknownPacketType(200))
        ));
    }

    #[test]
    fn serial_stamping_covers_request_types_only() {
        let mut msg = Message::GetMapCrc {
            serial: 0,
            map: "overworld".into(),
        };
        assert!(msg.set_serial(41));
        assert!(matches!(msg, Message::GetMapCrc { serial: 41, .. }));

        let mut push = Message::KeepAlive;
        assert!(!push.set_serial(1));
    }
}
