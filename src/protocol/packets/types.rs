//! Packet type identifiers and protocol constants.

/// Protocol signature carried by `NegotiateConnection`, as raw header bytes.
pub const PROTOCOL_SIGNATURE: [u8; 2] = [0xA0, 0xD0];

/// Current revision of the network protocol.
pub const PROTOCOL_REVISION: u16 = 1;

/// Engine version advertised during negotiation.
pub const ENGINE_MAJOR: u16 = 1;
pub const ENGINE_MINOR: u16 = 0;

// ============================================================================
// Packet types
// ============================================================================

pub const NEGOTIATE_CONNECTION: u16 = 0;
pub const CONNECTION_ACCEPTED: u16 = 1;
pub const CONNECTION_REJECTED: u16 = 2;
pub const KEEP_ALIVE: u16 = 3;
pub const SUCCESS: u16 = 4;
pub const FAILED: u16 = 5;
pub const START_LOGIN: u16 = 6;
pub const LOGIN_CHALLENGE: u16 = 7;
pub const FINISH_LOGIN: u16 = 8;
pub const REGISTER: u16 = 9;
pub const AVAILABLE_CHARACTER: u16 = 10;
pub const START_CREATE_CHARACTER: u16 = 11;
pub const NEW_CHARACTER_OPTIONS: u16 = 12;
pub const FINISH_CREATE_CHARACTER: u16 = 13;
pub const SELECT_CHARACTER: u16 = 14;
pub const SEND_MESSAGE: u16 = 15;
pub const SHOW_MESSAGE: u16 = 16;
pub const ADD_OBJECT: u16 = 17;
pub const DELETE_OBJECT: u16 = 18;
pub const UPDATE_OBJECT: u16 = 19;
pub const GET_MAP_CRC: u16 = 20;
pub const MAP_CRC: u16 = 21;
pub const GET_MAP: u16 = 22;
pub const MAP_REPLY: u16 = 23;
pub const INTERACT_OBJECT: u16 = 24;
pub const UPDATE_STATS: u16 = 25;
pub const UPDATE_INVENTORY: u16 = 26;
pub const DISCONNECT: u16 = 27;
pub const START_MOVEMENT: u16 = 28;
pub const END_MOVEMENT: u16 = 29;
pub const MOVEMENT_VALID: u16 = 30;
pub const MOVEMENT_INVALID: u16 = 31;
pub const SERVER_INFORMATION: u16 = 32;
pub const BAD_LOGIN: u16 = 33;
pub const DELETE_CHARACTER: u16 = 34;
pub const START_CHARACTER_LIST: u16 = 35;
pub const INVALID_REQUEST: u16 = 36;
pub const USER_NOT_FOUND: u16 = 37;

/// Highest allowed packet type value, used for validation.
pub const MAX_VALID_PACKET: u16 = USER_NOT_FOUND;

// ============================================================================
// Header flags
// ============================================================================

/// Set in the packet header if the body is zlib-compressed.
pub const FLAG_COMPRESSED: u16 = 1;

// ============================================================================
// Body constants
// ============================================================================

/// `ConnectionAccepted` flag: in-client registration is disabled.
pub const ACCEPT_FLAG_NO_REGISTER: u8 = 1;

/// `ConnectionRejected` codes.
pub mod reject {
    pub const OTHER: u8 = 0;
    pub const OUTDATED: u8 = 1;
    pub const REVISION: u8 = 2;
    pub const SIGNATURE: u8 = 3;
    pub const BANNED: u8 = 4;
    pub const SECURITY_UPDATE: u8 = 5;
    pub const NO_SLOTS: u8 = 6;
}

/// `Failed` reason codes for `Register`.
pub mod register_fail {
    pub const INVALID_USERNAME: u16 = 0;
    pub const INVALID_SALT: u16 = 1;
    pub const INVALID_HASH: u16 = 2;
    pub const INVALID_EMAIL: u16 = 3;
    pub const USERNAME_TAKEN: u16 = 4;
    pub const EMAIL_IN_USE: u16 = 5;
    pub const REGISTRATION_DISABLED: u16 = 6;
}

/// `Failed` reason codes for `FinishCreateCharacter`.
pub mod create_fail {
    pub const INVALID_NAME: u16 = 0;
    pub const NAME_TAKEN: u16 = 1;
    pub const STAT_BUDGET: u16 = 2;
    pub const INVALID_SPRITE: u16 = 3;
    pub const NOT_IN_PROGRESS: u16 = 4;
}

/// `BadLogin` reasons.
pub mod bad_login {
    pub const TRY_AGAIN_LATER: u8 = 0;
    pub const CHALLENGE_EXPIRED: u8 = 1;
    pub const TOO_MANY_ATTEMPTS: u8 = 2;
}

/// `ServerInformation` value codes. Unknown codes must be ignored by clients.
pub mod server_info {
    pub const MESSAGE_OF_THE_DAY: u16 = 0;
}

// ============================================================================
// Field length limits
// ============================================================================

pub const MAX_USERNAME_LEN: usize = 32;
pub const MAX_EMAIL_LEN: usize = 64;
pub const MAX_SERVER_NAME_LEN: usize = 64;
pub const MAX_URL_LEN: usize = 256;
pub const MAX_CHARACTER_NAME_LEN: usize = 32;
pub const MAX_CHAT_LEN: usize = 512;
pub const MAX_MAP_NAME_LEN: usize = 64;
pub const MAX_INFO_VALUE_LEN: usize = 512;

pub const SALT_LEN: usize = 16;
pub const PASSHASH_LEN: usize = 64;
pub const CHALLENGE_LEN: usize = 32;

/// Get a human-readable name for a packet type.
pub fn packet_name(packet_type: u16) -> &'static str {
    match packet_type {
        NEGOTIATE_CONNECTION => "NegotiateConnection",
        CONNECTION_ACCEPTED => "ConnectionAccepted",
        CONNECTION_REJECTED => "ConnectionRejected",
        KEEP_ALIVE => "KeepAlive",
        SUCCESS => "Success",
        FAILED => "Failed",
        START_LOGIN => "StartLogin",
        LOGIN_CHALLENGE => "LoginChallenge",
        FINISH_LOGIN => "FinishLogin",
        REGISTER => "Register",
        AVAILABLE_CHARACTER => "AvailableCharacter",
        START_CREATE_CHARACTER => "StartCreateCharacter",
        NEW_CHARACTER_OPTIONS => "NewCharacterOptions",
        FINISH_CREATE_CHARACTER => "FinishCreateCharacter",
        SELECT_CHARACTER => "SelectCharacter",
        SEND_MESSAGE => "SendMessage",
        SHOW_MESSAGE => "ShowMessage",
        ADD_OBJECT => "AddObject",
        DELETE_OBJECT => "DeleteObject",
        UPDATE_OBJECT => "UpdateObject",
        GET_MAP_CRC => "GetMapCRC",
        MAP_CRC => "MapCRC",
        GET_MAP => "GetMap",
        MAP_REPLY => "MapReply",
        INTERACT_OBJECT => "InteractObject",
        UPDATE_STATS => "UpdateStats",
        UPDATE_INVENTORY => "UpdateInventory",
        DISCONNECT => "Disconnect",
        START_MOVEMENT => "StartMovement",
        END_MOVEMENT => "EndMovement",
        MOVEMENT_VALID => "MovementValid",
        MOVEMENT_INVALID => "MovementInvalid",
        SERVER_INFORMATION => "ServerInformation",
        BAD_LOGIN => "BadLogin",
        DELETE_CHARACTER => "DeleteCharacter",
        START_CHARACTER_LIST => "StartCharacterList",
        INVALID_REQUEST => "InvalidRequest",
        USER_NOT_FOUND => "UserNotFound",
        _ => "Unknown",
    }
}
