use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::constant::{
    AUTH_SEED_PART1_LEN, AUTH_SEED_PART2_LEN, CAPABILITIES_DESIRED, CapabilityFlags, EOF_HEADER,
    ERR_HEADER, MIN_PROTOCOL_VERSION, MYSQL_NATIVE_PASSWORD, OK_HEADER, ServerStatusFlags,
    UTF8_GENERAL_CI,
};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use crate::protocol::response::{ErrPayload, ErrPayloadBytes, OkPayload, OkPayloadBytes};

/// Fields that every protocol-10 handshake carries after the server version
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
struct HandshakeFixedFields {
    connection_id: U32LE,
    auth_data_part1: [u8; AUTH_SEED_PART1_LEN],
    _filler: u8,
    capability_flags_lower: U16LE,
}

/// Fields that follow when the server sends more than the lower capability flags
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
struct HandshakeExtendedFields {
    charset: u8,
    status_flags: U16LE,
    capability_flags_upper: U16LE,
    _auth_data_len: u8,
    _reserved: [u8; 10],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// `auth_data_part1 ++ auth_data_part2`, 20 bytes for protocol-41 servers
    pub auth_seed: Vec<u8>,
    pub capability_flags: CapabilityFlags,
    pub charset: Option<u8>,
    pub status_flags: Option<ServerStatusFlags>,
}

/// Read initial handshake packet from server
///
/// The second part of the seed is read as exactly 12 bytes. Servers send a 13th
/// NUL byte and, with `CLIENT_PLUGIN_AUTH`, the plugin name; both are ignored.
pub fn read_initial_handshake(payload: &[u8]) -> Result<InitialHandshake> {
    let (protocol_version, data) = read_int_1(payload)?;

    if protocol_version == ERR_HEADER {
        return Err(Error::HandshakeError(ErrPayload::try_from(ErrPayloadBytes(
            payload,
        ))?));
    }
    if protocol_version < MIN_PROTOCOL_VERSION {
        return Err(Error::UnsupportedProtocolVersion(protocol_version));
    }

    let (server_version, data) = read_string_null(data)?;
    let server_version = String::from_utf8_lossy(server_version).into_owned();

    let (fixed, data) =
        HandshakeFixedFields::ref_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;

    let mut auth_seed = fixed.auth_data_part1.to_vec();
    let mut cap_bits = u32::from(fixed.capability_flags_lower.get());
    let mut charset = None;
    let mut status_flags = None;

    if !data.is_empty() {
        let (extended, data) =
            HandshakeExtendedFields::ref_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;

        charset = Some(extended.charset);
        status_flags = Some(ServerStatusFlags::from_bits_retain(
            extended.status_flags.get(),
        ));
        cap_bits |= u32::from(extended.capability_flags_upper.get()) << 16;

        let (auth_data_part2, _rest) = read_string_fix(data, AUTH_SEED_PART2_LEN)?;
        auth_seed.extend_from_slice(auth_data_part2);
    }

    Ok(InitialHandshake {
        protocol_version,
        server_version,
        connection_id: fixed.connection_id.get(),
        auth_seed,
        capability_flags: CapabilityFlags::from_bits_retain(cap_bits),
        charset,
        status_flags,
    })
}

// ============================================================================
// Authentication
// ============================================================================

/// mysql_native_password authentication
///
/// `SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))`
///
/// Returns an empty response when the password or the seed is empty, which the
/// server reads as "no password".
pub fn scramble_native_password(password: &[u8], seed: &[u8]) -> Vec<u8> {
    use sha1::{Digest, Sha1};

    if password.is_empty() || seed.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha1::digest(password);
    let stage2 = Sha1::digest(&stage1);

    let mut hasher = Sha1::new();
    hasher.update(seed);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    stage3
        .iter()
        .zip(stage1.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Capabilities the proxy uses on this connection: `desired & server`.
pub fn negotiate_capabilities(server: CapabilityFlags, with_database: bool) -> CapabilityFlags {
    let mut desired = CAPABILITIES_DESIRED;
    if !with_database {
        desired.remove(CapabilityFlags::CLIENT_CONNECT_WITH_DB);
    }
    desired & server
}

/// Handshake response packet sent by the proxy (HandshakeResponse41)
#[derive(Debug, Clone)]
pub struct HandshakeResponse<'a> {
    pub capability_flags: CapabilityFlags,
    pub charset: u8,
    pub username: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
}

/// Write handshake response packet
pub fn write_handshake_response(out: &mut Vec<u8>, response: &HandshakeResponse<'_>) {
    write_int_4(out, response.capability_flags.bits());

    // max packet size: 0, the server default applies
    write_int_4(out, 0);

    write_int_1(out, response.charset);

    // reserved
    out.extend_from_slice(&[0u8; 23]);

    write_string_null(out, response.username);

    // a 20-byte scramble always fits the 1-byte length
    write_int_1(out, response.auth_response.len() as u8);
    out.extend_from_slice(response.auth_response);

    if response
        .capability_flags
        .contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB)
    {
        write_string_null(out, response.database.unwrap_or_default());
    }
}

/// Auth switch request from server
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest<'a> {
    pub plugin_name: &'a [u8],
    pub plugin_data: &'a [u8],
}

/// Read auth switch request (0xFE during authentication)
pub fn read_auth_switch_request(payload: &[u8]) -> Result<AuthSwitchRequest<'_>> {
    let (header, data) = read_int_1(payload)?;
    if header != EOF_HEADER {
        return Err(Error::UnexpectedPacket(header));
    }

    // A bare 0xFE is the pre-4.1 "switch to old password" request
    if data.is_empty() {
        return Err(Error::UnsupportedAuthPlugin("mysql_old_password".to_string()));
    }

    let (plugin_name, plugin_data) = read_string_null(data)?;
    let plugin_data = plugin_data.strip_suffix(&[0]).unwrap_or(plugin_data);

    Ok(AuthSwitchRequest {
        plugin_name,
        plugin_data,
    })
}

// ============================================================================
// State Machine API for Handshake
// ============================================================================

/// Credentials for the bring-up
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    pub charset: u8,
}

/// Result of driving the handshake state machine
#[derive(Debug)]
pub enum HandshakeResult {
    /// Initial handshake received - write the response to the server
    InitialHandshake {
        handshake_response: Vec<u8>,
        initial_handshake: InitialHandshake,
    },
    /// Write this packet to the server, then read the next response
    Write(Vec<u8>),
    /// Handshake complete, connection established
    Connected {
        capability_flags: CapabilityFlags,
        ok: OkPayload,
    },
}

/// State machine for the backend handshake
///
/// Pure parsing and packet generation without I/O. The caller reads a payload,
/// calls [`Handshake::drive`], and writes whatever it is asked to write.
#[derive(Debug)]
pub enum Handshake {
    /// Waiting for initial handshake from server
    Start { config: HandshakeConfig },
    /// Sent handshake response, waiting for auth result
    WaitingAuthResult {
        config: HandshakeConfig,
        capability_flags: CapabilityFlags,
    },
    /// Sent auth switch response, waiting for final auth result
    WaitingFinalAuthResult { capability_flags: CapabilityFlags },
    /// Connected (terminal state)
    Connected,
}

impl Handshake {
    pub fn new(config: HandshakeConfig) -> Self {
        Self::Start { config }
    }

    /// Drive the state machine with the next payload
    pub fn drive(&mut self, payload: &[u8]) -> Result<HandshakeResult> {
        match self {
            Self::Start { config } => {
                let handshake = read_initial_handshake(payload)?;
                let capability_flags =
                    negotiate_capabilities(handshake.capability_flags, config.database.is_some());

                let auth_response =
                    scramble_native_password(config.password.as_bytes(), &handshake.auth_seed);

                let response = HandshakeResponse {
                    capability_flags,
                    charset: config.charset,
                    username: &config.username,
                    auth_response: &auth_response,
                    database: config.database.as_deref(),
                };
                let mut handshake_response = Vec::new();
                write_handshake_response(&mut handshake_response, &response);

                tracing::debug!(
                    server_version = %handshake.server_version,
                    connection_id = handshake.connection_id,
                    server_capabilities = ?handshake.capability_flags,
                    negotiated = ?capability_flags,
                    "received initial handshake"
                );

                let config = std::mem::take(config);
                *self = Self::WaitingAuthResult {
                    config,
                    capability_flags,
                };

                Ok(HandshakeResult::InitialHandshake {
                    handshake_response,
                    initial_handshake: handshake,
                })
            }

            Self::WaitingAuthResult {
                config,
                capability_flags,
            } => match read_int_1(payload)?.0 {
                OK_HEADER => {
                    let result = HandshakeResult::Connected {
                        capability_flags: *capability_flags,
                        ok: OkPayload::try_from(OkPayloadBytes(payload))?,
                    };
                    *self = Self::Connected;
                    Ok(result)
                }
                ERR_HEADER => Err(Error::AuthenticationError(ErrPayload::try_from(
                    ErrPayloadBytes(payload),
                )?)),
                EOF_HEADER => {
                    let auth_switch = read_auth_switch_request(payload)?;
                    if auth_switch.plugin_name != MYSQL_NATIVE_PASSWORD {
                        return Err(Error::UnsupportedAuthPlugin(
                            String::from_utf8_lossy(auth_switch.plugin_name).into_owned(),
                        ));
                    }

                    tracing::debug!("server requested auth switch to mysql_native_password");
                    let auth_response =
                        scramble_native_password(config.password.as_bytes(), auth_switch.plugin_data);

                    *self = Self::WaitingFinalAuthResult {
                        capability_flags: *capability_flags,
                    };
                    Ok(HandshakeResult::Write(auth_response))
                }
                header => Err(Error::UnexpectedPacket(header)),
            },

            Self::WaitingFinalAuthResult { capability_flags } => match read_int_1(payload)?.0 {
                OK_HEADER => {
                    let result = HandshakeResult::Connected {
                        capability_flags: *capability_flags,
                        ok: OkPayload::try_from(OkPayloadBytes(payload))?,
                    };
                    *self = Self::Connected;
                    Ok(result)
                }
                ERR_HEADER => Err(Error::AuthenticationError(ErrPayload::try_from(
                    ErrPayloadBytes(payload),
                )?)),
                header => Err(Error::UnexpectedPacket(header)),
            },

            // Should not receive more data after connected
            Self::Connected => Err(Error::InvalidPacket),
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            database: None,
            charset: UTF8_GENERAL_CI,
        }
    }
}
