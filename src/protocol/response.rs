use simdutf8::basic::from_utf8;

use crate::constant::{ERR_HEADER, OK_HEADER, ServerStatusFlags};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;

/// Raw OK packet payload, header byte included
#[derive(Debug, Clone, Copy)]
pub struct OkPayloadBytes<'a>(pub &'a [u8]);

/// Raw ERR packet payload, header byte included
#[derive(Debug, Clone, Copy)]
pub struct ErrPayloadBytes<'a>(pub &'a [u8]);

/// OK packet response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkPayload {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: ServerStatusFlags,
    pub warnings: u16,
    pub info: String,
}

impl TryFrom<OkPayloadBytes<'_>> for OkPayload {
    type Error = Error;

    fn try_from(bytes: OkPayloadBytes<'_>) -> Result<Self> {
        let (header, data) = read_int_1(bytes.0)?;
        if header != OK_HEADER {
            return Err(Error::UnexpectedPacket(header));
        }

        let (affected_rows, rest) = read_int_lenenc_not_null(data)?;
        let (last_insert_id, rest) = read_int_lenenc_not_null(rest)?;
        let (status_flags, rest) = read_int_2(rest)?;

        // Warnings and info are absent in pre-4.1 servers and in minimal OK packets
        let (warnings, rest) = if rest.len() >= 2 {
            read_int_2(rest)?
        } else {
            (0, rest)
        };
        let info = utf8_message(rest);

        Ok(OkPayload {
            affected_rows,
            last_insert_id,
            status_flags: ServerStatusFlags::from_bits_retain(status_flags),
            warnings,
            info,
        })
    }
}

/// ERR packet response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ERROR {error_code} ({sql_state}): {message}")]
pub struct ErrPayload {
    pub error_code: u16,
    pub sql_state: String,
    pub message: String,
}

impl TryFrom<ErrPayloadBytes<'_>> for ErrPayload {
    type Error = Error;

    fn try_from(bytes: ErrPayloadBytes<'_>) -> Result<Self> {
        let (header, data) = read_int_1(bytes.0)?;
        if header != ERR_HEADER {
            return Err(Error::UnexpectedPacket(header));
        }

        let (error_code, data) = read_int_2(data)?;

        // The '#' marker and SQLSTATE are only sent under CLIENT_PROTOCOL_41
        let (sql_state, rest) = match data.split_first() {
            Some((&b'#', rest)) => {
                let (state_bytes, rest) = read_string_fix(rest, 5)?;
                (utf8_message(state_bytes), rest)
            }
            _ => (String::new(), data),
        };

        Ok(ErrPayload {
            error_code,
            sql_state,
            message: utf8_message(rest),
        })
    }
}

impl From<ErrPayloadBytes<'_>> for Error {
    fn from(value: ErrPayloadBytes<'_>) -> Self {
        match ErrPayload::try_from(value) {
            Ok(err_payload) => Error::ServerError(err_payload),
            Err(err) => err,
        }
    }
}

/// Either side of a generic response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenericResponse {
    Ok(OkPayload),
    Err(ErrPayload),
}

/// Decode a response that must be OK or ERR
pub fn decode_generic_response(payload: &[u8]) -> Result<GenericResponse> {
    match payload.first() {
        Some(&OK_HEADER) => Ok(GenericResponse::Ok(OkPayload::try_from(OkPayloadBytes(
            payload,
        ))?)),
        Some(&ERR_HEADER) => Ok(GenericResponse::Err(ErrPayload::try_from(
            ErrPayloadBytes(payload),
        )?)),
        Some(&header) => Err(Error::UnexpectedPacket(header)),
        None => Err(Error::InvalidPacket),
    }
}

/// Decode an OK response, turning ERR into [`Error::ServerError`]
pub fn read_ok_response(payload: &[u8]) -> Result<OkPayload> {
    match decode_generic_response(payload)? {
        GenericResponse::Ok(ok) => Ok(ok),
        GenericResponse::Err(err) => Err(Error::ServerError(err)),
    }
}

fn utf8_message(bytes: &[u8]) -> String {
    match from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decode_minimal_ok() {
        let response = decode_generic_response(&[0x00, 0x01, 0x00, 0x02, 0x00]).unwrap();
        assert_eq!(
            response,
            GenericResponse::Ok(OkPayload {
                affected_rows: 1,
                last_insert_id: 0,
                status_flags: ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT,
                warnings: 0,
                info: String::new(),
            })
        );
    }

    #[test]
    fn decode_full_ok() {
        let mut payload = vec![0x00, 0xFC, 0x00, 0x01, 0x2A];
        payload.extend_from_slice(&[0x03, 0x00, 0x02, 0x00]);
        payload.extend_from_slice(b"Rows matched: 256");

        let ok = read_ok_response(&payload).unwrap();
        assert_eq!(ok.affected_rows, 256);
        assert_eq!(ok.last_insert_id, 42);
        assert!(ok.status_flags.contains(ServerStatusFlags::SERVER_STATUS_IN_TRANS));
        assert!(ok.status_flags.contains(ServerStatusFlags::SERVER_STATUS_AUTOCOMMIT));
        assert_eq!(ok.warnings, 2);
        assert_eq!(ok.info, "Rows matched: 256");
    }

    #[test]
    fn decode_err() {
        let mut payload = vec![0xFF];
        payload.extend_from_slice(&1045u16.to_le_bytes());
        payload.extend_from_slice(b"#28000Access denied");

        let response = decode_generic_response(&payload).unwrap();
        assert_eq!(
            response,
            GenericResponse::Err(ErrPayload {
                error_code: 1045,
                sql_state: "28000".to_string(),
                message: "Access denied".to_string(),
            })
        );

        let err = read_ok_response(&payload).unwrap_err();
        assert!(matches!(err, Error::ServerError(ref e) if e.error_code == 1045));
    }

    #[test]
    fn decode_err_without_sql_state() {
        let payload = [0xFF, 0x15, 0x04, b'o', b'o', b'p', b's'];
        let err = ErrPayload::try_from(ErrPayloadBytes(&payload)).unwrap();
        assert_eq!(err.error_code, 1045);
        assert_eq!(err.sql_state, "");
        assert_eq!(err.message, "oops");
    }

    #[test]
    fn decode_err_with_invalid_utf8() {
        let payload = [0xFF, 0x01, 0x00, b'#', b'H', b'Y', b'0', b'0', b'0', 0xC3, b'x'];
        let err = ErrPayload::try_from(ErrPayloadBytes(&payload)).unwrap();
        assert_eq!(err.sql_state, "HY000");
        assert_eq!(err.message, "\u{FFFD}x");
    }

    #[test]
    fn reject_other_headers() {
        assert!(matches!(
            decode_generic_response(&[0xFE, 0x00, 0x00, 0x02, 0x00]),
            Err(Error::UnexpectedPacket(0xFE))
        ));
        assert!(matches!(
            decode_generic_response(&[0x03, b'd', b'e', b'f']),
            Err(Error::UnexpectedPacket(0x03))
        ));
        assert!(matches!(decode_generic_response(&[]), Err(Error::InvalidPacket)));
    }

    #[test]
    fn reject_truncated_ok() {
        assert!(matches!(
            decode_generic_response(&[0x00, 0x01, 0x00, 0x02]),
            Err(Error::UnexpectedEof)
        ));
    }
}
