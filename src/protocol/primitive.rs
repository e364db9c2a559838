use crate::error::{Error, Result};
use zerocopy::FromBytes;
use zerocopy::byteorder::little_endian::{U16 as U16LE, U64 as U64LE};

/// Read 1-byte integer
pub fn read_int_1(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&value, rest)) => Ok((value, rest)),
        None => Err(Error::UnexpectedEof),
    }
}

/// Read 2-byte little-endian integer
pub fn read_int_2(data: &[u8]) -> Result<(u16, &[u8])> {
    let (value, rest) = U16LE::read_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;
    Ok((value.get(), rest))
}

/// Read 3-byte little-endian integer
pub fn read_int_3(data: &[u8]) -> Result<(u32, &[u8])> {
    let (bytes, rest) = read_string_fix(data, 3)?;
    Ok((u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]), rest))
}

/// Read 8-byte little-endian integer
pub fn read_int_8(data: &[u8]) -> Result<(u64, &[u8])> {
    let (value, rest) = U64LE::read_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;
    Ok((value.get(), rest))
}

/// Read length-encoded integer
///
/// `0xFB` is the NULL marker and yields `None`.
pub fn read_int_lenenc(data: &[u8]) -> Result<(Option<u64>, &[u8])> {
    let (marker, rest) = read_int_1(data)?;
    match marker {
        0xFB => Ok((None, rest)),
        0xFC => {
            let (val, rest) = read_int_2(rest)?;
            Ok((Some(u64::from(val)), rest))
        }
        0xFD => {
            let (val, rest) = read_int_3(rest)?;
            Ok((Some(u64::from(val)), rest))
        }
        0xFE => {
            let (val, rest) = read_int_8(rest)?;
            Ok((Some(val), rest))
        }
        0xFF => Err(Error::InvalidLengthEncoding(marker)),
        val => Ok((Some(u64::from(val)), rest)),
    }
}

/// Decode a length-encoded integer, returning the value and the number of bytes consumed
///
/// ```text
/// 0x05            -> (Some(5), 1)
/// 0xFB            -> (None, 1)
/// 0xFC 0x00 0x01  -> (Some(256), 3)
/// ```
pub fn decode_lenenc_int(data: &[u8]) -> Result<(Option<u64>, usize)> {
    let (value, rest) = read_int_lenenc(data)?;
    Ok((value, data.len() - rest.len()))
}

/// Read a length-encoded integer where NULL is not allowed
pub fn read_int_lenenc_not_null(data: &[u8]) -> Result<(u64, &[u8])> {
    match read_int_lenenc(data)? {
        (Some(value), rest) => Ok((value, rest)),
        (None, _) => Err(Error::InvalidLengthEncoding(0xFB)),
    }
}

/// Read fixed-length string
pub fn read_string_fix(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < len {
        return Err(Error::UnexpectedEof);
    }
    Ok(data.split_at(len))
}

/// Read null-terminated string
pub fn read_string_null(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let end = data
        .iter()
        .position(|&byte| byte == 0)
        .ok_or(Error::UnexpectedEof)?;
    Ok((&data[..end], &data[end + 1..]))
}

/// Write 1-byte integer
pub fn write_int_1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

/// Write 4-byte little-endian integer
pub fn write_int_4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Write null-terminated string
pub fn write_string_null(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenenc_one_byte() {
        assert_eq!(decode_lenenc_int(&[0x05]).unwrap(), (Some(5), 1));
        assert_eq!(decode_lenenc_int(&[0xFA, 0xAA]).unwrap(), (Some(250), 1));
    }

    #[test]
    fn lenenc_null() {
        assert_eq!(decode_lenenc_int(&[0xFB, 0x01]).unwrap(), (None, 1));
        assert!(matches!(
            read_int_lenenc_not_null(&[0xFB]),
            Err(Error::InvalidLengthEncoding(0xFB))
        ));
    }

    #[test]
    fn lenenc_two_bytes() {
        assert_eq!(decode_lenenc_int(&[0xFC, 0x00, 0x01]).unwrap(), (Some(256), 3));
    }

    #[test]
    fn lenenc_three_bytes() {
        assert_eq!(decode_lenenc_int(&[0xFD, 0x01, 0x00, 0x00]).unwrap(), (Some(1), 4));
        assert_eq!(
            decode_lenenc_int(&[0xFD, 0xFF, 0xFF, 0xFF]).unwrap(),
            (Some(0xFF_FFFF), 4)
        );
    }

    #[test]
    fn lenenc_eight_bytes() {
        let data = [0xFE, 0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, 0xAA];
        assert_eq!(
            decode_lenenc_int(&data).unwrap(),
            (Some(0x0102_0304_0506_0708), 9)
        );
    }

    #[test]
    fn lenenc_truncated_and_invalid() {
        assert!(matches!(decode_lenenc_int(&[]), Err(Error::UnexpectedEof)));
        assert!(matches!(decode_lenenc_int(&[0xFC, 0x01]), Err(Error::UnexpectedEof)));
        assert!(matches!(
            decode_lenenc_int(&[0xFE, 0, 0, 0]),
            Err(Error::UnexpectedEof)
        ));
        assert!(matches!(
            decode_lenenc_int(&[0xFF]),
            Err(Error::InvalidLengthEncoding(0xFF))
        ));
    }

    #[test]
    fn null_terminated_string() {
        let (s, rest) = read_string_null(b"8.0.36\0tail").unwrap();
        assert_eq!(s, b"8.0.36");
        assert_eq!(rest, b"tail");
        assert!(matches!(read_string_null(b"abc"), Err(Error::UnexpectedEof)));
    }

    #[test]
    fn fixed_width_integers() {
        assert_eq!(read_int_2(&[0x11, 0x04, 0xAA]).unwrap(), (1041, &[0xAA][..]));
        assert_eq!(read_int_3(&[0x01, 0x02, 0x03]).unwrap().0, 0x030201);
        assert!(matches!(read_int_2(&[0x01]), Err(Error::UnexpectedEof)));
    }
}
