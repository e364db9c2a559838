use crate::constant::{CommandByte, OK_HEADER};
use crate::error::{Error, Result};
use crate::protocol::primitive::*;
use zerocopy::byteorder::little_endian::{U16 as U16LE, U32 as U32LE};
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Prepared statement OK response (zero-copy)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
pub struct PrepareOk {
    statement_id: U32LE,
    num_columns: U16LE,
    num_params: U16LE,
    _reserved: u8,
    warning_count: U16LE,
}

impl PrepareOk {
    /// Get the statement ID
    pub fn statement_id(&self) -> u32 {
        self.statement_id.get()
    }

    /// Get the number of columns in the result set
    pub fn num_columns(&self) -> u16 {
        self.num_columns.get()
    }

    /// Get the number of parameters in the prepared statement
    pub fn num_params(&self) -> u16 {
        self.num_params.get()
    }

    /// Get the warning count
    pub fn warning_count(&self) -> u16 {
        self.warning_count.get()
    }
}

/// Write COM_STMT_PREPARE command
pub fn write_prepare(out: &mut Vec<u8>, sql: &str) {
    write_int_1(out, CommandByte::StmtPrepare as u8);
    out.extend_from_slice(sql.as_bytes());
}

/// Write COM_STMT_CLOSE command
pub fn write_close_statement(out: &mut Vec<u8>, statement_id: u32) {
    write_int_1(out, CommandByte::StmtClose as u8);
    write_int_4(out, statement_id);
}

/// Read COM_STMT_PREPARE OK response
pub fn read_prepare_ok(payload: &[u8]) -> Result<&PrepareOk> {
    let (status, data) = read_int_1(payload)?;
    if status != OK_HEADER {
        return Err(Error::UnexpectedPacket(status));
    }
    let (prepare_ok, _rest) = PrepareOk::ref_from_prefix(data).map_err(|_| Error::UnexpectedEof)?;
    Ok(prepare_ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_prepare_ok() {
        let payload = [
            0x00, // OK
            0x07, 0x00, 0x00, 0x00, // statement_id = 7
            0x02, 0x00, // num_columns = 2
            0x01, 0x00, // num_params = 1
            0x00, // reserved
            0x03, 0x00, // warnings = 3
        ];
        let ok = read_prepare_ok(&payload).unwrap();
        assert_eq!(ok.statement_id(), 7);
        assert_eq!(ok.num_columns(), 2);
        assert_eq!(ok.num_params(), 1);
        assert_eq!(ok.warning_count(), 3);
    }

    #[test]
    fn reject_short_prepare_ok() {
        assert!(matches!(
            read_prepare_ok(&[0x00, 0x01, 0x00]),
            Err(Error::UnexpectedEof)
        ));
        assert!(matches!(
            read_prepare_ok(&[0xFF, 0x01, 0x00]),
            Err(Error::UnexpectedPacket(0xFF))
        ));
    }

    #[test]
    fn write_statement_commands() {
        let mut out = Vec::new();
        write_prepare(&mut out, "SELECT ?");
        assert_eq!(out, b"\x16SELECT ?");

        out.clear();
        write_close_statement(&mut out, 0x0102_0304);
        assert_eq!(out, [0x19, 0x04, 0x03, 0x02, 0x01]);
    }
}
