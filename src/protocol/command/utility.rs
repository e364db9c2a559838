use crate::constant::CommandByte;
use crate::protocol::primitive::*;

/// Write a command byte followed by its raw arguments
pub fn write_command(out: &mut Vec<u8>, command: CommandByte, args: Option<&[u8]>) {
    write_int_1(out, command as u8);
    if let Some(args) = args {
        out.extend_from_slice(args);
    }
}

/// Write COM_QUIT command
pub fn write_quit(out: &mut Vec<u8>) {
    write_command(out, CommandByte::Quit, None);
}

/// Write COM_PING command
pub fn write_ping(out: &mut Vec<u8>) {
    write_command(out, CommandByte::Ping, None);
}

/// Write COM_INIT_DB command
pub fn write_init_db(out: &mut Vec<u8>, database: &str) {
    write_command(out, CommandByte::InitDb, Some(database.as_bytes()));
}

/// Write COM_RESET_CONNECTION command
pub fn write_reset_connection(out: &mut Vec<u8>) {
    write_command(out, CommandByte::ResetConnection, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_without_args() {
        let mut out = Vec::new();
        write_ping(&mut out);
        assert_eq!(out, [0x0e]);
    }

    #[test]
    fn command_with_args() {
        let mut out = Vec::new();
        write_init_db(&mut out, "test");
        assert_eq!(out, b"\x02test");

        out.clear();
        write_command(&mut out, CommandByte::Query, Some(b"SELECT 1"));
        assert_eq!(out, b"\x03SELECT 1");
    }
}
