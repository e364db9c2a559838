mod handshake;

pub use handshake::AuthSwitchRequest;
pub use handshake::Handshake;
pub use handshake::HandshakeConfig;
pub use handshake::HandshakeResponse;
pub use handshake::HandshakeResult;
pub use handshake::InitialHandshake;
pub use handshake::negotiate_capabilities;
pub use handshake::read_auth_switch_request;
pub use handshake::read_initial_handshake;
pub use handshake::scramble_native_password;
pub use handshake::write_handshake_response;
