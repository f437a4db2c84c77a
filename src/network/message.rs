use bytes::Bytes;

/// WebSocket frame opcodes as carried in [`Message::kind`].
///
/// Raw TCP messages always use [`STREAM`](opcode::STREAM).
pub mod opcode {
    pub const STREAM: i32 = 0;
    pub const TEXT: i32 = 1;
    pub const BINARY: i32 = 2;
    pub const CLOSE: i32 = 8;
    pub const PING: i32 = 9;
    pub const PONG: i32 = 10;
}

/// A single unit of traffic moving through a [`Connection`](super::Connection).
///
/// For TCP the payload is exactly what a single socket read returned; for WebSocket it is one
/// frame and `kind` holds the frame opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: i32,
    payload: Bytes,
}

impl Message {
    pub fn new(kind: i32, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> i32 {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
