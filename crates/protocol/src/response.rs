//! OBEX response codes and their status classification.

use serde::{Deserialize, Serialize};

/// An OBEX response code with the final bit set, as read off the wire.
///
/// Values mirror HTTP status codes shifted into one byte (IrOBEX 1.3
/// §3.2.1). Only the codes object push reacts to get named constants;
/// anything else is carried through verbatim and mapped to an
/// "unhandled" outcome by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCode(pub u8);

impl ResponseCode {
    /// 100 Continue: packet accepted, more expected.
    pub const CONTINUE: ResponseCode = ResponseCode(0x90);
    /// 200 OK: operation complete.
    pub const SUCCESS: ResponseCode = ResponseCode(0xA0);
    /// 403 Forbidden: peer refused the object.
    pub const FORBIDDEN: ResponseCode = ResponseCode(0xC3);
    /// 406 Not Acceptable.
    pub const NOT_ACCEPTABLE: ResponseCode = ResponseCode(0xC6);
    /// 411 Length Required: some peers reject zero-length objects with this.
    pub const LENGTH_REQUIRED: ResponseCode = ResponseCode(0xCB);
    /// 415 Unsupported Media Type.
    pub const UNSUPPORTED_TYPE: ResponseCode = ResponseCode(0xCF);

    /// True for the two codes that let a PUT keep going or finish cleanly.
    pub fn is_success(self) -> bool {
        self == Self::CONTINUE || self == Self::SUCCESS
    }
}

impl std::fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::CONTINUE => write!(f, "CONTINUE"),
            Self::SUCCESS => write!(f, "SUCCESS"),
            Self::FORBIDDEN => write!(f, "FORBIDDEN"),
            Self::NOT_ACCEPTABLE => write!(f, "NOT_ACCEPTABLE"),
            Self::LENGTH_REQUIRED => write!(f, "LENGTH_REQUIRED"),
            Self::UNSUPPORTED_TYPE => write!(f, "UNSUPPORTED_TYPE"),
            ResponseCode(other) => write!(f, "0x{other:02X}"),
        }
    }
}
