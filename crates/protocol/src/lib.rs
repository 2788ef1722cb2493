//! OBEX protocol vocabulary consumed by the bluepush client.
//!
//! The wire codec (header serialization, packet framing) lives in the
//! transport layer; this crate carries only the negotiated semantics the
//! client needs: a typed [`HeaderSet`], the OBEX header identifiers, the
//! Single Response Mode constants, and [`ResponseCode`] classification.

pub mod header;
pub mod response;

pub use header::{HeaderSet, header_id, srm};
pub use response::ResponseCode;
