//! Typed OBEX header set and header identifier constants.

/// OBEX header identifiers (IrOBEX 1.3 §2.2) used by object push.
pub mod header_id {
    /// Object name, unicode string.
    pub const NAME: u8 = 0x01;
    /// Object mime type, byte sequence.
    pub const TYPE: u8 = 0x42;
    /// Object length in bytes, 4-byte quantity.
    pub const LENGTH: u8 = 0xC3;
    /// Number of objects in this connection, 4-byte quantity.
    pub const COUNT: u8 = 0xC0;
    /// Single Response Mode, 1-byte quantity.
    pub const SINGLE_RESPONSE_MODE: u8 = 0x97;
    /// Single Response Mode parameter, 1-byte quantity.
    pub const SINGLE_RESPONSE_MODE_PARAMETER: u8 = 0x98;
}

/// Single Response Mode header values.
pub mod srm {
    /// Request or confirm SRM for the current operation.
    pub const ENABLE: u8 = 0x01;
    /// SRMP value asking the sender to wait for one response before
    /// continuing.
    pub const PARAM_WAIT: u8 = 0x01;
}

/// A set of OBEX headers attached to a request or carried in a reply.
///
/// Only the headers object push actually exchanges are modeled. Unset
/// headers are omitted on the wire by the transport's codec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderSet {
    name: Option<String>,
    mime_type: Option<String>,
    length: Option<u64>,
    count: Option<u32>,
    srm: Option<u8>,
    srm_param: Option<u8>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_mime_type(&mut self, mime: impl Into<String>) {
        self.mime_type = Some(mime.into());
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn set_length(&mut self, length: u64) {
        self.length = Some(length);
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn set_count(&mut self, count: u32) {
        self.count = Some(count);
    }

    pub fn count(&self) -> Option<u32> {
        self.count
    }

    pub fn set_single_response_mode(&mut self, value: u8) {
        self.srm = Some(value);
    }

    pub fn single_response_mode(&self) -> Option<u8> {
        self.srm
    }

    pub fn set_srm_parameter(&mut self, value: u8) {
        self.srm_param = Some(value);
    }

    pub fn srm_parameter(&self) -> Option<u8> {
        self.srm_param
    }

    /// True if this header set confirms SRM for the operation.
    pub fn srm_enabled(&self) -> bool {
        self.srm == Some(srm::ENABLE)
    }

    /// True if the peer asked the sender to wait via SRMP.
    pub fn srm_wait_requested(&self) -> bool {
        self.srm_param == Some(srm::PARAM_WAIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_set_starts_empty() {
        let hs = HeaderSet::new();
        assert!(hs.name().is_none());
        assert!(hs.mime_type().is_none());
        assert!(hs.length().is_none());
        assert!(hs.count().is_none());
        assert!(!hs.srm_enabled());
        assert!(!hs.srm_wait_requested());
    }

    #[test]
    fn header_set_round_trip() {
        let mut hs = HeaderSet::new();
        hs.set_name("photo.jpg");
        hs.set_mime_type("image/jpeg");
        hs.set_length(12345);
        hs.set_count(3);
        assert_eq!(hs.name(), Some("photo.jpg"));
        assert_eq!(hs.mime_type(), Some("image/jpeg"));
        assert_eq!(hs.length(), Some(12345));
        assert_eq!(hs.count(), Some(3));
    }

    #[test]
    fn srm_flags() {
        let mut hs = HeaderSet::new();
        hs.set_single_response_mode(srm::ENABLE);
        assert!(hs.srm_enabled());
        assert!(!hs.srm_wait_requested());

        hs.set_srm_parameter(srm::PARAM_WAIT);
        assert!(hs.srm_wait_requested());

        // Any other value is not "enabled".
        hs.set_single_response_mode(0x00);
        assert!(!hs.srm_enabled());
    }

    #[test]
    fn overwriting_name_keeps_last() {
        let mut hs = HeaderSet::new();
        hs.set_name("a.b.jpg");
        hs.set_name("a_b.jpg");
        assert_eq!(hs.name(), Some("a_b.jpg"));
    }
}
