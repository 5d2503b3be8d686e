//! Fixed wire headers with zero-copy parsing.
//!
//! Every kernel request starts with a 40-byte header and every reply with a
//! 16-byte one. All multi-byte integers are little endian on the wire
//! regardless of host endianness. Fields are stored as raw byte arrays to
//! avoid alignment issues; typed accessors decode on demand.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::HeaderError;

/// Request header prefixed to every kernel message (40 bytes, little endian).
///
/// Layout on the wire:
/// `len: u32 | opcode: u32 | unique: 8 bytes | nodeid: u64 | uid: u32 |
/// gid: u32 | pid: u32 | padding: u32`
///
/// The `unique` tag is opaque: it is echoed verbatim on the reply so the
/// kernel can pair frames, and never interpreted here.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct RequestHeader {
    len: [u8; 4],
    opcode: [u8; 4],
    unique: [u8; 8],
    nodeid: [u8; 8],
    uid: [u8; 4],
    gid: [u8; 4],
    pid: [u8; 4],
    _padding: [u8; 4],
}

impl RequestHeader {
    /// Size of the serialized request header (40 bytes).
    pub const SIZE: usize = 40;

    /// Build a header for a given opcode, unique tag and node id.
    ///
    /// The length field defaults to the bare header size; callers framing a
    /// body call [`Self::set_total_len`]. Caller credentials start at zero.
    #[must_use]
    pub fn new(opcode: u32, unique: [u8; 8], nodeid: u64) -> Self {
        Self {
            len: (Self::SIZE as u32).to_le_bytes(),
            opcode: opcode.to_le_bytes(),
            unique,
            nodeid: nodeid.to_le_bytes(),
            uid: [0; 4],
            gid: [0; 4],
            pid: [0; 4],
            _padding: [0; 4],
        }
    }

    /// Parse a header from the start of a received frame (zero-copy).
    ///
    /// # Errors
    ///
    /// - [`HeaderError::Truncated`] if fewer than 40 bytes are available
    /// - [`HeaderError::BadLength`] if the frame length field is smaller than
    ///   the header itself
    pub fn from_prefix(bytes: &[u8]) -> Result<&Self, HeaderError> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| HeaderError::Truncated { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if (header.total_len() as usize) < Self::SIZE {
            return Err(HeaderError::BadLength(header.total_len()));
        }

        Ok(header)
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Total frame length in bytes, header included.
    #[must_use]
    pub fn total_len(&self) -> u32 {
        u32::from_le_bytes(self.len)
    }

    /// Numeric opcode of the operation.
    #[must_use]
    pub fn opcode(&self) -> u32 {
        u32::from_le_bytes(self.opcode)
    }

    /// Kernel-issued request tag, echoed verbatim on the reply.
    #[must_use]
    pub fn unique(&self) -> [u8; 8] {
        self.unique
    }

    /// Target node id; 1 is the mount root.
    #[must_use]
    pub fn nodeid(&self) -> u64 {
        u64::from_le_bytes(self.nodeid)
    }

    /// Calling user id.
    #[must_use]
    pub fn uid(&self) -> u32 {
        u32::from_le_bytes(self.uid)
    }

    /// Calling group id.
    #[must_use]
    pub fn gid(&self) -> u32 {
        u32::from_le_bytes(self.gid)
    }

    /// Calling process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        u32::from_le_bytes(self.pid)
    }

    /// Set the total frame length (header plus body).
    pub fn set_total_len(&mut self, len: u32) {
        self.len = len.to_le_bytes();
    }

    /// Set the caller credentials.
    pub fn set_caller(&mut self, uid: u32, gid: u32, pid: u32) {
        self.uid = uid.to_le_bytes();
        self.gid = gid.to_le_bytes();
        self.pid = pid.to_le_bytes();
    }
}

impl std::fmt::Debug for RequestHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHeader")
            .field("len", &self.total_len())
            .field("opcode", &self.opcode())
            .field("unique", &u64::from_le_bytes(self.unique))
            .field("nodeid", &self.nodeid())
            .field("uid", &self.uid())
            .field("gid", &self.gid())
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

/// Response header prefixed to every reply frame (16 bytes, little endian).
///
/// Layout on the wire: `len: u32 | error: i32 | unique: 8 bytes`. The error
/// field is zero on success or the negated positive errno on failure.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct ResponseHeader {
    len: [u8; 4],
    error: [u8; 4],
    unique: [u8; 8],
}

impl ResponseHeader {
    /// Size of the serialized response header (16 bytes).
    pub const SIZE: usize = 16;

    /// Build a reply header.
    ///
    /// `errno` is the positive handler-side value (0 for success); the wire
    /// carries its negation. `unique` is echoed from the request.
    #[must_use]
    pub fn new(errno: i32, unique: [u8; 8], body_len: usize) -> Self {
        Self {
            len: ((Self::SIZE + body_len) as u32).to_le_bytes(),
            error: errno.wrapping_neg().to_le_bytes(),
            unique,
        }
    }

    /// Parse a reply header from the start of a frame (zero-copy).
    ///
    /// # Errors
    ///
    /// - [`HeaderError::Truncated`] if fewer than 16 bytes are available
    pub fn from_prefix(bytes: &[u8]) -> Result<&Self, HeaderError> {
        Ok(Self::ref_from_prefix(bytes)
            .map_err(|_| HeaderError::Truncated { expected: Self::SIZE, actual: bytes.len() })?
            .0)
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Total frame length in bytes, header included.
    #[must_use]
    pub fn total_len(&self) -> u32 {
        u32::from_le_bytes(self.len)
    }

    /// Wire error value: zero or a negated POSIX errno.
    #[must_use]
    pub fn error(&self) -> i32 {
        i32::from_le_bytes(self.error)
    }

    /// Echoed request tag.
    #[must_use]
    pub fn unique(&self) -> [u8; 8] {
        self.unique
    }
}

impl std::fmt::Debug for ResponseHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseHeader")
            .field("len", &self.total_len())
            .field("error", &self.error())
            .field("unique", &u64::from_le_bytes(self.unique))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_size() {
        assert_eq!(std::mem::size_of::<RequestHeader>(), RequestHeader::SIZE);
        assert_eq!(RequestHeader::SIZE, 40);
    }

    #[test]
    fn response_header_size() {
        assert_eq!(std::mem::size_of::<ResponseHeader>(), ResponseHeader::SIZE);
        assert_eq!(ResponseHeader::SIZE, 16);
    }

    #[test]
    fn request_header_round_trip() {
        let mut header = RequestHeader::new(26, 7u64.to_le_bytes(), 1);
        header.set_total_len(56);
        header.set_caller(1000, 1000, 4242);

        let bytes = header.to_bytes();
        let parsed = RequestHeader::from_prefix(&bytes).unwrap();

        assert_eq!(parsed.total_len(), 56);
        assert_eq!(parsed.opcode(), 26);
        assert_eq!(parsed.unique(), 7u64.to_le_bytes());
        assert_eq!(parsed.nodeid(), 1);
        assert_eq!(parsed.uid(), 1000);
        assert_eq!(parsed.gid(), 1000);
        assert_eq!(parsed.pid(), 4242);
    }

    #[test]
    fn request_header_decodes_little_endian() {
        let mut bytes = [0u8; 40];
        bytes[0..4].copy_from_slice(&[0x28, 0, 0, 0]); // len 40
        bytes[4..8].copy_from_slice(&[0x03, 0, 0, 0]); // opcode 3
        bytes[16..24].copy_from_slice(&[0x01, 0, 0, 0, 0, 0, 0, 0]); // nodeid 1

        let header = RequestHeader::from_prefix(&bytes).unwrap();
        assert_eq!(header.total_len(), 40);
        assert_eq!(header.opcode(), 3);
        assert_eq!(header.nodeid(), 1);
    }

    #[test]
    fn reject_short_request_header() {
        let bytes = [0u8; 24];
        assert_eq!(
            RequestHeader::from_prefix(&bytes),
            Err(HeaderError::Truncated { expected: 40, actual: 24 })
        );
    }

    #[test]
    fn reject_bad_frame_length() {
        let mut bytes = [0u8; 40];
        bytes[0..4].copy_from_slice(&16u32.to_le_bytes());
        assert_eq!(RequestHeader::from_prefix(&bytes), Err(HeaderError::BadLength(16)));
    }

    #[test]
    fn response_header_negates_errno() {
        let header = ResponseHeader::new(2, [9; 8], 0);
        let bytes = header.to_bytes();

        assert_eq!(bytes[0..4], 16u32.to_le_bytes());
        // -2 as LE i32
        assert_eq!(bytes[4..8], [0xfe, 0xff, 0xff, 0xff]);
        assert_eq!(bytes[8..16], [9; 8]);
    }

    #[test]
    fn response_header_success_is_zero() {
        let header = ResponseHeader::new(0, 1u64.to_le_bytes(), 104);
        assert_eq!(header.total_len(), 120);
        assert_eq!(header.error(), 0);
    }
}
