//! Raw directory entry encoding.
//!
//! Readdir replies carry a run of `fuse_dirent` records. Filesystems that
//! build their reply bytes directly (pass-through style) use this helper
//! instead of going through the schema formatter.

use bytes::{BufMut, Bytes, BytesMut};

/// Encode one directory entry as raw `fuse_dirent` bytes.
///
/// `cookie` is the offset token the kernel hands back in a later readdir
/// request to resume the listing. `mode` is a full `st_mode` value; only its
/// file-type bits end up on the wire. The record is zero-padded to the
/// 8-byte dirent alignment, with at least one padding byte so the name is
/// always NUL-terminated on the wire.
#[must_use]
pub fn dirent(ino: u64, cookie: u64, name: &[u8], mode: u32) -> Bytes {
    let mut out = BytesMut::with_capacity(24 + name.len() + 8);
    out.put_u64_le(ino);
    out.put_u64_le(cookie);
    out.put_u32_le(name.len() as u32);
    out.put_u32_le(mode >> 12);
    out.put_slice(name);

    let missing = out.len().next_multiple_of(8) - out.len();
    out.put_bytes(0, if missing == 0 { 8 } else { missing });
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_wire_layout() {
        let entry = dirent(2, 1, b"hello", 0o100_644);

        assert_eq!(entry.len(), 32);
        assert_eq!(&entry[0..8], &2u64.to_le_bytes());
        assert_eq!(&entry[8..16], &1u64.to_le_bytes());
        assert_eq!(&entry[16..20], &5u32.to_le_bytes());
        assert_eq!(&entry[20..24], &8u32.to_le_bytes());
        assert_eq!(&entry[24..29], b"hello");
        assert_eq!(&entry[29..32], &[0, 0, 0]);
    }

    #[test]
    fn aligned_name_still_gets_terminator() {
        // 24 + 8 name bytes is already 8-aligned; a full padding word keeps
        // the name NUL-terminated.
        let entry = dirent(7, 3, b"eightchr", 0o040_755);
        assert_eq!(entry.len(), 40);
        assert_eq!(&entry[32..40], &[0; 8]);
    }
}
