//! Fuzz target for wire header decoding
//!
//! Arbitrary bytes must never panic the zero-copy header parsers, and any
//! header that decodes must serialize back to its own prefix.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sinter_proto::{RequestHeader, ResponseHeader};

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = RequestHeader::from_prefix(data) {
        assert_eq!(&header.to_bytes()[..], &data[..RequestHeader::SIZE]);
    }
    if let Ok(header) = ResponseHeader::from_prefix(data) {
        assert_eq!(&header.to_bytes()[..], &data[..ResponseHeader::SIZE]);
    }
});
