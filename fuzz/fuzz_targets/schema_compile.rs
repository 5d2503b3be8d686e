//! Fuzz target for schema document compilation
//!
//! Arbitrary text must never panic the document parser or the layout
//! validator; malformed documents are rejected with an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use sinter_proto::Schema;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = Schema::load_json(text, "v7.31");
    }
});
