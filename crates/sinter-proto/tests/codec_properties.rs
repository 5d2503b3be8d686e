//! Property-based tests for the schema codec.
//!
//! These verify the two round-trip laws for all inputs, not just examples:
//! a formatted map parses back to itself, and a parseable body is reproduced
//! byte for byte by `format(parse(body))`.

use proptest::prelude::*;
use sinter_proto::{FieldMap, Schema};

const SCHEMA: &str = r#"{
    "v1": {
        "opcodes": {"OP_INTS": 1, "OP_NAMES": 2, "OP_DIR": 3, "OP_TAIL": 4},
        "structs": {
            "dirent": {
                "fields": {
                    "ino": {"offset": 0, "size": 64},
                    "cookie": {"offset": 64, "size": 64},
                    "namelen": {"offset": 128, "size": 32},
                    "type": {"offset": 160, "size": 32},
                    "name": {"offset": null, "size": null, "cstringposition": 0}
                },
                "pad_to": 64
            }
        },
        "operations": {
            "OP_INTS": {"response": {
                "small": {"offset": 0, "size": 16},
                "wide": {"offset": 16, "size": 64},
                "delta": {"offset": 80, "size": 32, "signed": true}
            }},
            "OP_NAMES": {"response": {
                "oldname": {"cstringposition": 0},
                "newname": {"cstringposition": 1}
            }},
            "OP_DIR": {"response": {
                "data": {"struct": "dirent", "zero_or_more": true}
            }},
            "OP_TAIL": {"response": {
                "size": {"offset": 0, "size": 32},
                "data": {"offset": null, "size": null}
            }}
        }
    }
}"#;

fn schema() -> Schema {
    Schema::load_json(SCHEMA, "v1").expect("fixture schema should compile")
}

fn response(schema: &Schema, name: &str) -> std::sync::Arc<sinter_proto::MessageSchema> {
    let code = schema.opcode(name).expect("fixture opcode");
    match &schema.operation(code).expect("fixture operation").response {
        sinter_proto::Direction::Message(message) => std::sync::Arc::clone(message),
        other => unreachable!("fixture response should be a message, got {other:?}"),
    }
}

/// NUL-free name bytes.
fn arbitrary_name() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(1u8..=255, 0..24)
}

fn arbitrary_ints_map() -> impl Strategy<Value = FieldMap> {
    (any::<u16>(), any::<u64>(), any::<i32>()).prop_map(|(small, wide, delta)| {
        FieldMap::new().with("small", small).with("wide", wide).with("delta", delta)
    })
}

fn arbitrary_dirent() -> impl Strategy<Value = FieldMap> {
    (any::<u64>(), any::<u64>(), any::<u32>(), 0u32..16, arbitrary_name()).prop_map(
        |(ino, cookie, namelen, file_type, name)| {
            FieldMap::new()
                .with("ino", ino)
                .with("cookie", cookie)
                .with("namelen", namelen)
                .with("type", file_type)
                .with("name", name)
        },
    )
}

#[test]
fn prop_ints_format_parse_round_trip() {
    let schema = schema();
    let message = response(&schema, "OP_INTS");

    proptest!(|(map in arbitrary_ints_map())| {
        let body = message.format(&map).expect("should format");
        let parsed = message.parse(&body).expect("should parse");

        // PROPERTY: a fully populated map survives the round trip.
        prop_assert_eq!(&parsed, &map);

        // PROPERTY: parse then format reproduces the body byte for byte.
        prop_assert_eq!(message.format(&parsed).expect("should reformat"), body);
    });
}

#[test]
fn prop_cstring_pair_round_trip() {
    let schema = schema();
    let message = response(&schema, "OP_NAMES");

    proptest!(|(oldname in arbitrary_name(), newname in arbitrary_name())| {
        let map = FieldMap::new().with("oldname", oldname).with("newname", newname);

        let body = message.format(&map).expect("should format");
        let parsed = message.parse(&body).expect("should parse");

        prop_assert_eq!(&parsed, &map);
        prop_assert_eq!(message.format(&parsed).expect("should reformat"), body);
    });
}

#[test]
fn prop_dirent_list_round_trip() {
    let schema = schema();
    let message = response(&schema, "OP_DIR");

    proptest!(|(entries in prop::collection::vec(arbitrary_dirent(), 0..5))| {
        let map = FieldMap::new().with("data", entries);

        let body = message.format(&map).expect("should format");

        // PROPERTY: each padded record keeps the run 8-byte aligned.
        prop_assert_eq!(body.len() % 8, 0);

        let parsed = message.parse(&body).expect("should parse");
        prop_assert_eq!(&parsed, &map);
        prop_assert_eq!(message.format(&parsed).expect("should reformat"), body);
    });
}

#[test]
fn prop_trailing_blob_round_trip() {
    let schema = schema();
    let message = response(&schema, "OP_TAIL");

    proptest!(|(data in prop::collection::vec(any::<u8>(), 0..256))| {
        let map = FieldMap::new().with("size", data.len() as u32).with("data", data);

        let body = message.format(&map).expect("should format");
        let parsed = message.parse(&body).expect("should parse");

        prop_assert_eq!(&parsed, &map);
        prop_assert_eq!(message.format(&parsed).expect("should reformat"), body);
    });
}

#[test]
fn prop_missing_fields_normalize_to_zero() {
    let schema = schema();
    let message = response(&schema, "OP_INTS");

    // An empty map formats to an all-zero body whose parse is the zero map.
    let body = message.format(&FieldMap::new()).expect("should format");
    let parsed = message.parse(&body).expect("should parse");

    let zeroed =
        FieldMap::new().with("small", 0u32).with("wide", 0u64).with("delta", 0i32);
    assert_eq!(parsed, zeroed);
}
