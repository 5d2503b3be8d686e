//! Parsing and formatting message bodies against a compiled schema.
//!
//! Both directions are pure, stateless functions of the schema: `parse` walks
//! the flattened field list in wire order with a byte cursor, `format` emits
//! the same order from a field map. All integers are little endian; signed
//! fields are sign-extended explicitly after decode.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    errors::CodecError,
    schema::{Direction, FieldKind, MessageSchema},
    value::{FieldMap, Value},
};

impl MessageSchema {
    /// Parse a message body into a field map.
    ///
    /// # Errors
    ///
    /// - [`CodecError::ShortBody`] if the body ends inside a field
    /// - [`CodecError::BadCString`] if a C-string has no NUL terminator
    /// - [`CodecError::IncompleteParse`] if the body has bytes left over
    pub fn parse(&self, body: &[u8]) -> Result<FieldMap, CodecError> {
        let mut position = 0;
        let map = parse_struct(self, body, &mut position)?;
        if position != body.len() {
            return Err(CodecError::IncompleteParse { consumed: position, total: body.len() });
        }
        Ok(map)
    }

    /// Format a field map into a message body.
    ///
    /// Fields absent from the map are emitted as zero/empty of their declared
    /// kind; keys the schema does not know are ignored.
    ///
    /// # Errors
    ///
    /// - [`CodecError::FieldOverflow`] if an integer does not fit its width
    /// - [`CodecError::FieldSizeMismatch`] if bytes do not match a fixed size
    /// - [`CodecError::BadFieldType`] if a value has the wrong kind
    /// - [`CodecError::BadCString`] if a C-string value contains NUL
    pub fn format(&self, fields: &FieldMap) -> Result<Bytes, CodecError> {
        let mut out = BytesMut::new();
        format_struct(self, fields, &mut out)?;
        Ok(out.freeze())
    }
}

impl Direction {
    /// Parse a body for this direction of operation `name`.
    ///
    /// An absent direction accepts an empty body (header-only message) and
    /// yields an empty map.
    ///
    /// # Errors
    ///
    /// - [`CodecError::NotImplementedOp`] for the `-1` sentinel
    /// - [`CodecError::UnsupportedDirection`] for an absent direction with a
    ///   non-empty body
    /// - any parse error from [`MessageSchema::parse`]
    pub fn parse(&self, name: &str, body: &[u8]) -> Result<FieldMap, CodecError> {
        match self {
            Direction::Message(schema) => schema.parse(body),
            Direction::Absent if body.is_empty() => Ok(FieldMap::new()),
            Direction::Absent => Err(CodecError::UnsupportedDirection(name.to_string())),
            Direction::NotImplemented => Err(CodecError::NotImplementedOp(name.to_string())),
        }
    }

    /// Format a field map for this direction of operation `name`.
    ///
    /// # Errors
    ///
    /// - [`CodecError::NotImplementedOp`] for the `-1` sentinel
    /// - [`CodecError::UnsupportedDirection`] for an absent direction
    /// - any format error from [`MessageSchema::format`]
    pub fn format(&self, name: &str, fields: &FieldMap) -> Result<Bytes, CodecError> {
        match self {
            Direction::Message(schema) => schema.format(fields),
            Direction::Absent => Err(CodecError::UnsupportedDirection(name.to_string())),
            Direction::NotImplemented => Err(CodecError::NotImplementedOp(name.to_string())),
        }
    }
}

fn parse_struct(
    schema: &MessageSchema,
    body: &[u8],
    position: &mut usize,
) -> Result<FieldMap, CodecError> {
    let start = *position;
    let mut map = FieldMap::new();

    for field in &schema.fields {
        match &field.kind {
            FieldKind::Int { bytes, signed } => {
                let raw = take(body, position, *bytes, &field.name)?;
                map.insert(&field.name, Value::Int(decode_int(raw, *signed)));
            }
            FieldKind::Blob { bytes } => {
                let raw = take(body, position, *bytes, &field.name)?;
                map.insert(&field.name, Value::Bytes(Bytes::copy_from_slice(raw)));
            }
            FieldKind::Struct(sub) => {
                map.insert(&field.name, Value::Map(parse_struct(sub, body, position)?));
            }
            FieldKind::Repeated(sub) => {
                let mut items = Vec::new();
                while *position < body.len() {
                    items.push(parse_struct(sub, body, position)?);
                }
                map.insert(&field.name, Value::List(items));
            }
            FieldKind::CString => {
                let rest = &body[*position..];
                let nul = rest
                    .iter()
                    .position(|byte| *byte == 0)
                    .ok_or_else(|| CodecError::BadCString(field.name.clone()))?;
                map.insert(&field.name, Value::Bytes(Bytes::copy_from_slice(&rest[..nul])));
                *position += nul + 1;
            }
            FieldKind::Trailing => {
                map.insert(&field.name, Value::Bytes(Bytes::copy_from_slice(&body[*position..])));
                *position = body.len();
            }
        }
    }

    if schema.pad_to != 0 {
        let aligned = start + (*position - start).next_multiple_of(schema.pad_to);
        if aligned > body.len() {
            return Err(CodecError::ShortBody(format!("{} padding", schema.name())));
        }
        *position = aligned;
    }

    Ok(map)
}

fn take<'a>(
    body: &'a [u8],
    position: &mut usize,
    len: usize,
    field: &str,
) -> Result<&'a [u8], CodecError> {
    let end = *position + len;
    let raw = body.get(*position..end).ok_or_else(|| CodecError::ShortBody(field.to_string()))?;
    *position = end;
    Ok(raw)
}

/// Little-endian decode with explicit sign extension. `raw` is 1 to 8 bytes.
fn decode_int(raw: &[u8], signed: bool) -> i128 {
    let mut wide = [0u8; 8];
    wide[..raw.len()].copy_from_slice(raw);
    let value = u64::from_le_bytes(wide);

    if signed {
        let shift = 64 - raw.len() as u32 * 8;
        i128::from(((value << shift) as i64) >> shift)
    } else {
        i128::from(value)
    }
}

fn format_struct(
    schema: &MessageSchema,
    fields: &FieldMap,
    out: &mut BytesMut,
) -> Result<(), CodecError> {
    let start = out.len();

    for field in &schema.fields {
        let value = fields.get(&field.name);
        match (&field.kind, value) {
            (FieldKind::Int { bytes, .. }, None) => out.put_bytes(0, *bytes),
            (FieldKind::Int { bytes, signed }, Some(Value::Int(value))) => {
                encode_int(out, *value, *bytes, *signed, &field.name)?;
            }
            // A byte value of exactly the declared width passes through, so
            // handlers can hand over pre-encoded fields like opaque tags.
            (FieldKind::Int { bytes, .. }, Some(Value::Bytes(raw))) => {
                put_exact(out, raw, *bytes, &field.name)?;
            }

            (FieldKind::Blob { bytes }, None) => out.put_bytes(0, *bytes),
            (FieldKind::Blob { bytes }, Some(Value::Bytes(raw))) => {
                put_exact(out, raw, *bytes, &field.name)?;
            }

            (FieldKind::Struct(sub), None) => format_struct(sub, &FieldMap::new(), out)?,
            (FieldKind::Struct(sub), Some(Value::Map(nested))) => {
                format_struct(sub, nested, out)?;
            }

            (FieldKind::Repeated(_), None) => {}
            (FieldKind::Repeated(sub), Some(Value::List(items))) => {
                for item in items {
                    format_struct(sub, item, out)?;
                }
            }

            (FieldKind::CString, None) => out.put_u8(0),
            (FieldKind::CString, Some(Value::Bytes(raw))) => {
                match raw.iter().position(|byte| *byte == 0) {
                    None => {
                        out.put_slice(raw);
                        out.put_u8(0);
                    }
                    // Already terminated; emit verbatim.
                    Some(nul) if nul == raw.len() - 1 => out.put_slice(raw),
                    Some(_) => return Err(CodecError::BadCString(field.name.clone())),
                }
            }
            (FieldKind::CString, Some(Value::Text(text))) => {
                if text.bytes().any(|byte| byte == 0) {
                    return Err(CodecError::BadCString(field.name.clone()));
                }
                out.put_slice(text.as_bytes());
                out.put_u8(0);
            }

            (FieldKind::Trailing, None) => {}
            (FieldKind::Trailing, Some(Value::Bytes(raw))) => out.put_slice(raw),

            (_, Some(other)) => {
                return Err(CodecError::BadFieldType {
                    field: field.name.clone(),
                    kind: other.kind(),
                });
            }
        }
    }

    if schema.pad_to != 0 {
        let emitted = out.len() - start;
        out.put_bytes(0, emitted.next_multiple_of(schema.pad_to) - emitted);
    }

    Ok(())
}

fn put_exact(
    out: &mut BytesMut,
    raw: &[u8],
    expected: usize,
    field: &str,
) -> Result<(), CodecError> {
    if raw.len() != expected {
        return Err(CodecError::FieldSizeMismatch {
            field: field.to_string(),
            expected,
            actual: raw.len(),
        });
    }
    out.put_slice(raw);
    Ok(())
}

fn encode_int(
    out: &mut BytesMut,
    value: i128,
    bytes: usize,
    signed: bool,
    field: &str,
) -> Result<(), CodecError> {
    let bits = bytes as u32 * 8;
    let (min, max) = if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    };
    if value < min || value > max {
        return Err(CodecError::FieldOverflow { field: field.to_string(), bits: bits as usize });
    }

    // Truncation to the low 64 bits keeps the two's-complement encoding.
    let raw = (value as u64).to_le_bytes();
    out.put_slice(&raw[..bytes]);
    Ok(())
}
