//! Canonical Manifest Serialization
//!
//! The signer serializes `{"files": ..., "version": ...}` with sorted keys,
//! `", "` / `": "` separators and ASCII-only output. Verification must
//! reproduce those bytes exactly, so the `files` value is taken verbatim
//! from the fetched document rather than from the typed manifest.

use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Map, Value};
use std::io;

/// Formatter producing the signer's JSON layout
struct SignerFormatter;

impl Formatter for SignerFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        // Printable ASCII passes through; everything else becomes \uXXXX
        let mut units = [0u16; 2];
        for ch in fragment.chars() {
            if (' '..='~').contains(&ch) {
                let mut buf = [0u8; 1];
                writer.write_all(ch.encode_utf8(&mut buf).as_bytes())?;
            } else {
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Rebuild a value with object keys in sorted order
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (key, val) in entries {
                out.insert(key.clone(), sorted(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

/// Serialize any JSON value in canonical form
pub fn to_canonical_bytes(value: &Value) -> serde_json::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, SignerFormatter);
    sorted(value).serialize(&mut serializer)?;
    Ok(out)
}

/// Canonical bytes of the signed part of a manifest document
pub fn signed_payload(version: &Value, files: &Value) -> serde_json::Result<Vec<u8>> {
    let mut payload = Map::new();
    payload.insert("version".to_string(), version.clone());
    payload.insert("files".to_string(), files.clone());
    to_canonical_bytes(&Value::Object(payload))
}
