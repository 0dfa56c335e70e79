//! Generic nested key/value records.
//!
//! Stream headers and the container main header travel as records: an
//! ordered list of `(key, value)` fields where values are a tagged sum
//! type, so metadata never degrades into stringly-typed blobs. The wire
//! form is binary (v-coded lengths, little-endian floats); the serde
//! derives exist for JSON diagnostics only and are never parsed back
//! from disk.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::wire::{self, MAX_WIRE_LEN};

/// Nesting bound for record parsing; a corrupt length field must not be
/// able to recurse arbitrarily.
const MAX_DEPTH: u32 = 16;

/// Bound on fields per record and bytes per string/binary value.
const MAX_FIELDS: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bin(Vec<u8>),
    Rec(Record),
}

// Wire tags for Value variants.
const VT_INT: u8 = 0;
const VT_UINT: u8 = 1;
const VT_FLOAT: u8 = 2;
const VT_STR: u8 = 3;
const VT_BIN: u8 = 4;
const VT_REC: u8 = 5;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Insert or replace a field. Field order is preserved; a replaced
    /// field keeps its position.
    pub fn set(&mut self, key: &str, value: Value) {
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.fields.push((key.to_string(), value));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn get_uint(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_bin(&self, key: &str) -> Option<&[u8]> {
        match self.get(key)? {
            Value::Bin(b) => Some(b),
            _ => None,
        }
    }

    pub fn get_rec(&self, key: &str) -> Option<&Record> {
        match self.get(key)? {
            Value::Rec(r) => Some(r),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    // ── Wire form ────────────────────────────────────────────────────────────

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        wire::write_v(w, self.fields.len() as u64)?;
        for (key, value) in &self.fields {
            wire::write_v(w, key.len() as u64)?;
            w.write_all(key.as_bytes())?;
            write_value(w, value)?;
        }
        Ok(())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<Record> {
        read_record(r, 0)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out).expect("writing to a Vec cannot fail");
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Record> {
        let mut cursor = bytes;
        let rec = Record::read(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(Error::BadRecord {
                what: "record",
                detail: format!("{} trailing bytes", cursor.len()),
            });
        }
        Ok(rec)
    }

    /// JSON rendering for logs and tooling; not a wire format.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "<unrepresentable>".into())
    }
}

fn write_value<W: Write>(w: &mut W, value: &Value) -> Result<()> {
    match value {
        Value::Int(v) => {
            w.write_u8(VT_INT)?;
            wire::write_sv(w, *v)?;
        }
        Value::UInt(v) => {
            w.write_u8(VT_UINT)?;
            wire::write_v(w, *v)?;
        }
        Value::Float(v) => {
            w.write_u8(VT_FLOAT)?;
            w.write_f64::<LittleEndian>(*v)?;
        }
        Value::Str(s) => {
            w.write_u8(VT_STR)?;
            wire::write_v(w, s.len() as u64)?;
            w.write_all(s.as_bytes())?;
        }
        Value::Bin(b) => {
            w.write_u8(VT_BIN)?;
            wire::write_v(w, b.len() as u64)?;
            w.write_all(b)?;
        }
        Value::Rec(rec) => {
            w.write_u8(VT_REC)?;
            rec.write(w)?;
        }
    }
    Ok(())
}

fn read_record<R: Read>(r: &mut R, depth: u32) -> Result<Record> {
    if depth > MAX_DEPTH {
        return Err(Error::BadRecord {
            what: "record",
            detail: format!("nesting deeper than {MAX_DEPTH}"),
        });
    }
    let count = wire::read_v_bounded(r, MAX_FIELDS)?;
    let mut rec = Record::new();
    for _ in 0..count {
        let key_len = wire::read_v_bounded(r, MAX_WIRE_LEN)? as usize;
        let mut key = vec![0u8; key_len];
        r.read_exact(&mut key)?;
        let key = String::from_utf8(key).map_err(|e| Error::BadRecord {
            what: "record key",
            detail: e.to_string(),
        })?;
        let value = read_value(r, depth)?;
        rec.fields.push((key, value));
    }
    Ok(rec)
}

fn read_value<R: Read>(r: &mut R, depth: u32) -> Result<Value> {
    let tag = r.read_u8()?;
    Ok(match tag {
        VT_INT => Value::Int(wire::read_sv(r)?),
        VT_UINT => Value::UInt(wire::read_v(r)?),
        VT_FLOAT => Value::Float(r.read_f64::<LittleEndian>()?),
        VT_STR => {
            let len = wire::read_v_bounded(r, MAX_WIRE_LEN)? as usize;
            let mut bytes = vec![0u8; len];
            r.read_exact(&mut bytes)?;
            Value::Str(String::from_utf8(bytes).map_err(|e| Error::BadRecord {
                what: "string value",
                detail: e.to_string(),
            })?)
        }
        VT_BIN => {
            let len = wire::read_v_bounded(r, MAX_WIRE_LEN)? as usize;
            let mut bytes = vec![0u8; len];
            r.read_exact(&mut bytes)?;
            Value::Bin(bytes)
        }
        VT_REC => Value::Rec(read_record(r, depth + 1)?),
        other => {
            return Err(Error::BadRecord {
                what: "value",
                detail: format!("unknown type tag {other}"),
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        let mut nested = Record::new();
        nested.set("width", Value::UInt(1920));
        nested.set("height", Value::UInt(1080));

        let mut rec = Record::new();
        rec.set("type", Value::Str("video".into()));
        rec.set("id", Value::UInt(1));
        rec.set("offset", Value::Int(-42));
        rec.set("gain", Value::Float(0.5));
        rec.set("extradata", Value::Bin(vec![1, 2, 3]));
        rec.set("format", Value::Rec(nested));
        rec
    }

    #[test]
    fn wire_round_trip() {
        let rec = sample();
        let bytes = rec.to_bytes();
        assert_eq!(Record::from_bytes(&bytes).unwrap(), rec);
    }

    #[test]
    fn set_replaces_in_place() {
        let mut rec = Record::new();
        rec.set("a", Value::UInt(1));
        rec.set("b", Value::UInt(2));
        rec.set("a", Value::UInt(3));
        assert_eq!(rec.len(), 2);
        assert_eq!(rec.get_uint("a"), Some(3));
        assert_eq!(rec.iter().next().unwrap().0, "a");
    }

    #[test]
    fn unknown_value_tag_rejected() {
        let mut bytes = Vec::new();
        wire::write_v(&mut bytes, 1).unwrap(); // one field
        wire::write_v(&mut bytes, 1).unwrap(); // key length
        bytes.push(b'k');
        bytes.push(0xee); // bogus value tag
        assert!(matches!(
            Record::from_bytes(&bytes),
            Err(Error::BadRecord { .. })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = sample().to_bytes();
        bytes.push(0);
        assert!(Record::from_bytes(&bytes).is_err());
    }

    #[test]
    fn nesting_depth_bounded() {
        let mut rec = Record::new();
        for _ in 0..(MAX_DEPTH + 2) {
            let mut outer = Record::new();
            outer.set("r", Value::Rec(rec));
            rec = outer;
        }
        let bytes = rec.to_bytes();
        assert!(matches!(
            Record::from_bytes(&bytes),
            Err(Error::BadRecord { .. })
        ));
    }
}
