//! # Data Model
//!
//! Core value types for the triple store: [`Identifier`], [`Key`], [`Value`],
//! [`Action`], and [`Write`].
//!
//! ## Design Invariants
//!
//! - A `Write` is immutable: `(record, key, value, version, action)`.
//! - `Value` carries a tagged scalar with a bit-exact wire encoding and a
//!   **canonical byte form** used for equality, hashing, and bloom composites.
//! - Canonicalization collapses lossless numeric equivalents: `18`,
//!   `18.0f32`, `18.0f64`, and text that round-trips through a numeric parse
//!   all share canonical bytes.
//! - `Value` ordering is total and consistent with canonical equality:
//!   numerics compare by magnitude across types, non-numerics by class rank
//!   then content.
//!
//! # Wire format (revision layout)
//!
//! ```text
//! [record i64][key_len u16][key utf8][type u8][value_len u32][value bytes][version i64][action u8]
//! ```
//!
//! All integers big-endian.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use thiserror::Error;

use crate::encoding::{self, Decode, Encode, EncodingError};

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

/// A record identifier: a 64-bit unsigned id naming a row-like container.
pub type Identifier = u64;

/// Maximum byte length of a [`Key`].
pub const MAX_KEY_LENGTH: usize = 2048;

/// Largest integer magnitude a 64-bit float represents exactly (2^53).
///
/// Floats at or below this magnitude with a zero fractional part
/// canonicalize to the integer form.
pub const MAX_DOUBLE_REPRESENTED_INTEGER: i64 = 1 << 53;

// Canonical-form class tags. These prefix canonical byte strings and double
// as the class rank for ordering non-numeric values.
const CANON_BOOL: u8 = 0x01;
const CANON_INT: u8 = 0x02;
const CANON_FLOAT: u8 = 0x03;
const CANON_TEXT: u8 = 0x04;
const CANON_LINK: u8 = 0x05;
const CANON_BLOB: u8 = 0x06;
const CANON_TIMESTAMP: u8 = 0x07;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors raised while constructing or decoding model types.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Keys must contain at least one character.
    #[error("key must not be empty")]
    EmptyKey,

    /// Key exceeds [`MAX_KEY_LENGTH`] bytes.
    #[error("key length {0} exceeds maximum of {MAX_KEY_LENGTH}")]
    KeyTooLong(usize),

    /// Keys may not contain an embedded NUL character.
    #[error("key contains an embedded NUL")]
    EmbeddedNul,

    /// Unknown value type code on the wire.
    #[error("invalid value type code {0}")]
    InvalidTypeCode(u8),

    /// Unknown action code on the wire.
    #[error("invalid action code {0}")]
    InvalidAction(u8),

    /// Value payload does not match its declared type.
    #[error("malformed value payload for {kind}: {reason}")]
    MalformedPayload {
        /// The declared value kind.
        kind: ValueKind,
        /// What went wrong.
        reason: String,
    },

    /// Underlying encoding failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

// ------------------------------------------------------------------------------------------------
// Key
// ------------------------------------------------------------------------------------------------

/// A field name: bounded UTF-8 text with no embedded NUL.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(String);

impl Key {
    /// Validates and wraps a key string.
    pub fn new(text: impl Into<String>) -> Result<Self, ModelError> {
        let text = text.into();
        if text.is_empty() {
            return Err(ModelError::EmptyKey);
        }
        if text.len() > MAX_KEY_LENGTH {
            return Err(ModelError::KeyTooLong(text.len()));
        }
        if text.contains('\0') {
            return Err(ModelError::EmbeddedNul);
        }
        Ok(Self(text))
    }

    /// The key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ------------------------------------------------------------------------------------------------
// Action
// ------------------------------------------------------------------------------------------------

/// Whether a revision asserts or retracts its triple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Assert the triple.
    Add,
    /// Retract the triple.
    Remove,
}

impl Action {
    /// Wire code for this action.
    pub fn code(self) -> u8 {
        match self {
            Self::Add => 1,
            Self::Remove => 2,
        }
    }

    /// Decode a wire code.
    pub fn from_code(code: u8) -> Result<Self, ModelError> {
        match code {
            1 => Ok(Self::Add),
            2 => Ok(Self::Remove),
            other => Err(ModelError::InvalidAction(other)),
        }
    }

    /// The action that undoes this one.
    pub fn inverse(self) -> Self {
        match self {
            Self::Add => Self::Remove,
            Self::Remove => Self::Add,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// ValueKind
// ------------------------------------------------------------------------------------------------

/// Discriminant of a [`Value`], with its wire type code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    /// Text that is **not** full-text indexed.
    Tag,
    /// A reference to another record.
    Link,
    Blob,
    /// Microseconds since the UNIX epoch.
    Timestamp,
}

impl ValueKind {
    /// Wire type code (1..=10).
    pub fn code(self) -> u8 {
        match self {
            Self::Bool => 1,
            Self::Int32 => 2,
            Self::Int64 => 3,
            Self::Float32 => 4,
            Self::Float64 => 5,
            Self::String => 6,
            Self::Tag => 7,
            Self::Link => 8,
            Self::Blob => 9,
            Self::Timestamp => 10,
        }
    }

    /// Decode a wire type code.
    pub fn from_code(code: u8) -> Result<Self, ModelError> {
        match code {
            1 => Ok(Self::Bool),
            2 => Ok(Self::Int32),
            3 => Ok(Self::Int64),
            4 => Ok(Self::Float32),
            5 => Ok(Self::Float64),
            6 => Ok(Self::String),
            7 => Ok(Self::Tag),
            8 => Ok(Self::Link),
            9 => Ok(Self::Blob),
            10 => Ok(Self::Timestamp),
            other => Err(ModelError::InvalidTypeCode(other)),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "BOOL",
            Self::Int32 => "INT32",
            Self::Int64 => "INT64",
            Self::Float32 => "FLOAT32",
            Self::Float64 => "FLOAT64",
            Self::String => "STRING",
            Self::Tag => "TAG",
            Self::Link => "LINK",
            Self::Blob => "BLOB",
            Self::Timestamp => "TIMESTAMP",
        };
        f.write_str(name)
    }
}

// ------------------------------------------------------------------------------------------------
// Value
// ------------------------------------------------------------------------------------------------

/// A tagged scalar stored against a `(record, key)` field.
///
/// Equality, hashing, and ordering all go through the canonical form, so a
/// `Value` is usable directly in `HashSet`s and sorted maps with
/// cross-numeric-type semantics.
#[derive(Clone, Debug)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Tag(String),
    Link(Identifier),
    Blob(Vec<u8>),
    Timestamp(i64),
}

/// Upper range sentinel for open-ended range queries.
pub const POSITIVE_INFINITY: Value = Value::Float64(f64::INFINITY);

/// Lower range sentinel for open-ended range queries.
pub const NEGATIVE_INFINITY: Value = Value::Float64(f64::NEG_INFINITY);

/// Canonical interpretation of a value, computed once per comparison or
/// byte-form request.
#[derive(Clone, Debug)]
enum Canonical<'a> {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(&'a str),
    Link(Identifier),
    Blob(&'a [u8]),
    Timestamp(i64),
}

impl Canonical<'_> {
    /// Class rank for cross-type ordering.  Int and Float share a rank:
    /// numerics are one class, ordered by magnitude.
    fn rank(&self) -> u8 {
        match self {
            Canonical::Bool(_) => CANON_BOOL,
            Canonical::Int(_) | Canonical::Float(_) => CANON_INT,
            Canonical::Text(_) => CANON_TEXT,
            Canonical::Link(_) => CANON_LINK,
            Canonical::Blob(_) => CANON_BLOB,
            Canonical::Timestamp(_) => CANON_TIMESTAMP,
        }
    }
}

/// Collapse a float to the canonical integer form when it represents an
/// integer exactly.
fn canonical_number(f: f64) -> Canonical<'static> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_DOUBLE_REPRESENTED_INTEGER as f64 {
        Canonical::Int(f as i64)
    } else {
        Canonical::Float(f)
    }
}

/// Parse text as a number iff the parse is lossless (the parsed number
/// formats back to the identical string).  `"18"` and `"18.5"` qualify;
/// `"018"`, `"18.0"`, and `"1e3"` do not.
fn parse_lossless_number(text: &str) -> Option<Canonical<'static>> {
    if let Ok(i) = text.parse::<i64>() {
        if i.to_string() == text {
            return Some(Canonical::Int(i));
        }
    }
    if let Ok(f) = text.parse::<f64>() {
        if f.is_finite() && f.to_string() == text {
            return Some(canonical_number(f));
        }
    }
    None
}

/// Compare an exact integer with a float, exactly.
///
/// Floats beyond the i64 range, infinities, and NaN sort outside all
/// integers, consistent with `f64::total_cmp`.
fn cmp_i64_f64(i: i64, f: f64) -> Ordering {
    if f.is_nan() {
        // Match total_cmp placement: -NaN below every number, +NaN above.
        return if f.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    // 2^63 as f64; any float at or above it exceeds every i64.
    const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;
    if f >= I64_UPPER {
        return Ordering::Less;
    }
    if f < -I64_UPPER {
        return Ordering::Greater;
    }
    let trunc = f.trunc();
    let fi = trunc as i64; // exact: |trunc| < 2^63 and trunc is integral
    match i.cmp(&fi) {
        Ordering::Equal => {
            let frac = f - trunc;
            if frac > 0.0 {
                Ordering::Less
            } else if frac < 0.0 {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        ord => ord,
    }
}

impl Value {
    /// The discriminant of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Bool(_) => ValueKind::Bool,
            Self::Int32(_) => ValueKind::Int32,
            Self::Int64(_) => ValueKind::Int64,
            Self::Float32(_) => ValueKind::Float32,
            Self::Float64(_) => ValueKind::Float64,
            Self::String(_) => ValueKind::String,
            Self::Tag(_) => ValueKind::Tag,
            Self::Link(_) => ValueKind::Link,
            Self::Blob(_) => ValueKind::Blob,
            Self::Timestamp(_) => ValueKind::Timestamp,
        }
    }

    /// True for the four numeric kinds.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Int32(_) | Self::Int64(_) | Self::Float32(_) | Self::Float64(_)
        )
    }

    /// The numeric magnitude of this value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int32(i) => Some(*i as f64),
            Self::Int64(i) => Some(*i as f64),
            Self::Float32(f) => Some(*f as f64),
            Self::Float64(f) => Some(*f),
            _ => None,
        }
    }

    /// The exact integer magnitude, if this value is an integer kind.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(i) => Some(*i as i64),
            Self::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Text content for STRING and TAG values.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Tag(s) => Some(s),
            _ => None,
        }
    }

    /// Canonical interpretation used by equality, hashing, and ordering.
    fn canonical(&self) -> Canonical<'_> {
        match self {
            Self::Bool(b) => Canonical::Bool(*b),
            Self::Int32(i) => Canonical::Int(*i as i64),
            Self::Int64(i) => Canonical::Int(*i),
            Self::Float32(f) => canonical_number(*f as f64),
            Self::Float64(f) => canonical_number(*f),
            Self::String(s) | Self::Tag(s) => match parse_lossless_number(s) {
                Some(numeric) => numeric,
                None => Canonical::Text(s),
            },
            Self::Link(id) => Canonical::Link(*id),
            Self::Blob(b) => Canonical::Blob(b),
            Self::Timestamp(t) => Canonical::Timestamp(*t),
        }
    }

    /// Canonical byte form: the composite key used for parity matching and
    /// bloom filters.  Lossless numeric equivalents collapse to one form.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self.canonical() {
            Canonical::Bool(b) => {
                out.push(CANON_BOOL);
                out.push(u8::from(b));
            }
            Canonical::Int(i) => {
                out.push(CANON_INT);
                out.extend_from_slice(&i.to_be_bytes());
            }
            Canonical::Float(f) => {
                out.push(CANON_FLOAT);
                out.extend_from_slice(&f.to_bits().to_be_bytes());
            }
            Canonical::Text(s) => {
                out.push(CANON_TEXT);
                out.extend_from_slice(s.as_bytes());
            }
            Canonical::Link(id) => {
                out.push(CANON_LINK);
                out.extend_from_slice(&id.to_be_bytes());
            }
            Canonical::Blob(b) => {
                out.push(CANON_BLOB);
                out.extend_from_slice(b);
            }
            Canonical::Timestamp(t) => {
                out.push(CANON_TIMESTAMP);
                out.extend_from_slice(&t.to_be_bytes());
            }
        }
        out
    }

    /// Total-order comparison consistent with canonical equality.
    pub fn compare(&self, other: &Self) -> Ordering {
        let a = self.canonical();
        let b = other.canonical();
        match a.rank().cmp(&b.rank()) {
            Ordering::Equal => {}
            ord => return ord,
        }
        match (a, b) {
            (Canonical::Bool(x), Canonical::Bool(y)) => x.cmp(&y),
            (Canonical::Int(x), Canonical::Int(y)) => x.cmp(&y),
            (Canonical::Float(x), Canonical::Float(y)) => x.total_cmp(&y),
            // A float that kept its float form cannot share canonical bytes
            // with an integer, so a numeric tie breaks by class to keep
            // equality aligned with the canonical form (ints beyond 2^53
            // can collide numerically with non-collapsed floats).
            (Canonical::Int(x), Canonical::Float(y)) => match cmp_i64_f64(x, y) {
                Ordering::Equal => Ordering::Less,
                ord => ord,
            },
            (Canonical::Float(x), Canonical::Int(y)) => match cmp_i64_f64(y, x) {
                Ordering::Equal => Ordering::Greater,
                ord => ord.reverse(),
            },
            (Canonical::Text(x), Canonical::Text(y)) => x.as_bytes().cmp(y.as_bytes()),
            (Canonical::Link(x), Canonical::Link(y)) => x.cmp(&y),
            (Canonical::Blob(x), Canonical::Blob(y)) => x.cmp(y),
            (Canonical::Timestamp(x), Canonical::Timestamp(y)) => x.cmp(&y),
            // Distinct classes are handled by the rank comparison above.
            _ => Ordering::Equal,
        }
    }

    /// Raw payload bytes for the wire format (no type code, no length).
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Self::Bool(b) => vec![u8::from(*b)],
            Self::Int32(i) => i.to_be_bytes().to_vec(),
            Self::Int64(i) => i.to_be_bytes().to_vec(),
            Self::Float32(f) => f.to_bits().to_be_bytes().to_vec(),
            Self::Float64(f) => f.to_bits().to_be_bytes().to_vec(),
            Self::String(s) | Self::Tag(s) => s.as_bytes().to_vec(),
            Self::Link(id) => id.to_be_bytes().to_vec(),
            Self::Blob(b) => b.clone(),
            Self::Timestamp(t) => t.to_be_bytes().to_vec(),
        }
    }

    /// Reconstruct a value from its wire kind and payload bytes.
    pub fn from_payload(kind: ValueKind, bytes: &[u8]) -> Result<Self, ModelError> {
        let fixed = |n: usize| -> Result<[u8; 8], ModelError> {
            if bytes.len() != n {
                return Err(ModelError::MalformedPayload {
                    kind,
                    reason: format!("expected {n} bytes, found {}", bytes.len()),
                });
            }
            let mut out = [0u8; 8];
            out[8 - n..].copy_from_slice(bytes);
            Ok(out)
        };
        match kind {
            ValueKind::Bool => match bytes {
                [0] => Ok(Self::Bool(false)),
                [1] => Ok(Self::Bool(true)),
                _ => Err(ModelError::MalformedPayload {
                    kind,
                    reason: "expected a single 0/1 byte".into(),
                }),
            },
            ValueKind::Int32 => {
                let raw = fixed(4)?;
                Ok(Self::Int32(i32::from_be_bytes([
                    raw[4], raw[5], raw[6], raw[7],
                ])))
            }
            ValueKind::Int64 => Ok(Self::Int64(i64::from_be_bytes(fixed(8)?))),
            ValueKind::Float32 => {
                let raw = fixed(4)?;
                Ok(Self::Float32(f32::from_bits(u32::from_be_bytes([
                    raw[4], raw[5], raw[6], raw[7],
                ]))))
            }
            ValueKind::Float64 => Ok(Self::Float64(f64::from_bits(u64::from_be_bytes(
                fixed(8)?,
            )))),
            ValueKind::String => Ok(Self::String(
                String::from_utf8(bytes.to_vec()).map_err(|e| ModelError::MalformedPayload {
                    kind,
                    reason: e.to_string(),
                })?,
            )),
            ValueKind::Tag => Ok(Self::Tag(String::from_utf8(bytes.to_vec()).map_err(
                |e| ModelError::MalformedPayload {
                    kind,
                    reason: e.to_string(),
                },
            )?)),
            ValueKind::Link => Ok(Self::Link(u64::from_be_bytes(fixed(8)?))),
            ValueKind::Blob => Ok(Self::Blob(bytes.to_vec())),
            ValueKind::Timestamp => Ok(Self::Timestamp(i64::from_be_bytes(fixed(8)?))),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_bytes().hash(state);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int32(i) => write!(f, "{i}"),
            Self::Int64(i) => write!(f, "{i}"),
            Self::Float32(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Tag(s) => write!(f, "{s}"),
            Self::Link(id) => write!(f, "@{id}"),
            Self::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            Self::Timestamp(t) => write!(f, "{t}µs"),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Write
// ------------------------------------------------------------------------------------------------

/// An immutable unit of change: assert or retract one triple at a version.
#[derive(Clone, Debug, PartialEq)]
pub struct Write {
    /// The record the triple belongs to.
    pub record: Identifier,

    /// The field name.
    pub key: Key,

    /// The asserted or retracted value.
    pub value: Value,

    /// Monotonic microsecond timestamp assigned by the engine clock.
    pub version: u64,

    /// ADD or REMOVE.
    pub action: Action,
}

impl Write {
    /// An ADD write.
    pub fn add(record: Identifier, key: Key, value: Value, version: u64) -> Self {
        Self {
            record,
            key,
            value,
            version,
            action: Action::Add,
        }
    }

    /// A REMOVE write.
    pub fn remove(record: Identifier, key: Key, value: Value, version: u64) -> Self {
        Self {
            record,
            key,
            value,
            version,
            action: Action::Remove,
        }
    }

    /// A copy of this write with the opposite action.
    pub fn inverted(&self, version: u64) -> Self {
        Self {
            record: self.record,
            key: self.key.clone(),
            value: self.value.clone(),
            version,
            action: self.action.inverse(),
        }
    }
}

impl Encode for Write {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        (self.record as i64).encode_to(buf)?;
        let key_bytes = self.key.as_str().as_bytes();
        let key_len = u16::try_from(key_bytes.len()).map_err(|_| {
            EncodingError::LengthOverflow(format!("key length {} exceeds u16", key_bytes.len()))
        })?;
        key_len.encode_to(buf)?;
        buf.extend_from_slice(key_bytes);
        self.value.kind().code().encode_to(buf)?;
        let payload = self.value.payload();
        payload.as_slice().encode_to(buf)?;
        (self.version as i64).encode_to(buf)?;
        self.action.code().encode_to(buf)?;
        Ok(())
    }
}

impl Decode for Write {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (record, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (key_len, n) = u16::decode_from(&buf[off..])?;
        off += n;
        let key_len = key_len as usize;
        if buf.len() < off + key_len {
            return Err(EncodingError::UnexpectedEof {
                needed: key_len,
                available: buf.len() - off,
            });
        }
        let key_text = std::str::from_utf8(&buf[off..off + key_len])
            .map_err(|e| EncodingError::Custom(format!("invalid key utf-8: {e}")))?
            .to_string();
        off += key_len;
        let (type_code, n) = u8::decode_from(&buf[off..])?;
        off += n;
        let (payload, n) = Vec::<u8>::decode_from(&buf[off..])?;
        off += n;
        let (version, n) = i64::decode_from(&buf[off..])?;
        off += n;
        let (action_code, n) = u8::decode_from(&buf[off..])?;
        off += n;

        let kind =
            ValueKind::from_code(type_code).map_err(|e| EncodingError::Custom(e.to_string()))?;
        let value = Value::from_payload(kind, &payload)
            .map_err(|e| EncodingError::Custom(e.to_string()))?;
        let key = Key::new(key_text).map_err(|e| EncodingError::Custom(e.to_string()))?;
        let action =
            Action::from_code(action_code).map_err(|e| EncodingError::Custom(e.to_string()))?;

        Ok((
            Self {
                record: record as u64,
                key,
                value,
                version: version as u64,
                action,
            },
            off,
        ))
    }
}

impl fmt::Display for Write {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.action {
            Action::Add => "ADD",
            Action::Remove => "REMOVE",
        };
        write!(
            f,
            "{verb} {} AS {} ({}) IN {} AT {}",
            self.key,
            self.value,
            self.value.kind(),
            self.record,
            self.version
        )
    }
}

/// Convenience: count-parity presence rule over an ordered revision history.
///
/// A triple is present iff the number of matching revisions is odd.
pub fn parity_present(matching_revision_count: usize) -> bool {
    matching_revision_count % 2 == 1
}
