//! Property types, values and their storage tokens
//!
//! Every stored value is a [`Token`]: either the canonical string form kept
//! inline, or the id of a blob holding the payload. Binary values and
//! strings longer than [`INLINE_LIMIT`] characters always become blobs.

use crate::blob::BlobRef;
use crate::error::{RepositoryError, RepositoryResult};
use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest string, in characters, stored inline
pub const INLINE_LIMIT: usize = 3072;

/// Declared type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PropertyType {
    String,
    Binary,
    Long,
    Double,
    Decimal,
    Date,
    Boolean,
    Name,
    Path,
    Reference,
    WeakReference,
    Uri,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Binary => "BINARY",
            Self::Long => "LONG",
            Self::Double => "DOUBLE",
            Self::Decimal => "DECIMAL",
            Self::Date => "DATE",
            Self::Boolean => "BOOLEAN",
            Self::Name => "NAME",
            Self::Path => "PATH",
            Self::Reference => "REFERENCE",
            Self::WeakReference => "WEAKREFERENCE",
            Self::Uri => "URI",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "STRING" => Self::String,
            "BINARY" => Self::Binary,
            "LONG" => Self::Long,
            "DOUBLE" => Self::Double,
            "DECIMAL" => Self::Decimal,
            "DATE" => Self::Date,
            "BOOLEAN" => Self::Boolean,
            "NAME" => Self::Name,
            "PATH" => Self::Path,
            "REFERENCE" => Self::Reference,
            "WEAKREFERENCE" => Self::WeakReference,
            "URI" => Self::Uri,
            other => {
                return Err(RepositoryError::value_format(format!(
                    "unknown property type: {}",
                    other
                )))
            }
        })
    }
}

/// Storage form of one value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Token {
    /// Canonical string form
    Inline(String),
    /// Id of a blob in the blob store
    Blob(String),
}

impl Token {
    pub fn blob_id(&self) -> Option<&str> {
        match self {
            Token::Blob(id) => Some(id),
            Token::Inline(_) => None,
        }
    }
}

/// Serialize a token list for the `property_value` column
pub fn tokens_to_json(tokens: &[Token]) -> RepositoryResult<String> {
    Ok(serde_json::to_string(tokens)?)
}

pub fn tokens_from_json(json: &str) -> RepositoryResult<Vec<Token>> {
    Ok(serde_json::from_str(json)?)
}

/// Exact decimal kept in normalized string form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Decimal(String);

impl Decimal {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Decimal {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RepositoryError::value_format(format!("not a decimal: {}", s));
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }
        let int_part = int_part.trim_start_matches('0');
        let frac_part = frac_part.trim_end_matches('0');
        let int_part = if int_part.is_empty() { "0" } else { int_part };
        let is_zero = int_part == "0" && frac_part.is_empty();

        let mut out = String::new();
        if negative && !is_zero {
            out.push('-');
        }
        out.push_str(int_part);
        if !frac_part.is_empty() {
            out.push('.');
            out.push_str(frac_part);
        }
        Ok(Self(out))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Binary payload: bytes supplied by a caller, or a stored blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binary {
    Bytes(Vec<u8>),
    Stored(BlobRef),
}

impl Binary {
    pub fn len(&self) -> u64 {
        match self {
            Binary::Bytes(b) => b.len() as u64,
            Binary::Stored(r) => r.size,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the whole payload
    pub fn to_vec(&self) -> RepositoryResult<Vec<u8>> {
        match self {
            Binary::Bytes(b) => Ok(b.clone()),
            Binary::Stored(r) => r.read(),
        }
    }
}

impl From<Vec<u8>> for Binary {
    fn from(bytes: Vec<u8>) -> Self {
        Binary::Bytes(bytes)
    }
}

/// A typed property value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Binary(Binary),
    Long(i64),
    Double(f64),
    Decimal(Decimal),
    Date(DateTime<FixedOffset>),
    Boolean(bool),
    Name(String),
    Path(String),
    Reference(String),
    WeakReference(String),
    Uri(String),
}

impl Value {
    pub fn property_type(&self) -> PropertyType {
        match self {
            Value::String(_) => PropertyType::String,
            Value::Binary(_) => PropertyType::Binary,
            Value::Long(_) => PropertyType::Long,
            Value::Double(_) => PropertyType::Double,
            Value::Decimal(_) => PropertyType::Decimal,
            Value::Date(_) => PropertyType::Date,
            Value::Boolean(_) => PropertyType::Boolean,
            Value::Name(_) => PropertyType::Name,
            Value::Path(_) => PropertyType::Path,
            Value::Reference(_) => PropertyType::Reference,
            Value::WeakReference(_) => PropertyType::WeakReference,
            Value::Uri(_) => PropertyType::Uri,
        }
    }

    /// Current time, truncated to what a date value keeps
    pub fn now() -> Value {
        let now = Utc::now();
        let truncated = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        Value::Date(truncated.fixed_offset())
    }

    /// Canonical string form; `None` for binary values
    pub fn canonical_string(&self) -> Option<String> {
        Some(match self {
            Value::Binary(_) => return None,
            Value::String(s)
            | Value::Name(s)
            | Value::Path(s)
            | Value::Reference(s)
            | Value::WeakReference(s)
            | Value::Uri(s) => s.clone(),
            Value::Long(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::Date(v) => format_date(v),
            Value::Boolean(v) => v.to_string(),
        })
    }

    /// Build a value of type `ty` from its canonical string form
    pub fn parse(ty: PropertyType, s: &str) -> RepositoryResult<Value> {
        let bad = |e: &dyn fmt::Display| {
            RepositoryError::value_format(format!("cannot convert {:?} to {}: {}", s, ty, e))
        };
        Ok(match ty {
            PropertyType::String => Value::String(s.to_string()),
            PropertyType::Binary => Value::Binary(Binary::Bytes(s.as_bytes().to_vec())),
            PropertyType::Long => Value::Long(s.trim().parse().map_err(|e| bad(&e))?),
            PropertyType::Double => Value::Double(s.trim().parse().map_err(|e| bad(&e))?),
            PropertyType::Decimal => Value::Decimal(s.parse()?),
            PropertyType::Date => Value::Date(parse_date(s)?),
            PropertyType::Boolean => Value::Boolean(s.trim().eq_ignore_ascii_case("true")),
            PropertyType::Name => Value::Name(s.to_string()),
            PropertyType::Path => Value::Path(s.to_string()),
            PropertyType::Reference => Value::Reference(s.to_string()),
            PropertyType::WeakReference => Value::WeakReference(s.to_string()),
            PropertyType::Uri => Value::Uri(s.to_string()),
        })
    }

    /// Convert to another property type
    ///
    /// Binary values only convert to STRING (decoded as UTF-8) and back.
    pub fn convert(self, ty: PropertyType) -> RepositoryResult<Value> {
        if self.property_type() == ty {
            return Ok(self);
        }
        match (&self, ty) {
            (Value::Binary(b), _) => {
                let bytes = b.to_vec()?;
                let s = String::from_utf8(bytes)
                    .map_err(|e| RepositoryError::value_format(e.to_string()))?;
                Value::parse(ty, &s)
            }
            (Value::Long(v), PropertyType::Date) => {
                let date = DateTime::from_timestamp_millis(*v).ok_or_else(|| {
                    RepositoryError::value_format(format!("timestamp out of range: {}", v))
                })?;
                Ok(Value::Date(date.fixed_offset()))
            }
            (Value::Date(d), PropertyType::Long) => Ok(Value::Long(d.timestamp_millis())),
            (Value::Date(d), PropertyType::Double) => Ok(Value::Double(d.timestamp_millis() as f64)),
            (Value::Boolean(_), PropertyType::Long | PropertyType::Double | PropertyType::Date) => {
                Err(RepositoryError::value_format(format!(
                    "cannot convert BOOLEAN to {}",
                    ty
                )))
            }
            _ => {
                let s = self.canonical_string().unwrap_or_default();
                Value::parse(ty, &s)
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s)
            | Value::Name(s)
            | Value::Path(s)
            | Value::Reference(s)
            | Value::WeakReference(s)
            | Value::Uri(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::Date(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(Binary::Bytes(v))
    }
}

/// RFC 3339 with millisecond precision
pub fn format_date(date: &DateTime<FixedOffset>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, false)
}

pub fn parse_date(s: &str) -> RepositoryResult<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map_err(|e| RepositoryError::value_format(format!("not a date: {:?}: {}", s, e)))
}

/// Whether a value must be spilled to the blob store
pub fn needs_blob(value: &Value) -> bool {
    match value {
        Value::Binary(_) => true,
        other => other
            .canonical_string()
            .map(|s| s.chars().count() > INLINE_LIMIT)
            .unwrap_or(false),
    }
}
