//! Register codec
//!
//! Converts between raw 16-bit register words and typed [`Value`]s according
//! to a field's [`FieldKind`]. Multi-word quantities are big-endian: the
//! first word holds the most significant half.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{AirlinkError, Result};
use crate::profile::RegisterField;

/// Marker for "no value" in 32-bit date and timestamp registers
pub const UNSET_U32: u32 = 0xFFFF_FFFF;

/// One entry of an enum table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumEntry {
    pub value: u16,
    pub label: String,
}

/// One named bit (or bit group) of a flags field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagEntry {
    pub mask: u16,
    pub label: String,
}

/// Wire representation of a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    U16,
    I16,
    U32,
    /// IEEE-754 single precision over two words
    F32,
    /// ASCII text packed two characters per word, padded with 0x00
    Text { words: u16 },
    /// Day and month in the first word, year in the second
    Date,
    /// Seconds since the UNIX epoch
    DateTime,
    Enum { values: Vec<EnumEntry> },
    Flags { flags: Vec<FlagEntry> },
}

impl FieldKind {
    /// Number of consecutive registers the field occupies
    pub fn word_count(&self) -> u16 {
        match self {
            Self::U16 | Self::I16 | Self::Enum { .. } | Self::Flags { .. } => 1,
            Self::U32 | Self::F32 | Self::Date | Self::DateTime => 2,
            Self::Text { words } => *words,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::F32 => "f32",
            Self::Text { .. } => "text",
            Self::Date => "date",
            Self::DateTime => "datetime",
            Self::Enum { .. } => "enum",
            Self::Flags { .. } => "flags",
        }
    }

    /// Native range of the raw integer, for integer kinds
    fn raw_range(&self) -> Option<(i64, i64)> {
        match self {
            Self::U16 => Some((0, i64::from(u16::MAX))),
            Self::I16 => Some((i64::from(i16::MIN), i64::from(i16::MAX))),
            Self::U32 => Some((0, i64::from(u32::MAX))),
            _ => None,
        }
    }

    /// Labels of all flags set in `bits`
    pub fn flag_labels(&self, bits: u16) -> Vec<&str> {
        match self {
            Self::Flags { flags } => flags
                .iter()
                .filter(|f| f.mask != 0 && bits & f.mask == f.mask)
                .map(|f| f.label.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// An enum reading; `label` is `None` for codes the table does not know
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub raw: u16,
    pub label: Option<String>,
}

impl EnumValue {
    pub fn is_unknown(&self) -> bool {
        self.label.is_none()
    }
}

/// A decoded register value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Enum(EnumValue),
    Flags(u16),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    /// Date or timestamp register holding the "not set" marker
    Unset,
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Enum(_) => "enum",
            Self::Flags(_) => "flags",
            Self::Date(_) => "date",
            Self::DateTime(_) => "datetime",
            Self::Unset => "unset",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Enum(e) => Some(i64::from(e.raw)),
            Self::Flags(bits) => Some(i64::from(*bits)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumValue> {
        match self {
            Self::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// Date value, `Some(None)` when the register is unset
    pub fn as_date(&self) -> Option<Option<NaiveDate>> {
        match self {
            Self::Date(d) => Some(Some(*d)),
            Self::Unset => Some(None),
            _ => None,
        }
    }

    /// Timestamp value, `Some(None)` when the register is unset
    pub fn as_datetime(&self) -> Option<Option<DateTime<Utc>>> {
        match self {
            Self::DateTime(t) => Some(Some(*t)),
            Self::Unset => Some(None),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Enum(EnumValue {
                raw,
                label: Some(label),
            }) => write!(f, "{label} ({raw})"),
            Self::Enum(EnumValue { raw, label: None }) => write!(f, "unknown ({raw})"),
            Self::Flags(bits) => write!(f, "0x{bits:04X}"),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTime(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Unset => write!(f, "unset"),
        }
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode the words of `field` into a value
///
/// Fails only when `words` has the wrong length for the field.
pub fn decode(field: &RegisterField, words: &[u16]) -> Result<Value> {
    let expected = field.kind.word_count() as usize;
    if words.len() != expected {
        return Err(AirlinkError::decode(format!(
            "{} needs {} words, got {}",
            field.name,
            expected,
            words.len()
        )));
    }

    let value = match &field.kind {
        FieldKind::U16 => scaled(field, i64::from(words[0])),
        FieldKind::I16 => scaled(field, i64::from(words[0] as i16)),
        FieldKind::U32 => scaled(field, i64::from(join_u32(words))),
        FieldKind::F32 => Value::Float(f64::from(f32::from_bits(join_u32(words)))),
        FieldKind::Text { .. } => Value::Text(decode_text(words)),
        FieldKind::Date => decode_date(words),
        FieldKind::DateTime => match join_u32(words) {
            UNSET_U32 => Value::Unset,
            ts => Utc
                .timestamp_opt(i64::from(ts), 0)
                .single()
                .map_or(Value::Unset, Value::DateTime),
        },
        FieldKind::Enum { values } => Value::Enum(EnumValue {
            raw: words[0],
            label: values
                .iter()
                .find(|e| e.value == words[0])
                .map(|e| e.label.clone()),
        }),
        FieldKind::Flags { .. } => Value::Flags(words[0]),
    };
    Ok(value)
}

fn scaled(field: &RegisterField, raw: i64) -> Value {
    match field.scale.map(divisor) {
        Some(divisor) => Value::Float(raw as f64 / divisor),
        None => Value::Int(raw),
    }
}

/// Divisor equivalent to a multiplier `scale`
///
/// `0.1` becomes exactly `10.0`, so `raw / divisor` is the nearest double to
/// the decimal the device means and encoding the result gives `raw` back.
fn divisor(scale: f64) -> f64 {
    let divisor = 1.0 / scale;
    if (divisor - divisor.round()).abs() < 1e-9 {
        divisor.round()
    } else {
        divisor
    }
}

fn join_u32(words: &[u16]) -> u32 {
    (u32::from(words[0]) << 16) | u32::from(words[1])
}

fn split_u32(value: u32) -> Vec<u16> {
    vec![(value >> 16) as u16, value as u16]
}

fn decode_text(words: &[u16]) -> String {
    let mut bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn decode_date(words: &[u16]) -> Value {
    if words[0] == 0xFFFF && words[1] == 0xFFFF {
        return Value::Unset;
    }
    let day = u32::from(words[0] >> 8);
    let month = u32::from(words[0] & 0xFF);
    NaiveDate::from_ymd_opt(i32::from(words[1]), month, day).map_or(Value::Unset, Value::Date)
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode `value` into the words of `field`
///
/// Values outside the field's declared or native range fail with
/// [`AirlinkError::InvalidValue`].
pub fn encode(field: &RegisterField, value: &Value) -> Result<Vec<u16>> {
    let invalid = |reason: String| AirlinkError::invalid_value(field.name.clone(), reason);

    match &field.kind {
        FieldKind::U16 | FieldKind::I16 | FieldKind::U32 => {
            let raw = integer_raw(field, value).map_err(invalid)?;
            Ok(match field.kind {
                FieldKind::U32 => split_u32(raw as u32),
                _ => vec![raw as u16],
            })
        },
        FieldKind::F32 => {
            let v = value
                .as_f64()
                .ok_or_else(|| invalid(format!("expected a number, got {}", value.kind_name())))?;
            if !v.is_finite() {
                return Err(invalid(format!("{v} is not a finite number")));
            }
            check_bounds(field, v).map_err(invalid)?;
            Ok(split_u32((v as f32).to_bits()))
        },
        FieldKind::Text { words } => {
            let text = value
                .as_str()
                .ok_or_else(|| invalid(format!("expected text, got {}", value.kind_name())))?;
            if !text.is_ascii() {
                return Err(invalid("text must be ASCII".to_string()));
            }
            let capacity = *words as usize * 2;
            if text.len() > capacity {
                return Err(invalid(format!(
                    "text is {} bytes, field holds {}",
                    text.len(),
                    capacity
                )));
            }
            let mut bytes = text.as_bytes().to_vec();
            bytes.resize(capacity, 0);
            Ok(bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect())
        },
        FieldKind::Date => match value {
            Value::Unset => Ok(vec![0xFFFF, 0xFFFF]),
            Value::Date(date) => {
                let year = u16::try_from(date.year())
                    .map_err(|_| invalid(format!("year {} out of range", date.year())))?;
                Ok(vec![((date.day() as u16) << 8) | date.month() as u16, year])
            },
            other => Err(invalid(format!("expected a date, got {}", other.kind_name()))),
        },
        FieldKind::DateTime => match value {
            Value::Unset => Ok(split_u32(UNSET_U32)),
            Value::DateTime(ts) => {
                let secs = ts.timestamp();
                if !(0..i64::from(UNSET_U32)).contains(&secs) {
                    return Err(invalid(format!("timestamp {secs} out of range")));
                }
                Ok(split_u32(secs as u32))
            },
            other => Err(invalid(format!(
                "expected a timestamp, got {}",
                other.kind_name()
            ))),
        },
        FieldKind::Enum { values } => {
            let entry = match value {
                Value::Enum(e) => values.iter().find(|entry| entry.value == e.raw),
                Value::Int(raw) => values.iter().find(|entry| i64::from(entry.value) == *raw),
                Value::Text(label) => values
                    .iter()
                    .find(|entry| entry.label.eq_ignore_ascii_case(label)),
                other => {
                    return Err(invalid(format!(
                        "expected an enum value, got {}",
                        other.kind_name()
                    )))
                },
            };
            entry
                .map(|entry| vec![entry.value])
                .ok_or_else(|| invalid(format!("{value} is not a member of the enum")))
        },
        FieldKind::Flags { flags } => {
            let bits = match value {
                Value::Flags(bits) => i64::from(*bits),
                Value::Int(bits) => *bits,
                other => {
                    return Err(invalid(format!(
                        "expected flags, got {}",
                        other.kind_name()
                    )))
                },
            };
            let known = flags.iter().fold(0u16, |acc, f| acc | f.mask);
            match u16::try_from(bits) {
                Ok(bits) if bits & !known == 0 => Ok(vec![bits]),
                _ => Err(invalid(format!("0x{bits:X} sets undeclared bits"))),
            }
        },
    }
}

fn integer_raw(field: &RegisterField, value: &Value) -> std::result::Result<i64, String> {
    let (lo, hi) = field.kind.raw_range().unwrap_or((0, 0));

    let raw = match (field.scale.map(divisor), value) {
        (Some(divisor), _) => {
            let v = value
                .as_f64()
                .ok_or_else(|| format!("expected a number, got {}", value.kind_name()))?;
            check_bounds(field, v)?;
            (v * divisor).round()
        },
        (None, Value::Int(v)) => {
            check_bounds(field, *v as f64)?;
            *v as f64
        },
        (None, Value::Float(v)) if v.fract() == 0.0 => {
            check_bounds(field, *v)?;
            *v
        },
        (None, other) => {
            return Err(format!("expected an integer, got {}", other.kind_name()));
        },
    };

    if !raw.is_finite() || raw < lo as f64 || raw > hi as f64 {
        return Err(format!(
            "raw value {raw} outside {} range {lo}..={hi}",
            field.kind.name()
        ));
    }
    Ok(raw as i64)
}

fn check_bounds(field: &RegisterField, v: f64) -> std::result::Result<(), String> {
    if let Some(min) = field.min {
        if v < min {
            return Err(format!("{v} is below the minimum {min}"));
        }
    }
    if let Some(max) = field.max {
        if v > max {
            return Err(format!("{v} is above the maximum {max}"));
        }
    }
    Ok(())
}

/// Parse user input (for example a command-line argument) into a value for `field`
pub fn parse_value(field: &RegisterField, input: &str) -> Result<Value> {
    let invalid = |reason: &str| AirlinkError::invalid_value(field.name.clone(), reason);
    let input = input.trim();

    match &field.kind {
        FieldKind::U16 | FieldKind::I16 | FieldKind::U32 if field.scale.is_none() => {
            parse_int(input).map(Value::Int).ok_or_else(|| invalid("expected an integer"))
        },
        FieldKind::U16 | FieldKind::I16 | FieldKind::U32 | FieldKind::F32 => input
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| invalid("expected a number")),
        FieldKind::Text { .. } => Ok(Value::Text(input.to_string())),
        FieldKind::Date if input.eq_ignore_ascii_case("unset") => Ok(Value::Unset),
        FieldKind::Date => NaiveDate::parse_from_str(input, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|_| invalid("expected YYYY-MM-DD")),
        FieldKind::DateTime if input.eq_ignore_ascii_case("unset") => Ok(Value::Unset),
        FieldKind::DateTime => DateTime::parse_from_rfc3339(input)
            .map(|t| Value::DateTime(t.with_timezone(&Utc)))
            .or_else(|_| {
                input
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                    .map(Value::DateTime)
                    .ok_or(())
            })
            .map_err(|_| invalid("expected an RFC 3339 timestamp or UNIX seconds")),
        FieldKind::Enum { .. } => Ok(parse_int(input)
            .map(Value::Int)
            .unwrap_or_else(|| Value::Text(input.to_string()))),
        FieldKind::Flags { flags } => {
            if let Some(bits) = parse_int(input) {
                return Ok(Value::Int(bits));
            }
            let mut bits = 0u16;
            for name in input.split('|').map(str::trim) {
                let flag = flags
                    .iter()
                    .find(|f| f.label.eq_ignore_ascii_case(name))
                    .ok_or_else(|| invalid("unknown flag name"))?;
                bits |= flag.mask;
            }
            Ok(Value::Flags(bits))
        },
    }
}

fn parse_int(input: &str) -> Option<i64> {
    match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => input.parse().ok(),
    }
}

// ============================================================================
// Value status
// ============================================================================

/// Where the bridge got a value from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueSource {
    Unknown,
    Rf,
    Modbus,
}

/// Status word the bridge keeps next to each data register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueStatus {
    /// Time since the bridge last refreshed the value
    pub age: Duration,
    pub source: ValueSource,
    pub flags: u8,
}

impl ValueStatus {
    pub const VALID: u8 = 0x01;
    pub const ERROR: u8 = 0x02;
    pub const READ_PENDING: u8 = 0x04;
    pub const WRITE_PENDING: u8 = 0x08;
    pub const NEW_VALUE: u8 = 0x40;

    /// Decode the status word read from `address + 10000`
    pub fn from_word(word: u16) -> Self {
        let age = u64::from(word & 0x7F);
        let age = if word & 0x80 != 0 {
            Duration::from_secs(age * 3600)
        } else {
            Duration::from_secs(age)
        };
        let source = match (word >> 12) & 0x03 {
            1 => ValueSource::Rf,
            2 => ValueSource::Modbus,
            _ => ValueSource::Unknown,
        };
        Self {
            age,
            source,
            flags: ((word >> 8) & 0xCF) as u8,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.flags & Self::VALID != 0
    }

    pub fn has_error(&self) -> bool {
        self.flags & Self::ERROR != 0
    }

    pub fn is_pending(&self) -> bool {
        self.flags & (Self::READ_PENDING | Self::WRITE_PENDING) != 0
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::profile::Access;

    fn field(kind: FieldKind) -> RegisterField {
        RegisterField::new("test", 41000, kind, Access::READ_WRITE)
    }

    #[test]
    fn test_u32_big_endian_words() {
        let f = field(FieldKind::U32);
        assert_eq!(
            encode(&f, &Value::Int(0x0001C849)).unwrap(),
            vec![0x0001, 0xC849]
        );
        assert_eq!(
            decode(&f, &[0x0001, 0xC892]).unwrap(),
            Value::Int(0x0001C892)
        );
    }

    #[test]
    fn test_signed_and_scaled() {
        let rssi = field(FieldKind::I16);
        assert_eq!(decode(&rssi, &[0xFFB5]).unwrap(), Value::Int(-75));
        assert_eq!(encode(&rssi, &Value::Int(-75)).unwrap(), vec![0xFFB5]);

        let temp = field(FieldKind::I16).with_scale(0.1);
        assert_eq!(decode(&temp, &[215]).unwrap(), Value::Float(21.5));
        assert_eq!(encode(&temp, &Value::Float(21.5)).unwrap(), vec![215]);
        assert_eq!(encode(&temp, &Value::Float(-4.2)).unwrap(), vec![(-42i16) as u16]);
    }

    #[test]
    fn test_range_validation() {
        let speed = field(FieldKind::U16).with_range(0.0, 40.0);
        assert!(encode(&speed, &Value::Int(40)).is_ok());
        assert!(matches!(
            encode(&speed, &Value::Int(41)),
            Err(AirlinkError::InvalidValue { .. })
        ));
        // Native width is enforced even without declared bounds
        let plain = field(FieldKind::U16);
        assert!(encode(&plain, &Value::Int(70000)).is_err());
        assert!(encode(&plain, &Value::Int(-1)).is_err());
        assert!(encode(&plain, &Value::Float(1.5)).is_err());
    }

    #[test]
    fn test_float_words() {
        let f = field(FieldKind::F32);
        let words = encode(&f, &Value::Float(21.5)).unwrap();
        assert_eq!(words, vec![0x41AC, 0x0000]);
        assert_eq!(decode(&f, &words).unwrap(), Value::Float(21.5));
        assert!(encode(&f, &Value::Float(f64::NAN)).is_err());
        assert!(matches!(decode(&f, &[0x7FC0, 0x0000]).unwrap(), Value::Float(v) if v.is_nan()));
    }

    #[test]
    fn test_text_trims_fill_bytes() {
        let f = field(FieldKind::Text { words: 4 });
        let words = vec![0x5645, 0x4E54, 0x0000, 0x0000]; // "VENT"
        assert_eq!(decode(&f, &words).unwrap(), Value::Text("VENT".to_string()));
        assert_eq!(encode(&f, &Value::from("VENT")).unwrap(), words);

        let odd = vec![0x4142, 0x4300, 0x0000, 0x0000];
        assert_eq!(decode(&f, &odd).unwrap(), Value::from("ABC"));

        assert!(encode(&f, &Value::from("TOO LONG!")).is_err());
        assert!(encode(&f, &Value::from("é")).is_err());
    }

    #[test]
    fn test_enum_unknown_sentinel() {
        let f = field(FieldKind::Enum {
            values: vec![
                EnumEntry {
                    value: 0,
                    label: "off".into(),
                },
                EnumEntry {
                    value: 3,
                    label: "high".into(),
                },
            ],
        });
        let known = decode(&f, &[3]).unwrap();
        assert_eq!(known.as_enum().unwrap().label.as_deref(), Some("high"));

        // Reserved hardware codes never fail to decode
        let unknown = decode(&f, &[99]).unwrap();
        assert!(unknown.as_enum().unwrap().is_unknown());
        assert_eq!(unknown.to_string(), "unknown (99)");

        assert_eq!(encode(&f, &Value::from("HIGH")).unwrap(), vec![3]);
        assert_eq!(encode(&f, &known).unwrap(), vec![3]);
        assert!(encode(&f, &unknown).is_err());
        assert!(encode(&f, &Value::Int(7)).is_err());
    }

    #[test]
    fn test_flags() {
        let f = field(FieldKind::Flags {
            flags: vec![
                FlagEntry {
                    mask: 0x0001,
                    label: "pre_heater".into(),
                },
                FlagEntry {
                    mask: 0x0800,
                    label: "auto_mode".into(),
                },
            ],
        });
        assert_eq!(decode(&f, &[0x0801]).unwrap(), Value::Flags(0x0801));
        assert_eq!(f.kind.flag_labels(0x0801), vec!["pre_heater", "auto_mode"]);
        assert_eq!(encode(&f, &Value::Flags(0x0800)).unwrap(), vec![0x0800]);
        assert!(encode(&f, &Value::Flags(0x0002)).is_err());
        assert_eq!(
            parse_value(&f, "pre_heater|auto_mode").unwrap(),
            Value::Flags(0x0801)
        );
    }

    #[test]
    fn test_date_layout_and_unset() {
        let f = field(FieldKind::Date);
        let date = NaiveDate::from_ymd_opt(2023, 11, 24).unwrap();
        let words = encode(&f, &Value::Date(date)).unwrap();
        assert_eq!(words, vec![(24 << 8) | 11, 2023]);
        assert_eq!(decode(&f, &words).unwrap(), Value::Date(date));
        assert_eq!(decode(&f, &[0xFFFF, 0xFFFF]).unwrap(), Value::Unset);
        assert_eq!(encode(&f, &Value::Unset).unwrap(), vec![0xFFFF, 0xFFFF]);
    }

    #[test]
    fn test_datetime() {
        let f = field(FieldKind::DateTime);
        let ts = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        let words = encode(&f, &Value::DateTime(ts)).unwrap();
        assert_eq!(decode(&f, &words).unwrap(), Value::DateTime(ts));
        assert_eq!(decode(&f, &[0xFFFF, 0xFFFF]).unwrap(), Value::Unset);
    }

    #[test]
    fn test_wrong_word_count() {
        let f = field(FieldKind::U32);
        assert!(matches!(decode(&f, &[1]), Err(AirlinkError::Decode(_))));
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(
            parse_value(&field(FieldKind::U16), "0x42").unwrap(),
            Value::Int(0x42)
        );
        assert_eq!(
            parse_value(&field(FieldKind::F32), "21.5").unwrap(),
            Value::Float(21.5)
        );
        assert!(parse_value(&field(FieldKind::U16), "abc").is_err());
        assert_eq!(
            parse_value(&field(FieldKind::Date), "2024-02-29").unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
    }

    #[test]
    fn test_scaled_decimals_are_exact() {
        let temp = field(FieldKind::I16).with_scale(0.1);
        for raw in -50i16..=50 {
            let v = Value::Float(f64::from(raw) / 10.0);
            assert_eq!(encode(&temp, &v).unwrap(), vec![raw as u16]);
            assert_eq!(decode(&temp, &[raw as u16]).unwrap(), v);
        }
        assert_eq!(decode(&temp, &[(-48i16) as u16]).unwrap(), Value::Float(-4.8));
    }

    #[test]
    fn test_value_json_form() {
        let speed = Value::Enum(EnumValue {
            raw: 3,
            label: Some("high".into()),
        });
        assert_eq!(
            serde_json::to_value(&speed).unwrap(),
            serde_json::json!({ "raw": 3, "label": "high" })
        );
        assert_eq!(serde_json::to_value(Value::Int(-75)).unwrap(), serde_json::json!(-75));
        assert_eq!(serde_json::to_value(Value::Unset).unwrap(), serde_json::Value::Null);
        assert_eq!(
            serde_json::to_value(Value::Date(NaiveDate::from_ymd_opt(2023, 11, 24).unwrap()))
                .unwrap(),
            serde_json::json!("2023-11-24")
        );
    }

    #[test]
    fn test_value_status_word() {
        // age 5 hours, RF source, valid + new value
        let word = (0x1 << 12) | ((0x41u16) << 8) | 0x80 | 5;
        let status = ValueStatus::from_word(word);
        assert_eq!(status.age, Duration::from_secs(5 * 3600));
        assert_eq!(status.source, ValueSource::Rf);
        assert!(status.is_valid());
        assert!(!status.has_error());
        assert_eq!(status.flags & ValueStatus::NEW_VALUE, ValueStatus::NEW_VALUE);

        let status = ValueStatus::from_word(0x2000 | 0x0800 | 30);
        assert_eq!(status.age, Duration::from_secs(30));
        assert_eq!(status.source, ValueSource::Modbus);
        assert!(status.is_pending());
    }

    // ------------------------------------------------------------------
    // decode(encode(v)) == v over each kind's domain
    // ------------------------------------------------------------------

    mod round_trip {
        use super::*;
        use proptest::prelude::*;

        fn assert_round_trip(field: &RegisterField, value: Value) {
            let words = encode(field, &value).unwrap();
            assert_eq!(words.len(), usize::from(field.word_count()));
            assert_eq!(decode(field, &words).unwrap(), value);
        }

        fn speeds() -> FieldKind {
            FieldKind::Enum {
                values: vec![
                    EnumEntry {
                        value: 0,
                        label: "low".into(),
                    },
                    EnumEntry {
                        value: 1,
                        label: "mid".into(),
                    },
                    EnumEntry {
                        value: 3,
                        label: "high".into(),
                    },
                ],
            }
        }

        fn heaters() -> FieldKind {
            FieldKind::Flags {
                flags: vec![
                    FlagEntry {
                        mask: 0x0001,
                        label: "pre_heater".into(),
                    },
                    FlagEntry {
                        mask: 0x0004,
                        label: "post_heater".into(),
                    },
                    FlagEntry {
                        mask: 0x0800,
                        label: "auto_mode".into(),
                    },
                ],
            }
        }

        proptest! {
            #[test]
            fn u16_values(raw in any::<u16>()) {
                assert_round_trip(&field(FieldKind::U16), Value::Int(i64::from(raw)));
            }

            #[test]
            fn i16_values(raw in any::<i16>()) {
                assert_round_trip(&field(FieldKind::I16), Value::Int(i64::from(raw)));
            }

            #[test]
            fn u32_values(raw in any::<u32>()) {
                assert_round_trip(&field(FieldKind::U32), Value::Int(i64::from(raw)));
            }

            #[test]
            fn scaled_i16_values(
                raw in any::<i16>(),
                (scale, divisor) in prop::sample::select(vec![
                    (0.1, 10.0),
                    (0.01, 100.0),
                    (0.5, 2.0),
                    (2.0, 0.5),
                ]),
            ) {
                let f = field(FieldKind::I16).with_scale(scale);
                assert_round_trip(&f, Value::Float(f64::from(raw) / divisor));
            }

            #[test]
            fn scaled_u16_values(raw in any::<u16>()) {
                let f = field(FieldKind::U16).with_scale(0.1);
                assert_round_trip(&f, Value::Float(f64::from(raw) / 10.0));
            }

            #[test]
            fn scaled_u32_values(raw in any::<u32>()) {
                let f = field(FieldKind::U32).with_scale(0.01);
                assert_round_trip(&f, Value::Float(f64::from(raw) / 100.0));
            }

            #[test]
            fn f32_values(v in any::<f32>().prop_filter("finite", |v| v.is_finite())) {
                assert_round_trip(&field(FieldKind::F32), Value::Float(f64::from(v)));
            }

            #[test]
            fn text_values(text in "[ -~]{0,8}") {
                assert_round_trip(&field(FieldKind::Text { words: 4 }), Value::Text(text));
            }

            #[test]
            fn date_values(year in 1i32..=9999, month in 1u32..=12, day in 1u32..=28) {
                let date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
                assert_round_trip(&field(FieldKind::Date), Value::Date(date));
            }

            #[test]
            fn datetime_values(secs in 0i64..i64::from(UNSET_U32)) {
                let ts = Utc.timestamp_opt(secs, 0).single().unwrap();
                assert_round_trip(&field(FieldKind::DateTime), Value::DateTime(ts));
            }

            #[test]
            fn enum_values(index in 0usize..3) {
                let kind = speeds();
                let FieldKind::Enum { values } = &kind else { unreachable!() };
                let entry = &values[index];
                let value = Value::Enum(EnumValue {
                    raw: entry.value,
                    label: Some(entry.label.clone()),
                });
                assert_round_trip(&field(kind.clone()), value);
            }

            #[test]
            fn flag_values(bits in any::<u16>()) {
                assert_round_trip(&field(heaters()), Value::Flags(bits & 0x0805));
            }
        }

        #[test]
        fn unset_markers() {
            assert_round_trip(&field(FieldKind::Date), Value::Unset);
            assert_round_trip(&field(FieldKind::DateTime), Value::Unset);
        }
    }
}
