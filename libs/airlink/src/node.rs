//! Node handle
//!
//! A [`Node`] pairs a virtual slave address with the profile it was created
//! against and keeps a per-field cache. `get` only touches the wire when the
//! cached entry is missing or older than the staleness window; `set` writes the
//! whole field in one request and drops the cached entry once the write is
//! acknowledged.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::codec::{self, EnumValue, Value, ValueStatus};
use crate::error::{AirlinkError, Result};
use crate::profile::{DeviceProfile, RegisterField};
use crate::protocol::constants::{MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};
use crate::session::ModbusSession;

/// A value together with the bridge's status word for it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub value: Value,
    /// Present for fields that keep a status register
    pub status: Option<ValueStatus>,
}

/// One cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Value,
    pub status: Option<ValueStatus>,
    pub fetched_at: Instant,
}

impl CachedValue {
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn is_fresh(&self, staleness: Duration) -> bool {
        self.age() < staleness
    }
}

pub struct Node {
    address: u8,
    profile: Arc<DeviceProfile>,
    session: Arc<ModbusSession>,
    staleness: Duration,
    cache: Mutex<HashMap<String, CachedValue>>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("profile", &self.profile.name)
            .field("revision", &self.profile.revision)
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.profile.name, self.address)
    }
}

impl Node {
    pub fn new(
        address: u8,
        profile: Arc<DeviceProfile>,
        session: Arc<ModbusSession>,
        staleness: Duration,
    ) -> Self {
        Self {
            address,
            profile,
            session,
            staleness,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn profile(&self) -> &Arc<DeviceProfile> {
        &self.profile
    }

    /// Schema revision this node decodes against
    pub fn revision(&self) -> u16 {
        self.profile.revision
    }

    pub fn product_code(&self) -> u32 {
        self.profile.product_code
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    pub(crate) fn session(&self) -> &Arc<ModbusSession> {
        &self.session
    }

    fn readable(&self, name: &str) -> Result<&RegisterField> {
        let field = self.profile.require_field(name)?;
        if !field.access.is_readable() {
            return Err(AirlinkError::unsupported(format!(
                "{} field '{}' is write-only",
                self.profile.name, name
            )));
        }
        Ok(field)
    }

    fn writable(&self, name: &str) -> Result<&RegisterField> {
        let field = self.profile.require_field(name)?;
        if !field.access.is_writable() {
            return Err(AirlinkError::unsupported(format!(
                "{} field '{}' is read-only",
                self.profile.name, name
            )));
        }
        Ok(field)
    }

    /// Value of a field, from cache while it is fresh
    pub async fn get(&self, name: &str) -> Result<Value> {
        let field = self.readable(name)?;
        if let Some(entry) = self.fresh_entry(name) {
            return Ok(entry.value);
        }

        let value = self.read_field(field).await?;
        self.store(name, value.clone(), None);
        Ok(value)
    }

    /// Value and value status of a field
    ///
    /// Fields with a status register cost two reads when not cached.
    pub async fn get_reading(&self, name: &str) -> Result<Reading> {
        let field = self.readable(name)?;
        let status_address = field.status_address();

        if let Some(entry) = self.fresh_entry(name) {
            if status_address.is_none() || entry.status.is_some() {
                return Ok(Reading {
                    value: entry.value,
                    status: entry.status,
                });
            }
        }

        let value = self.read_field(field).await?;
        let status = match status_address {
            Some(address) => {
                let words = self.session.read_registers(self.address, address, 1).await?;
                words.first().copied().map(ValueStatus::from_word)
            },
            None => None,
        };
        self.store(name, value.clone(), status);
        Ok(Reading { value, status })
    }

    /// Encode and write a field
    ///
    /// The cached entry is dropped only after the bridge acknowledged the
    /// write; a failed write leaves the cache as it was.
    pub async fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let field = self.writable(name)?;
        let words = codec::encode(field, &value.into())?;

        debug!("{}: writing {} = {:?}", self, name, words);
        self.session
            .write_registers(self.address, field.address, &words)
            .await?;
        self.invalidate(name);
        Ok(())
    }

    /// Write several fields, one request per run of adjacent registers
    ///
    /// Fields that sit next to each other go out in a single FC16 write, so
    /// the device applies them together. Every value is encoded before the
    /// first request; an encode error writes nothing.
    pub async fn set_many(&self, values: &[(&str, Value)]) -> Result<()> {
        let mut encoded = values
            .iter()
            .map(|(name, value)| {
                let field = self.writable(name)?;
                Ok((field, codec::encode(field, value)?))
            })
            .collect::<Result<Vec<_>>>()?;
        encoded.sort_by_key(|(field, _)| field.address);

        let mut runs: Vec<(u16, Vec<u16>, Vec<&str>)> = Vec::new();
        for (field, words) in encoded {
            match runs.last_mut() {
                Some((start, block, names))
                    if usize::from(*start) + block.len() == usize::from(field.address)
                        && block.len() + words.len() <= MAX_WRITE_REGISTERS =>
                {
                    block.extend_from_slice(&words);
                    names.push(field.name.as_str());
                },
                _ => runs.push((field.address, words, vec![field.name.as_str()])),
            }
        }

        for (start, words, names) in runs {
            debug!("{}: writing {:?} = {:?}", self, names, words);
            self.session
                .write_registers(self.address, start, &words)
                .await?;
            for name in names {
                self.invalidate(name);
            }
        }
        Ok(())
    }

    /// Parse `input` for the field and write it
    pub async fn set_str(&self, name: &str, input: &str) -> Result<()> {
        let value = codec::parse_value(self.writable(name)?, input)?;
        self.set(name, value).await
    }

    /// Re-read fields regardless of the cache
    ///
    /// `None` refreshes every readable field of the profile. Adjacent fields are
    /// fetched together in as few requests as possible.
    pub async fn refresh(&self, names: Option<&[&str]>) -> Result<()> {
        let mut fields: Vec<&RegisterField> = match names {
            Some(names) => names
                .iter()
                .map(|name| self.readable(name))
                .collect::<Result<_>>()?,
            None => self
                .profile
                .fields
                .iter()
                .filter(|f| f.access.is_readable())
                .collect(),
        };
        fields.sort_by_key(|f| f.address);
        fields.dedup_by_key(|f| f.address);

        for block in contiguous_blocks(&fields) {
            let start = block[0].address;
            let count: u16 = block.iter().map(|f| f.word_count()).sum();
            let words = self
                .session
                .read_registers(self.address, start, count)
                .await?;

            for field in block {
                let offset = usize::from(field.address - start);
                let slice = words
                    .get(offset..offset + usize::from(field.word_count()))
                    .ok_or_else(|| AirlinkError::decode("short block read"))?;
                self.store(&field.name, codec::decode(field, slice)?, None);
            }
        }
        Ok(())
    }

    /// Cached entry without any I/O, fresh or not
    pub fn cached(&self, name: &str) -> Option<CachedValue> {
        self.cache.lock().get(name).cloned()
    }

    pub fn invalidate(&self, name: &str) {
        self.cache.lock().remove(name);
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    fn fresh_entry(&self, name: &str) -> Option<CachedValue> {
        self.cache
            .lock()
            .get(name)
            .filter(|entry| entry.is_fresh(self.staleness))
            .cloned()
    }

    fn store(&self, name: &str, value: Value, status: Option<ValueStatus>) {
        self.cache.lock().insert(
            name.to_string(),
            CachedValue {
                value,
                status,
                fetched_at: Instant::now(),
            },
        );
    }

    async fn read_field(&self, field: &RegisterField) -> Result<Value> {
        let words = self
            .session
            .read_registers(self.address, field.address, field.word_count())
            .await?;
        codec::decode(field, &words)
    }

    // ------------------------------------------------------------------
    // Typed helpers for accessors
    // ------------------------------------------------------------------

    pub async fn get_i64(&self, name: &str) -> Result<i64> {
        let value = self.get(name).await?;
        value
            .as_i64()
            .ok_or_else(|| mismatch(name, "integer", &value))
    }

    pub async fn get_f64(&self, name: &str) -> Result<f64> {
        let value = self.get(name).await?;
        value.as_f64().ok_or_else(|| mismatch(name, "number", &value))
    }

    pub async fn get_text(&self, name: &str) -> Result<String> {
        match self.get(name).await? {
            Value::Text(text) => Ok(text),
            other => Err(mismatch(name, "text", &other)),
        }
    }

    pub async fn get_enum(&self, name: &str) -> Result<EnumValue> {
        match self.get(name).await? {
            Value::Enum(e) => Ok(e),
            other => Err(mismatch(name, "enum", &other)),
        }
    }
}

fn mismatch(name: &str, expected: &'static str, actual: &Value) -> AirlinkError {
    AirlinkError::TypeMismatch {
        field: name.to_string(),
        expected,
        actual: actual.kind_name(),
    }
}

/// Split address-sorted fields into runs without gaps that fit one read
fn contiguous_blocks<'a>(fields: &[&'a RegisterField]) -> Vec<Vec<&'a RegisterField>> {
    let mut blocks: Vec<Vec<&RegisterField>> = Vec::new();
    let mut end: u32 = 0;
    let mut len: u32 = 0;

    for &field in fields {
        let start = u32::from(field.address);
        let words = u32::from(field.word_count());
        match blocks.last_mut() {
            Some(block) if start == end && len + words <= MAX_READ_REGISTERS as u32 => {
                block.push(field);
                len += words;
            },
            _ => {
                blocks.push(vec![field]);
                len = words;
            },
        }
        end = start + words;
    }
    blocks
}
