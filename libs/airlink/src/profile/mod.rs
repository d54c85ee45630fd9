//! Device profiles
//!
//! A [`DeviceProfile`] is the schema of one product: its register fields and
//! the capabilities the typed accessors rely on. Profiles are immutable and
//! shared through `Arc`, so a node keeps decoding against the revision it was
//! created with even if the registry is updated later.

pub mod builtin;
mod registry;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::codec::FieldKind;
use crate::error::{AirlinkError, Result};
use crate::protocol::constants::STATUS_REGISTER_OFFSET;

pub use registry::ProfileRegistry;

/// Register access mask
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Access(u8);

impl Access {
    pub const READ: Access = Access(0b001);
    pub const WRITE: Access = Access(0b010);
    /// A value status word is kept at `address + 10000`
    pub const STATUS: Access = Access(0b100);

    pub const READ_WRITE: Access = Access(0b011);
    pub const READ_STATUS: Access = Access(0b101);
    pub const READ_WRITE_STATUS: Access = Access(0b111);
    pub const WRITE_STATUS: Access = Access(0b110);

    pub const fn contains(self, other: Access) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_readable(self) -> bool {
        self.contains(Self::READ)
    }

    pub fn is_writable(self) -> bool {
        self.contains(Self::WRITE)
    }

    pub fn has_status(self) -> bool {
        self.contains(Self::STATUS)
    }
}

impl std::ops::BitOr for Access {
    type Output = Access;

    fn bitor(self, rhs: Self) -> Self {
        Access(self.0 | rhs.0)
    }
}

impl fmt::Debug for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Access({})", String::from(*self))
    }
}

/// Compact form used in profile files: any combination of `r`, `w`, `s`
impl From<Access> for String {
    fn from(access: Access) -> Self {
        let mut s = String::with_capacity(3);
        if access.is_readable() {
            s.push('r');
        }
        if access.is_writable() {
            s.push('w');
        }
        if access.has_status() {
            s.push('s');
        }
        s
    }
}

impl TryFrom<String> for Access {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        let mut access = Access(0);
        for c in value.chars() {
            access = access
                | match c.to_ascii_lowercase() {
                    'r' => Access::READ,
                    'w' => Access::WRITE,
                    's' => Access::STATUS,
                    other => return Err(format!("unknown access flag '{other}'")),
                };
        }
        if access.0 & (Access::READ.0 | Access::WRITE.0) == 0 {
            return Err(format!("access '{value}' is neither readable nor writable"));
        }
        Ok(access)
    }
}

fn default_access() -> Access {
    Access::READ
}

/// One named value in a device's register map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterField {
    pub name: String,
    /// First holding register of the field
    pub address: u16,
    pub kind: FieldKind,
    #[serde(default = "default_access")]
    pub access: Access,
    /// Multiplier from raw integer to engineering units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl RegisterField {
    pub fn new(name: impl Into<String>, address: u16, kind: FieldKind, access: Access) -> Self {
        Self {
            name: name.into(),
            address,
            kind,
            access,
            scale: None,
            min: None,
            max: None,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn word_count(&self) -> u16 {
        self.kind.word_count()
    }

    /// Address of the value status word, for fields that have one
    pub fn status_address(&self) -> Option<u16> {
        if self.access.has_status() {
            self.address.checked_add(STATUS_REGISTER_OFFSET)
        } else {
            None
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.name.is_empty() {
            return Err(format!("field at {} has no name", self.address));
        }
        if self.word_count() == 0 {
            return Err(format!("{} occupies no registers", self.name));
        }
        if u32::from(self.address) + u32::from(self.word_count()) > 0x1_0000 {
            return Err(format!("{} runs past the register space", self.name));
        }
        if self.access.has_status() && self.status_address().is_none() {
            return Err(format!("{} has no room for a status register", self.name));
        }
        if matches!(self.scale, Some(s) if s == 0.0 || !s.is_finite()) {
            return Err(format!("{} has an unusable scale", self.name));
        }
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(format!("{} has min {} above max {}", self.name, min, max));
            }
        }
        Ok(())
    }
}

/// Logical operation groups a profile can offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Common node identity and RF status registers
    NodeInfo,
    /// Binding, node list and bridge configuration
    BridgeControl,
    /// Ventilation unit control
    Ventilation,
    /// Ventilation unit driven by mode and sub-mode (ClimaRad Ventura)
    VentilationV1,
    /// Remote control (requested ventilation speed)
    RemoteControl,
}

/// Register schema and capabilities of one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub product_code: u32,
    pub name: String,
    /// Schema revision; a higher revision supersedes a lower one
    #[serde(default)]
    pub revision: u16,
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    pub fields: Vec<RegisterField>,
}

impl DeviceProfile {
    pub fn new(product_code: u32, name: impl Into<String>, revision: u16) -> Self {
        Self {
            product_code,
            name: name.into(),
            revision,
            capabilities: BTreeSet::new(),
            fields: Vec::new(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = RegisterField>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn field(&self, name: &str) -> Option<&RegisterField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field lookup that fails with `UnsupportedCapability`
    pub fn require_field(&self, name: &str) -> Result<&RegisterField> {
        self.field(name).ok_or_else(|| {
            AirlinkError::unsupported(format!("{} has no field '{}'", self.name, name))
        })
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.supports(capability) {
            Ok(())
        } else {
            Err(AirlinkError::unsupported(format!(
                "{} does not support {:?}",
                self.name, capability
            )))
        }
    }

    /// Check names are unique and every field is well formed
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(AirlinkError::config(format!(
                "profile 0x{:08X} has no name",
                self.product_code
            )));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            field
                .validate()
                .map_err(|e| AirlinkError::config(format!("{}: {}", self.name, e)))?;
            if !seen.insert(field.name.as_str()) {
                return Err(AirlinkError::config(format!(
                    "{}: duplicate field '{}'",
                    self.name, field.name
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (0x{:08X}, rev {})",
            self.name, self.product_code, self.revision
        )
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_access_string_form() {
        assert_eq!(String::from(Access::READ_WRITE_STATUS), "rws");
        assert_eq!(Access::try_from("rs".to_string()).unwrap(), Access::READ_STATUS);
        assert!(Access::try_from("x".to_string()).is_err());
        assert!(Access::try_from("s".to_string()).is_err());
        assert!(Access::READ_WRITE.is_writable());
        assert!(!Access::WRITE.is_readable());
    }

    #[test]
    fn test_status_address() {
        let field = RegisterField::new("speed", 41000, FieldKind::U16, Access::READ_STATUS);
        assert_eq!(field.status_address(), Some(51000));
        let field = RegisterField::new("speed", 41000, FieldKind::U16, Access::READ);
        assert_eq!(field.status_address(), None);
    }

    #[test]
    fn test_profile_validation() {
        let profile = DeviceProfile::new(0x1234, "TEST", 1).with_fields([
            RegisterField::new("a", 41000, FieldKind::U16, Access::READ),
            RegisterField::new("a", 41001, FieldKind::U16, Access::READ),
        ]);
        assert!(matches!(profile.validate(), Err(AirlinkError::Config(_))));

        let profile = DeviceProfile::new(0x1234, "TEST", 1).with_fields([RegisterField::new(
            "late",
            60000,
            FieldKind::U16,
            Access::READ_STATUS,
        )]);
        assert!(profile.validate().is_err());

        let profile = DeviceProfile::new(0x1234, "TEST", 1)
            .with_fields([RegisterField::new("a", 41000, FieldKind::U16, Access::READ)
                .with_range(10.0, 1.0)]);
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_require_field_is_unsupported_capability() {
        let profile = DeviceProfile::new(0x1234, "TEST", 1);
        assert!(matches!(
            profile.require_field("co2"),
            Err(AirlinkError::UnsupportedCapability(_))
        ));
        assert!(profile.require(Capability::Ventilation).is_err());
    }
}
