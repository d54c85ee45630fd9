//! Profile registry
//!
//! Maps product codes to device profiles. Built-in profiles are installed by
//! [`ProfileRegistry::with_builtin`]; callers add their own products with
//! [`ProfileRegistry::register`] or from YAML definitions.
//!
//! ## YAML format
//!
//! ```yaml
//! - product_code: 0x0001C8A0
//!   name: VMD-EXAMPLE
//!   revision: 1
//!   capabilities: [node_info]
//!   fields:
//!     - name: co2_level
//!       address: 41025
//!       kind: { type: u16 }
//!       access: rs
//! ```

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{builtin, DeviceProfile};
use crate::error::{AirlinkError, Result};

/// Registry of device profiles keyed by product code
///
/// Uses DashMap so nodes can resolve profiles while callers register new ones.
pub struct ProfileRegistry {
    profiles: DashMap<u32, Arc<DeviceProfile>>,
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for ProfileRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileRegistry")
            .field("profiles", &self.profiles.len())
            .finish()
    }
}

impl ProfileRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            profiles: DashMap::new(),
        }
    }

    /// Create a registry holding the products supported out of the box
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        for profile in builtin::profiles() {
            registry
                .profiles
                .insert(profile.product_code, Arc::new(profile));
        }
        registry
    }

    /// Register a profile
    ///
    /// An existing profile for the same product is only replaced by a higher
    /// revision. Returns whether the profile was installed.
    pub fn register(&self, profile: DeviceProfile) -> Result<bool> {
        profile.validate()?;

        // The entry guard holds the shard lock across compare and insert
        match self.profiles.entry(profile.product_code) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get().revision;
                if existing >= profile.revision {
                    warn!(
                        "Ignoring {}: revision {} already registered",
                        profile, existing
                    );
                    return Ok(false);
                }
                info!("Registered device profile {}", profile);
                entry.insert(Arc::new(profile));
            },
            Entry::Vacant(entry) => {
                info!("Registered device profile {}", profile);
                entry.insert(Arc::new(profile));
            },
        }
        Ok(true)
    }

    /// Look up the profile of a product
    pub fn lookup(&self, product_code: u32) -> Result<Arc<DeviceProfile>> {
        self.profiles
            .get(&product_code)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(AirlinkError::UnknownProduct(product_code))
    }

    /// Look up by product name, case-insensitively
    pub fn lookup_by_name(&self, name: &str) -> Option<Arc<DeviceProfile>> {
        self.profiles
            .iter()
            .find(|entry| entry.value().name.eq_ignore_ascii_case(name))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, product_code: u32) -> bool {
        self.profiles.contains_key(&product_code)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// All profiles, ordered by product code
    pub fn profiles(&self) -> Vec<Arc<DeviceProfile>> {
        let mut all: Vec<_> = self
            .profiles
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        all.sort_by_key(|p| p.product_code);
        all
    }

    /// Register every profile of a YAML document (a sequence of profiles)
    ///
    /// Returns the number of profiles installed.
    pub fn load_yaml(&self, yaml: &str) -> Result<usize> {
        let profiles: Vec<DeviceProfile> = serde_yaml::from_str(yaml)?;
        debug!("Parsed {} profile definitions", profiles.len());

        let mut installed = 0;
        for profile in profiles {
            if self.register(profile)? {
                installed += 1;
            }
        }
        Ok(installed)
    }

    pub fn load_yaml_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            AirlinkError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        self.load_yaml(&yaml)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::codec::FieldKind;
    use crate::profile::builtin::product;
    use crate::profile::{Access, Capability, RegisterField};

    #[test]
    fn test_builtin_lookup() {
        let registry = ProfileRegistry::with_builtin();
        let bridge = registry.lookup(product::BRDG_02R13).unwrap();
        assert_eq!(bridge.name, "BRDG-02R13");
        assert!(bridge.supports(Capability::BridgeControl));

        let remote = registry.lookup(product::VMN_02LM11).unwrap();
        assert!(remote.supports(Capability::RemoteControl));

        assert_eq!(
            registry.lookup(0xDEAD_BEEF).unwrap_err(),
            AirlinkError::UnknownProduct(0xDEAD_BEEF)
        );
        assert!(registry.lookup_by_name("vmd-02rps78").is_some());
    }

    #[test]
    fn test_shared_profile_instance() {
        let registry = ProfileRegistry::with_builtin();
        let a = registry.lookup(product::VMD_02RPS78).unwrap();
        let b = registry.lookup(product::VMD_02RPS78).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_register_requires_higher_revision() {
        let registry = ProfileRegistry::new();
        let v1 = DeviceProfile::new(0x1000, "CUSTOM", 1).with_fields([RegisterField::new(
            "level",
            41000,
            FieldKind::U16,
            Access::READ,
        )]);
        assert!(registry.register(v1.clone()).unwrap());
        let held = registry.lookup(0x1000).unwrap();

        assert!(!registry.register(v1.clone()).unwrap());

        let mut v2 = v1;
        v2.revision = 2;
        assert!(registry.register(v2).unwrap());
        assert_eq!(registry.lookup(0x1000).unwrap().revision, 2);

        // A holder of the old revision still sees its schema
        assert_eq!(held.revision, 1);
    }

    #[test]
    fn test_concurrent_register_keeps_highest_revision() {
        let registry = Arc::new(ProfileRegistry::new());
        let base = DeviceProfile::new(0x2000, "RACED", 1).with_fields([RegisterField::new(
            "level",
            41000,
            FieldKind::U16,
            Access::READ,
        )]);

        let handles: Vec<_> = (1..=16u16)
            .map(|revision| {
                let registry = Arc::clone(&registry);
                let mut profile = base.clone();
                profile.revision = revision;
                std::thread::spawn(move || registry.register(profile).unwrap())
            })
            .collect();
        let installed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert!(installed >= 1);
        assert_eq!(registry.lookup(0x2000).unwrap().revision, 16);

        // Nothing lower gets in afterwards
        let mut stale = base;
        stale.revision = 15;
        assert!(!registry.register(stale).unwrap());
        assert_eq!(registry.lookup(0x2000).unwrap().revision, 16);
    }

    #[test]
    fn test_load_yaml() {
        let registry = ProfileRegistry::new();
        let yaml = r#"
- product_code: 0x0001C8A0
  name: VMD-EXAMPLE
  revision: 1
  capabilities: [node_info]
  fields:
    - name: co2_level
      address: 41025
      kind: { type: u16 }
      access: rs
    - name: label
      address: 41100
      kind: { type: text, words: 4 }
      access: rw
    - name: mode
      address: 41200
      kind:
        type: enum
        values:
          - { value: 0, label: low }
          - { value: 1, label: high }
"#;
        assert_eq!(registry.load_yaml(yaml).unwrap(), 1);
        let profile = registry.lookup(0x0001C8A0).unwrap();
        assert_eq!(profile.fields.len(), 3);
        assert!(profile.field("co2_level").unwrap().access.has_status());
        assert_eq!(profile.field("label").unwrap().word_count(), 4);
        assert_eq!(profile.field("mode").unwrap().access, Access::READ);
        assert!(profile.supports(Capability::NodeInfo));
    }

    #[test]
    fn test_load_yaml_rejects_bad_profiles() {
        let registry = ProfileRegistry::new();
        assert!(registry.load_yaml("- product_code: 1\n  fields: []\n").is_err());
        let duplicate = r#"
- product_code: 2
  name: DUP
  fields:
    - { name: a, address: 1, kind: { type: u16 } }
    - { name: a, address: 2, kind: { type: u16 } }
"#;
        assert!(matches!(
            registry.load_yaml(duplicate),
            Err(AirlinkError::Config(_))
        ));
        assert!(registry.is_empty());
    }
}
