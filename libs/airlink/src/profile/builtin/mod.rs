//! Products supported out of the box

pub mod bridge;
pub mod common;
pub mod remote;
pub mod ventilation;
pub mod ventilation_v1;

use super::DeviceProfile;

/// Product codes as reported in the PRODUCT_ID register
pub mod product {
    /// RF bridge with RS485 Modbus-RTU interface
    pub const BRDG_02R13: u32 = 0x0001_C849;
    /// Ventilation unit controller
    pub const VMD_02RPS78: u32 = 0x0001_C892;
    /// ClimaRad Ventura V1 ventilation unit controller
    pub const VMD_07RPS13: u32 = 0x0001_C883;
    /// Four-button remote
    pub const VMN_05LM02: u32 = 0x0001_C83E;
    /// Four-button remote, second hardware variant
    pub const VMN_02LM11: u32 = 0x0001_C852;
}

/// Every built-in profile
pub fn profiles() -> Vec<DeviceProfile> {
    vec![
        bridge::profile(),
        ventilation::profile(),
        ventilation_v1::profile(),
        remote::profile(product::VMN_05LM02, "VMN-05LM02"),
        remote::profile(product::VMN_02LM11, "VMN-02LM11"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_are_valid() {
        for profile in profiles() {
            assert!(profile.validate().is_ok(), "{} is invalid", profile);
        }
    }

    #[test]
    fn test_every_profile_carries_node_fields() {
        for profile in profiles() {
            for name in [common::fields::RF_ADDRESS, common::fields::PRODUCT_ID] {
                assert!(profile.field(name).is_some(), "{} lacks {}", profile, name);
            }
        }
    }
}
