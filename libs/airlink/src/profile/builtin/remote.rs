//! VMN-05LM02 / VMN-02LM11 four-button remotes

use super::common;
use super::ventilation::requested_speed_kind;
use crate::profile::{Access, Capability, DeviceProfile, RegisterField};

pub mod fields {
    pub const REQUESTED_VENTILATION_SPEED: &str = "requested_ventilation_speed";
}

pub mod reg {
    pub const REQUESTED_VENTILATION_SPEED: u16 = 41000;
}

/// Both remote variants share one register layout
pub fn profile(product_code: u32, name: &str) -> DeviceProfile {
    DeviceProfile::new(product_code, name, 1)
        .with_capability(Capability::NodeInfo)
        .with_capability(Capability::RemoteControl)
        .with_fields(common::node_fields())
        .with_fields(common::device_fields())
        .with_fields([RegisterField::new(
            fields::REQUESTED_VENTILATION_SPEED,
            reg::REQUESTED_VENTILATION_SPEED,
            requested_speed_kind(),
            Access::READ_STATUS,
        )])
}
