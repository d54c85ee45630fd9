//! VMD-07RPS13 ClimaRad Ventura V1 controller
//!
//! A ventilation unit with its own register layout: speed is driven through a
//! ventilation mode plus sub-mode pair instead of a requested-speed register,
//! and there is no capability word, preset table or bypass control.

use super::common::{self, entries};
use super::product;
use super::ventilation::error_code_kind;
use crate::codec::FieldKind;
use crate::profile::{Access, Capability, DeviceProfile, RegisterField};

pub mod fields {
    pub const TEMPERATURE_OUTLET: &str = "temperature_outlet";
    pub const HUMIDITY_OUTDOOR: &str = "humidity_outdoor";
    pub const TEMPERATURE_INLET: &str = "temperature_inlet";
    pub const TEMPERATURE_EXHAUST: &str = "temperature_exhaust";
    pub const HUMIDITY_INDOOR: &str = "humidity_indoor";
    pub const CO2_LEVEL: &str = "co2_level";
    pub const BYPASS_POSITION: &str = "bypass_position";
    pub const FILTER_DIRTY: &str = "filter_dirty";
    pub const FAN_SPEED_EXHAUST: &str = "fan_speed_exhaust";
    pub const FAN_SPEED_SUPPLY: &str = "fan_speed_supply";
    pub const POST_HEATER_DEMAND: &str = "post_heater_demand";
    pub const FLOW_INLET: &str = "flow_inlet";
    pub const FLOW_OUTLET: &str = "flow_outlet";
    pub const FILTER_REMAINING_DAYS: &str = "filter_remaining_days";
    pub const FILTER_DURATION: &str = "filter_duration";
    pub const FILTER_REMAINING_PERCENT: &str = "filter_remaining_percent";
    pub const ERROR_CODE: &str = "error_code";
    pub const VENT_MODE: &str = "vent_mode";
    pub const VENT_SUB_MODE: &str = "vent_sub_mode";
    pub const TEMP_VENT_MODE: &str = "temp_vent_mode";
    pub const TEMP_VENT_SUB_MODE: &str = "temp_vent_sub_mode";
    pub const REQUESTED_VENT_MODE: &str = "requested_vent_mode";
    pub const REQUESTED_VENT_SUB_MODE: &str = "requested_vent_sub_mode";
    pub const REQUESTED_TEMP_VENT_MODE: &str = "requested_temp_vent_mode";
    pub const REQUESTED_TEMP_VENT_SUB_MODE: &str = "requested_temp_vent_sub_mode";
    pub const FILTER_RESET: &str = "filter_reset";
    pub const BASIC_VENT_ENABLE: &str = "basic_vent_enable";
    pub const BASIC_VENT_LEVEL: &str = "basic_vent_level";
    pub const OVERRIDE_TIME_MANUAL: &str = "override_time_manual";
    pub const PRODUCT_VARIANT: &str = "product_variant";
    pub const CO2_CONTROL_SETPOINT: &str = "co2_control_setpoint";
    pub const SYSTEM_VENT_CONFIG: &str = "system_vent_config";
}

pub mod reg {
    pub const VENT_MODE: u16 = 41100;
    pub const VENT_SUB_MODE: u16 = 41101;
    pub const TEMP_VENT_MODE: u16 = 41103;
    pub const TEMP_VENT_SUB_MODE: u16 = 41104;
    pub const REQUESTED_VENT_MODE: u16 = 41120;
    pub const REQUESTED_VENT_SUB_MODE: u16 = 41121;
    pub const REQUESTED_TEMP_VENT_MODE: u16 = 41123;
    pub const REQUESTED_TEMP_VENT_SUB_MODE: u16 = 41124;
    pub const FILTER_RESET: u16 = 41151;
    pub const BASIC_VENT_ENABLE: u16 = 42000;
    pub const BASIC_VENT_LEVEL: u16 = 42001;
    pub const CO2_CONTROL_SETPOINT: u16 = 42011;
}

/// Sub-mode reported while the unit runs on its own schedule
pub const SUB_MODE_AUTO: u16 = 48;

fn vent_mode_kind() -> FieldKind {
    FieldKind::Enum {
        values: entries(&[
            (0, "off"),
            (1, "pause"),
            (2, "on"),
            (3, "manual_1"),
            (5, "manual_3"),
            (8, "service"),
        ]),
    }
}

pub fn profile() -> DeviceProfile {
    use fields::*;

    let rs = Access::READ_STATUS;
    let rws = Access::READ_WRITE_STATUS;
    let u16_rs = |name: &str, address: u16| RegisterField::new(name, address, FieldKind::U16, rs);
    let f32_rs = |name: &str, address: u16| RegisterField::new(name, address, FieldKind::F32, rs);

    let unit = vec![
        f32_rs(TEMPERATURE_OUTLET, 41000),
        u16_rs(HUMIDITY_OUTDOOR, 41002),
        f32_rs(TEMPERATURE_INLET, 41003),
        f32_rs(TEMPERATURE_EXHAUST, 41005),
        u16_rs(HUMIDITY_INDOOR, 41007),
        u16_rs(CO2_LEVEL, 41008),
        u16_rs(BYPASS_POSITION, 41015),
        u16_rs(FILTER_DIRTY, 41017),
        u16_rs(FAN_SPEED_EXHAUST, 41019),
        u16_rs(FAN_SPEED_SUPPLY, 41020),
        u16_rs(POST_HEATER_DEMAND, 41023),
        f32_rs(FLOW_INLET, 41024),
        f32_rs(FLOW_OUTLET, 41026),
        u16_rs(FILTER_REMAINING_DAYS, 41028),
        u16_rs(FILTER_DURATION, 41029),
        u16_rs(FILTER_REMAINING_PERCENT, 41030),
        RegisterField::new(ERROR_CODE, 41032, error_code_kind(), rs),
        RegisterField::new(VENT_MODE, reg::VENT_MODE, vent_mode_kind(), rs),
        u16_rs(VENT_SUB_MODE, reg::VENT_SUB_MODE),
        RegisterField::new(TEMP_VENT_MODE, reg::TEMP_VENT_MODE, vent_mode_kind(), rs),
        u16_rs(TEMP_VENT_SUB_MODE, reg::TEMP_VENT_SUB_MODE),
        RegisterField::new(REQUESTED_VENT_MODE, reg::REQUESTED_VENT_MODE, vent_mode_kind(), rws),
        RegisterField::new(
            REQUESTED_VENT_SUB_MODE,
            reg::REQUESTED_VENT_SUB_MODE,
            FieldKind::U16,
            rws,
        )
        .with_max(255.0),
        RegisterField::new(
            REQUESTED_TEMP_VENT_MODE,
            reg::REQUESTED_TEMP_VENT_MODE,
            vent_mode_kind(),
            rws,
        ),
        RegisterField::new(
            REQUESTED_TEMP_VENT_SUB_MODE,
            reg::REQUESTED_TEMP_VENT_SUB_MODE,
            FieldKind::U16,
            rws,
        )
        .with_max(255.0),
        RegisterField::new(FILTER_RESET, reg::FILTER_RESET, FieldKind::U16, Access::WRITE_STATUS),
        RegisterField::new(BASIC_VENT_ENABLE, reg::BASIC_VENT_ENABLE, FieldKind::U16, rws)
            .with_max(1.0),
        RegisterField::new(BASIC_VENT_LEVEL, reg::BASIC_VENT_LEVEL, FieldKind::U16, rws)
            .with_max(100.0),
        RegisterField::new(OVERRIDE_TIME_MANUAL, 42009, FieldKind::U16, Access::READ_WRITE),
        RegisterField::new(PRODUCT_VARIANT, 42010, FieldKind::U16, rws).with_max(255.0),
        RegisterField::new(
            CO2_CONTROL_SETPOINT,
            reg::CO2_CONTROL_SETPOINT,
            FieldKind::U16,
            Access::READ_WRITE,
        ),
        RegisterField::new(SYSTEM_VENT_CONFIG, 42021, FieldKind::U16, rws).with_max(255.0),
    ];

    DeviceProfile::new(product::VMD_07RPS13, "VMD-07RPS13", 1)
        .with_capability(Capability::NodeInfo)
        .with_capability(Capability::VentilationV1)
        .with_fields(common::node_fields())
        .with_fields(common::device_fields())
        .with_fields(unit)
}
