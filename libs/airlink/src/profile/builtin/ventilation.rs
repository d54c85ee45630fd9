//! VMD-02RPS78 ventilation unit controller

use super::common::{self, entries};
use super::product;
use crate::codec::{FieldKind, FlagEntry};
use crate::profile::{Access, Capability, DeviceProfile, RegisterField};

pub mod fields {
    pub const CURRENT_VENTILATION_SPEED: &str = "current_ventilation_speed";
    pub const FAN_SPEED_EXHAUST: &str = "fan_speed_exhaust";
    pub const FAN_SPEED_SUPPLY: &str = "fan_speed_supply";
    pub const ERROR_CODE: &str = "error_code";
    pub const OVERRIDE_REMAINING_TIME: &str = "override_remaining_time";
    pub const TEMPERATURE_INDOOR: &str = "temperature_indoor";
    pub const TEMPERATURE_OUTDOOR: &str = "temperature_outdoor";
    pub const TEMPERATURE_EXHAUST: &str = "temperature_exhaust";
    pub const TEMPERATURE_SUPPLY: &str = "temperature_supply";
    pub const PREHEATER: &str = "preheater";
    pub const FILTER_DIRTY: &str = "filter_dirty";
    pub const DEFROST: &str = "defrost";
    pub const BYPASS_POSITION: &str = "bypass_position";
    pub const HUMIDITY_INDOOR: &str = "humidity_indoor";
    pub const HUMIDITY_OUTDOOR: &str = "humidity_outdoor";
    pub const FLOW_INLET: &str = "flow_inlet";
    pub const FLOW_OUTLET: &str = "flow_outlet";
    pub const AIR_QUALITY: &str = "air_quality";
    pub const AIR_QUALITY_BASIS: &str = "air_quality_basis";
    pub const CO2_LEVEL: &str = "co2_level";
    pub const POST_HEATER: &str = "post_heater";
    pub const CAPABILITIES: &str = "capabilities";
    pub const FILTER_REMAINING_DAYS: &str = "filter_remaining_days";
    pub const FILTER_DURATION: &str = "filter_duration";
    pub const FILTER_REMAINING_PERCENT: &str = "filter_remaining_percent";
    pub const FAN_RPM_EXHAUST: &str = "fan_rpm_exhaust";
    pub const FAN_RPM_SUPPLY: &str = "fan_rpm_supply";
    pub const BYPASS_MODE: &str = "bypass_mode";
    pub const BYPASS_STATUS: &str = "bypass_status";
    pub const REQUESTED_VENTILATION_SPEED: &str = "requested_ventilation_speed";
    pub const OVERRIDE_TIME_LOW: &str = "override_time_low";
    pub const OVERRIDE_TIME_MID: &str = "override_time_mid";
    pub const OVERRIDE_TIME_HIGH: &str = "override_time_high";
    pub const REQUESTED_BYPASS_MODE: &str = "requested_bypass_mode";
    pub const FILTER_RESET: &str = "filter_reset";
    pub const FAN_SPEED_AWAY_SUPPLY: &str = "fan_speed_away_supply";
    pub const FAN_SPEED_AWAY_EXHAUST: &str = "fan_speed_away_exhaust";
    pub const FAN_SPEED_LOW_SUPPLY: &str = "fan_speed_low_supply";
    pub const FAN_SPEED_LOW_EXHAUST: &str = "fan_speed_low_exhaust";
    pub const FAN_SPEED_MID_SUPPLY: &str = "fan_speed_mid_supply";
    pub const FAN_SPEED_MID_EXHAUST: &str = "fan_speed_mid_exhaust";
    pub const FAN_SPEED_HIGH_SUPPLY: &str = "fan_speed_high_supply";
    pub const FAN_SPEED_HIGH_EXHAUST: &str = "fan_speed_high_exhaust";
    pub const FROST_PROTECTION_SETPOINT: &str = "frost_protection_setpoint";
    pub const PREHEATER_SETPOINT: &str = "preheater_setpoint";
    pub const FREE_VENTILATION_HEATING_SETPOINT: &str = "free_ventilation_heating_setpoint";
    pub const FREE_VENTILATION_COOLING_OFFSET: &str = "free_ventilation_cooling_offset";
}

/// Longest temporary speed override the unit accepts, in minutes
pub const MAX_OVERRIDE_MINUTES: f64 = 18.0 * 60.0;

pub(crate) fn requested_speed_kind() -> FieldKind {
    FieldKind::Enum {
        values: entries(&[
            (0, "off"),
            (1, "away"),
            (2, "low"),
            (3, "mid"),
            (4, "high"),
            (5, "auto"),
            (7, "boost"),
        ]),
    }
}

pub(crate) fn error_code_kind() -> FieldKind {
    FieldKind::Enum {
        values: entries(&[
            (0, "no_error"),
            (1, "non_specific_fault"),
            (2, "emergency_stop"),
            (3, "fan_1_error"),
            (4, "x22_sensor_error"),
            (5, "x23_sensor_error"),
            (6, "x21_sensor_error"),
            (7, "x20_sensor_error"),
            (8, "fan_2_error"),
            (254, "binding_mode_active"),
            (255, "identification_active"),
        ]),
    }
}

fn bypass_mode_kind() -> FieldKind {
    FieldKind::Enum {
        values: entries(&[(0, "close"), (100, "open"), (255, "auto")]),
    }
}

fn capability_flags() -> FieldKind {
    let flags = [
        (0x0001, "pre_heater"),
        (0x0002, "post_heater"),
        (0x0008, "night_mode"),
        (0x0010, "speed_10"),
        (0x0020, "speed_9"),
        (0x0040, "speed_8"),
        (0x0080, "speed_7"),
        (0x0100, "speed_6"),
        (0x0200, "speed_5"),
        (0x0400, "speed_4"),
        (0x0800, "auto_mode"),
        (0x1000, "boost_mode"),
        (0x2000, "timer"),
        (0x8000, "off"),
    ];
    FieldKind::Flags {
        flags: flags
            .iter()
            .map(|(mask, label)| FlagEntry {
                mask: *mask,
                label: (*label).to_string(),
            })
            .collect(),
    }
}

pub fn profile() -> DeviceProfile {
    use fields::*;

    let rs = Access::READ_STATUS;
    let rws = Access::READ_WRITE_STATUS;
    let u16_rs = |name: &str, address: u16| RegisterField::new(name, address, FieldKind::U16, rs);
    let f32_rs = |name: &str, address: u16| RegisterField::new(name, address, FieldKind::F32, rs);
    let preset = |name: &str, address: u16, max: f64| {
        RegisterField::new(name, address, FieldKind::U16, rws).with_max(max)
    };
    let setpoint = |name: &str, address: u16| RegisterField::new(name, address, FieldKind::F32, rws);

    let unit = vec![
        RegisterField::new(
            CURRENT_VENTILATION_SPEED,
            41000,
            FieldKind::Enum {
                values: entries(&[
                    (0, "off"),
                    (1, "low"),
                    (2, "mid"),
                    (3, "high"),
                    (11, "override_low"),
                    (12, "override_mid"),
                    (13, "override_high"),
                    (21, "away"),
                    (23, "boost"),
                    (24, "auto"),
                ]),
            },
            rs,
        ),
        u16_rs(FAN_SPEED_EXHAUST, 41001),
        u16_rs(FAN_SPEED_SUPPLY, 41002),
        RegisterField::new(ERROR_CODE, 41003, error_code_kind(), rs),
        u16_rs(OVERRIDE_REMAINING_TIME, 41004),
        f32_rs(TEMPERATURE_INDOOR, 41005),
        f32_rs(TEMPERATURE_OUTDOOR, 41007),
        f32_rs(TEMPERATURE_EXHAUST, 41009),
        f32_rs(TEMPERATURE_SUPPLY, 41011),
        u16_rs(PREHEATER, 41013),
        u16_rs(FILTER_DIRTY, 41014),
        u16_rs(DEFROST, 41015),
        u16_rs(BYPASS_POSITION, 41016),
        u16_rs(HUMIDITY_INDOOR, 41017),
        u16_rs(HUMIDITY_OUTDOOR, 41018),
        f32_rs(FLOW_INLET, 41019),
        f32_rs(FLOW_OUTLET, 41021),
        u16_rs(AIR_QUALITY, 41023),
        u16_rs(AIR_QUALITY_BASIS, 41024),
        u16_rs(CO2_LEVEL, 41025),
        u16_rs(POST_HEATER, 41026),
        RegisterField::new(CAPABILITIES, 41027, capability_flags(), rs),
        u16_rs(FILTER_REMAINING_DAYS, 41040),
        u16_rs(FILTER_DURATION, 41041),
        u16_rs(FILTER_REMAINING_PERCENT, 41042),
        u16_rs(FAN_RPM_EXHAUST, 41043),
        u16_rs(FAN_RPM_SUPPLY, 41044),
        RegisterField::new(BYPASS_MODE, 41050, bypass_mode_kind(), rs),
        u16_rs(BYPASS_STATUS, 41051),
        RegisterField::new(REQUESTED_VENTILATION_SPEED, 41500, requested_speed_kind(), rws),
        RegisterField::new(OVERRIDE_TIME_LOW, 41501, FieldKind::U16, Access::WRITE)
            .with_max(MAX_OVERRIDE_MINUTES),
        RegisterField::new(OVERRIDE_TIME_MID, 41502, FieldKind::U16, Access::WRITE)
            .with_max(MAX_OVERRIDE_MINUTES),
        RegisterField::new(OVERRIDE_TIME_HIGH, 41503, FieldKind::U16, Access::WRITE)
            .with_max(MAX_OVERRIDE_MINUTES),
        RegisterField::new(REQUESTED_BYPASS_MODE, 41550, bypass_mode_kind(), rws),
        RegisterField::new(FILTER_RESET, 42000, FieldKind::U16, Access::WRITE_STATUS),
        preset(FAN_SPEED_AWAY_SUPPLY, 42001, 40.0),
        preset(FAN_SPEED_AWAY_EXHAUST, 42002, 40.0),
        preset(FAN_SPEED_LOW_SUPPLY, 42003, 80.0),
        preset(FAN_SPEED_LOW_EXHAUST, 42004, 80.0),
        preset(FAN_SPEED_MID_SUPPLY, 42005, 100.0),
        preset(FAN_SPEED_MID_EXHAUST, 42006, 100.0),
        preset(FAN_SPEED_HIGH_SUPPLY, 42007, 100.0),
        preset(FAN_SPEED_HIGH_EXHAUST, 42008, 100.0),
        setpoint(FROST_PROTECTION_SETPOINT, 42009),
        setpoint(PREHEATER_SETPOINT, 42011),
        setpoint(FREE_VENTILATION_HEATING_SETPOINT, 42013),
        setpoint(FREE_VENTILATION_COOLING_OFFSET, 42015),
    ];

    DeviceProfile::new(product::VMD_02RPS78, "VMD-02RPS78", 1)
        .with_capability(Capability::NodeInfo)
        .with_capability(Capability::Ventilation)
        .with_fields(common::node_fields())
        .with_fields(common::device_fields())
        .with_fields(unit)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::codec::{self, Value};

    #[test]
    fn test_preset_limits() {
        let profile = profile();
        let away = profile.field(fields::FAN_SPEED_AWAY_SUPPLY).unwrap();
        assert!(codec::encode(away, &Value::Int(40)).is_ok());
        assert!(codec::encode(away, &Value::Int(41)).is_err());

        let override_low = profile.field(fields::OVERRIDE_TIME_LOW).unwrap();
        assert!(codec::encode(override_low, &Value::Int(1080)).is_ok());
        assert!(codec::encode(override_low, &Value::Int(1081)).is_err());
    }

    #[test]
    fn test_capability_flags_decode() {
        let profile = profile();
        let caps = profile.field(fields::CAPABILITIES).unwrap();
        assert_eq!(caps.kind.flag_labels(0x1801), vec!["pre_heater", "auto_mode", "boost_mode"]);
        assert!(codec::encode(caps, &Value::Flags(0x0004)).is_err());
    }
}
