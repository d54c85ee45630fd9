//! Registers every RF node exposes, bridge included

use crate::codec::{EnumEntry, FieldKind};
use crate::profile::{Access, RegisterField};

pub mod fields {
    pub const RF_ADDRESS: &str = "rf_address";
    pub const PRODUCT_ID: &str = "product_id";
    pub const SOFTWARE_VERSION: &str = "software_version";
    pub const OEM_NUMBER: &str = "oem_number";
    pub const RF_CAPABILITIES: &str = "rf_capabilities";
    pub const MANUFACTURE_DATE: &str = "manufacture_date";
    pub const SOFTWARE_BUILD_DATE: &str = "software_build_date";
    pub const PRODUCT_NAME: &str = "product_name";
    pub const RECEIVED_PRODUCT_ID: &str = "received_product_id";
    pub const RF_COMM_STATUS: &str = "rf_comm_status";
    pub const BATTERY_STATUS: &str = "battery_status";
    pub const FAULT_STATUS: &str = "fault_status";

    pub const RF_LAST_SEEN: &str = "rf_last_seen";
    pub const VALUE_ERROR_STATUS: &str = "value_error_status";
    pub const RF_LAST_RSSI: &str = "rf_last_rssi";
    pub const BOUND_STATUS: &str = "bound_status";
}

pub mod reg {
    pub const RF_ADDRESS: u16 = 40000;
    pub const PRODUCT_ID: u16 = 40002;
    pub const SOFTWARE_VERSION: u16 = 40004;
    pub const OEM_NUMBER: u16 = 40005;
    pub const RF_CAPABILITIES: u16 = 40006;
    pub const MANUFACTURE_DATE: u16 = 40007;
    pub const SOFTWARE_BUILD_DATE: u16 = 40009;
    pub const PRODUCT_NAME: u16 = 40011;
    pub const RECEIVED_PRODUCT_ID: u16 = 40021;
    pub const RF_LAST_SEEN: u16 = 40100;
    pub const RF_COMM_STATUS: u16 = 40101;
    pub const BATTERY_STATUS: u16 = 40102;
    pub const FAULT_STATUS: u16 = 40103;
    pub const VALUE_ERROR_STATUS: u16 = 40104;
    pub const RF_LAST_RSSI: u16 = 40109;
    pub const BOUND_STATUS: u16 = 40110;
}

/// Length of the product name register block, in words
pub const PRODUCT_NAME_WORDS: u16 = 10;

pub(crate) fn entries(pairs: &[(u16, &str)]) -> Vec<EnumEntry> {
    pairs
        .iter()
        .map(|(value, label)| EnumEntry {
            value: *value,
            label: (*label).to_string(),
        })
        .collect()
}

/// Identity and link registers shared by the bridge and all devices
pub fn node_fields() -> Vec<RegisterField> {
    use fields::*;

    vec![
        RegisterField::new(RF_ADDRESS, reg::RF_ADDRESS, FieldKind::U32, Access::READ),
        RegisterField::new(PRODUCT_ID, reg::PRODUCT_ID, FieldKind::U32, Access::READ),
        RegisterField::new(
            SOFTWARE_VERSION,
            reg::SOFTWARE_VERSION,
            FieldKind::U16,
            Access::READ,
        ),
        RegisterField::new(OEM_NUMBER, reg::OEM_NUMBER, FieldKind::U16, Access::READ),
        RegisterField::new(
            RF_CAPABILITIES,
            reg::RF_CAPABILITIES,
            FieldKind::U16,
            Access::READ,
        ),
        RegisterField::new(
            MANUFACTURE_DATE,
            reg::MANUFACTURE_DATE,
            FieldKind::Date,
            Access::READ,
        ),
        RegisterField::new(
            SOFTWARE_BUILD_DATE,
            reg::SOFTWARE_BUILD_DATE,
            FieldKind::Date,
            Access::READ,
        ),
        RegisterField::new(
            PRODUCT_NAME,
            reg::PRODUCT_NAME,
            FieldKind::Text {
                words: PRODUCT_NAME_WORDS,
            },
            Access::READ,
        ),
        RegisterField::new(
            RECEIVED_PRODUCT_ID,
            reg::RECEIVED_PRODUCT_ID,
            FieldKind::U32,
            Access::READ,
        ),
        RegisterField::new(
            RF_COMM_STATUS,
            reg::RF_COMM_STATUS,
            FieldKind::Enum {
                values: entries(&[(0, "no_error"), (1, "error")]),
            },
            Access::READ,
        ),
        RegisterField::new(
            BATTERY_STATUS,
            reg::BATTERY_STATUS,
            FieldKind::U16,
            Access::READ,
        ),
        RegisterField::new(FAULT_STATUS, reg::FAULT_STATUS, FieldKind::U16, Access::READ),
    ]
}

/// Registers the bridge keeps about each bound RF device
pub fn device_fields() -> Vec<RegisterField> {
    use fields::*;

    vec![
        RegisterField::new(RF_LAST_SEEN, reg::RF_LAST_SEEN, FieldKind::U16, Access::READ),
        RegisterField::new(
            VALUE_ERROR_STATUS,
            reg::VALUE_ERROR_STATUS,
            FieldKind::Enum {
                values: entries(&[(0, "no_error"), (1, "error")]),
            },
            Access::READ,
        ),
        RegisterField::new(RF_LAST_RSSI, reg::RF_LAST_RSSI, FieldKind::I16, Access::READ),
        RegisterField::new(
            BOUND_STATUS,
            reg::BOUND_STATUS,
            FieldKind::Enum {
                values: entries(&[(0, "no_change"), (1, "rebound"), (2, "new_bound")]),
            },
            Access::READ,
        ),
    ]
}
