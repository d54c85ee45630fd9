//! BRDG-02R13 RF bridge

use super::common::{self, entries};
use super::product;
use crate::codec::FieldKind;
use crate::profile::{Access, Capability, DeviceProfile, RegisterField};

pub mod fields {
    pub const CUSTOMER_PRODUCT_ID: &str = "customer_product_id";
    pub const UTC_TIME: &str = "utc_time";
    pub const LOCAL_TIME: &str = "local_time";
    pub const UPTIME: &str = "uptime";
    pub const DAYLIGHT_SAVING_TYPE: &str = "daylight_saving_type";
    pub const TIMEZONE_OFFSET: &str = "timezone_offset";
    pub const OEM_CODE: &str = "oem_code";
    pub const MODBUS_EVENTS: &str = "modbus_events";
    pub const RESET_DEVICE: &str = "reset_device";
    pub const CUSTOMER_NODE_ID: &str = "customer_node_id";
    pub const SERIAL_PARITY: &str = "serial_parity";
    pub const SERIAL_STOP_BITS: &str = "serial_stop_bits";
    pub const SERIAL_BAUDRATE: &str = "serial_baudrate";
    pub const SLAVE_ADDRESS: &str = "slave_address";
    pub const MESSAGES_SENT_CURRENT_HOUR: &str = "messages_sent_current_hour";
    pub const MESSAGES_SENT_LAST_HOUR: &str = "messages_sent_last_hour";
    pub const RF_LOAD_CURRENT_HOUR: &str = "rf_load_current_hour";
    pub const RF_LOAD_LAST_HOUR: &str = "rf_load_last_hour";
    pub const BINDING_PRODUCT_ID: &str = "binding_product_id";
    pub const BINDING_PRODUCT_SERIAL: &str = "binding_product_serial";
    pub const BINDING_COMMAND: &str = "binding_command";
    pub const CREATE_NODE: &str = "create_node";
    pub const FIRST_ADDRESS_TO_ASSIGN: &str = "first_address_to_assign";
    pub const REMOVE_NODE: &str = "remove_node";
    pub const BINDING_STATUS: &str = "binding_status";
    pub const NUMBER_OF_NODES: &str = "number_of_nodes";
}

pub mod reg {
    pub const CUSTOMER_PRODUCT_ID: u16 = 40023;
    pub const UTC_TIME: u16 = 41015;
    pub const LOCAL_TIME: u16 = 41017;
    pub const UPTIME: u16 = 41019;
    pub const DAYLIGHT_SAVING_TYPE: u16 = 41021;
    pub const TIMEZONE_OFFSET: u16 = 41022;
    pub const OEM_CODE: u16 = 41101;
    pub const MODBUS_EVENTS: u16 = 41103;
    pub const RESET_DEVICE: u16 = 41107;
    pub const CUSTOMER_NODE_ID: u16 = 41108;
    pub const SERIAL_PARITY: u16 = 41998;
    pub const SERIAL_STOP_BITS: u16 = 41999;
    pub const SERIAL_BAUDRATE: u16 = 42000;
    pub const SLAVE_ADDRESS: u16 = 42001;
    pub const MESSAGES_SENT_CURRENT_HOUR: u16 = 42100;
    pub const MESSAGES_SENT_LAST_HOUR: u16 = 42101;
    pub const RF_LOAD_CURRENT_HOUR: u16 = 42102;
    pub const RF_LOAD_LAST_HOUR: u16 = 42104;
    pub const BINDING_PRODUCT_ID: u16 = 43000;
    pub const BINDING_PRODUCT_SERIAL: u16 = 43002;
    pub const BINDING_COMMAND: u16 = 43004;
    pub const CREATE_NODE: u16 = 43005;
    pub const FIRST_ADDRESS_TO_ASSIGN: u16 = 43006;
    pub const REMOVE_NODE: u16 = 43399;
    pub const BINDING_STATUS: u16 = 43900;
    pub const NUMBER_OF_NODES: u16 = 43901;
    /// First of the bound node address slots
    pub const NODE_ADDRESS_1: u16 = 43902;
}

/// Number of bound node address slots after NUMBER_OF_NODES
pub const NODE_SLOTS: u16 = 32;

/// Name of the `n`th bound node address slot, counting from 1
pub fn node_slot_field(n: u16) -> String {
    format!("node_address_{n}")
}

pub fn profile() -> DeviceProfile {
    use fields::*;

    let rw = Access::READ_WRITE;
    let mut bridge = vec![
        RegisterField::new(
            CUSTOMER_PRODUCT_ID,
            reg::CUSTOMER_PRODUCT_ID,
            FieldKind::U16,
            rw,
        ),
        RegisterField::new(UTC_TIME, reg::UTC_TIME, FieldKind::DateTime, rw),
        RegisterField::new(LOCAL_TIME, reg::LOCAL_TIME, FieldKind::DateTime, Access::READ),
        RegisterField::new(UPTIME, reg::UPTIME, FieldKind::U32, Access::READ),
        RegisterField::new(
            DAYLIGHT_SAVING_TYPE,
            reg::DAYLIGHT_SAVING_TYPE,
            FieldKind::U16,
            rw,
        ),
        RegisterField::new(TIMEZONE_OFFSET, reg::TIMEZONE_OFFSET, FieldKind::U16, rw),
        RegisterField::new(OEM_CODE, reg::OEM_CODE, FieldKind::U16, rw).with_max(255.0),
        RegisterField::new(
            MODBUS_EVENTS,
            reg::MODBUS_EVENTS,
            FieldKind::Enum {
                values: entries(&[
                    (0, "no_events"),
                    (1, "bridge_events"),
                    (2, "node_events"),
                    (3, "data_events"),
                ]),
            },
            rw,
        ),
        RegisterField::new(
            RESET_DEVICE,
            reg::RESET_DEVICE,
            FieldKind::Enum {
                values: entries(&[(12345, "soft_reset"), (56789, "factory_reset")]),
            },
            Access::WRITE,
        ),
        RegisterField::new(
            CUSTOMER_NODE_ID,
            reg::CUSTOMER_NODE_ID,
            FieldKind::Text { words: 10 },
            Access::WRITE,
        ),
        RegisterField::new(
            SERIAL_PARITY,
            reg::SERIAL_PARITY,
            FieldKind::Enum {
                values: entries(&[(0, "none"), (1, "odd"), (2, "even")]),
            },
            rw,
        ),
        RegisterField::new(
            SERIAL_STOP_BITS,
            reg::SERIAL_STOP_BITS,
            FieldKind::Enum {
                values: entries(&[(0, "one"), (1, "two")]),
            },
            rw,
        ),
        RegisterField::new(
            SERIAL_BAUDRATE,
            reg::SERIAL_BAUDRATE,
            FieldKind::Enum {
                values: entries(&[
                    (0, "300"),
                    (1, "600"),
                    (2, "1200"),
                    (3, "2400"),
                    (4, "4800"),
                    (5, "9600"),
                    (6, "19200"),
                    (7, "38400"),
                    (8, "57600"),
                    (9, "115200"),
                ]),
            },
            rw,
        ),
        RegisterField::new(SLAVE_ADDRESS, reg::SLAVE_ADDRESS, FieldKind::U16, rw)
            .with_range(1.0, 247.0),
        RegisterField::new(
            MESSAGES_SENT_CURRENT_HOUR,
            reg::MESSAGES_SENT_CURRENT_HOUR,
            FieldKind::U16,
            Access::READ,
        ),
        RegisterField::new(
            MESSAGES_SENT_LAST_HOUR,
            reg::MESSAGES_SENT_LAST_HOUR,
            FieldKind::U16,
            Access::READ,
        ),
        RegisterField::new(
            RF_LOAD_CURRENT_HOUR,
            reg::RF_LOAD_CURRENT_HOUR,
            FieldKind::F32,
            Access::READ,
        ),
        RegisterField::new(
            RF_LOAD_LAST_HOUR,
            reg::RF_LOAD_LAST_HOUR,
            FieldKind::F32,
            Access::READ,
        ),
        RegisterField::new(
            BINDING_PRODUCT_ID,
            reg::BINDING_PRODUCT_ID,
            FieldKind::U32,
            rw,
        ),
        RegisterField::new(
            BINDING_PRODUCT_SERIAL,
            reg::BINDING_PRODUCT_SERIAL,
            FieldKind::U32,
            rw,
        ),
        RegisterField::new(
            BINDING_COMMAND,
            reg::BINDING_COMMAND,
            FieldKind::U16,
            Access::WRITE,
        ),
        RegisterField::new(CREATE_NODE, reg::CREATE_NODE, FieldKind::U16, Access::WRITE)
            .with_range(1.0, 247.0),
        RegisterField::new(
            FIRST_ADDRESS_TO_ASSIGN,
            reg::FIRST_ADDRESS_TO_ASSIGN,
            FieldKind::U16,
            rw,
        )
        .with_range(1.0, 247.0),
        RegisterField::new(REMOVE_NODE, reg::REMOVE_NODE, FieldKind::U16, Access::WRITE)
            .with_range(1.0, 247.0),
        RegisterField::new(
            BINDING_STATUS,
            reg::BINDING_STATUS,
            FieldKind::Enum {
                values: entries(&[
                    (0, "not_available"),
                    (1, "outgoing_initialized"),
                    (2, "outgoing_completed"),
                    (3, "incoming_active"),
                    (4, "incoming_completed"),
                    (5, "learning_completed"),
                    (10, "autodetect_window_closed"),
                    (100, "failed_no_answer"),
                    (101, "failed_incompatible_device"),
                    (102, "failed_node_list_full"),
                    (103, "failed_address_invalid"),
                    (104, "window_closed_without_binding"),
                    (105, "failed_serial_invalid"),
                    (200, "unknown_binding_command"),
                    (201, "unknown_product_type"),
                ]),
            },
            Access::READ,
        ),
        RegisterField::new(
            NUMBER_OF_NODES,
            reg::NUMBER_OF_NODES,
            FieldKind::U16,
            Access::READ,
        ),
    ];
    bridge.extend((1..=NODE_SLOTS).map(|n| {
        RegisterField::new(
            node_slot_field(n),
            reg::NODE_ADDRESS_1 + n - 1,
            FieldKind::U16,
            Access::READ,
        )
    }));

    DeviceProfile::new(product::BRDG_02R13, "BRDG-02R13", 1)
        .with_capability(Capability::NodeInfo)
        .with_capability(Capability::BridgeControl)
        .with_fields(common::node_fields())
        .with_fields(bridge)
}
