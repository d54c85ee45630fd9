//! Modbus RTU wire format

pub mod constants;
pub mod pdu;
pub mod rtu;

pub use pdu::{ModbusPdu, PduBuilder};
