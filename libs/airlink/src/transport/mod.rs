//! Transport boundary
//!
//! A transport turns one request PDU for a slave into one response PDU. It
//! owns framing and the physical link; sequencing and retries live in
//! [`crate::session::ModbusSession`].

pub mod mock;
pub mod serial;
pub mod simulator;

use async_trait::async_trait;
use std::fmt;

use crate::error::TransportError;
use crate::protocol::ModbusPdu;

pub use mock::ScriptedTransport;
pub use serial::{Parity, RtuTransport, SerialConfig};
pub use simulator::{BridgeSimulator, SimulatedDevice};

/// Generic Modbus master capability
#[async_trait]
pub trait ModbusTransport: Send + fmt::Debug {
    /// Send `request` to `slave` and wait for its response
    ///
    /// Exception responses are returned as PDUs; the caller interprets them.
    async fn request(&mut self, slave: u8, request: &ModbusPdu)
        -> Result<ModbusPdu, TransportError>;

    /// Short name used in log lines
    fn name(&self) -> &str {
        "modbus"
    }
}
