//! Airlink - client library for RF nodes behind a Modbus-RTU bridge
//!
//! The bridge exposes every bound RF device as a virtual Modbus slave with a
//! product specific register layout. This crate hides the raw registers
//! behind typed, per-device accessors and drives the binding procedure that
//! makes new devices appear on the bus.
//!
//! # Architecture
//!
//! ```text
//! caller -> Node / device wrappers -> codec -> ModbusSession -> ModbusTransport -> bridge
//!                 ^
//!  BindingSession +-- BridgeController -- ProfileRegistry
//! ```
//!
//! - [`codec`] converts register words to and from typed [`Value`]s
//! - [`profile`] holds the register schema per product code
//! - [`session`] serializes requests and retries transient faults
//! - [`node`] is the per-slave handle with a staleness-bounded cache
//! - [`bridge`] owns the bridge state and hands out nodes
//! - [`binding`] is the polled state machine for binding new devices
//!
//! # Example
//!
//! ```no_run
//! use airlink::{AirlinkConfig, BridgeController};
//!
//! # async fn demo() -> airlink::Result<()> {
//! let config = AirlinkConfig::load(None)?;
//! let bridge = BridgeController::connect(&config)?;
//! for address in bridge.list_bound_slaves().await? {
//!     let node = bridge.node(address).await?;
//!     println!("{} rf address {:08X}", node, node.rf_address().await?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod binding;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod node;
pub mod profile;
pub mod protocol;
pub mod session;
pub mod transport;

pub use binding::{BindingFailure, BindingRole, BindingSession, BindingState};
pub use bridge::{BridgeController, BridgeState, ResetMode};
pub use codec::{EnumValue, FieldKind, Value, ValueStatus};
pub use config::AirlinkConfig;
pub use device::Device;
pub use error::{AirlinkError, Result, TransportError};
pub use node::{Node, Reading};
pub use profile::{Access, Capability, DeviceProfile, ProfileRegistry, RegisterField};
pub use session::{ModbusSession, RetryPolicy, SessionStats};
pub use transport::ModbusTransport;
