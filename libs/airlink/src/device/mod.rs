//! Typed accessors per device class
//!
//! Thin wrappers over [`Node::get`](crate::node::Node::get) and
//! [`Node::set`](crate::node::Node::set) that speak in domain types instead of
//! field names. Each wrapper checks the profile's capability once at
//! construction.

/// Conversion between a register code and a closed set of values
///
/// Codes outside the set map to the `Unknown` variant every implementor
/// carries, so reserved values reported by newer firmware never fail a read.
pub trait RegisterEnum: Sized + Copy {
    fn from_raw(raw: u16) -> Self;
    fn to_raw(self) -> u16;
}

macro_rules! register_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant,)+
            Unknown(u16),
        }

        impl $crate::device::RegisterEnum for $name {
            fn from_raw(raw: u16) -> Self {
                match raw {
                    $($value => Self::$variant,)+
                    other => Self::Unknown(other),
                }
            }

            fn to_raw(self) -> u16 {
                match self {
                    $(Self::$variant => $value,)+
                    Self::Unknown(raw) => raw,
                }
            }
        }
    };
}
pub(crate) use register_enum;

mod info;
pub mod remote;
pub mod ventilation;
pub mod ventilation_v1;

use std::sync::Arc;

use crate::codec::Value;
use crate::error::{AirlinkError, Result};
use crate::node::Node;
use crate::profile::Capability;

pub use info::{BoundStatus, ErrorStatus, NodeSummary};
pub use remote::Remote;
pub use ventilation::{
    BypassMode, FilterState, Heater, OverrideSpeed, Preset, PresetFanSpeeds, RequestedSpeed,
    SensorStatus, Temperature, Temperatures, VentilationError, VentilationSpeed, VentilationUnit,
};
pub use ventilation_v1::{BasicVentilation, VentMode, VentilationV1Unit};

async fn read_u16(node: &Node, name: &str) -> Result<u16> {
    let value = node.get_i64(name).await?;
    u16::try_from(value)
        .map_err(|_| AirlinkError::decode(format!("{name} value {value} out of range")))
}

async fn read_enum<T: RegisterEnum>(node: &Node, name: &str) -> Result<T> {
    Ok(T::from_raw(node.get_enum(name).await?.raw))
}

async fn write_enum<T: RegisterEnum>(node: &Node, name: &str, value: T) -> Result<()> {
    // Unknown(raw) passes through and is rejected by the field's enum table
    node.set(name, Value::Int(i64::from(value.to_raw()))).await
}

/// Typed wrapper chosen by the capabilities of a node's profile
#[derive(Debug, Clone)]
pub enum Device {
    Ventilation(VentilationUnit),
    VentilationV1(VentilationV1Unit),
    Remote(Remote),
    /// Bridges and products without a typed wrapper
    Generic(Arc<Node>),
}

impl Device {
    pub fn from_node(node: Arc<Node>) -> Result<Self> {
        let profile = node.profile();
        if profile.supports(Capability::Ventilation) {
            Ok(Self::Ventilation(VentilationUnit::new(node)?))
        } else if profile.supports(Capability::VentilationV1) {
            Ok(Self::VentilationV1(VentilationV1Unit::new(node)?))
        } else if profile.supports(Capability::RemoteControl) {
            Ok(Self::Remote(Remote::new(node)?))
        } else {
            Ok(Self::Generic(node))
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        match self {
            Self::Ventilation(unit) => unit.node(),
            Self::VentilationV1(unit) => unit.node(),
            Self::Remote(remote) => remote.node(),
            Self::Generic(node) => node,
        }
    }
}
