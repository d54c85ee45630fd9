//! RF bridge controller
//!
//! [`BridgeController`] is the handle a caller holds per physical bridge. The
//! bridge is itself a [`Node`] with the BRDG-02R13 profile; on top of that the
//! controller owns the bridge state (OEM code, bound slave set, binding
//! window) and hands out one live [`Node`] per bound slave.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::binding::{BindingRole, BindingSession};
use crate::codec::Value;
use crate::config::{AirlinkConfig, BindingConfig, NodeConfig};
use crate::device::{register_enum, RegisterEnum};
use crate::error::{AirlinkError, Result};
use crate::node::Node;
use crate::profile::builtin::bridge::{fields, reg, NODE_SLOTS};
use crate::profile::builtin::common::reg as node_reg;
use crate::profile::builtin::product;
use crate::profile::ProfileRegistry;
use crate::session::ModbusSession;
use crate::transport::{Parity, RtuTransport};

/// Lowest slave address the bridge hands to a node
pub const FIRST_NODE_ADDRESS: u8 = 2;
pub const LAST_NODE_ADDRESS: u8 = 247;

register_enum! {
    /// Which events the bridge reports over Modbus
    ModbusEvents {
        NoEvents = 0,
        BridgeEvents = 1,
        NodeEvents = 2,
        DataEvents = 3,
    }
}

register_enum! {
    ResetMode {
        Soft = 12345,
        Factory = 56789,
    }
}

/// Snapshot of the state the controller owns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeState {
    /// Last OEM code read from or written to the bridge
    pub oem_code: Option<u8>,
    pub binding_active: bool,
    pub bound: BTreeSet<u8>,
}

/// Identity of one bound slave as listed by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundNode {
    pub address: u8,
    pub product_id: u32,
    pub rf_address: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RfMessageCounts {
    pub current_hour: u16,
    pub last_hour: u16,
}

/// Share of RF air time used, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RfLoad {
    pub current_hour: f64,
    pub last_hour: f64,
}

/// Serial settings the bridge applies on its Modbus port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BridgeSerialConfig {
    pub baud_rate: u32,
    pub parity: Parity,
    pub stop_bits: u8,
    pub slave_address: u8,
}

#[derive(Debug, Default)]
struct Ownership {
    oem_code: Option<u8>,
    bound: BTreeSet<u8>,
    /// Id of the binding session holding the window
    window: Option<u64>,
    next_window: u64,
}

#[derive(Debug)]
pub(crate) struct BridgeInner {
    pub(crate) address: u8,
    pub(crate) session: Arc<ModbusSession>,
    pub(crate) registry: Arc<ProfileRegistry>,
    pub(crate) node_config: NodeConfig,
    pub(crate) binding_config: BindingConfig,
    bridge_node: Arc<Node>,
    state: Mutex<Ownership>,
    nodes: DashMap<u8, Arc<Node>>,
}

impl BridgeInner {
    /// Take the exclusive binding window
    pub(crate) fn acquire_window(&self) -> Result<u64> {
        let mut state = self.state.lock();
        if state.window.is_some() {
            return Err(AirlinkError::BindingInProgress);
        }
        state.next_window += 1;
        let id = state.next_window;
        state.window = Some(id);
        Ok(id)
    }

    pub(crate) fn owns_window(&self, id: u64) -> bool {
        self.state.lock().window == Some(id)
    }

    pub(crate) fn release_window(&self, id: u64) {
        let mut state = self.state.lock();
        if state.window == Some(id) {
            state.window = None;
        }
    }

    pub(crate) fn is_bound(&self, address: u8) -> bool {
        self.state.lock().bound.contains(&address)
    }

    /// Lowest address no node and not the bridge itself occupies
    pub(crate) fn free_address(&self) -> Option<u8> {
        let state = self.state.lock();
        (FIRST_NODE_ADDRESS..=LAST_NODE_ADDRESS)
            .find(|a| *a != self.address && !state.bound.contains(a))
    }

    pub(crate) async fn write_bridge(&self, address: u16, words: &[u16]) -> Result<()> {
        self.session
            .write_registers(self.address, address, words)
            .await
    }

    pub(crate) async fn read_bridge(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.session
            .read_registers(self.address, address, count)
            .await
    }

    /// Current OEM code, always read from the bridge
    pub(crate) async fn read_oem_code(&self) -> Result<u8> {
        let words = self.read_bridge(reg::OEM_CODE, 1).await?;
        let raw = words.first().copied().unwrap_or_default();
        let code = u8::try_from(raw)
            .map_err(|_| AirlinkError::decode(format!("OEM code {raw} out of range")))?;
        self.state.lock().oem_code = Some(code);
        Ok(code)
    }

    pub(crate) async fn read_product_id(&self, slave: u8) -> Result<u32> {
        let words = self
            .session
            .read_registers(slave, node_reg::PRODUCT_ID, 2)
            .await?;
        join(&words)
    }

    pub(crate) async fn remove_node(&self, slave: u8) -> Result<()> {
        self.write_bridge(reg::REMOVE_NODE, &[u16::from(slave)])
            .await
    }

    /// Create the node for a freshly bound slave and record it as bound
    pub(crate) fn adopt(&self, node: Arc<Node>) -> Arc<Node> {
        let address = node.address();
        self.state.lock().bound.insert(address);
        self.nodes.entry(address).or_insert(node).clone()
    }

    pub(crate) fn new_node(&self, address: u8, product_id: u32) -> Result<Arc<Node>> {
        let profile = self.registry.lookup(product_id)?;
        Ok(Arc::new(Node::new(
            address,
            profile,
            self.session.clone(),
            self.node_config.staleness,
        )))
    }
}

fn join(words: &[u16]) -> Result<u32> {
    match words {
        [high, low] => Ok((u32::from(*high) << 16) | u32::from(*low)),
        _ => Err(AirlinkError::decode(format!(
            "expected 2 words, got {}",
            words.len()
        ))),
    }
}

fn check_node_address(address: u8) -> Result<()> {
    if (1..=LAST_NODE_ADDRESS).contains(&address) {
        Ok(())
    } else {
        Err(AirlinkError::InvalidAddress(format!(
            "{address} outside 1..={LAST_NODE_ADDRESS}"
        )))
    }
}

/// Handle to one RF bridge and its bound nodes
#[derive(Debug, Clone)]
pub struct BridgeController {
    inner: Arc<BridgeInner>,
}

impl BridgeController {
    pub fn new(
        session: Arc<ModbusSession>,
        registry: Arc<ProfileRegistry>,
        config: &AirlinkConfig,
    ) -> Result<Self> {
        let address = config.bridge.address;
        check_node_address(address)?;

        let profile = registry.lookup(product::BRDG_02R13)?;
        let bridge_node = Arc::new(Node::new(
            address,
            profile,
            session.clone(),
            config.node.staleness,
        ));

        Ok(Self {
            inner: Arc::new(BridgeInner {
                address,
                session,
                registry,
                node_config: config.node.clone(),
                binding_config: config.binding.clone(),
                bridge_node,
                state: Mutex::new(Ownership::default()),
                nodes: DashMap::new(),
            }),
        })
    }

    /// Open the configured serial port with the built-in profiles
    pub fn connect(config: &AirlinkConfig) -> Result<Self> {
        let mut transport = RtuTransport::new(config.serial.clone())?;
        transport.connect()?;
        let session = Arc::new(ModbusSession::new(transport, config.session.clone()));
        Self::new(session, Arc::new(ProfileRegistry::with_builtin()), config)
    }

    pub fn address(&self) -> u8 {
        self.inner.address
    }

    /// The bridge as a node, for fields without a typed accessor
    pub fn bridge(&self) -> &Arc<Node> {
        &self.inner.bridge_node
    }

    pub fn session(&self) -> &Arc<ModbusSession> {
        &self.inner.session
    }

    pub fn registry(&self) -> &Arc<ProfileRegistry> {
        &self.inner.registry
    }

    pub fn state(&self) -> BridgeState {
        let state = self.inner.state.lock();
        BridgeState {
            oem_code: state.oem_code,
            binding_active: state.window.is_some(),
            bound: state.bound.clone(),
        }
    }

    /// Read the bridge's node list and refresh the owned bound set
    ///
    /// Live nodes for slaves the bridge no longer lists are dropped.
    pub async fn list_bound_slaves(&self) -> Result<BTreeSet<u8>> {
        let words = self
            .inner
            .read_bridge(reg::NUMBER_OF_NODES, NODE_SLOTS + 1)
            .await?;
        let (count, slots) = words
            .split_first()
            .ok_or_else(|| AirlinkError::decode("empty node list"))?;
        let count = usize::from(*count).min(slots.len());

        let bound: BTreeSet<u8> = slots[..count]
            .iter()
            .filter(|a| (1..=u16::from(LAST_NODE_ADDRESS)).contains(*a))
            .map(|a| *a as u8)
            .collect();
        debug!("Bridge {} lists {} nodes: {:?}", self.inner.address, bound.len(), bound);

        self.inner.nodes.retain(|address, _| bound.contains(address));
        self.inner.state.lock().bound = bound.clone();
        Ok(bound)
    }

    /// Product id and RF address of every bound slave
    pub async fn bound_nodes(&self) -> Result<Vec<BoundNode>> {
        let mut result = Vec::new();
        for address in self.list_bound_slaves().await? {
            let words = self
                .inner
                .session
                .read_registers(address, node_reg::RF_ADDRESS, 4)
                .await?;
            let (rf_address, product_id) = words.split_at(words.len().min(2));
            result.push(BoundNode {
                address,
                rf_address: join(rf_address)?,
                product_id: join(product_id)?,
            });
        }
        Ok(result)
    }

    /// Node handle for a bound slave
    ///
    /// The product id is read once to pick the profile; later calls return
    /// the same handle while the slave stays bound.
    pub async fn node(&self, address: u8) -> Result<Arc<Node>> {
        check_node_address(address)?;
        if address == self.inner.address {
            return Ok(self.inner.bridge_node.clone());
        }
        if let Some(node) = self.inner.nodes.get(&address) {
            return Ok(node.clone());
        }

        if !self.inner.is_bound(address) {
            self.list_bound_slaves().await?;
            if !self.inner.is_bound(address) {
                return Err(AirlinkError::NodeNotBound(address));
            }
        }

        let product_id = self.inner.read_product_id(address).await?;
        let node = self.inner.new_node(address, product_id)?;
        debug!("Attached {}", node);
        Ok(self.inner.adopt(node))
    }

    pub async fn oem_code(&self) -> Result<u8> {
        self.inner.read_oem_code().await
    }

    pub async fn set_oem_code(&self, code: u8) -> Result<()> {
        self.inner
            .bridge_node
            .set(fields::OEM_CODE, u16::from(code))
            .await?;
        self.inner.state.lock().oem_code = Some(code);
        info!("Bridge {} OEM code set to 0x{:02X}", self.inner.address, code);
        Ok(())
    }

    /// Remove a node from the bridge
    pub async fn unbind(&self, address: u8) -> Result<()> {
        check_node_address(address)?;
        if address == self.inner.address {
            return Err(AirlinkError::InvalidAddress(format!(
                "{address} is the bridge itself"
            )));
        }

        self.inner.remove_node(address).await?;
        self.inner.nodes.remove(&address);
        self.inner.state.lock().bound.remove(&address);
        info!("Unbound slave {} from bridge {}", address, self.inner.address);
        Ok(())
    }

    /// Start a binding attempt at the lowest free slave address
    pub async fn enter_binding_mode(
        &self,
        role: BindingRole,
        timeout: Duration,
    ) -> Result<BindingSession> {
        self.bind_new(role, None, timeout).await
    }

    /// Start a binding attempt, optionally at a chosen slave address
    ///
    /// Fails with [`AirlinkError::BindingInProgress`] while another session
    /// holds the binding window.
    pub async fn bind_new(
        &self,
        role: BindingRole,
        address: Option<u8>,
        timeout: Duration,
    ) -> Result<BindingSession> {
        if self.inner.state.lock().window.is_some() {
            return Err(AirlinkError::BindingInProgress);
        }
        self.list_bound_slaves().await?;
        BindingSession::start(self.inner.clone(), role, address, timeout).await
    }

    /// Tell the bridge to leave binding mode and close the binding window
    ///
    /// An active session notices on its next poll and returns to idle.
    pub async fn exit_binding_mode(&self) -> Result<()> {
        self.inner
            .write_bridge(reg::BINDING_COMMAND, &[crate::binding::MODE_ABORT])
            .await?;
        self.inner.state.lock().window = None;
        info!("Bridge {} left binding mode", self.inner.address);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bridge registers
    // ------------------------------------------------------------------

    pub async fn utc_time(&self) -> Result<Option<DateTime<Utc>>> {
        let value = self.inner.bridge_node.get(fields::UTC_TIME).await?;
        Ok(value.as_datetime().flatten())
    }

    pub async fn set_utc_time(&self, time: DateTime<Utc>) -> Result<()> {
        self.inner
            .bridge_node
            .set(fields::UTC_TIME, Value::DateTime(time))
            .await
    }

    pub async fn uptime(&self) -> Result<Duration> {
        let secs = self.inner.bridge_node.get_i64(fields::UPTIME).await?;
        Ok(Duration::from_secs(secs.max(0) as u64))
    }

    pub async fn customer_product_id(&self) -> Result<u16> {
        let id = self
            .inner
            .bridge_node
            .get_i64(fields::CUSTOMER_PRODUCT_ID)
            .await?;
        Ok(id as u16)
    }

    pub async fn rf_sent_messages(&self) -> Result<RfMessageCounts> {
        let node = &self.inner.bridge_node;
        Ok(RfMessageCounts {
            current_hour: node.get_i64(fields::MESSAGES_SENT_CURRENT_HOUR).await? as u16,
            last_hour: node.get_i64(fields::MESSAGES_SENT_LAST_HOUR).await? as u16,
        })
    }

    pub async fn rf_load(&self) -> Result<RfLoad> {
        let node = &self.inner.bridge_node;
        Ok(RfLoad {
            current_hour: node.get_f64(fields::RF_LOAD_CURRENT_HOUR).await?,
            last_hour: node.get_f64(fields::RF_LOAD_LAST_HOUR).await?,
        })
    }

    pub async fn serial_config(&self) -> Result<BridgeSerialConfig> {
        let node = &self.inner.bridge_node;
        node.refresh(Some(
            &[
                fields::SERIAL_PARITY,
                fields::SERIAL_STOP_BITS,
                fields::SERIAL_BAUDRATE,
                fields::SLAVE_ADDRESS,
            ][..],
        ))
        .await?;

        let baud = node.get_enum(fields::SERIAL_BAUDRATE).await?;
        let baud_rate = baud
            .label
            .as_deref()
            .and_then(|label| label.parse().ok())
            .ok_or_else(|| AirlinkError::decode(format!("unknown baud rate code {}", baud.raw)))?;
        let parity = match node.get_enum(fields::SERIAL_PARITY).await?.raw {
            0 => Parity::None,
            1 => Parity::Odd,
            2 => Parity::Even,
            other => return Err(AirlinkError::decode(format!("unknown parity code {other}"))),
        };
        let stop_bits = match node.get_enum(fields::SERIAL_STOP_BITS).await?.raw {
            0 => 1,
            _ => 2,
        };

        Ok(BridgeSerialConfig {
            baud_rate,
            parity,
            stop_bits,
            slave_address: node.get_i64(fields::SLAVE_ADDRESS).await? as u8,
        })
    }

    /// Write the bridge's serial settings in one request
    ///
    /// Parity, stop bits, baud rate and slave address are adjacent registers.
    /// Once the bridge applies them, the transport has to be reopened with the
    /// same settings to reach it again.
    pub async fn set_serial_config(&self, config: BridgeSerialConfig) -> Result<()> {
        let parity = match config.parity {
            Parity::None => 0,
            Parity::Odd => 1,
            Parity::Even => 2,
        };
        let stop_bits = match config.stop_bits {
            1 => 0,
            2 => 1,
            other => {
                return Err(AirlinkError::invalid_value(
                    fields::SERIAL_STOP_BITS,
                    format!("{other} stop bits, expected 1 or 2"),
                ));
            },
        };

        info!("Bridge {}: serial config {:?}", self.address(), config);
        self.inner
            .bridge_node
            .set_many(&[
                (fields::SERIAL_PARITY, Value::Int(parity)),
                (fields::SERIAL_STOP_BITS, Value::Int(stop_bits)),
                (
                    fields::SERIAL_BAUDRATE,
                    Value::Text(config.baud_rate.to_string()),
                ),
                (
                    fields::SLAVE_ADDRESS,
                    Value::Int(i64::from(config.slave_address)),
                ),
            ])
            .await
    }

    pub async fn modbus_events(&self) -> Result<ModbusEvents> {
        let raw = self
            .inner
            .bridge_node
            .get_enum(fields::MODBUS_EVENTS)
            .await?
            .raw;
        Ok(ModbusEvents::from_raw(raw))
    }

    pub async fn set_modbus_events(&self, events: ModbusEvents) -> Result<()> {
        self.inner
            .bridge_node
            .set(fields::MODBUS_EVENTS, Value::Int(i64::from(events.to_raw())))
            .await
    }

    /// Restart the bridge; a factory reset also drops every bound node
    pub async fn reset(&self, mode: ResetMode) -> Result<()> {
        info!("Resetting bridge {} ({:?})", self.inner.address, mode);
        self.inner
            .bridge_node
            .set(fields::RESET_DEVICE, Value::Int(i64::from(mode.to_raw())))
            .await?;
        if mode == ResetMode::Factory {
            self.inner.nodes.clear();
            let mut state = self.inner.state.lock();
            state.bound.clear();
            state.oem_code = None;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::transport::{BridgeSimulator, SimulatedDevice};

    fn controller(sim: &BridgeSimulator) -> BridgeController {
        let config = AirlinkConfig::default();
        let session = Arc::new(ModbusSession::new(sim.clone(), config.session.clone()));
        BridgeController::new(session, Arc::new(ProfileRegistry::with_builtin()), &config).unwrap()
    }

    fn simulator() -> BridgeSimulator {
        BridgeSimulator::new(207)
            .with_device(2, SimulatedDevice::new(product::VMD_02RPS78, 0x0A00_0001))
            .with_device(5, SimulatedDevice::new(product::VMN_05LM02, 0x0A00_0002))
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_bound_slaves_single_read() {
        let sim = simulator();
        let bridge = controller(&sim);

        let bound = bridge.list_bound_slaves().await.unwrap();
        assert_eq!(bound.into_iter().collect::<Vec<_>>(), vec![2, 5]);
        assert_eq!(sim.request_count(), 1);
        assert_eq!(bridge.state().bound.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bound_nodes() {
        let sim = simulator();
        let bridge = controller(&sim);

        let nodes = bridge.bound_nodes().await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].product_id, product::VMD_02RPS78);
        assert_eq!(nodes[1].rf_address, 0x0A00_0002);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_handles_are_shared() {
        let sim = simulator();
        let bridge = controller(&sim);

        let first = bridge.node(2).await.unwrap();
        let second = bridge.node(2).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.profile().name, "VMD-02RPS78");

        assert!(matches!(
            bridge.node(9).await,
            Err(AirlinkError::NodeNotBound(9))
        ));
        assert!(matches!(
            bridge.node(0).await,
            Err(AirlinkError::InvalidAddress(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oem_code_round_trip() {
        let sim = simulator();
        let bridge = controller(&sim);

        bridge.set_oem_code(0x42).await.unwrap();
        assert_eq!(sim.register(207, reg::OEM_CODE), Some(0x42));
        assert_eq!(bridge.state().oem_code, Some(0x42));

        sim.set_oem_code(0x07);
        assert_eq!(bridge.oem_code().await.unwrap(), 0x07);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbind_drops_node() {
        let sim = simulator();
        let bridge = controller(&sim);

        let node = bridge.node(5).await.unwrap();
        bridge.unbind(5).await.unwrap();
        assert_eq!(sim.bound_slaves(), vec![2]);
        assert!(!bridge.state().bound.contains(&5));
        assert!(matches!(
            bridge.node(5).await,
            Err(AirlinkError::NodeNotBound(5))
        ));
        // The old handle still exists but the slave no longer answers
        assert!(node.get("rf_address").await.is_err());

        assert!(bridge.unbind(207).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bridge_registers() {
        let sim = simulator();
        sim.set_register(207, reg::UPTIME, 0);
        sim.set_register(207, reg::UPTIME + 1, 3600);
        sim.set_register(207, reg::SERIAL_PARITY, 2);
        sim.set_register(207, reg::SERIAL_STOP_BITS, 0);
        sim.set_register(207, reg::SERIAL_BAUDRATE, 6);
        sim.set_register(207, reg::SLAVE_ADDRESS, 207);
        sim.set_register(207, reg::MODBUS_EVENTS, 2);
        let bridge = controller(&sim);

        assert_eq!(bridge.uptime().await.unwrap(), Duration::from_secs(3600));
        assert_eq!(
            bridge.serial_config().await.unwrap(),
            BridgeSerialConfig {
                baud_rate: 19200,
                parity: Parity::Even,
                stop_bits: 1,
                slave_address: 207,
            }
        );
        assert_eq!(bridge.modbus_events().await.unwrap(), ModbusEvents::NodeEvents);

        let moved = BridgeSerialConfig {
            baud_rate: 115200,
            parity: Parity::None,
            stop_bits: 2,
            slave_address: 200,
        };
        let before = sim.request_count();
        bridge.set_serial_config(moved).await.unwrap();
        assert_eq!(sim.request_count(), before + 1);
        assert_eq!(sim.writes_to(207, reg::SERIAL_PARITY), vec![vec![0, 1, 9, 200]]);

        let before = sim.request_count();
        let odd_baud = BridgeSerialConfig {
            baud_rate: 14400,
            ..moved
        };
        assert!(matches!(
            bridge.set_serial_config(odd_baud).await,
            Err(AirlinkError::InvalidValue { .. })
        ));
        let three_stop_bits = BridgeSerialConfig {
            stop_bits: 3,
            ..moved
        };
        assert!(bridge.set_serial_config(three_stop_bits).await.is_err());
        assert_eq!(sim.request_count(), before);

        bridge.reset(ResetMode::Soft).await.unwrap();
        assert_eq!(sim.writes_to(207, reg::RESET_DEVICE), vec![vec![12345]]);
        assert!(bridge.reset(ResetMode::Unknown(1)).await.is_err());
    }
}
