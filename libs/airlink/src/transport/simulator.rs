//! Register-level bridge simulator
//!
//! Behaves like a BRDG-02R13 on the bus: the bridge and every bound node
//! answer holding register reads and writes, the node list registers follow
//! the bound set, and the binding registers run a scripted join. Clones share
//! state so tests can inspect the bus after handing the simulator to a session.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

use super::ModbusTransport;
use crate::error::TransportError;
use crate::profile::builtin::bridge::{reg as bridge_reg, NODE_SLOTS};
use crate::profile::builtin::common::reg as node_reg;
use crate::profile::builtin::product;
use crate::protocol::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_REGISTER,
};
use crate::protocol::ModbusPdu;

const ILLEGAL_FUNCTION: u8 = 0x01;
const ILLEGAL_DATA_ADDRESS: u8 = 0x02;

const MODE_ABORT: u16 = 0x00C8;
const MODE_ACCESSORY: u16 = 0x0014;

/// An RF device that can be bound to the simulated bridge
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    pub product_id: u32,
    pub rf_address: u32,
    pub oem_number: u16,
    registers: BTreeMap<u16, u16>,
}

impl SimulatedDevice {
    pub fn new(product_id: u32, rf_address: u32) -> Self {
        Self {
            product_id,
            rf_address,
            oem_number: 0,
            registers: BTreeMap::new(),
        }
    }

    pub fn with_oem(mut self, oem_number: u16) -> Self {
        self.oem_number = oem_number;
        self
    }

    pub fn with_register(mut self, address: u16, value: u16) -> Self {
        self.registers.insert(address, value);
        self
    }

    pub fn with_words(mut self, address: u16, words: &[u16]) -> Self {
        for (offset, word) in words.iter().enumerate() {
            self.registers.insert(address + offset as u16, *word);
        }
        self
    }

    fn register_map(&self) -> BTreeMap<u16, u16> {
        let mut map = self.registers.clone();
        for (address, words) in [
            (node_reg::RF_ADDRESS, split(self.rf_address)),
            (node_reg::PRODUCT_ID, split(self.product_id)),
            (node_reg::RECEIVED_PRODUCT_ID, split(self.product_id)),
        ] {
            map.insert(address, words[0]);
            map.insert(address + 1, words[1]);
        }
        map.insert(node_reg::OEM_NUMBER, self.oem_number);
        map
    }
}

fn split(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, value as u16]
}

#[derive(Debug)]
struct PendingJoin {
    target: u8,
    accessory: bool,
    polls_left: u32,
    device: SimulatedDevice,
}

#[derive(Debug)]
struct SimState {
    address: u8,
    registers: HashMap<(u8, u16), u16>,
    nodes: BTreeSet<u8>,
    joiner: Option<(SimulatedDevice, u32)>,
    pending: Option<PendingJoin>,
    reject_code: Option<u16>,
    failures: VecDeque<TransportError>,
    requests: Vec<(u8, ModbusPdu)>,
    writes: Vec<(u8, u16, Vec<u16>)>,
}

impl SimState {
    fn set(&mut self, slave: u8, address: u16, value: u16) {
        self.registers.insert((slave, address), value);
    }

    fn sync_node_list(&mut self) {
        let bridge = self.address;
        let nodes: Vec<u8> = self.nodes.iter().copied().collect();
        self.set(bridge, bridge_reg::NUMBER_OF_NODES, nodes.len() as u16);
        for slot in 0..NODE_SLOTS {
            let value = nodes.get(usize::from(slot)).map_or(0, |a| u16::from(*a));
            self.set(bridge, bridge_reg::NODE_ADDRESS_1 + slot, value);
        }
    }

    fn install(&mut self, slave: u8, device: &SimulatedDevice) {
        for (address, value) in device.register_map() {
            self.set(slave, address, value);
        }
        self.nodes.insert(slave);
        self.sync_node_list();
    }

    fn remove(&mut self, slave: u8) {
        if self.nodes.remove(&slave) {
            self.registers.retain(|(s, _), _| *s != slave);
            self.sync_node_list();
        }
    }

    fn binding_command(&mut self, value: u16) {
        let mode = value & 0x00FF;
        let target = (value >> 8) as u8;

        if mode == MODE_ABORT {
            self.pending = None;
            self.set(self.address, bridge_reg::BINDING_STATUS, 0);
            return;
        }

        let accessory = mode == MODE_ACCESSORY;
        if let Some(code) = self.reject_code {
            self.set(self.address, bridge_reg::BINDING_STATUS, code);
            return;
        }

        self.set(
            self.address,
            bridge_reg::BINDING_STATUS,
            if accessory { 3 } else { 1 },
        );
        if let Some((device, polls_left)) = self.joiner.take() {
            self.pending = Some(PendingJoin {
                target,
                accessory,
                polls_left,
                device,
            });
        }
    }

    /// Advance a pending join each time the status register is polled
    fn poll_binding(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return;
        }
        if let Some(pending) = self.pending.take() {
            debug!("Simulated device joined as slave {}", pending.target);
            self.install(pending.target, &pending.device);
            let status = if pending.accessory { 4 } else { 2 };
            self.set(self.address, bridge_reg::BINDING_STATUS, status);
        }
    }

    fn write(&mut self, slave: u8, start: u16, words: &[u16]) {
        for (offset, word) in words.iter().enumerate() {
            self.set(slave, start + offset as u16, *word);
        }
        self.writes.push((slave, start, words.to_vec()));

        if slave != self.address {
            return;
        }
        match (start, words.first()) {
            (bridge_reg::BINDING_COMMAND, Some(value)) => self.binding_command(*value),
            (bridge_reg::REMOVE_NODE, Some(value)) => self.remove(*value as u8),
            _ => {},
        }
    }

    fn read(&mut self, slave: u8, start: u16, count: u16) -> Option<Vec<u16>> {
        if slave == self.address
            && (start..start.saturating_add(count)).contains(&bridge_reg::BINDING_STATUS)
        {
            self.poll_binding();
        }

        let range = start..start.saturating_add(count);
        if !range.clone().any(|a| self.registers.contains_key(&(slave, a))) {
            return None;
        }
        Some(
            range
                .map(|a| self.registers.get(&(slave, a)).copied().unwrap_or(0))
                .collect(),
        )
    }
}

/// Simulated bridge with its bound nodes
#[derive(Debug, Clone)]
pub struct BridgeSimulator {
    state: Arc<Mutex<SimState>>,
}

impl BridgeSimulator {
    pub fn new(address: u8) -> Self {
        let mut state = SimState {
            address,
            registers: HashMap::new(),
            nodes: BTreeSet::new(),
            joiner: None,
            pending: None,
            reject_code: None,
            failures: VecDeque::new(),
            requests: Vec::new(),
            writes: Vec::new(),
        };
        let bridge = SimulatedDevice::new(product::BRDG_02R13, 0x0010_0001);
        for (reg, value) in bridge.register_map() {
            state.set(address, reg, value);
        }
        state.set(address, bridge_reg::OEM_CODE, 0);
        state.set(address, bridge_reg::BINDING_STATUS, 0);
        state.sync_node_list();

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Add an already bound node
    pub fn with_device(self, slave: u8, device: SimulatedDevice) -> Self {
        self.state.lock().install(slave, &device);
        self
    }

    pub fn set_oem_code(&self, code: u8) {
        let mut state = self.state.lock();
        let bridge = state.address;
        state.set(bridge, bridge_reg::OEM_CODE, u16::from(code));
    }

    pub fn set_register(&self, slave: u8, address: u16, value: u16) {
        self.state.lock().set(slave, address, value);
    }

    pub fn register(&self, slave: u8, address: u16) -> Option<u16> {
        self.state.lock().registers.get(&(slave, address)).copied()
    }

    /// The next binding command makes `device` join after `polls` status reads
    pub fn join_on_binding(&self, device: SimulatedDevice, polls: u32) {
        self.state.lock().joiner = Some((device, polls));
    }

    /// Answer the next binding commands with a failure status
    pub fn reject_binding(&self, code: u16) {
        self.state.lock().reject_code = Some(code);
    }

    /// Leave the binding status register at `code`, as a busy bridge would
    pub fn set_binding_status(&self, code: u16) {
        let mut state = self.state.lock();
        let bridge = state.address;
        state.set(bridge, bridge_reg::BINDING_STATUS, code);
    }

    /// Fail the next `times` requests with `error`
    pub fn fail_next(&self, error: TransportError, times: usize) {
        let mut state = self.state.lock();
        for _ in 0..times {
            state.failures.push_back(error.clone());
        }
    }

    pub fn bound_slaves(&self) -> Vec<u8> {
        self.state.lock().nodes.iter().copied().collect()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn requests(&self) -> Vec<(u8, ModbusPdu)> {
        self.state.lock().requests.clone()
    }

    /// Values written to `address` of `slave`, oldest first
    pub fn writes_to(&self, slave: u8, address: u16) -> Vec<Vec<u16>> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(s, a, _)| *s == slave && *a == address)
            .map(|(_, _, words)| words.clone())
            .collect()
    }

    fn handle(&self, slave: u8, request: &ModbusPdu) -> Result<ModbusPdu, TransportError> {
        let mut state = self.state.lock();
        state.requests.push((slave, request.clone()));

        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if slave != state.address && !state.nodes.contains(&slave) {
            // Nobody answers on this address
            return Err(TransportError::Timeout(0));
        }

        let data = request.as_slice();
        let function = request
            .function_code()
            .ok_or_else(|| TransportError::malformed("empty request"))?;
        let word_at = |offset: usize| {
            data.get(offset..offset + 2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .ok_or_else(|| TransportError::malformed("truncated request"))
        };

        match function {
            FC_READ_HOLDING_REGISTERS => {
                let (start, count) = (word_at(1)?, word_at(3)?);
                match state.read(slave, start, count) {
                    Some(words) => {
                        let mut response = vec![function, (words.len() * 2) as u8];
                        for word in words {
                            response.extend_from_slice(&word.to_be_bytes());
                        }
                        ModbusPdu::from_slice(&response)
                    },
                    None => exception(function, ILLEGAL_DATA_ADDRESS),
                }
            },
            FC_WRITE_SINGLE_REGISTER => {
                let (address, value) = (word_at(1)?, word_at(3)?);
                state.write(slave, address, &[value]);
                Ok(request.clone())
            },
            FC_WRITE_MULTIPLE_REGISTERS => {
                let (start, count) = (word_at(1)?, word_at(3)?);
                let words = (0..usize::from(count))
                    .map(|i| word_at(6 + i * 2))
                    .collect::<Result<Vec<_>, _>>()?;
                state.write(slave, start, &words);
                ModbusPdu::from_slice(data.get(..5).unwrap_or(data))
            },
            other => exception(other, ILLEGAL_FUNCTION),
        }
    }
}

fn exception(function: u8, code: u8) -> Result<ModbusPdu, TransportError> {
    ModbusPdu::from_slice(&[function | EXCEPTION_FLAG, code])
}

#[async_trait]
impl ModbusTransport for BridgeSimulator {
    async fn request(
        &mut self,
        slave: u8,
        request: &ModbusPdu,
    ) -> Result<ModbusPdu, TransportError> {
        self.handle(slave, request)
    }

    fn name(&self) -> &str {
        "simulator"
    }
}
