//! Binding state machine
//!
//! A [`BindingSession`] drives one attempt to bring a new RF device under the
//! bridge. The bridge gives no notification when a device joins, so progress
//! is observed by polling its binding status register: either call
//! [`BindingSession::poll`] yourself or let [`BindingSession::run`] do it on
//! the configured interval.
//!
//! ```text
//! Idle -> AwaitingDevice -> Negotiating -> Bound(addr)
//!              |                 |
//!              +-----------------+--> Failed(Timeout | OemMismatch | Rejected | UnknownProduct)
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeInner, FIRST_NODE_ADDRESS, LAST_NODE_ADDRESS};
use crate::error::{AirlinkError, Result};
use crate::node::Node;
use crate::profile::builtin::bridge::reg;
use crate::profile::builtin::common::reg as node_reg;

pub(crate) const MODE_CONTROLLER: u16 = 0x0003;
pub(crate) const MODE_CONTROLLER_WITH_SERIAL: u16 = 0x0004;
pub(crate) const MODE_ACCESSORY: u16 = 0x0014;
pub(crate) const MODE_ABORT: u16 = 0x00C8;

/// What the device being bound will be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingRole {
    /// A standalone controller such as a ventilation unit
    Controller { product: u32, serial: Option<u32> },
    /// An accessory (for example a remote) paired with a bound controller
    Accessory { controller: u8, product: u32 },
}

impl BindingRole {
    pub fn product(&self) -> u32 {
        match self {
            Self::Controller { product, .. } | Self::Accessory { product, .. } => *product,
        }
    }

    fn mode(&self) -> u16 {
        match self {
            Self::Controller { serial: None, .. } => MODE_CONTROLLER,
            Self::Controller { serial: Some(_), .. } => MODE_CONTROLLER_WITH_SERIAL,
            Self::Accessory { .. } => MODE_ACCESSORY,
        }
    }
}

/// Why a binding attempt ended without a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingFailure {
    /// The deadline passed before the device was bound
    Timeout,
    /// The device was produced for another OEM and has been removed again
    OemMismatch { bridge: u8, device: u16 },
    /// Status code the bridge reported instead of progress
    Rejected(u16),
    /// The device joined with a product code no profile describes and has
    /// been removed again
    UnknownProduct(u32),
}

impl fmt::Display for BindingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::OemMismatch { bridge, device } => write!(
                f,
                "OEM mismatch (bridge 0x{bridge:02X}, device 0x{device:02X})"
            ),
            Self::Rejected(code) => write!(f, "rejected by bridge ({})", describe_status(*code)),
            Self::UnknownProduct(code) => write!(f, "unknown product 0x{code:08X}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingState {
    Idle,
    AwaitingDevice,
    Negotiating,
    Bound(u8),
    Failed(BindingFailure),
}

impl BindingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Bound(_) | Self::Failed(_))
    }
}

impl fmt::Display for BindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingDevice => write!(f, "awaiting device"),
            Self::Negotiating => write!(f, "negotiating"),
            Self::Bound(address) => write!(f, "bound as slave {address}"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// How the bridge's binding status register is read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Waiting,
    Completed,
    Rejected(u16),
}

fn classify_status(code: u16) -> StatusClass {
    match code {
        0 | 1 | 3 => StatusClass::Waiting,
        2 | 4 | 5 => StatusClass::Completed,
        _ => StatusClass::Rejected(code),
    }
}

/// Text for a binding status code
pub fn describe_status(code: u16) -> &'static str {
    match code {
        0 => "not active",
        1 => "outgoing binding initialized",
        2 => "outgoing binding completed",
        3 => "incoming binding active",
        4 => "incoming binding completed",
        5 => "incoming binding completed, no space for new nodes",
        10 => "binding command on unknown node",
        100 => "outgoing binding failed, no answer",
        101 => "outgoing binding failed, incompatible device",
        102 => "outgoing binding failed, node list full",
        103 => "outgoing binding failed, Modbus address in use",
        104 => "incoming binding window closed",
        105 => "incoming binding failed, node list full",
        200 => "unknown binding command",
        201 => "invalid node address",
        _ => "unknown status",
    }
}

/// One binding attempt
///
/// Holds the bridge's exclusive binding window from creation until it reaches
/// a terminal state, is cancelled, or is dropped.
///
/// Dropping an unfinished session spawns the abort command on the current
/// tokio runtime and keeps the window until it has been sent. Prefer
/// [`BindingSession::cancel`], which reports a failed abort to the caller.
#[derive(Debug)]
pub struct BindingSession {
    bridge: Arc<BridgeInner>,
    window: u64,
    role: BindingRole,
    target: u8,
    deadline: Instant,
    state: BindingState,
    node: Option<Arc<Node>>,
    released: bool,
}

impl BindingSession {
    pub(crate) async fn start(
        bridge: Arc<BridgeInner>,
        role: BindingRole,
        address: Option<u8>,
        timeout: Duration,
    ) -> Result<Self> {
        let window = bridge.acquire_window()?;
        let deadline = Instant::now() + timeout;

        let mut session = Self {
            bridge,
            window,
            role,
            target: 0,
            deadline,
            state: BindingState::Idle,
            node: None,
            released: false,
        };
        // Any error from here on drops the session, which frees the window
        session.target = session.choose_target(address)?;
        session.begin().await?;
        Ok(session)
    }

    fn choose_target(&self, address: Option<u8>) -> Result<u8> {
        if let BindingRole::Accessory { controller, .. } = self.role {
            if !self.bridge.is_bound(controller) {
                return Err(AirlinkError::NodeNotBound(controller));
            }
        }

        match address {
            Some(address) => {
                if !(FIRST_NODE_ADDRESS..=LAST_NODE_ADDRESS).contains(&address) {
                    return Err(AirlinkError::InvalidAddress(format!(
                        "{address} outside {FIRST_NODE_ADDRESS}..={LAST_NODE_ADDRESS}"
                    )));
                }
                if address == self.bridge.address || self.bridge.is_bound(address) {
                    return Err(AirlinkError::InvalidAddress(format!(
                        "{address} already in use"
                    )));
                }
                Ok(address)
            },
            None => self
                .bridge
                .free_address()
                .ok_or_else(|| AirlinkError::InvalidAddress("no free slave address".into())),
        }
    }

    async fn begin(&mut self) -> Result<()> {
        let bridge = self.bridge.clone();

        bridge.write_bridge(reg::BINDING_COMMAND, &[MODE_ABORT]).await?;
        let status = bridge
            .read_bridge(reg::BINDING_STATUS, 1)
            .await?
            .first()
            .copied()
            .unwrap_or_default();
        if status != 0 {
            warn!(
                "Bridge {} not ready for binding: {}",
                bridge.address,
                describe_status(status)
            );
            self.finish(BindingState::Failed(BindingFailure::Rejected(status)));
            return Ok(());
        }

        let product = self.role.product();
        bridge
            .write_bridge(reg::BINDING_PRODUCT_ID, &split(product))
            .await?;
        bridge
            .write_bridge(reg::CREATE_NODE, &[u16::from(self.target)])
            .await?;
        if let BindingRole::Controller {
            serial: Some(serial),
            ..
        } = self.role
        {
            bridge
                .write_bridge(reg::BINDING_PRODUCT_SERIAL, &split(serial))
                .await?;
        }
        let command = (u16::from(self.target) << 8) | self.role.mode();
        bridge.write_bridge(reg::BINDING_COMMAND, &[command]).await?;

        self.transition(BindingState::AwaitingDevice);
        Ok(())
    }

    pub fn state(&self) -> BindingState {
        self.state
    }

    pub fn role(&self) -> BindingRole {
        self.role
    }

    /// Slave address the new device is bound to on success
    pub fn target(&self) -> u8 {
        self.target
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// The new node once the session is [`BindingState::Bound`]
    pub fn node(&self) -> Option<&Arc<Node>> {
        self.node.as_ref()
    }

    /// Advance the state machine by one step
    ///
    /// A transport error is returned with the state left as it was, so the
    /// next poll retries the same step.
    pub async fn poll(&mut self) -> Result<BindingState> {
        if self.state.is_terminal() || self.state == BindingState::Idle {
            return Ok(self.state);
        }
        if !self.bridge.owns_window(self.window) {
            info!("Binding on bridge {} ended externally", self.bridge.address);
            self.released = true;
            self.transition(BindingState::Idle);
            return Ok(self.state);
        }
        if Instant::now() >= self.deadline {
            self.time_out().await;
            return Ok(self.state);
        }

        match self.state {
            BindingState::AwaitingDevice => self.check_status().await?,
            BindingState::Negotiating => self.negotiate().await?,
            _ => {},
        }
        Ok(self.state)
    }

    async fn check_status(&mut self) -> Result<()> {
        let status = self
            .bridge
            .read_bridge(reg::BINDING_STATUS, 1)
            .await?
            .first()
            .copied()
            .unwrap_or_default();
        debug!("Binding status {}: {}", status, describe_status(status));

        match classify_status(status) {
            StatusClass::Waiting => {},
            StatusClass::Completed => self.transition(BindingState::Negotiating),
            StatusClass::Rejected(code) => {
                self.finish(BindingState::Failed(BindingFailure::Rejected(code)))
            },
        }
        Ok(())
    }

    async fn negotiate(&mut self) -> Result<()> {
        let bridge = self.bridge.clone();
        let oem_code = bridge.read_oem_code().await?;
        let device_oem = bridge
            .session
            .read_registers(self.target, node_reg::OEM_NUMBER, 1)
            .await?
            .first()
            .copied()
            .unwrap_or_default();

        if device_oem != u16::from(oem_code) {
            bridge.remove_node(self.target).await?;
            self.finish(BindingState::Failed(BindingFailure::OemMismatch {
                bridge: oem_code,
                device: device_oem,
            }));
            return Ok(());
        }

        let product_id = bridge.read_product_id(self.target).await?;
        let node = match bridge.new_node(self.target, product_id) {
            Ok(node) => node,
            Err(AirlinkError::UnknownProduct(code)) => {
                warn!(
                    "Slave {} joined with unknown product 0x{:08X}, removing it",
                    self.target, code
                );
                bridge.remove_node(self.target).await?;
                self.finish(BindingState::Failed(BindingFailure::UnknownProduct(code)));
                return Ok(());
            },
            Err(err) => return Err(err),
        };
        self.node = Some(bridge.adopt(node));
        self.finish(BindingState::Bound(self.target));
        Ok(())
    }

    async fn time_out(&mut self) {
        if let Err(err) = self
            .bridge
            .write_bridge(reg::BINDING_COMMAND, &[MODE_ABORT])
            .await
        {
            warn!("Failed to abort binding after timeout: {}", err);
        }
        self.finish(BindingState::Failed(BindingFailure::Timeout));
    }

    /// Poll until the session ends, the deadline passes or `cancel` fires
    ///
    /// Cancellation is only observed between polls. Transport errors are
    /// logged and polling continues; other errors end the run.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<BindingState> {
        let mut ticker = interval(self.bridge.binding_config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.state.is_terminal() && self.state != BindingState::Idle {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.cancel().await?;
                    break;
                }
                _ = ticker.tick() => {}
                _ = sleep_until(self.deadline) => {}
            }

            match self.poll().await {
                Ok(_) => {},
                Err(err) if err.is_transport() => {
                    warn!("Binding poll failed, retrying: {}", err);
                },
                Err(err) => return Err(err),
            }
        }
        Ok(self.state)
    }

    /// Abort the attempt and return to [`BindingState::Idle`]
    ///
    /// Has no effect once the device is bound.
    pub async fn cancel(&mut self) -> Result<()> {
        if matches!(self.state, BindingState::Bound(_) | BindingState::Idle) {
            return Ok(());
        }
        if self.bridge.owns_window(self.window) {
            self.bridge
                .write_bridge(reg::BINDING_COMMAND, &[MODE_ABORT])
                .await?;
        }
        self.release();
        self.transition(BindingState::Idle);
        Ok(())
    }

    fn transition(&mut self, next: BindingState) {
        if self.state != next {
            info!(
                "Binding slave {} on bridge {}: {} -> {}",
                self.target, self.bridge.address, self.state, next
            );
            self.state = next;
        }
    }

    fn finish(&mut self, terminal: BindingState) {
        self.transition(terminal);
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.bridge.release_window(self.window);
            self.released = true;
        }
    }
}

impl Drop for BindingSession {
    fn drop(&mut self) {
        let active = matches!(
            self.state,
            BindingState::AwaitingDevice | BindingState::Negotiating
        );
        if !active || self.released || !self.bridge.owns_window(self.window) {
            self.release();
            return;
        }

        warn!(
            "Binding session for slave {} dropped while {}",
            self.target, self.state
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                // Window stays taken until the abort is on the wire
                let bridge = self.bridge.clone();
                let window = self.window;
                self.released = true;
                handle.spawn(async move {
                    if let Err(err) = bridge
                        .write_bridge(reg::BINDING_COMMAND, &[MODE_ABORT])
                        .await
                    {
                        warn!("Failed to abort dropped binding session: {}", err);
                    }
                    bridge.release_window(window);
                });
            },
            Err(_) => {
                warn!(
                    "No runtime to abort binding, bridge {} stays in binding mode",
                    self.bridge.address
                );
                self.release();
            },
        }
    }
}

fn split(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, value as u16]
}
