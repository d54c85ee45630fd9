//! Modbus RTU over a serial port
//!
//! The bridge is attached through an RS485 adapter (typically a USB CDC
//! device). The port is opened lazily and dropped after an I/O failure so the
//! next request reopens it.

use async_trait::async_trait;
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, warn};

use super::ModbusTransport;
use crate::error::TransportError;
use crate::protocol::constants::MAX_RTU_FRAME_SIZE;
use crate::protocol::{rtu, ModbusPdu};

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyACM0", "COM3")
    pub port: String,
    pub baud_rate: u32,
    /// Data bits (7 or 8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    pub parity: Parity,
    /// Upper bound for writing one frame and for receiving one frame
    #[serde(with = "crate::config::duration_ms")]
    pub frame_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 19200,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::Even,
            frame_timeout: Duration::from_millis(500),
        }
    }
}

impl SerialConfig {
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.port.is_empty() {
            return Err(TransportError::Config(
                "Port path cannot be empty".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(TransportError::Config(
                "Baud rate must be greater than zero".to_string(),
            ));
        }
        if ![7, 8].contains(&self.data_bits) {
            return Err(TransportError::Config(format!(
                "Invalid data bits: {}",
                self.data_bits
            )));
        }
        if ![1, 2].contains(&self.stop_bits) {
            return Err(TransportError::Config(format!(
                "Invalid stop bits: {}",
                self.stop_bits
            )));
        }
        if self.frame_timeout.is_zero() {
            return Err(TransportError::Config(
                "Frame timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    fn data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    fn stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }
}

/// RTU master over a tokio-serial stream
pub struct RtuTransport {
    config: SerialConfig,
    port: Option<SerialStream>,
}

impl std::fmt::Debug for RtuTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtuTransport")
            .field("port", &self.config.port)
            .field("baud_rate", &self.config.baud_rate)
            .field("connected", &self.port.is_some())
            .finish()
    }
}

impl RtuTransport {
    /// Create a transport; the port is opened on first use
    pub fn new(config: SerialConfig) -> Result<Self, TransportError> {
        config.validate()?;
        Ok(Self { config, port: None })
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Open the serial port now instead of on the first request
    pub fn connect(&mut self) -> Result<(), TransportError> {
        if self.port.is_some() {
            return Ok(());
        }

        info!(
            "Opening serial port {} ({} baud, {}{:?}{})",
            self.config.port,
            self.config.baud_rate,
            self.config.data_bits,
            self.config.parity,
            self.config.stop_bits
        );

        let port = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .data_bits(self.config.data_bits())
            .parity(self.config.parity.into())
            .stop_bits(self.config.stop_bits())
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.config.frame_timeout)
            .open_native_async()
            .map_err(|e| {
                error!("Failed to open serial port {}: {}", self.config.port, e);
                TransportError::NotConnected(format!("{}: {}", self.config.port, e))
            })?;

        self.port = Some(port);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.port.take().is_some() {
            info!("Closed serial port {}", self.config.port);
        }
    }

    async fn exchange(&mut self, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
        let frame_timeout = self.config.frame_timeout;
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| TransportError::NotConnected("serial port not open".to_string()))?;

        // Late answers to an earlier, timed-out request must not be taken as ours
        if let Err(e) = port.clear(ClearBuffer::Input) {
            warn!("Failed to clear serial input buffer: {}", e);
        }

        let send = async {
            port.write_all(frame).await?;
            port.flush().await
        };
        match timeout(frame_timeout, send).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(frame_timeout.as_millis() as u64)),
        }
        debug!(hex_data = %hex(frame), length = frame.len(), direction = "send", "[RTU] Raw frame");

        let deadline = Instant::now() + frame_timeout;
        let mut buffer = BytesMut::with_capacity(MAX_RTU_FRAME_SIZE);
        loop {
            let read = timeout_at(deadline, port.read_buf(&mut buffer))
                .await
                .map_err(|_| TransportError::Timeout(frame_timeout.as_millis() as u64))??;
            if read == 0 {
                return Err(TransportError::Io("serial port closed".to_string()));
            }
            if let Some(expected) = rtu::expected_frame_len(&buffer) {
                if buffer.len() >= expected {
                    buffer.truncate(expected);
                    break;
                }
            }
            if buffer.len() >= MAX_RTU_FRAME_SIZE {
                return Err(TransportError::malformed("response exceeds RTU frame size"));
            }
        }

        debug!(hex_data = %hex(&buffer), length = buffer.len(), direction = "recv", "[RTU] Raw frame");
        Ok(buffer.to_vec())
    }
}

#[async_trait]
impl ModbusTransport for RtuTransport {
    async fn request(
        &mut self,
        slave: u8,
        request: &ModbusPdu,
    ) -> Result<ModbusPdu, TransportError> {
        self.connect()?;

        let frame = rtu::build_frame(slave, request);
        let raw = match self.exchange(&frame).await {
            Ok(raw) => raw,
            Err(TransportError::Io(msg)) => {
                error!("Serial I/O failure on {}: {}", self.config.port, msg);
                self.disconnect();
                return Err(TransportError::Io(msg));
            },
            Err(e) => return Err(e),
        };

        let (responder, pdu) = rtu::parse_frame(&raw)?;
        if responder != slave {
            return Err(TransportError::SlaveMismatch {
                expected: slave,
                actual: responder,
            });
        }
        Ok(pdu)
    }

    fn name(&self) -> &str {
        "rtu"
    }
}

fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_bridge_factory_settings() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.data_bits, 8);
        assert_eq!(config.stop_bits, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = SerialConfig {
            port: String::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TransportError::Config(_))));

        let config = SerialConfig {
            data_bits: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        assert!(RtuTransport::new(SerialConfig {
            baud_rate: 0,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_transport_starts_disconnected() {
        let transport = RtuTransport::new(SerialConfig::default()).expect("valid config");
        assert!(!transport.is_connected());
        assert_eq!(transport.name(), "rtu");
    }
}
