//! Modbus PDU buffer and the request/response shapes used on the bridge link
//!
//! Only holding registers are used by the bridge, so the request side is
//! limited to FC03, FC06 and FC16.

use tracing::debug;

use super::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_REGISTER, MAX_PDU_SIZE, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS,
};
use crate::error::TransportError;

type Result<T> = std::result::Result<T, TransportError>;

/// PDU with stack-allocated fixed array
#[derive(Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    /// Create an empty PDU
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(TransportError::malformed(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();

        if let Some(fc) = pdu.function_code() {
            if pdu.is_exception() {
                debug!(
                    "PDU parsed: FC={:02X} (Exception: {}), exception_code={:02X}",
                    fc,
                    function_code_description(fc),
                    pdu.exception_code().unwrap_or(0)
                );
            } else {
                debug!(
                    "PDU parsed: FC={:02X} ({}), data_len={}",
                    fc,
                    function_code_description(fc),
                    pdu.len - 1
                );
            }
        }

        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(TransportError::malformed("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<()> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get function code (first byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        (self.len > 0).then(|| self.data[0])
    }

    /// Check if exception response
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & EXCEPTION_FLAG != 0)
            .unwrap_or(false)
    }

    /// Get exception code
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() && self.len > 1 {
            Some(self.data[1])
        } else {
            None
        }
    }

    fn u16_at(&self, offset: usize) -> Option<u16> {
        (offset + 1 < self.len)
            .then(|| u16::from_be_bytes([self.data[offset], self.data[offset + 1]]))
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// FC03 request
    pub fn read_holding_registers(start: u16, count: u16) -> Result<Self> {
        if count == 0 || count as usize > MAX_READ_REGISTERS {
            return Err(TransportError::Config(format!(
                "Read count {} out of range 1..={}",
                count, MAX_READ_REGISTERS
            )));
        }
        Ok(PduBuilder::new()
            .function_code(FC_READ_HOLDING_REGISTERS)?
            .address(start)?
            .quantity(count)?
            .build())
    }

    /// FC06 request
    pub fn write_single_register(address: u16, value: u16) -> Result<Self> {
        Ok(PduBuilder::new()
            .function_code(FC_WRITE_SINGLE_REGISTER)?
            .address(address)?
            .word(value)?
            .build())
    }

    /// FC16 request
    pub fn write_multiple_registers(start: u16, values: &[u16]) -> Result<Self> {
        if values.is_empty() || values.len() > MAX_WRITE_REGISTERS {
            return Err(TransportError::Config(format!(
                "Write count {} out of range 1..={}",
                values.len(),
                MAX_WRITE_REGISTERS
            )));
        }
        let mut builder = PduBuilder::new()
            .function_code(FC_WRITE_MULTIPLE_REGISTERS)?
            .address(start)?
            .quantity(values.len() as u16)?
            .byte((values.len() * 2) as u8)?;
        for value in values {
            builder = builder.word(*value)?;
        }
        Ok(builder.build())
    }

    // ------------------------------------------------------------------
    // Responses
    // ------------------------------------------------------------------

    /// Reject exception responses and responses for another function
    pub fn expect_function(&self, function: u8) -> Result<()> {
        let fc = self
            .function_code()
            .ok_or_else(|| TransportError::malformed("empty response PDU"))?;

        if fc == function | EXCEPTION_FLAG {
            return Err(TransportError::Exception {
                function: fc,
                code: self.exception_code().unwrap_or(0),
            });
        }
        if fc != function {
            return Err(TransportError::malformed(format!(
                "function code mismatch: sent 0x{:02X}, received 0x{:02X}",
                function, fc
            )));
        }
        Ok(())
    }

    /// Decode a FC03 response carrying exactly `count` words
    pub fn read_response_words(&self, count: u16) -> Result<Vec<u16>> {
        self.expect_function(FC_READ_HOLDING_REGISTERS)?;

        let byte_count = self
            .as_slice()
            .get(1)
            .copied()
            .ok_or_else(|| TransportError::malformed("missing byte count"))?
            as usize;
        if byte_count != count as usize * 2 || self.len != 2 + byte_count {
            return Err(TransportError::malformed(format!(
                "word count mismatch: expected {} registers, got {} bytes",
                count, byte_count
            )));
        }

        Ok(self.as_slice()[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Verify the echo of a FC06/FC16 response against its request
    pub fn check_write_echo(&self, request: &ModbusPdu) -> Result<()> {
        let function = request
            .function_code()
            .ok_or_else(|| TransportError::malformed("empty request PDU"))?;
        self.expect_function(function)?;

        if self.len != 5 || request.as_slice().get(..5) != Some(self.as_slice()) {
            return Err(TransportError::malformed(format!(
                "write echo mismatch for FC{:02X}: address {:?}, value {:?}",
                function,
                self.u16_at(1),
                self.u16_at(3)
            )));
        }
        Ok(())
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModbusPdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ModbusPdu({:02X?})", self.as_slice())
    }
}

impl PartialEq for ModbusPdu {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

/// Get human-readable function code description
pub fn function_code_description(fc: u8) -> &'static str {
    match fc & !EXCEPTION_FLAG {
        0x03 => "Read Holding Registers",
        0x06 => "Write Single Register",
        0x10 => "Write Multiple Registers",
        _ => "Unknown Function",
    }
}

/// PDU builder - fluent API
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> Result<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    #[inline]
    pub fn address(mut self, addr: u16) -> Result<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    #[inline]
    pub fn quantity(mut self, qty: u16) -> Result<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    #[inline]
    pub fn word(mut self, value: u16) -> Result<Self> {
        self.pdu.push_u16(value)?;
        Ok(self)
    }

    #[inline]
    pub fn byte(mut self, b: u8) -> Result<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    pub fn build(self) -> ModbusPdu {
        if let Some(fc) = self.pdu.function_code() {
            debug!(
                "PDU built: FC={:02X} ({}), total_len={}",
                fc,
                function_code_description(fc),
                self.pdu.len()
            );
        }
        self.pdu
    }
}
