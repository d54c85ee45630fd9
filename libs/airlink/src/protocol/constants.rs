//! Modbus RTU constants used by the bridge link
//!
//! Register limits are derived from the RTU frame size:
//! - Maximum ADU on RS485: 256 bytes
//! - Register/word limits are calculated to fit within the PDU size constraint

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Maximum PDU (Protocol Data Unit) size
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = 253;

/// Maximum RTU frame size: slave address + PDU + CRC
pub const MAX_RTU_FRAME_SIZE: usize = 1 + MAX_PDU_SIZE + 2;

/// Smallest valid RTU frame: slave address + function code + CRC
pub const MIN_RTU_FRAME_SIZE: usize = 4;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03 (Read Holding Registers)
///
/// Calculation for response PDU:
/// - Function Code: 1 byte
/// - Byte Count: 1 byte
/// - Register Data: N × 2 bytes
/// - Total: 1 + 1 + (N × 2) ≤ 253
/// - Therefore: N ≤ (253 - 2) / 2 = 125.5 → 125 registers
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum number of registers for FC16 (Write Multiple Registers)
///
/// Calculation for request PDU:
/// - Function Code: 1 byte
/// - Starting Address: 2 bytes
/// - Quantity of Registers: 2 bytes
/// - Byte Count: 1 byte
/// - Register Values: N × 2 bytes
/// - Total: 1 + 2 + 2 + 1 + (N × 2) ≤ 253
/// - Therefore: N ≤ (253 - 6) / 2 = 123.5 → 123 registers
pub const MAX_WRITE_REGISTERS: usize = 123;

// ============================================================================
// Function Codes
// ============================================================================

pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Addressing
// ============================================================================

/// Lowest unicast slave address
pub const MIN_SLAVE_ADDRESS: u8 = 1;

/// Highest unicast slave address
pub const MAX_SLAVE_ADDRESS: u8 = 247;

/// Offset between a data register and its value status register
pub const STATUS_REGISTER_OFFSET: u16 = 10000;
