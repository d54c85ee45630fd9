//! RTU framing: slave address + PDU + CRC-16/MODBUS (little-endian)

use crc::{Crc, CRC_16_MODBUS};

use super::constants::{
    EXCEPTION_FLAG, FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS,
    FC_WRITE_SINGLE_REGISTER, MAX_RTU_FRAME_SIZE, MIN_RTU_FRAME_SIZE,
};
use super::pdu::ModbusPdu;
use crate::error::TransportError;

const MODBUS_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC-16/MODBUS over `data` (poly 0xA001 reflected, init 0xFFFF)
pub fn crc16(data: &[u8]) -> u16 {
    MODBUS_CRC.checksum(data)
}

/// Build a complete RTU frame for `slave`
pub fn build_frame(slave: u8, pdu: &ModbusPdu) -> Vec<u8> {
    let mut frame = Vec::with_capacity(pdu.len() + 3);
    frame.push(slave);
    frame.extend_from_slice(pdu.as_slice());
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Split a received RTU frame into slave address and PDU after checking the CRC
pub fn parse_frame(data: &[u8]) -> Result<(u8, ModbusPdu), TransportError> {
    if data.len() < MIN_RTU_FRAME_SIZE {
        return Err(TransportError::malformed(format!(
            "RTU frame too short: {} bytes",
            data.len()
        )));
    }
    if data.len() > MAX_RTU_FRAME_SIZE {
        return Err(TransportError::malformed(format!(
            "RTU frame too long: {} bytes",
            data.len()
        )));
    }

    let body_len = data.len() - 2;
    let actual = u16::from_le_bytes([data[body_len], data[body_len + 1]]);
    let expected = crc16(&data[..body_len]);
    if actual != expected {
        return Err(TransportError::Crc { expected, actual });
    }

    Ok((data[0], ModbusPdu::from_slice(&data[1..body_len])?))
}

/// Number of bytes a complete response frame will have, once enough of it is buffered
///
/// Returns `None` while the header needed to decide is still incomplete.
pub fn expected_frame_len(buffer: &[u8]) -> Option<usize> {
    let function = *buffer.get(1)?;
    if function & EXCEPTION_FLAG != 0 {
        // slave + fc + exception code + crc
        return Some(5);
    }
    match function {
        FC_READ_HOLDING_REGISTERS => buffer.get(2).map(|count| 3 + *count as usize + 2),
        FC_WRITE_SINGLE_REGISTER | FC_WRITE_MULTIPLE_REGISTERS => Some(8),
        // Unknown function: take whatever arrived and let the parser reject it
        _ => Some(buffer.len().max(MIN_RTU_FRAME_SIZE)),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_crc16_known_vector() {
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x01]), 0x0A84);
    }

    #[test]
    fn test_build_frame() {
        let pdu = ModbusPdu::read_holding_registers(0, 1).unwrap();
        let frame = build_frame(1, &pdu);
        assert_eq!(frame, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
    }

    #[test]
    fn test_parse_frame() {
        let pdu = ModbusPdu::from_slice(&[0x03, 0x02, 0x00, 0x42]).unwrap();
        let frame = build_frame(207, &pdu);
        let (slave, parsed) = parse_frame(&frame).unwrap();
        assert_eq!(slave, 207);
        assert_eq!(parsed, pdu);
    }

    #[test]
    fn test_parse_frame_crc_mismatch() {
        let pdu = ModbusPdu::from_slice(&[0x03, 0x02, 0x00, 0x42]).unwrap();
        let mut frame = build_frame(207, &pdu);
        frame[3] ^= 0xFF;
        assert!(matches!(
            parse_frame(&frame),
            Err(TransportError::Crc { .. })
        ));
        assert!(parse_frame(&[0x01, 0x03, 0x00]).is_err());
    }

    #[test]
    fn test_expected_frame_len() {
        assert_eq!(expected_frame_len(&[0x01]), None);
        assert_eq!(expected_frame_len(&[0x01, 0x03]), None);
        assert_eq!(expected_frame_len(&[0x01, 0x03, 0x04]), Some(9));
        assert_eq!(expected_frame_len(&[0x01, 0x83]), Some(5));
        assert_eq!(expected_frame_len(&[0x01, 0x10]), Some(8));
    }
}
