use bytes::{BufMut, Bytes, BytesMut};

use super::crc::crc16_modbus;
use crate::utils::error::GatewayError;

pub const READ_HOLDING_REGISTERS: u8 = 0x03;
const EXCEPTION_FLAG: u8 = 0x80;

/// Length of an RTU exception reply: address, function, code, CRC.
pub const EXCEPTION_FRAME_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadHoldingRequest {
    pub slave_id: u8,
    pub start_register: u16,
    pub count: u16,
}

impl ReadHoldingRequest {
    pub fn new(slave_id: u8, start_register: u16, count: u16) -> Self {
        Self {
            slave_id,
            start_register,
            count,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut frame = BytesMut::with_capacity(8);
        frame.put_u8(self.slave_id);
        frame.put_u8(READ_HOLDING_REGISTERS);
        frame.put_u16(self.start_register);
        frame.put_u16(self.count);
        let crc = crc16_modbus(&frame);
        frame.put_u16_le(crc);
        frame.freeze()
    }

    /// Address + function + byte count + payload + CRC.
    pub fn expected_response_len(&self) -> usize {
        5 + self.count as usize * 2
    }

    /// Validates a complete RTU reply and returns the register words.
    pub fn decode_response(&self, frame: &[u8]) -> Result<Vec<u16>, GatewayError> {
        if frame.len() < EXCEPTION_FRAME_LEN {
            return Err(GatewayError::Protocol(format!(
                "response too short: {} bytes",
                frame.len()
            )));
        }

        let data_len = frame.len() - 2;
        let received = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
        let expected = crc16_modbus(&frame[..data_len]);
        if received != expected {
            return Err(GatewayError::CrcMismatch { expected, received });
        }

        if frame[0] != self.slave_id {
            return Err(GatewayError::Protocol(format!(
                "reply from slave {} while polling slave {}",
                frame[0], self.slave_id
            )));
        }

        let function = frame[1];
        if function == READ_HOLDING_REGISTERS | EXCEPTION_FLAG {
            return Err(GatewayError::Exception {
                function: READ_HOLDING_REGISTERS,
                code: frame[2],
            });
        }
        if function != READ_HOLDING_REGISTERS {
            return Err(GatewayError::Protocol(format!(
                "unexpected function code 0x{:02X}",
                function
            )));
        }

        let byte_count = frame[2] as usize;
        if byte_count != self.count as usize * 2 || data_len != 3 + byte_count {
            return Err(GatewayError::Protocol(format!(
                "byte count {} does not match {} requested registers",
                byte_count, self.count
            )));
        }

        Ok(frame[3..data_len]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }
}

/// True when the first bytes of a reply announce an exception frame.
pub fn is_exception_header(header: &[u8]) -> bool {
    header.len() >= 2 && header[1] & EXCEPTION_FLAG != 0
}
