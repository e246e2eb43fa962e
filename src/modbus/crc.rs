/// Reflected polynomial of CRC-16/MODBUS.
pub const CRC16_POLY: u16 = 0xA001;
pub const CRC16_SEED: u16 = 0xFFFF;

/// CRC over an RTU frame body (slave address + PDU). Sent low byte first.
pub fn crc16_modbus(data: &[u8]) -> u16 {
    data.iter().fold(CRC16_SEED, |crc, &byte| {
        (0..8).fold(crc ^ u16::from(byte), |acc, _| {
            if acc & 1 == 1 {
                (acc >> 1) ^ CRC16_POLY
            } else {
                acc >> 1
            }
        })
    })
}

/// Checks a complete RTU frame whose last two bytes are the CRC (low byte first).
pub fn crc16_check(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let (payload, tail) = frame.split_at(frame.len() - 2);
    crc16_modbus(payload) == u16::from_le_bytes([tail[0], tail[1]])
}
