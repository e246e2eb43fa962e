use log::trace;

use super::buffer::FrameBuffer;
use super::protocol::{pack_coils, Exchange, ExceptionCode, FunctionCode, EXCEPTION_FLAG};
use crate::utils::error::{ModbusError, Result};

/// Appends the PDU for `exchange` (function code and body) to `buf`.
pub fn encode(buf: &mut FrameBuffer, exchange: &Exchange) -> Result<()> {
    let function = exchange.function;
    buf.put_u8(function.code())?;
    buf.put_u16(exchange.address)?;

    match function {
        FunctionCode::ReadCoils
        | FunctionCode::ReadDiscreteInputs
        | FunctionCode::ReadHoldingRegisters
        | FunctionCode::ReadInputRegisters => {
            buf.put_u16(exchange.count)?;
        }
        FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
            let value = exchange.values.get(..2).ok_or_else(|| {
                ModbusError::ValidationError(format!("{} needs a 2-byte value", function.name()))
            })?;
            buf.put_slice(value)?;
        }
        FunctionCode::WriteMultipleCoils => {
            let count = exchange.count as usize;
            let flags: Vec<bool> = exchange
                .values
                .get(..count)
                .ok_or_else(|| {
                    ModbusError::ValidationError(format!(
                        "{} coil flags required, {} supplied",
                        count,
                        exchange.values.len()
                    ))
                })?
                .iter()
                .map(|&flag| flag != 0)
                .collect();
            let packed = pack_coils(&flags);
            buf.put_u16(exchange.count)?;
            buf.put_u8(byte_count(packed.len())?)?;
            buf.put_slice(&packed)?;
        }
        FunctionCode::WriteMultipleRegisters => {
            let len = exchange.count as usize * 2;
            let registers = exchange.values.get(..len).ok_or_else(|| {
                ModbusError::ValidationError(format!(
                    "{} register bytes required, {} supplied",
                    len,
                    exchange.values.len()
                ))
            })?;
            buf.put_u16(exchange.count)?;
            buf.put_u8(byte_count(len)?)?;
            buf.put_slice(registers)?;
        }
    }

    Ok(())
}

/// Parses a reply PDU from the read cursor of `buf` into `exchange`.
///
/// Nothing in `exchange` changes unless the whole body decodes.
pub fn decode(buf: &mut FrameBuffer, exchange: &mut Exchange) -> Result<()> {
    let code = buf.get_u8()?;

    if code > EXCEPTION_FLAG {
        let echoed = code & !EXCEPTION_FLAG;
        check_function(echoed, exchange.function)?;
        let exception = ExceptionCode::from(buf.get_u8()?);
        trace!("exception reply for {}: {}", exchange.function, exception);
        exchange.exception = Some(exception);
        return Ok(());
    }

    check_function(code, exchange.function)?;

    match exchange.function {
        FunctionCode::ReadCoils
        | FunctionCode::ReadDiscreteInputs
        | FunctionCode::ReadHoldingRegisters
        | FunctionCode::ReadInputRegisters => {
            let byte_count = buf.get_u8()?;
            let values = buf.get_slice(byte_count as usize)?.to_vec();
            exchange.byte_count = byte_count;
            exchange.values = values;
        }
        FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
            let address = buf.get_u16()?;
            let value = buf.get_slice(2)?.to_vec();
            exchange.address = address;
            exchange.values = value;
            exchange.byte_count = 2;
        }
        FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
            let address = buf.get_u16()?;
            let count = buf.get_u16()?;
            exchange.address = address;
            exchange.count = count;
        }
    }
    exchange.exception = None;

    Ok(())
}

fn byte_count(len: usize) -> Result<u8> {
    u8::try_from(len).map_err(|_| {
        ModbusError::ValidationError(format!("{} data bytes do not fit a PDU byte count", len))
    })
}

fn check_function(code: u8, expected: FunctionCode) -> Result<()> {
    let function = FunctionCode::try_from(code).map_err(|_| {
        ModbusError::ProtocolError(format!("unsupported function code 0x{:02X} in reply", code))
    })?;
    if function != expected {
        return Err(ModbusError::ProtocolError(format!(
            "reply function 0x{:02X} does not match request 0x{:02X}",
            function.code(),
            expected.code()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(exchange: &Exchange) -> Vec<u8> {
        let mut buf = FrameBuffer::new(256);
        encode(&mut buf, exchange).unwrap();
        buf.as_slice().to_vec()
    }

    fn reply(bytes: &[u8]) -> FrameBuffer {
        let mut buf = FrameBuffer::new(256);
        buf.put_slice(bytes).unwrap();
        buf
    }

    #[test]
    fn test_read_holding_registers_round() {
        let mut exchange = Exchange::read_holding_registers(0x0010, 4);
        assert_eq!(encoded(&exchange), vec![0x03, 0x00, 0x10, 0x00, 0x04]);

        let mut buf = reply(&[
            0x03, 0x08, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x04,
        ]);
        decode(&mut buf, &mut exchange).unwrap();
        assert_eq!(exchange.byte_count, 8);
        assert_eq!(exchange.registers(), vec![1, 2, 3, 4]);
        assert!(!exchange.is_exception());
    }

    #[test]
    fn test_write_single_coil_echo() {
        let mut exchange = Exchange::write_single_coil(5, true);
        assert_eq!(encoded(&exchange), vec![0x05, 0x00, 0x05, 0xFF, 0x00]);

        let mut buf = reply(&[0x05, 0x00, 0x05, 0xFF, 0x00]);
        decode(&mut buf, &mut exchange).unwrap();
        assert_eq!(exchange.address, 5);
        assert_eq!(exchange.values, vec![0xFF, 0x00]);
    }

    #[test]
    fn test_exception_reply_leaves_fields_untouched() {
        let mut exchange = Exchange::read_coils(0x0100, 8);
        let mut buf = reply(&[0x81, 0x02]);
        decode(&mut buf, &mut exchange).unwrap();

        assert_eq!(exchange.exception, Some(ExceptionCode::IllegalDataAddress));
        assert_eq!(exchange.address, 0x0100);
        assert_eq!(exchange.count, 8);
        assert_eq!(exchange.byte_count, 0);
        assert!(exchange.values.is_empty());
    }

    #[test]
    fn test_write_multiple_coils_packing() {
        let mut flags = [false; 10];
        flags[0] = true;
        flags[8] = true;
        let exchange = Exchange::write_multiple_coils(0x0013, &flags);
        assert_eq!(
            encoded(&exchange),
            vec![0x0F, 0x00, 0x13, 0x00, 0x0A, 0x02, 0x01, 0x01]
        );
    }

    #[test]
    fn test_write_multiple_registers_ack() {
        let mut exchange = Exchange::write_multiple_registers(0x0001, &[0x000A, 0x0102]);
        assert_eq!(
            encoded(&exchange),
            vec![0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02]
        );

        let mut buf = reply(&[0x10, 0x00, 0x01, 0x00, 0x02]);
        decode(&mut buf, &mut exchange).unwrap();
        assert_eq!(exchange.address, 1);
        assert_eq!(exchange.count, 2);
    }

    #[test]
    fn test_read_discrete_inputs_round() {
        let mut exchange = Exchange::read_discrete_inputs(0x0020, 0x0010);
        assert_eq!(encoded(&exchange), vec![0x02, 0x00, 0x20, 0x00, 0x10]);

        let mut buf = reply(&[0x02, 0x02, 0x05, 0x80]);
        decode(&mut buf, &mut exchange).unwrap();
        assert_eq!(exchange.byte_count, 2);
        let inputs = exchange.coils();
        assert_eq!(inputs.len(), 16);
        assert!(inputs[0] && !inputs[1] && inputs[2]);
        assert!(inputs[15]);
        assert_eq!(inputs.iter().filter(|&&on| on).count(), 3);
    }

    #[test]
    fn test_read_input_registers_round() {
        let mut exchange = Exchange::read_input_registers(0x0008, 2);
        assert_eq!(encoded(&exchange), vec![0x04, 0x00, 0x08, 0x00, 0x02]);

        let mut buf = reply(&[0x04, 0x04, 0x12, 0x34, 0xAB, 0xCD]);
        decode(&mut buf, &mut exchange).unwrap();
        assert_eq!(exchange.registers(), vec![0x1234, 0xABCD]);
    }

    #[test]
    fn test_write_single_register_echo() {
        let mut exchange = Exchange::write_single_register(1, 0x1234);
        assert_eq!(encoded(&exchange), vec![0x06, 0x00, 0x01, 0x12, 0x34]);

        let mut buf = reply(&[0x06, 0x00, 0x01, 0x12, 0x34]);
        decode(&mut buf, &mut exchange).unwrap();
        assert_eq!(exchange.address, 1);
        assert_eq!(exchange.single_value(), Some(0x1234));
        assert_eq!(exchange.byte_count, 2);
    }

    #[test]
    fn test_write_multiple_coils_ack() {
        let mut exchange = Exchange::write_multiple_coils(0x0013, &[true; 10]);
        let mut buf = reply(&[0x0F, 0x00, 0x13, 0x00, 0x0A]);
        decode(&mut buf, &mut exchange).unwrap();
        assert_eq!(exchange.address, 0x0013);
        assert_eq!(exchange.count, 10);
        assert!(!exchange.is_exception());
    }

    #[test]
    fn test_oversized_body_is_validation_error() {
        let mut buf = FrameBuffer::new(1024);
        let exchange = Exchange::write_multiple_registers(0, &[0u16; 200]);
        assert!(matches!(
            encode(&mut buf, &exchange),
            Err(ModbusError::ValidationError(_))
        ));

        let mut buf = FrameBuffer::new(1024);
        let exchange = Exchange::write_multiple_coils(0, &[true; 2100]);
        assert!(matches!(
            encode(&mut buf, &exchange),
            Err(ModbusError::ValidationError(_))
        ));
    }

    #[test]
    fn test_truncated_reply_is_an_error() {
        let mut exchange = Exchange::read_input_registers(0, 4);
        // byte count claims 8, only 4 arrive
        let mut buf = reply(&[0x04, 0x08, 0x00, 0x01, 0x00, 0x02]);
        let err = decode(&mut buf, &mut exchange).unwrap_err();
        assert!(matches!(err, ModbusError::Truncated { needed: 8, available: 4 }));
        assert_eq!(exchange.byte_count, 0);
        assert!(exchange.values.is_empty());
    }

    #[test]
    fn test_mismatched_function_is_protocol_error() {
        let mut exchange = Exchange::read_coils(0, 8);
        let mut buf = reply(&[0x02, 0x01, 0xFF]);
        assert!(matches!(
            decode(&mut buf, &mut exchange),
            Err(ModbusError::ProtocolError(_))
        ));

        let mut buf = reply(&[0x2B, 0x00]);
        assert!(matches!(
            decode(&mut buf, &mut exchange),
            Err(ModbusError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_encode_overflow() {
        let mut buf = FrameBuffer::new(4);
        let exchange = Exchange::read_coils(0, 1);
        assert!(matches!(
            encode(&mut buf, &exchange),
            Err(ModbusError::BufferOverflow { .. })
        ));
    }
}
