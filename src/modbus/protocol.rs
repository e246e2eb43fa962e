use serde::Serialize;
use std::fmt;

use crate::utils::error::{ModbusError, Result};

/// Capacity of the value buffer carried by one exchange, in bytes.
pub const MAX_VALUE_SIZE: usize = 2000;

/// Bit set on the function code of an exception reply.
pub const EXCEPTION_FLAG: u8 = 0x80;

pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_COILS: u16 = 1968;
pub const MAX_WRITE_REGISTERS: u16 = 123;

pub const COIL_ON: u16 = 0xFF00;
pub const COIL_OFF: u16 = 0x0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_read(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::ReadHoldingRegisters
                | FunctionCode::ReadInputRegisters
        )
    }

    pub fn is_single_write(self) -> bool {
        matches!(
            self,
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister
        )
    }

    pub fn is_multi_write(self) -> bool {
        matches!(
            self,
            FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters
        )
    }

    /// Bit-addressed functions (coils and discrete inputs).
    pub fn is_bit_access(self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils
                | FunctionCode::ReadDiscreteInputs
                | FunctionCode::WriteSingleCoil
                | FunctionCode::WriteMultipleCoils
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            FunctionCode::ReadCoils => "Read Coils",
            FunctionCode::ReadDiscreteInputs => "Read Discrete Inputs",
            FunctionCode::ReadHoldingRegisters => "Read Holding Registers",
            FunctionCode::ReadInputRegisters => "Read Input Registers",
            FunctionCode::WriteSingleCoil => "Write Single Coil",
            FunctionCode::WriteSingleRegister => "Write Single Register",
            FunctionCode::WriteMultipleCoils => "Write Multiple Coils",
            FunctionCode::WriteMultipleRegisters => "Write Multiple Registers",
        }
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = ModbusError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0x01 => Ok(FunctionCode::ReadCoils),
            0x02 => Ok(FunctionCode::ReadDiscreteInputs),
            0x03 => Ok(FunctionCode::ReadHoldingRegisters),
            0x04 => Ok(FunctionCode::ReadInputRegisters),
            0x05 => Ok(FunctionCode::WriteSingleCoil),
            0x06 => Ok(FunctionCode::WriteSingleRegister),
            0x0F => Ok(FunctionCode::WriteMultipleCoils),
            0x10 => Ok(FunctionCode::WriteMultipleRegisters),
            other => Err(ModbusError::ValidationError(format!(
                "unsupported function code 0x{:02X}",
                other
            ))),
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.code())
    }
}

/// Reason code carried by a slave exception reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    SlaveDeviceFailure,
    Acknowledge,
    SlaveDeviceBusy,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    Other(u8),
}

impl ExceptionCode {
    pub fn code(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::SlaveDeviceFailure => 0x04,
            ExceptionCode::Acknowledge => 0x05,
            ExceptionCode::SlaveDeviceBusy => 0x06,
            ExceptionCode::GatewayPathUnavailable => 0x0A,
            ExceptionCode::GatewayTargetFailedToRespond => 0x0B,
            ExceptionCode::Other(code) => code,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ExceptionCode::IllegalFunction => "Invalid function code",
            ExceptionCode::IllegalDataAddress => "Invalid register address",
            ExceptionCode::IllegalDataValue => "Invalid data",
            ExceptionCode::SlaveDeviceFailure => "Server failure",
            ExceptionCode::Acknowledge => {
                "The request has been confirmed, but not processed completely"
            }
            ExceptionCode::SlaveDeviceBusy => "Server busy",
            ExceptionCode::GatewayPathUnavailable => "Network target unreachable",
            ExceptionCode::GatewayTargetFailedToRespond => "Network target unresponsive",
            ExceptionCode::Other(_) => "Unknown error",
        }
    }
}

impl From<u8> for ExceptionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::SlaveDeviceFailure,
            0x05 => ExceptionCode::Acknowledge,
            0x06 => ExceptionCode::SlaveDeviceBusy,
            0x0A => ExceptionCode::GatewayPathUnavailable,
            0x0B => ExceptionCode::GatewayTargetFailedToRespond,
            other => ExceptionCode::Other(other),
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} ({})", self.code(), self.description())
    }
}

/// One request/response exchange.
///
/// The caller fills in the request fields, the transport encodes them, and
/// decoding writes the reply back into the same value: `byte_count` and
/// `values` for reads, the echoed address/value for single writes, the echoed
/// address/count for multiple writes, or `exception` for an exception reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub function: FunctionCode,
    pub address: u16,
    pub count: u16,
    pub byte_count: u8,
    pub values: Vec<u8>,
    pub exception: Option<ExceptionCode>,
}

impl Exchange {
    pub fn new(function: FunctionCode, address: u16, count: u16) -> Self {
        Self {
            function,
            address,
            count,
            byte_count: 0,
            values: Vec::new(),
            exception: None,
        }
    }

    pub fn read_coils(address: u16, count: u16) -> Self {
        Self::new(FunctionCode::ReadCoils, address, count)
    }

    pub fn read_discrete_inputs(address: u16, count: u16) -> Self {
        Self::new(FunctionCode::ReadDiscreteInputs, address, count)
    }

    pub fn read_holding_registers(address: u16, count: u16) -> Self {
        Self::new(FunctionCode::ReadHoldingRegisters, address, count)
    }

    pub fn read_input_registers(address: u16, count: u16) -> Self {
        Self::new(FunctionCode::ReadInputRegisters, address, count)
    }

    pub fn write_single_coil(address: u16, on: bool) -> Self {
        let value = if on { COIL_ON } else { COIL_OFF };
        let mut exchange = Self::new(FunctionCode::WriteSingleCoil, address, 1);
        exchange.values = value.to_be_bytes().to_vec();
        exchange
    }

    pub fn write_single_register(address: u16, value: u16) -> Self {
        let mut exchange = Self::new(FunctionCode::WriteSingleRegister, address, 1);
        exchange.values = value.to_be_bytes().to_vec();
        exchange
    }

    /// Coil flags are kept one byte per flag; packing happens on encode.
    pub fn write_multiple_coils(address: u16, coils: &[bool]) -> Self {
        let mut exchange = Self::new(FunctionCode::WriteMultipleCoils, address, coils.len() as u16);
        exchange.values = coils.iter().map(|&on| on as u8).collect();
        exchange
    }

    pub fn write_multiple_registers(address: u16, registers: &[u16]) -> Self {
        let mut exchange = Self::new(
            FunctionCode::WriteMultipleRegisters,
            address,
            registers.len() as u16,
        );
        exchange.values = registers.iter().flat_map(|r| r.to_be_bytes()).collect();
        exchange
    }

    pub fn is_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// Checks the request before any I/O takes place.
    pub fn validate(&self) -> Result<()> {
        let function = self.function;

        if (function.is_read() || function.is_multi_write()) && self.count == 0 {
            return Err(ModbusError::ValidationError(format!(
                "{} requires a non-zero count",
                function.name()
            )));
        }

        let limit = match function {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => Some(MAX_READ_BITS),
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
                Some(MAX_READ_REGISTERS)
            }
            FunctionCode::WriteMultipleCoils => Some(MAX_WRITE_COILS),
            FunctionCode::WriteMultipleRegisters => Some(MAX_WRITE_REGISTERS),
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => None,
        };
        if let Some(limit) = limit {
            if self.count > limit {
                return Err(ModbusError::ValidationError(format!(
                    "{} count {} exceeds the limit of {}",
                    function.name(),
                    self.count,
                    limit
                )));
            }
        }

        let required = match function {
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => 2,
            FunctionCode::WriteMultipleCoils => self.count as usize,
            FunctionCode::WriteMultipleRegisters => self.count as usize * 2,
            _ => 0,
        };
        if self.values.len() > MAX_VALUE_SIZE {
            return Err(ModbusError::ValidationError(format!(
                "{} value bytes exceed the {} byte value buffer",
                self.values.len(),
                MAX_VALUE_SIZE
            )));
        }
        if self.values.len() < required {
            return Err(ModbusError::ValidationError(format!(
                "{} needs {} value bytes, {} supplied",
                function.name(),
                required,
                self.values.len()
            )));
        }

        if function == FunctionCode::WriteSingleCoil {
            let value = u16::from_be_bytes([self.values[0], self.values[1]]);
            if value != COIL_ON && value != COIL_OFF {
                return Err(ModbusError::ValidationError(format!(
                    "single coil value must be 0xFF00 or 0x0000, got 0x{:04X}",
                    value
                )));
            }
        }

        Ok(())
    }

    /// Coil/discrete states of a read reply, limited to the requested count.
    pub fn coils(&self) -> Vec<bool> {
        let len = self.byte_count as usize;
        let data = &self.values[..len.min(self.values.len())];
        let count = if self.count == 0 {
            data.len() * 8
        } else {
            self.count as usize
        };
        unpack_coils(data, count)
    }

    /// Register values of a read reply.
    pub fn registers(&self) -> Vec<u16> {
        let len = (self.byte_count as usize).min(self.values.len());
        self.values[..len]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect()
    }

    /// Value echoed by a single write (or the value about to be written).
    pub fn single_value(&self) -> Option<u16> {
        if !self.function.is_single_write() || self.values.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.values[0], self.values[1]]))
    }
}

/// Packs coil flags LSB-first: flag `i` lands in bit `i % 8` of byte `i / 8`.
pub fn pack_coils(flags: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; flags.len().div_ceil(8)];
    for (i, &on) in flags.iter().enumerate() {
        if on {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

pub fn unpack_coils(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count.min(bytes.len() * 8))
        .map(|i| bytes[i / 8] & (1 << (i % 8)) != 0)
        .collect()
}
