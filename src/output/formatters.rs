use serde_json::json;

use crate::modbus::protocol::{Exchange, ExceptionCode, FunctionCode};

pub trait ExchangeFormatter: Send + Sync {
    /// One-line outcome of a completed exchange.
    fn format_status(&self, exchange: &Exchange) -> String;

    /// Decoded reply data; empty for acknowledgements and exceptions.
    fn format_data(&self, exchange: &Exchange) -> String;

    fn format(&self, exchange: &Exchange) -> String {
        let mut output = self.format_status(exchange);
        output.push_str(&self.format_data(exchange));
        output
    }
}

pub struct ConsoleFormatter;

impl ConsoleFormatter {
    fn exception_detail(exchange: &Exchange, exception: ExceptionCode) -> String {
        match exception {
            ExceptionCode::IllegalFunction => format!(
                "{}(0x{:02X})",
                exception.description(),
                exchange.function.code()
            ),
            ExceptionCode::IllegalDataAddress => {
                format!("{}(0x{:04X})", exception.description(), exchange.address)
            }
            _ => exception.description().to_string(),
        }
    }
}

impl ExchangeFormatter for ConsoleFormatter {
    fn format_status(&self, exchange: &Exchange) -> String {
        match exchange.exception {
            None => "✅ MB SUCCESS\n".to_string(),
            Some(exception) => format!(
                "❌ MB ERROR CODE(0x{:02X}) : {}\n",
                exception.code(),
                Self::exception_detail(exchange, exception)
            ),
        }
    }

    fn format_data(&self, exchange: &Exchange) -> String {
        if exchange.is_exception() || !exchange.function.is_read() {
            return String::new();
        }

        let mut output = format!(
            "📊 {} @ 0x{:04X}, {} byte(s)\n",
            exchange.function,
            exchange.address,
            exchange.byte_count
        );

        match exchange.function {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
                for (i, on) in exchange.coils().iter().enumerate() {
                    output.push_str(&format!(
                        "  [{}] {}\n",
                        exchange.address as usize + i,
                        if *on { "ON" } else { "OFF" }
                    ));
                }
            }
            _ => {
                for (i, value) in exchange.registers().iter().enumerate() {
                    output.push_str(&format!(
                        "  [{}] 0x{:04X} ({})\n",
                        exchange.address as usize + i,
                        value,
                        value
                    ));
                }
            }
        }

        output
    }
}

pub struct JsonFormatter;

impl ExchangeFormatter for JsonFormatter {
    fn format_status(&self, exchange: &Exchange) -> String {
        let status = match exchange.exception {
            None => json!({ "success": true }),
            Some(exception) => json!({
                "success": false,
                "exception": exception.code(),
                "description": exception.description(),
            }),
        };
        serde_json::to_string(&status).unwrap_or_default()
    }

    fn format_data(&self, exchange: &Exchange) -> String {
        let data = match exchange.function {
            _ if exchange.is_exception() => json!(null),
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => json!(exchange.coils()),
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
                json!(exchange.registers())
            }
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
                json!(exchange.single_value())
            }
            FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
                json!({ "written": exchange.count })
            }
        };
        serde_json::to_string(&data).unwrap_or_default()
    }

    fn format(&self, exchange: &Exchange) -> String {
        let result = json!({
            "function": exchange.function.code(),
            "address": exchange.address,
            "count": exchange.count,
            "exchange": exchange,
            "success": !exchange.is_exception(),
        });
        serde_json::to_string_pretty(&result).unwrap_or_default()
    }
}

pub struct HexFormatter;

impl ExchangeFormatter for HexFormatter {
    fn format_status(&self, exchange: &Exchange) -> String {
        match exchange.exception {
            None => format!("🔍 0x{:02X} ok\n", exchange.function.code()),
            Some(exception) => format!(
                "🔍 0x{:02X} exception 0x{:02X}\n",
                exchange.function.code() | crate::modbus::protocol::EXCEPTION_FLAG,
                exception.code()
            ),
        }
    }

    fn format_data(&self, exchange: &Exchange) -> String {
        if exchange.is_exception() || exchange.values.is_empty() {
            return String::new();
        }
        format!("{}\n", hex::encode_upper(&exchange.values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holding_reply() -> Exchange {
        let mut exchange = Exchange::read_holding_registers(0x0010, 2);
        exchange.byte_count = 4;
        exchange.values = vec![0x00, 0x2A, 0x01, 0x00];
        exchange
    }

    #[test]
    fn test_console_success_and_registers() {
        let output = ConsoleFormatter.format(&holding_reply());
        assert!(output.starts_with("✅ MB SUCCESS"));
        assert!(output.contains("[16] 0x002A (42)"));
        assert!(output.contains("[17] 0x0100 (256)"));
    }

    #[test]
    fn test_console_exception() {
        let mut exchange = Exchange::read_coils(0x0100, 8);
        exchange.exception = Some(ExceptionCode::IllegalDataAddress);
        let output = ConsoleFormatter.format(&exchange);
        assert_eq!(
            output,
            "❌ MB ERROR CODE(0x02) : Invalid register address(0x0100)\n"
        );
    }

    #[test]
    fn test_json_output() {
        let data: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format_data(&holding_reply())).unwrap();
        assert_eq!(data, json!([42, 256]));

        let full: serde_json::Value =
            serde_json::from_str(&JsonFormatter.format(&holding_reply())).unwrap();
        assert_eq!(full["function"], 3);
        assert_eq!(full["success"], true);
    }

    #[test]
    fn test_hex_output() {
        assert_eq!(HexFormatter.format_data(&holding_reply()), "002A0100\n");

        let mut exchange = Exchange::read_coils(0, 8);
        exchange.exception = Some(ExceptionCode::IllegalFunction);
        assert_eq!(HexFormatter.format(&exchange), "🔍 0x81 exception 0x01\n");
    }
}
