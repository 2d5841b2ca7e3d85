use serde::{Deserialize, Serialize};
use std::time::Duration;

use serialport::{DataBits, SerialPort, StopBits};

use crate::core::error::Result;

/// Read timeout on the port itself. Transactions poll with short sleeps, so
/// this only bounds a single blocking read.
const PORT_READ_TIMEOUT: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    pub baud: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    #[serde(with = "parity_name")]
    pub parity: serialport::Parity,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: serialport::Parity::None,
        }
    }
}

impl SerialConfig {
    pub fn with_baud(baud: u32) -> Self {
        Self {
            baud,
            ..Default::default()
        }
    }

    pub fn apply_builder(&self, b: serialport::SerialPortBuilder) -> serialport::SerialPortBuilder {
        let b = b.data_bits(match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        });
        let b = b.stop_bits(match self.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        });
        b.parity(self.parity)
    }
}

/// Open the controller console with `cfg` and drop whatever is buffered.
///
/// On Unix the port is opened with exclusive access, so a second monitor
/// cannot interleave commands on the same console.
pub fn open_console(port_name: &str, cfg: &SerialConfig) -> Result<Box<dyn SerialPort>> {
    let builder = serialport::new(port_name, cfg.baud).timeout(PORT_READ_TIMEOUT);
    let builder = cfg.apply_builder(builder);

    #[cfg(unix)]
    let port: Box<dyn SerialPort> = {
        let mut handle = builder.open_native()?;
        handle.set_exclusive(true)?;
        Box::new(handle)
    };
    #[cfg(not(unix))]
    let port = builder.open()?;

    port.clear(serialport::ClearBuffer::All)?;
    log::info!(
        "opened {port_name} at {} baud ({}{}{})",
        cfg.baud,
        cfg.data_bits,
        parity_name::letter(cfg.parity),
        cfg.stop_bits
    );
    Ok(port)
}

/// Serial ports the OS reports, by name.
pub fn available_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    log::debug!("found {} serial ports", ports.len());
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

mod parity_name {
    use serde::{Deserialize, Deserializer, Serializer};
    use serialport::Parity;

    pub fn letter(parity: Parity) -> char {
        match parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        }
    }

    pub fn serialize<S: Serializer>(parity: &Parity, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(match parity {
            Parity::None => "none",
            Parity::Odd => "odd",
            Parity::Even => "even",
        })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Parity, D::Error> {
        let name = String::deserialize(d)?;
        match name.to_ascii_lowercase().as_str() {
            "none" => Ok(Parity::None),
            "odd" => Ok(Parity::Odd),
            "even" => Ok(Parity::Even),
            other => Err(serde::de::Error::custom(format!("unknown parity {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_defaults_to_console_settings() {
        let cfg = SerialConfig::default();
        assert_eq!(cfg.baud, 115_200);
        assert_eq!(cfg.data_bits, 8);
        assert_eq!(cfg.stop_bits, 1);
        assert_eq!(cfg.parity, serialport::Parity::None);
    }

    #[test]
    fn test_serial_config_parity_serde() {
        let cfg = SerialConfig {
            parity: serialport::Parity::Even,
            ..SerialConfig::with_baud(9600)
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"parity\":\"even\""));
        let back: SerialConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);

        let bad = r#"{"baud":9600,"data_bits":8,"stop_bits":1,"parity":"mark"}"#;
        assert!(serde_json::from_str::<SerialConfig>(bad).is_err());
    }
}
