//! Defines shared data structures for the Bluetooth module.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::core::bluetooth::constants;
use crate::core::bluetooth::error::CommandError;

/// Represents a discovered Bluetooth device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Platform-specific unique identifier for the device (especially important on macOS)
    pub id: String,
    /// The name of the device, if it advertised one
    pub name: Option<String>,
    /// The address of the device (MAC address on most platforms, may be the platform id on macOS)
    pub address: String,
    /// The signal strength (RSSI) from the latest advertisement, if known
    pub rssi: Option<i16>,
}

impl DeviceInfo {
    /// Display label in the `Name [address]` form used across the UI and log.
    pub fn label(&self) -> String {
        format!("{} [{}]", self.name.as_deref().unwrap_or("Unknown"), self.address)
    }
}

/// Identifies a characteristic by its owning service.
///
/// The pair is the lookup key everywhere: the same characteristic UUID can
/// appear under several services on one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CharacteristicId {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl fmt::Display for CharacteristicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            constants::short_uuid(&self.service),
            constants::short_uuid(&self.characteristic)
        )
    }
}

/// GATT properties of a characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CharProps {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharProps {
    pub fn supports_read(&self) -> bool {
        self.read
    }

    pub fn supports_write(&self) -> bool {
        self.write || self.write_without_response
    }

    /// Notifications and indications both deliver unsolicited values; the
    /// session treats them alike.
    pub fn supports_notify(&self) -> bool {
        self.notify || self.indicate
    }
}

impl fmt::Display for CharProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.read {
            names.push("read");
        }
        if self.write {
            names.push("write");
        }
        if self.write_without_response {
            names.push("write-without-response");
        }
        if self.notify {
            names.push("notify");
        }
        if self.indicate {
            names.push("indicate");
        }
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join(", "))
        }
    }
}

/// A characteristic as presented to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharacteristicInfo {
    pub id: CharacteristicId,
    pub properties: CharProps,
    /// Label from the SIG name table, when the UUID is well known.
    pub description: Option<&'static str>,
}

impl CharacteristicInfo {
    pub fn new(id: CharacteristicId, properties: CharProps) -> Self {
        Self {
            id,
            properties,
            description: constants::characteristic_name(&id.characteristic),
        }
    }
}

/// A service and its characteristics as presented to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    /// Label from the SIG name table, when the UUID is well known.
    pub description: Option<&'static str>,
    pub characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    pub fn new(uuid: Uuid, characteristics: Vec<CharacteristicInfo>) -> Self {
        Self {
            uuid,
            description: constants::service_name(&uuid),
            characteristics,
        }
    }
}

/// How an operator-supplied write payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PayloadEncoding {
    /// UTF-8 bytes of the string as typed.
    Text,
    /// Hex digit pairs; separators and whitespace are ignored.
    Hex,
}

impl PayloadEncoding {
    /// Decodes an operator-supplied payload string into raw bytes.
    pub fn decode(self, input: &str) -> Result<Vec<u8>, CommandError> {
        match self {
            Self::Text => Ok(input.as_bytes().to_vec()),
            Self::Hex => decode_hex(input),
        }
    }
}

impl std::str::FromStr for PayloadEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "utf8" => Ok(Self::Text),
            "hex" => Ok(Self::Hex),
            other => Err(format!("unknown encoding `{other}` (expected `text` or `hex`)")),
        }
    }
}

/// Strips every non-hex-digit character, then decodes the remaining digit
/// pairs. Fails when nothing is left or a digit is unpaired.
fn decode_hex(input: &str) -> Result<Vec<u8>, CommandError> {
    let digits: String = input.chars().filter(char::is_ascii_hexdigit).collect();
    if digits.is_empty() {
        return Err(CommandError::Encoding("no hex digits in payload".into()));
    }
    if digits.len() % 2 != 0 {
        return Err(CommandError::Encoding(format!(
            "odd number of hex digits ({})",
            digits.len()
        )));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| CommandError::Encoding(e.to_string()))
        })
        .collect()
}
