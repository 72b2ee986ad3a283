//! Constants and UUID helpers used throughout the application
//! This module contains the Bluetooth SIG base UUID arithmetic and the
//! name tables used to label well-known services and characteristics.

use uuid::Uuid;

/// The Bluetooth SIG base UUID as a 128-bit value. Short 16-bit and
/// 32-bit identifiers are expanded against it.
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expands a 16-bit SIG-assigned identifier to a full 128-bit UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Standard Bluetooth Service UUIDs
pub const UUID_GENERIC_ACCESS_SERVICE: Uuid = uuid_from_u16(0x1800);
pub const UUID_DEVICE_INFORMATION_SERVICE: Uuid = uuid_from_u16(0x180a);
pub const UUID_BATTERY_SERVICE: Uuid = uuid_from_u16(0x180f);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_DEVICE_NAME: Uuid = uuid_from_u16(0x2a00);
pub const UUID_MANUFACTURER_NAME: Uuid = uuid_from_u16(0x2a29);
pub const UUID_MODEL_NUMBER: Uuid = uuid_from_u16(0x2a24);
pub const UUID_BATTERY_LEVEL: Uuid = uuid_from_u16(0x2a19);

/// Depth of the session command mailbox.
pub const COMMAND_QUEUE_DEPTH: usize = 32;

/// Depth of each per-characteristic notification queue.
pub const NOTIFY_QUEUE_DEPTH: usize = 64;

/// Returns the 16-bit SIG identifier if `uuid` is an expansion of the
/// Bluetooth base UUID.
pub fn sig_id(uuid: &Uuid) -> Option<u16> {
    let value = uuid.as_u128();
    let short = (value >> 96) as u32;
    if value & ((1u128 << 96) - 1) == BLUETOOTH_BASE_UUID && short <= u16::MAX as u32 {
        Some(short as u16)
    } else {
        None
    }
}

/// Renders a UUID the way the operator sees it: the 4-hex short form for
/// SIG-assigned UUIDs, the leading hex block for everything else.
pub fn short_uuid(uuid: &Uuid) -> String {
    match sig_id(uuid) {
        Some(short) => format!("{short:04x}"),
        None => uuid.to_string()[..8].to_string(),
    }
}

/// Parses operator input as a UUID. Accepts the 4-hex and 8-hex SIG short
/// forms as well as the full hyphenated form.
pub fn parse_uuid(input: &str) -> Option<Uuid> {
    let trimmed = input.trim();
    if matches!(trimmed.len(), 4 | 8) && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return u32::from_str_radix(trimmed, 16)
            .ok()
            .map(|short| Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96)));
    }
    Uuid::parse_str(trimmed).ok()
}

/// Human-readable name for a well-known SIG service.
pub fn service_name(uuid: &Uuid) -> Option<&'static str> {
    match sig_id(uuid)? {
        0x1800 => Some("Generic Access"),
        0x1801 => Some("Generic Attribute"),
        0x1802 => Some("Immediate Alert"),
        0x1803 => Some("Link Loss"),
        0x1804 => Some("Tx Power"),
        0x1805 => Some("Current Time"),
        0x180a => Some("Device Information"),
        0x180d => Some("Heart Rate"),
        0x180f => Some("Battery"),
        0x1810 => Some("Blood Pressure"),
        0x1812 => Some("Human Interface Device"),
        0x1816 => Some("Cycling Speed and Cadence"),
        0x181a => Some("Environmental Sensing"),
        0x181c => Some("User Data"),
        0xfe59 => Some("Nordic DFU"),
        _ => None,
    }
}

/// Human-readable name for a well-known SIG characteristic.
pub fn characteristic_name(uuid: &Uuid) -> Option<&'static str> {
    match sig_id(uuid)? {
        0x2a00 => Some("Device Name"),
        0x2a01 => Some("Appearance"),
        0x2a04 => Some("Peripheral Preferred Connection Parameters"),
        0x2a05 => Some("Service Changed"),
        0x2a19 => Some("Battery Level"),
        0x2a23 => Some("System ID"),
        0x2a24 => Some("Model Number String"),
        0x2a25 => Some("Serial Number String"),
        0x2a26 => Some("Firmware Revision String"),
        0x2a27 => Some("Hardware Revision String"),
        0x2a28 => Some("Software Revision String"),
        0x2a29 => Some("Manufacturer Name String"),
        0x2a2b => Some("Current Time"),
        0x2a37 => Some("Heart Rate Measurement"),
        0x2a38 => Some("Body Sensor Location"),
        0x2a4d => Some("Report"),
        0x2a6e => Some("Temperature"),
        0x2a6f => Some("Humidity"),
        _ => None,
    }
}
