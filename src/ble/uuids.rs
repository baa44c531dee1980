//! BLE Service and Characteristic UUIDs.
//!
//! All services used here are standard Bluetooth SIG assigned numbers,
//! expanded onto the Bluetooth base UUID.

use uuid::Uuid;

/// The Bluetooth base UUID (`0000xxxx-0000-1000-8000-00805f9b34fb`).
pub const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit SIG assigned number into a full UUID.
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

// Heart Rate Service
/// Heart Rate Service UUID (0x180D).
pub const HEART_RATE_SERVICE_UUID: Uuid = uuid_from_u16(0x180D);
/// Heart Rate Measurement characteristic UUID (0x2A37, Notify).
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = uuid_from_u16(0x2A37);

// Battery Service
/// Battery Service UUID (0x180F).
pub const BATTERY_SERVICE_UUID: Uuid = uuid_from_u16(0x180F);
/// Battery Level characteristic UUID (0x2A19, Read, optionally Notify).
pub const BATTERY_LEVEL_UUID: Uuid = uuid_from_u16(0x2A19);

// Glucose Service
/// Glucose Service UUID (0x1808).
pub const GLUCOSE_SERVICE_UUID: Uuid = uuid_from_u16(0x1808);
/// Glucose Measurement characteristic UUID (0x2A18, Notify).
pub const GLUCOSE_MEASUREMENT_UUID: Uuid = uuid_from_u16(0x2A18);

// Blood Pressure Service
/// Blood Pressure Service UUID (0x1810). Advertised by some monitors but not
/// decoded by this crate.
pub const BLOOD_PRESSURE_SERVICE_UUID: Uuid = uuid_from_u16(0x1810);

/// Services a peripheral may advertise to be offered for connection.
pub const MONITOR_SERVICES: [Uuid; 3] = [
    HEART_RATE_SERVICE_UUID,
    GLUCOSE_SERVICE_UUID,
    BLOOD_PRESSURE_SERVICE_UUID,
];

/// Check if a service UUID marks a supported biometric monitor.
pub fn is_monitor_service(uuid: &Uuid) -> bool {
    MONITOR_SERVICES.contains(uuid)
}
