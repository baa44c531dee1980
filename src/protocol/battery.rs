//! Battery Level (0x2A19) parsing.

use tracing::trace;

/// Decode a Battery Level payload: one unsigned byte, percent.
///
/// Values above 100 are invalid and yield `None`.
pub fn decode_battery_level(data: &[u8]) -> Option<u8> {
    let level = *data.first()?;
    if level > 100 {
        trace!("Battery level out of range: {}", level);
        return None;
    }
    Some(level)
}
