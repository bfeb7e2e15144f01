//! Utility functions for calypso-core.

use btleplug::platform::PeripheralId;

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms they are D-Bus
/// paths or MAC addresses. This strips the `PeripheralId(...)` wrapper from
/// the debug output so the id can be used as a map key and in logs.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Whether an advertised name is the device we are looking for.
///
/// Matching is exact and case-insensitive; prefixes and suffixes do not match.
pub fn names_match(advertised: &str, wanted: &str) -> bool {
    advertised.to_lowercase() == wanted.to_lowercase()
}
