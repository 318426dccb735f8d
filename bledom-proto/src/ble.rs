//! BLE GATT constants for ELK-BLEDOM controllers
//!
//! The controller advertises one vendor service with a single write
//! characteristic. Commands go out as write-without-response.

/// Vendor service UUID
pub const SERVICE_UUID: &str = "0000fff0-0000-1000-8000-00805f9b34fb";

/// Command characteristic UUID (write without response)
pub const WRITE_CHAR_UUID: &str = "0000fff3-0000-1000-8000-00805f9b34fb";

/// Same characteristic as a 128-bit value, for stacks that want numbers
pub const WRITE_CHAR_UUID_U128: u128 = 0x0000fff3_0000_1000_8000_00805f9b34fb;
