//! Stand-in backend for platforms with no device-inventory support
//! (anything other than Linux or macOS). Always produces an empty
//! inventory rather than failing to build.

use mountmap_common::SystemError;

use crate::Inventory;

pub fn produce() -> Result<Inventory, SystemError> {
    Err(SystemError::Other {
        operation: "device inventory",
        message: "no inventory backend for this platform".into(),
    })
}
