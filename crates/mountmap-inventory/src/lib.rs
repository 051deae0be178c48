//! Uniform device property-map inventory (C2, §4.2) over two very
//! different OS discovery mechanisms: udev + sysfs + `/proc/mounts` on
//! Linux, DiskArbitration + IOKit on macOS.
//!
//! The inventory is produced once per process and memoized in a
//! [`std::sync::OnceLock`] (§5, §12): every call to [`disks`] or
//! [`partitions`] after the first sees the same snapshot.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use mountmap_common::{properties::matches, Criteria, Properties};

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        use linux as platform;
    } else if #[cfg(target_os = "macos")] {
        mod macos;
        use macos as platform;
    } else {
        mod unsupported;
        use unsupported as platform;
    }
}

/// The device inventory: disks and partitions, each keyed by the OS's
/// native device-id string (e.g. `/dev/sda`, `disk0s1`).
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    disks: BTreeMap<String, Properties>,
    partitions: BTreeMap<String, Properties>,
}

impl Inventory {
    fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        disks: BTreeMap<String, Properties>,
        partitions: BTreeMap<String, Properties>,
    ) -> Self {
        Self { disks, partitions }
    }
}

static INVENTORY: OnceLock<Inventory> = OnceLock::new();

fn inventory() -> &'static Inventory {
    INVENTORY.get_or_init(|| {
        log::debug!("producing device inventory");
        match platform::produce() {
            Ok(inv) => {
                log::debug!(
                    "device inventory produced: {} disks, {} partitions",
                    inv.disks.len(),
                    inv.partitions.len()
                );
                inv
            }
            Err(err) => {
                log::warn!("device inventory production failed, falling back to an empty inventory: {err}");
                Inventory::empty()
            }
        }
    })
}

/// Query the disk inventory against `criteria` (§4.2's sentinel table).
pub fn disks(criteria: &Criteria) -> BTreeMap<String, Properties> {
    inventory()
        .disks
        .iter()
        .filter(|(_, props)| matches(criteria, props))
        .map(|(id, props)| (id.clone(), props.clone()))
        .collect()
}

/// Query the partition inventory against `criteria` (§4.2's sentinel table).
pub fn partitions(criteria: &Criteria) -> BTreeMap<String, Properties> {
    inventory()
        .partitions
        .iter()
        .filter(|(_, props)| matches(criteria, props))
        .map(|(id, props)| (id.clone(), props.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mountmap_common::PropertyValue;

    #[test]
    fn empty_inventory_matches_nothing_but_ignore() {
        let inv = Inventory::empty();
        let mut criteria = Criteria::new();
        criteria.insert("anything".into(), PropertyValue::Ignore);
        assert!(inv
            .disks
            .iter()
            .all(|(_, props)| matches(&criteria, props)));
        assert!(inv.disks.is_empty());
        assert!(inv.partitions.is_empty());
    }
}
