//! Reverse-resolve a decoded [`Mapping`] against the live device
//! inventory (C4, §4.4). Dispatched by variant, not by virtual call: the
//! original's `Mapping::osDeviceName` virtual method becomes one function
//! per variant here, matched on in [`resolve`].

use mountmap_common::properties::keys;
use mountmap_common::{Criteria, Properties, PropertyValue};
use mountmap_mapping::Mapping;
use mountmap_mbr::MbrSector;

use std::fs::File;
use std::io::{Seek, SeekFrom};

const DEFAULT_BLOCK_SIZE: u64 = 512;

/// The outcome of resolving a mapping against this host's device
/// inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceName {
    /// A concrete OS device path was found.
    Found(String),
    /// The mapping's shape was recognized but no matching device exists
    /// here, and absence could not be established with confidence.
    Unknown,
    /// The mapping's shape was recognized and this host's inventory is
    /// complete enough to say with confidence that the device is absent.
    NotAttached,
}

impl std::fmt::Display for DeviceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceName::Found(device) => write!(f, "{device}"),
            DeviceName::Unknown => write!(f, "UNKNOWN"),
            DeviceName::NotAttached => write!(f, "NOT_ATTACHED"),
        }
    }
}

/// Resolve `mapping` against this host's device inventory.
pub fn resolve(mapping: &Mapping) -> DeviceName {
    match mapping {
        Mapping::MbrPartition {
            disk_id,
            offset_bytes,
        } => resolve_mbr_partition(*disk_id, *offset_bytes),
        Mapping::GuidPartition { guid } => resolve_guid_partition(guid),
        Mapping::GenericDeviceInterface {
            instance_path,
            interface_guid,
        } => resolve_generic_device_interface(instance_path, interface_guid),
        Mapping::Raw { .. } => DeviceName::Unknown,
    }
}

/// Whether this platform's inventory backend can answer a
/// partition-offset query at all. False on macOS (Open Question #1):
/// DiskArbitration has no partition-table-offset surface, so queries
/// naming `part-offset-blocks`/`part-offset-bytes` are declared
/// `IMPOSSIBLE` rather than silently omitted.
#[cfg(target_os = "macos")]
fn partition_offsets_queryable() -> bool {
    false
}

#[cfg(not(target_os = "macos"))]
fn partition_offsets_queryable() -> bool {
    true
}

#[cfg(target_os = "macos")]
fn partition_device_path(disk_path: &str, index: u32) -> String {
    format!("{disk_path}s{index}")
}

#[cfg(not(target_os = "macos"))]
fn partition_device_path(disk_path: &str, index: u32) -> String {
    format!("{disk_path}{index}")
}

/// No usable match was found anywhere in the resolution chain. Linux's
/// inventory is complete enough to call this `NotAttached`; on macOS
/// absence is ambiguous, so it is reported as `Unknown` (§4.4 step 5).
fn no_match() -> DeviceName {
    if cfg!(target_os = "macos") {
        DeviceName::Unknown
    } else {
        DeviceName::NotAttached
    }
}

fn resolve_mbr_partition(disk_id: u32, offset_bytes: u64) -> DeviceName {
    let hex_id = format!("{disk_id:08x}");

    let mut disk_criteria = Criteria::new();
    disk_criteria.insert(keys::MBR_ID.into(), PropertyValue::String(hex_id.clone()));
    let mut disk_result = mountmap_inventory::disks(&disk_criteria);

    if disk_result.is_empty() {
        log::debug!("no disk matched MBR-id {hex_id} by query, falling back to reading every disk's MBR");
        disk_result = find_disk_by_reading_mbr(disk_id);
    }

    let Some((disk_device, disk_props)) = disk_result.into_iter().next() else {
        return no_match();
    };

    if !partition_offsets_queryable() {
        // Open Question #1: no partition-offset query surface at all on
        // this platform; a synthesized partition suffix would be a guess
        // with no partition-table corroboration. Return the disk.
        return DeviceName::Found(disk_device);
    }

    let block_size: u64 = disk_props
        .get(keys::LBA_SIZE)
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_BLOCK_SIZE);

    let disk_id_prop = disk_props.get(keys::DISK_ID).cloned();

    let mut part_criteria = Criteria::new();
    if let Some(id) = &disk_id_prop {
        part_criteria.insert(keys::DISK_ID.into(), PropertyValue::String(id.clone()));
    }
    part_criteria.insert(
        keys::PART_OFFSET_BLOCKS.into(),
        PropertyValue::String((offset_bytes / block_size).to_string()),
    );

    if let Some((device, _)) = mountmap_inventory::partitions(&part_criteria).into_iter().next() {
        return DeviceName::Found(device);
    }

    part_criteria.remove(keys::PART_OFFSET_BLOCKS);
    part_criteria.insert(
        keys::PART_OFFSET_BYTES.into(),
        PropertyValue::String(offset_bytes.to_string()),
    );

    if let Some((device, _)) = mountmap_inventory::partitions(&part_criteria).into_iter().next() {
        return DeviceName::Found(device);
    }

    // Step 4: neither offset-blocks nor offset-bytes is populated for
    // partitions on this host. Read the disk's own MBR/EBR chain
    // directly and match the target LBA against primary-entry starts.
    if let Some(device) = resolve_by_reading_mbr(&disk_device, offset_bytes, block_size) {
        return DeviceName::Found(device);
    }

    no_match()
}

fn find_disk_by_reading_mbr(disk_id: u32) -> std::collections::BTreeMap<String, Properties> {
    let mut out = std::collections::BTreeMap::new();
    for (device, props) in mountmap_inventory::disks(&Criteria::new()) {
        let Some(path) = props.get(keys::READABLE_PATH) else {
            continue;
        };
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(err) => {
                log::debug!("skipping {path} while searching for disk id {disk_id:08x}: {err}");
                continue;
            }
        };
        let sector = match MbrSector::parse(&mut file) {
            Ok(sector) => sector,
            Err(err) => {
                log::debug!("skipping {path} while searching for disk id {disk_id:08x}: {err}");
                continue;
            }
        };
        if sector.disk_signature == disk_id {
            out.insert(device, props);
            break;
        }
    }
    out
}

fn resolve_by_reading_mbr(disk_device: &str, offset_bytes: u64, block_size: u64) -> Option<String> {
    let target_lba = offset_bytes / block_size;

    let mut file = File::open(disk_device).ok()?;
    let sector = MbrSector::parse(&mut file).ok()?;

    for (i, entry) in sector.entries.iter().enumerate() {
        if entry.is_empty() {
            continue;
        }
        if entry.is_extended() {
            let extended_lba = entry.lba_start() as u64;
            file.seek(SeekFrom::Start(0)).ok()?;
            if let Ok(Some(index)) =
                mountmap_mbr::walk_extended_chain(&mut file, block_size, extended_lba, target_lba)
            {
                return Some(partition_device_path(disk_device, index));
            }
        } else if entry.lba_start() as u64 == target_lba {
            return Some(partition_device_path(disk_device, (i + 1) as u32));
        }
    }

    None
}

fn resolve_guid_partition(guid: &str) -> DeviceName {
    let mut criteria = Criteria::new();
    criteria.insert(keys::PART_UUID.into(), PropertyValue::String(guid.to_string()));

    match mountmap_inventory::partitions(&criteria).into_iter().next() {
        Some((device, _)) => DeviceName::Found(device),
        None => DeviceName::NotAttached,
    }
}

fn resolve_generic_device_interface(instance_path: &str, _interface_guid: &str) -> DeviceName {
    if let Some(rest) = instance_path.strip_prefix("SCSI\\CdRom") {
        return resolve_scsi_cdrom(rest);
    }
    if let Some(rest) = instance_path.strip_prefix("IDE\\CdRom") {
        return resolve_ide_cdrom(rest);
    }

    DeviceName::Unknown
}

fn resolve_scsi_cdrom(rest: &str) -> DeviceName {
    let model = rest
        .split("&Prod_")
        .nth(1)
        .map(|s| s.split('&').next().unwrap_or(s).to_string());

    let Some(model) = model else {
        return DeviceName::Unknown;
    };

    let mut criteria = Criteria::new();
    criteria.insert(keys::HARDWARE.into(), PropertyValue::String(model));

    match_unique(mountmap_inventory::disks(&criteria))
}

fn resolve_ide_cdrom(payload: &str) -> DeviceName {
    let candidates: Vec<String> = mountmap_inventory::disks(&Criteria::new())
        .into_iter()
        .filter_map(|(device, props)| {
            let hardware = props.get(keys::HARDWARE)?;
            if !hardware.is_empty() && payload.starts_with(hardware.as_str()) {
                Some(device)
            } else {
                None
            }
        })
        .collect();

    match candidates.len() {
        0 => DeviceName::NotAttached,
        1 => DeviceName::Found(candidates.into_iter().next().unwrap()),
        _ => DeviceName::Unknown,
    }
}

fn match_unique(result: std::collections::BTreeMap<String, Properties>) -> DeviceName {
    match result.len() {
        0 => DeviceName::NotAttached,
        1 => DeviceName::Found(result.into_keys().next().unwrap()),
        _ => DeviceName::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_mapping_is_always_unknown() {
        let mapping = Mapping::Raw { bytes: vec![1, 2, 3] };
        assert_eq!(resolve(&mapping), DeviceName::Unknown);
    }

    #[test]
    fn unrecognized_generic_interface_prefix_is_unknown() {
        let mapping = Mapping::GenericDeviceInterface {
            instance_path: "STORAGE\\Volume\\whatever".into(),
            interface_guid: "53F5630D-B6BF-11D0-94F2-00A0C91EFB8B".into(),
        };
        assert_eq!(resolve(&mapping), DeviceName::Unknown);
    }

    #[test]
    fn scsi_cdrom_extracts_product_substring() {
        let model = "SCSI\\CdRom&Ven_NECVMWar&Prod_VMware_SATA_CD00\\5&3a2f1b8&0&000000"
            .strip_prefix("SCSI\\CdRom")
            .unwrap();
        let extracted = model
            .split("&Prod_")
            .nth(1)
            .map(|s| s.split('&').next().unwrap_or(s).to_string());
        assert_eq!(extracted, Some("VMware_SATA_CD00".to_string()));
    }

    #[test]
    fn guid_partition_not_attached_when_inventory_empty() {
        // With no live devices in this test environment, the inventory is
        // empty and every GUID query misses.
        let mapping = Mapping::GuidPartition {
            guid: "44332211-6655-8877-99AA-BBCCDDEEFF00".into(),
        };
        assert_eq!(resolve(&mapping), DeviceName::NotAttached);
    }
}
