//! Linux device inventory: udev `block` subsystem enumeration,
//! `/proc/mounts`/`/etc/mtab` for live mountpoints, sysfs
//! `queue/logical_block_size` for LBA size.
//!
//! Grounded on `original_source/devtree_linux.cc`'s `getAllDevices`: same
//! property list, same `ID_DRIVE_FLOPPY` skip, same disk/partition
//! classification by `DEVTYPE`.

use std::collections::BTreeMap;
use std::fs;

use mountmap_common::properties::keys;
use mountmap_common::{Properties, SystemError};

use crate::Inventory;

pub fn produce() -> Result<Inventory, SystemError> {
    let mut enumerator =
        udev::Enumerator::new().map_err(|e| SystemError::io("udev::Enumerator::new", e))?;
    enumerator
        .match_subsystem("block")
        .map_err(|e| SystemError::io("udev match_subsystem(block)", e))?;
    let devices = enumerator
        .scan_devices()
        .map_err(|e| SystemError::io("udev scan_devices", e))?;

    let mounts = read_mounts();

    let mut disks = BTreeMap::new();
    let mut partitions = BTreeMap::new();

    for device in devices {
        if device.property_value("ID_DRIVE_FLOPPY").map(|v| v == "1") == Some(true) {
            continue;
        }

        let Some(devnode) = device.devnode() else {
            continue;
        };
        let device_name = devnode.display().to_string();

        let devtype = device.property_value("DEVTYPE").and_then(|v| v.to_str());

        let mut props = Properties::new();
        props.insert(keys::DEVICE_NAME.into(), device_name.clone());
        props.insert(keys::MOUNTABLE_PATH.into(), device_name.clone());
        props.insert(keys::READABLE_PATH.into(), device_name.clone());

        if let Some(v) = device.property_value("MAJOR").and_then(|v| v.to_str()) {
            props.insert(keys::MAJOR.into(), v.to_string());
        }
        if let Some(v) = device.property_value("MINOR").and_then(|v| v.to_str()) {
            props.insert(keys::MINOR.into(), v.to_string());
        }
        if let Some(v) = device.property_value("ID_MODEL").and_then(|v| v.to_str()) {
            props.insert(keys::HARDWARE.into(), v.to_string());
        }
        if let Some(size) = read_logical_block_size(&device) {
            props.insert(keys::LBA_SIZE.into(), size.to_string());
        }

        match devtype {
            Some("disk") => {
                if let Some(v) = device
                    .property_value("ID_PART_TABLE_UUID")
                    .and_then(|v| v.to_str())
                {
                    props.insert(keys::MBR_ID.into(), v.to_string());
                }
                props.insert(keys::DISK_ID.into(), device.syspath().display().to_string());
                props.insert(keys::IS_DISK.into(), "1".into());
                disks.insert(device_name, props);
            }
            Some("partition") => {
                if let Some(v) = device
                    .property_value("ID_PART_ENTRY_UUID")
                    .and_then(|v| v.to_str())
                {
                    props.insert(keys::PART_UUID.into(), v.to_ascii_uppercase());
                }
                if let Some(v) = device
                    .property_value("ID_PART_ENTRY_OFFSET")
                    .and_then(|v| v.to_str())
                {
                    props.insert(keys::PART_OFFSET_BLOCKS.into(), v.to_string());
                }
                if let Some(v) = device
                    .property_value("UDISKS_PARTITION_OFFSET")
                    .and_then(|v| v.to_str())
                {
                    props.insert(keys::PART_OFFSET_BYTES.into(), v.to_string());
                }
                if let Some(v) = device.property_value("ID_FS_LABEL").and_then(|v| v.to_str()) {
                    props.insert(keys::FS_LABEL.into(), v.to_string());
                }
                let is_ntfs = device.property_value("ID_FS_TYPE").and_then(|v| v.to_str())
                    == Some("ntfs");
                if let Some(v) = device.property_value("ID_FS_TYPE").and_then(|v| v.to_str()) {
                    props.insert(keys::FS_TYPE.into(), v.to_string());
                }
                props.insert(keys::IS_NTFS.into(), if is_ntfs { "1" } else { "0" }.into());

                let disk_id = device
                    .parent()
                    .map(|parent| parent.syspath().display().to_string())
                    .unwrap_or_else(|| device.syspath().display().to_string());
                props.insert(keys::DISK_ID.into(), disk_id);
                props.insert(keys::IS_DISK.into(), "0".into());

                if let Some(mountpoint) = mounts.get(&device_name) {
                    props.insert(keys::MOUNTPOINT.into(), mountpoint.clone());
                }

                partitions.insert(device_name, props);
            }
            _ => continue,
        }
    }

    Ok(Inventory::from_parts(disks, partitions))
}

fn read_logical_block_size(device: &udev::Device) -> Option<u64> {
    let path = device.syspath().join("queue/logical_block_size");
    let path = if path.exists() {
        path
    } else {
        device
            .parent()?
            .syspath()
            .join("queue/logical_block_size")
    };
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn read_mounts() -> BTreeMap<String, String> {
    for path in ["/proc/mounts", "/etc/mtab"] {
        if let Ok(contents) = fs::read_to_string(path) {
            let mut map = BTreeMap::new();
            for line in contents.lines() {
                let mut fields = line.split_whitespace();
                if let (Some(device), Some(mountpoint)) = (fields.next(), fields.next()) {
                    map.insert(device.to_string(), mountpoint.to_string());
                }
            }
            return map;
        }
    }
    BTreeMap::new()
}
