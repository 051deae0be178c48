//! macOS device inventory: `IOMedia` enumeration through IOKit, described
//! via DiskArbitration (`DADiskCopyDescription`), with a secondary IOKit
//! walk synthesizing `(cdromN)`/`(dvdN)` entries for optical drives that
//! currently hold no medium.
//!
//! Grounded verbatim on `original_source/devtree_macosx.cc`'s
//! `getAllDevices`/`toString` dispatch; the `CFType -> String` bridging
//! here uses the real `core-foundation` crate's safe wrappers in place of
//! the original's manual `CFGetTypeID` switch.

mod sys;

use std::collections::BTreeMap;
use std::ffi::CString;

use core_foundation::base::{kCFAllocatorDefault, CFRelease, CFType, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_foundation::uuid::CFUUID;

use mountmap_common::properties::keys;
use mountmap_common::{Properties, SystemError};

use crate::Inventory;

pub fn produce() -> Result<Inventory, SystemError> {
    let mut disks = BTreeMap::new();
    let mut partitions = BTreeMap::new();

    unsafe {
        enumerate_media(&mut disks, &mut partitions)?;
    }

    let mut cdrom_count = 0u32;
    let mut dvd_count = 0u32;
    unsafe {
        synthesize_empty_optical_drives(&mut disks, &mut cdrom_count, &mut dvd_count)?;
    }

    Ok(Inventory::from_parts(disks, partitions))
}

unsafe fn enumerate_media(
    disks: &mut BTreeMap<String, Properties>,
    partitions: &mut BTreeMap<String, Properties>,
) -> Result<(), SystemError> {
    let class_name = CString::new(sys::K_IO_MEDIA_CLASS).unwrap();
    let matching = sys::IOServiceMatching(class_name.as_ptr());
    if matching.is_null() {
        return Err(SystemError::Other {
            operation: "IOServiceMatching",
            message: "returned null matching dictionary".into(),
        });
    }

    let mut iter: sys::io_iterator_t = 0;
    let kr = sys::IOServiceGetMatchingServices(sys::kIOMasterPortDefault, matching, &mut iter);
    if kr != sys::KERN_SUCCESS {
        return Err(SystemError::Other {
            operation: "IOServiceGetMatchingServices",
            message: format!("kern_return_t {kr}"),
        });
    }

    let session = sys::DASessionCreate(kCFAllocatorDefault as *const _);
    if session.is_null() {
        sys::IOObjectRelease(iter);
        return Err(SystemError::Other {
            operation: "DASessionCreate",
            message: "returned null session".into(),
        });
    }

    loop {
        let service = sys::IOIteratorNext(iter);
        if service == 0 {
            break;
        }

        let disk_ref = sys::DADiskCreateFromIOMedia(kCFAllocatorDefault as *const _, session, service);
        sys::IOObjectRelease(service);
        if disk_ref.is_null() {
            continue;
        }

        let dict_ref = sys::DADiskCopyDescription(disk_ref);
        if !dict_ref.is_null() {
            let dict: CFDictionary<CFType, CFType> = CFDictionary::wrap_under_create_rule(dict_ref);
            let props = dictionary_to_properties(&dict);
            classify(props, disks, partitions);
        }

        CFRelease(disk_ref as *const _);
    }

    sys::IOObjectRelease(iter);
    CFRelease(session as *const _);
    Ok(())
}

fn dictionary_to_properties(dict: &CFDictionary<CFType, CFType>) -> BTreeMap<String, String> {
    let mut raw = BTreeMap::new();
    let (keys_raw, values_raw) = unsafe { dict.get_keys_and_values() };
    for (k, v) in keys_raw.into_iter().zip(values_raw.into_iter()) {
        let key_ty: CFType = unsafe { TCFType::wrap_under_get_rule(k as _) };
        let value_ty: CFType = unsafe { TCFType::wrap_under_get_rule(v as _) };
        if let (Some(key_str), Some(value_str)) =
            (cftype_to_string(&key_ty), cftype_to_string(&value_ty))
        {
            raw.insert(key_str, value_str);
        }
    }
    raw
}

fn cftype_to_string(value: &CFType) -> Option<String> {
    if let Some(s) = value.downcast::<CFString>() {
        return Some(s.to_string());
    }
    if let Some(b) = value.downcast::<CFBoolean>() {
        let as_bool: bool = b.into();
        return Some(if as_bool { "1".into() } else { "0".into() });
    }
    if let Some(n) = value.downcast::<CFNumber>() {
        if let Some(i) = n.to_i64() {
            return Some(i.to_string());
        }
        if let Some(f) = n.to_f64() {
            return Some(f.to_string());
        }
    }
    if let Some(u) = value.downcast::<CFUUID>() {
        let str_ref =
            unsafe { sys::CFUUIDCreateString(kCFAllocatorDefault as *const _, u.as_concrete_TypeRef()) };
        if !str_ref.is_null() {
            let s = unsafe { CFString::wrap_under_create_rule(str_ref) };
            return Some(s.to_string());
        }
    }
    None
}

fn classify(
    raw: BTreeMap<String, String>,
    disks: &mut BTreeMap<String, Properties>,
    partitions: &mut BTreeMap<String, Properties>,
) {
    let Some(bsd_name) = raw.get(sys::keys::MEDIA_BSD_NAME).cloned() else {
        return;
    };

    let mut props = Properties::new();
    let mountable = format!("/dev/{bsd_name}");
    let readable = format!("/dev/r{bsd_name}");
    props.insert(keys::DEVICE_NAME.into(), bsd_name.clone());
    props.insert(keys::MOUNTABLE_PATH.into(), mountable);
    props.insert(keys::READABLE_PATH.into(), readable);

    if let Some(v) = raw.get(sys::keys::MEDIA_BSD_MAJOR) {
        props.insert(keys::MAJOR.into(), v.clone());
    }
    if let Some(v) = raw.get(sys::keys::MEDIA_BSD_MINOR) {
        props.insert(keys::MINOR.into(), v.clone());
    }
    if let Some(v) = raw.get(sys::keys::MEDIA_BLOCK_SIZE) {
        props.insert(keys::LBA_SIZE.into(), v.clone());
    }
    if let Some(v) = raw.get(sys::keys::MEDIA_NAME) {
        props.insert(keys::FS_LABEL.into(), v.clone());
    }
    if let Some(v) = raw.get(sys::keys::MEDIA_UUID) {
        props.insert(keys::PART_UUID.into(), v.to_ascii_uppercase());
    }
    if let Some(kind) = raw.get(sys::keys::MEDIA_KIND) {
        props.insert(keys::FS_TYPE.into(), kind.clone());
        props.insert(
            keys::IS_NTFS.into(),
            if kind == "ntfs" { "1" } else { "0" }.into(),
        );
    }

    let vendor = raw.get(sys::keys::DEVICE_VENDOR).cloned().unwrap_or_default();
    let model = raw.get(sys::keys::DEVICE_MODEL).cloned().unwrap_or_default();
    if !vendor.is_empty() || !model.is_empty() {
        let hardware = format!("{vendor}{model}").trim_end().replace(' ', "_");
        props.insert(keys::HARDWARE.into(), hardware);
    }

    // MBR-id and partition-offset queries have no DiskArbitration
    // equivalent; they are declared IMPOSSIBLE at query time by
    // `mountmap-resolve`, not populated here.

    let is_whole = raw.get(sys::keys::MEDIA_WHOLE).map(|v| v == "1") == Some(true);
    if is_whole {
        props.insert(keys::DISK_ID.into(), disk_id_for(&bsd_name, true));
        props.insert(keys::IS_DISK.into(), "1".into());
        disks.insert(bsd_name, props);
    } else {
        props.insert(keys::DISK_ID.into(), disk_id_for(&bsd_name, false));
        props.insert(keys::IS_DISK.into(), "0".into());
        partitions.insert(bsd_name, props);
    }
}

/// `diskN` is its own disk-id; `diskNsM` belongs to `diskN` (strip the
/// trailing `sM` slice suffix).
fn disk_id_for(bsd_name: &str, is_whole: bool) -> String {
    if is_whole {
        return bsd_name.to_string();
    }
    match bsd_name.rfind('s') {
        Some(idx) if bsd_name[idx + 1..].chars().all(|c| c.is_ascii_digit()) => {
            bsd_name[..idx].to_string()
        }
        _ => bsd_name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_disk_id_strips_slice_suffix() {
        assert_eq!(disk_id_for("disk0s2", false), "disk0");
        assert_eq!(disk_id_for("disk3s10", false), "disk3");
    }

    #[test]
    fn whole_disk_is_its_own_disk_id() {
        assert_eq!(disk_id_for("disk0", true), "disk0");
    }

    #[test]
    fn name_without_slice_suffix_is_left_alone() {
        assert_eq!(disk_id_for("disk0", false), "disk0");
    }
}

unsafe fn synthesize_empty_optical_drives(
    disks: &mut BTreeMap<String, Properties>,
    cdrom_count: &mut u32,
    dvd_count: &mut u32,
) -> Result<(), SystemError> {
    for (class_name, is_dvd) in [
        (sys::K_IO_DVD_BLOCK_STORAGE_DEVICE_CLASS, true),
        (sys::K_IO_CD_BLOCK_STORAGE_DEVICE_CLASS, false),
    ] {
        let cname = CString::new(class_name).unwrap();
        let matching = sys::IOServiceMatching(cname.as_ptr());
        if matching.is_null() {
            continue;
        }

        let mut iter: sys::io_iterator_t = 0;
        let kr = sys::IOServiceGetMatchingServices(sys::kIOMasterPortDefault, matching, &mut iter);
        if kr != sys::KERN_SUCCESS {
            continue;
        }

        loop {
            let service = sys::IOIteratorNext(iter);
            if service == 0 {
                break;
            }
            sys::IOObjectRelease(service);

            let id = if is_dvd {
                *dvd_count += 1;
                format!("(dvd{})", *dvd_count - 1)
            } else {
                *cdrom_count += 1;
                format!("(cdrom{})", *cdrom_count - 1)
            };

            let mut props = Properties::new();
            props.insert(keys::DEVICE_NAME.into(), id.clone());
            props.insert(keys::DISK_ID.into(), id.clone());
            props.insert(keys::IS_DISK.into(), "1".into());
            disks.entry(id).or_insert(props);
        }

        sys::IOObjectRelease(iter);
    }

    Ok(())
}
