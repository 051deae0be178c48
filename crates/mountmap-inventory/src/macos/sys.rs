//! Hand-written `extern "C"` bindings for the DiskArbitration and IOKit
//! entry points `macos.rs` needs. Neither framework has a safe Rust
//! wrapper in the example corpus, so these are declared directly and
//! linked the way a `-sys` crate would, just via framework linkage
//! instead of `pkg-config` (DiskArbitration/IOKit are not
//! pkg-config-discoverable). Grounded on the calls made directly by
//! `original_source/devtree_macosx.cc`.

#![allow(non_camel_case_types, non_snake_case)]

use core_foundation::base::CFAllocatorRef;
use core_foundation::dictionary::CFDictionaryRef;
use libc::{c_char, c_void};

pub type io_object_t = u32;
pub type io_iterator_t = io_object_t;
pub type io_service_t = io_object_t;
pub type kern_return_t = i32;
pub type mach_port_t = u32;

pub const KERN_SUCCESS: kern_return_t = 0;

#[repr(C)]
pub struct __DASession(c_void);
#[repr(C)]
pub struct __DADisk(c_void);

pub type DASessionRef = *const __DASession;
pub type DADiskRef = *const __DADisk;

#[link(name = "IOKit", kind = "framework")]
extern "C" {
    pub static kIOMasterPortDefault: mach_port_t;

    pub fn IOServiceMatching(name: *const c_char) -> CFDictionaryRef;

    pub fn IOServiceGetMatchingServices(
        main_port: mach_port_t,
        matching: CFDictionaryRef,
        existing: *mut io_iterator_t,
    ) -> kern_return_t;

    pub fn IOIteratorNext(iterator: io_iterator_t) -> io_object_t;

    pub fn IOObjectRelease(object: io_object_t) -> kern_return_t;
}

#[link(name = "DiskArbitration", kind = "framework")]
extern "C" {
    pub fn DASessionCreate(allocator: CFAllocatorRef) -> DASessionRef;

    pub fn DADiskCreateFromIOMedia(
        allocator: CFAllocatorRef,
        session: DASessionRef,
        media: io_service_t,
    ) -> DADiskRef;

    pub fn DADiskCopyDescription(disk: DADiskRef) -> CFDictionaryRef;

    pub fn DADiskGetBSDName(disk: DADiskRef) -> *const c_char;
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    pub fn CFUUIDCreateString(
        alloc: CFAllocatorRef,
        uuid: core_foundation::uuid::CFUUIDRef,
    ) -> core_foundation::string::CFStringRef;
}

pub const K_IO_MEDIA_CLASS: &str = "IOMedia";

/// Real IOKit class names for optical drives that currently hold no
/// medium (so they never surface as an `IOMedia` object DiskArbitration
/// can describe) — used to synthesize `(cdromN)`/`(dvdN)` entries.
pub const K_IO_CD_BLOCK_STORAGE_DEVICE_CLASS: &str = "IOCDBlockStorageDevice";
pub const K_IO_DVD_BLOCK_STORAGE_DEVICE_CLASS: &str = "IODVDBlockStorageDevice";

/// The DiskArbitration description keys actually read, named the way
/// `original_source/devtree_macosx.cc` names them.
pub mod keys {
    pub const MEDIA_WHOLE: &str = "DAMediaWhole";
    pub const MEDIA_BSD_NAME: &str = "DAMediaBSDName";
    pub const MEDIA_BSD_MAJOR: &str = "DAMediaBSDMajor";
    pub const MEDIA_BSD_MINOR: &str = "DAMediaBSDMinor";
    pub const MEDIA_NAME: &str = "DAMediaName";
    pub const MEDIA_UUID: &str = "DAMediaUUID";
    pub const MEDIA_KIND: &str = "DAMediaKind";
    pub const MEDIA_SIZE: &str = "DAMediaSize";
    pub const MEDIA_BLOCK_SIZE: &str = "DAMediaBlockSize";
    pub const DEVICE_VENDOR: &str = "DADeviceVendor";
    pub const DEVICE_MODEL: &str = "DADeviceModel";
    pub const VOLUME_PATH: &str = "DAVolumePath";
}
