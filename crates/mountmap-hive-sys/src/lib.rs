//! Raw `extern "C"` bindings to the system `libhivex` shared library,
//! located at build time via `pkg-config --libs hivex` (`build.rs`).
//!
//! Function names and the `hive_set_value` layout are taken directly
//! from libhivex's public header and from the exact call sequence in
//! `original_source/mounted_devices.cc`. This crate performs no safety
//! wrapping; [`mountmap_hive`] is the safe facade built on top.

#![allow(non_camel_case_types)]

use libc::{c_char, c_int, size_t};

/// Opaque handle to an open hive.
#[repr(C)]
pub struct hive_h {
    _private: [u8; 0],
}

pub type hive_node_h = i64;
pub type hive_value_h = i64;
pub type hive_type = c_int;

pub const HIVEX_OPEN_VERBOSE: c_int = 1;
pub const HIVEX_OPEN_DEBUG: c_int = 2;
pub const HIVEX_OPEN_WRITE: c_int = 4;
pub const HIVEX_OPEN_UNSAFE: c_int = 8;

pub const HIVE_T_REG_NONE: hive_type = 0;
pub const HIVE_T_REG_SZ: hive_type = 1;
pub const HIVE_T_REG_EXPAND_SZ: hive_type = 2;
pub const HIVE_T_REG_BINARY: hive_type = 3;
pub const HIVE_T_REG_DWORD: hive_type = 4;
pub const HIVE_T_REG_DWORD_BIG_ENDIAN: hive_type = 5;
pub const HIVE_T_REG_LINK: hive_type = 6;
pub const HIVE_T_REG_MULTI_SZ: hive_type = 7;
pub const HIVE_T_REG_RESOURCE_LIST: hive_type = 8;
pub const HIVE_T_REG_FULL_RESOURCE_DESCRIPTOR: hive_type = 9;
pub const HIVE_T_REG_RESOURCE_REQUIREMENTS_LIST: hive_type = 10;
pub const HIVE_T_REG_QWORD: hive_type = 11;

/// Mirrors libhivex's `struct hive_set_value`: a key name, a registry
/// type tag, and a byte buffer with explicit length (values are not
/// NUL-terminated — `MountedDevices` entries routinely contain embedded
/// zero bytes).
#[repr(C)]
pub struct hive_set_value {
    pub key: *mut c_char,
    pub t: hive_type,
    pub len: size_t,
    pub value: *mut c_char,
}

extern "C" {
    pub fn hivex_open(filename: *const c_char, flags: c_int) -> *mut hive_h;
    pub fn hivex_close(h: *mut hive_h) -> c_int;

    pub fn hivex_root(h: *mut hive_h) -> hive_node_h;
    pub fn hivex_node_get_child(
        h: *mut hive_h,
        node: hive_node_h,
        name: *const c_char,
    ) -> hive_node_h;

    /// Returns a malloc'd, zero-terminated array of value handles.
    pub fn hivex_node_values(h: *mut hive_h, node: hive_node_h) -> *mut hive_value_h;

    pub fn hivex_value_key(h: *mut hive_h, value: hive_value_h) -> *mut c_char;

    /// Returns a malloc'd buffer of length `*len`; `*t` receives the
    /// registry type.
    pub fn hivex_value_value(
        h: *mut hive_h,
        value: hive_value_h,
        t: *mut hive_type,
        len: *mut size_t,
    ) -> *mut c_char;

    pub fn hivex_value_type(
        h: *mut hive_h,
        value: hive_value_h,
        t: *mut hive_type,
        len: *mut size_t,
    ) -> c_int;

    pub fn hivex_node_get_value(
        h: *mut hive_h,
        node: hive_node_h,
        key: *const c_char,
    ) -> hive_value_h;

    /// Creates or overwrites a value under `node`. libhivex supports
    /// neither renaming a value nor deleting one outright.
    pub fn hivex_node_set_value(
        h: *mut hive_h,
        node: hive_node_h,
        val: *const hive_set_value,
        flags: c_int,
    ) -> c_int;

    /// Flushes the in-memory hive to disk. `filename` may be null to
    /// write back to the file the hive was opened from.
    pub fn hivex_commit(h: *mut hive_h, filename: *const c_char, flags: c_int) -> c_int;
}

// libhivex allocates every returned buffer (value keys, value data,
// the node_values array) with the C `malloc`. The safe facade frees
// them through `libc::free` rather than assuming Rust's global
// allocator matches libc's.
