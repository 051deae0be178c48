//! Safe facade over [`mountmap_hive_sys`] for reading and mutating the
//! `MountedDevices` node of a Windows `SYSTEM` hive (C5, §4.5).
//!
//! The mutation algorithms (`swap`/`change`/`remove`/`add`) are written
//! against the [`ValueStore`] trait rather than directly against the
//! hivex handles, so the exact sequencing the original's
//! `MountedDevices::swap/change/remove` performs can be exercised in
//! tests without linking a real hive file.

use std::ffi::{CStr, CString};
use std::path::Path;

use mountmap_common::error::{MountmapError, SystemError, UserFault};
use mountmap_mapping::Mapping;
use mountmap_hive_sys as sys;

/// Registry type tag, reexported from the raw bindings so callers never
/// need to depend on `mountmap-hive-sys` directly.
pub type HiveType = sys::hive_type;

/// The identity a `MountedDevices` value is stored under: either a drive
/// letter (`\DosDevices\<L>:`) or a volume GUID (`\??\Volume{<GUID>}`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValueName {
    Letter(char),
    /// Uppercase 36-character GUID, no braces.
    Volume(String),
}

impl ValueName {
    pub fn letter(letter: char) -> Self {
        ValueName::Letter(letter.to_ascii_uppercase())
    }

    pub fn volume(guid: impl Into<String>) -> Self {
        ValueName::Volume(guid.into().to_ascii_uppercase())
    }

    /// The literal registry key this name is stored under.
    pub fn key(&self) -> String {
        match self {
            ValueName::Letter(l) => format!("\\DosDevices\\{l}:"),
            ValueName::Volume(g) => format!("\\??\\Volume{{{g}}}"),
        }
    }
}

/// Classify a raw `MountedDevices` key string into a [`ValueName`] (§3
/// invariant: every letter key has exactly two characters of path between
/// `\DosDevices\` and the trailing `:`; any other shape is a hard error).
fn classify_key(key: &str) -> Result<ValueName, MountmapError> {
    if key.starts_with("\\DosDevices\\") {
        if key.len() == 14 && key.ends_with(':') {
            let letter = key[12..13].chars().next().unwrap();
            return Ok(ValueName::Letter(letter.to_ascii_uppercase()));
        }
        return Err(UserFault::CorruptHiveKeyShape { key: key.to_string() }.into());
    }

    if let Some(rest) = key.strip_prefix("\\??\\Volume{") {
        if let Some(guid) = rest.strip_suffix('}') {
            if guid.len() == 36 {
                return Ok(ValueName::Volume(guid.to_ascii_uppercase()));
            }
        }
        return Err(UserFault::CorruptHiveKeyShape { key: key.to_string() }.into());
    }

    Err(UserFault::CorruptHiveKeyShape { key: key.to_string() }.into())
}

/// A name paired with its decoded mapping, as produced by [`Hive::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedValue {
    pub name: ValueName,
    pub mapping: Mapping,
}

/// Minimal key/value store abstraction matching what the `MountedDevices`
/// node needs: point lookup, create-or-overwrite, and a commit. [`Hive`]
/// implements this over libhivex; tests implement it over a `HashMap`.
trait ValueStore {
    fn get(&self, key: &str) -> Result<Option<(HiveType, Vec<u8>)>, MountmapError>;
    fn set(&self, key: &str, t: HiveType, bytes: &[u8]) -> Result<(), MountmapError>;
    fn commit(&self) -> Result<(), MountmapError>;
}

/// An open `SYSTEM` hive, positioned at its `MountedDevices` node.
pub struct Hive {
    handle: *mut sys::hive_h,
    node: sys::hive_node_h,
}

// The handle is only ever touched through libhivex's synchronous, single
// threaded API; `Hive` does not claim `Sync`.
unsafe impl Send for Hive {}

impl Hive {
    /// Open `path` and descend to `SYSTEM\MountedDevices`. `writable`
    /// selects `HIVEX_OPEN_WRITE`; required for every mutating method.
    pub fn open(path: &Path, writable: bool) -> Result<Self, MountmapError> {
        if !path.exists() {
            return Err(UserFault::HiveNotFound { path: path.display().to_string() }.into());
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| UserFault::Other { message: format!("non-UTF-8 path: {}", path.display()) })?;
        let c_path = CString::new(path_str)
            .map_err(|_| UserFault::Other { message: "hive path contains a NUL byte".into() })?;

        let flags = if writable { sys::HIVEX_OPEN_WRITE } else { 0 };
        let handle = unsafe { sys::hivex_open(c_path.as_ptr(), flags) };
        if handle.is_null() {
            return Err(SystemError::Hive {
                operation: "hivex_open",
                message: std::io::Error::last_os_error().to_string(),
            }
            .into());
        }

        let root = unsafe { sys::hivex_root(handle) };
        if root == 0 {
            unsafe { sys::hivex_close(handle) };
            return Err(SystemError::Hive { operation: "hivex_root", message: "no root node".into() }.into());
        }

        let md_name = CString::new("MountedDevices").unwrap();
        let node = unsafe { sys::hivex_node_get_child(handle, root, md_name.as_ptr()) };
        if node == 0 {
            unsafe { sys::hivex_close(handle) };
            return Err(UserFault::MountedDevicesKeyMissing.into());
        }

        Ok(Self { handle, node })
    }

    /// List every mapping under `MountedDevices`. Zero-length values
    /// (tombstones) are always skipped; volume-keyed values are included
    /// only when `include_without_letter` is set.
    pub fn list(&self, include_without_letter: bool) -> Result<Vec<ListedValue>, MountmapError> {
        let values_ptr = unsafe { sys::hivex_node_values(self.handle, self.node) };
        if values_ptr.is_null() {
            return Err(SystemError::Hive { operation: "hivex_node_values", message: "null value array".into() }.into());
        }

        let mut out = Vec::new();
        let mut i: isize = 0;
        loop {
            let value_handle = unsafe { *values_ptr.offset(i) };
            if value_handle == 0 {
                break;
            }
            i += 1;

            let key_ptr = unsafe { sys::hivex_value_key(self.handle, value_handle) };
            if key_ptr.is_null() {
                unsafe { libc::free(values_ptr as *mut libc::c_void) };
                return Err(SystemError::Hive { operation: "hivex_value_key", message: "null key".into() }.into());
            }
            let key = unsafe { CStr::from_ptr(key_ptr) }.to_string_lossy().into_owned();
            unsafe { libc::free(key_ptr as *mut libc::c_void) };

            let mut t: HiveType = 0;
            let mut len: libc::size_t = 0;
            let value_data = unsafe { sys::hivex_value_value(self.handle, value_handle, &mut t, &mut len) };
            if value_data.is_null() {
                unsafe { libc::free(values_ptr as *mut libc::c_void) };
                return Err(SystemError::Hive { operation: "hivex_value_value", message: "null value data".into() }.into());
            }
            let bytes = if len == 0 {
                Vec::new()
            } else {
                unsafe { std::slice::from_raw_parts(value_data as *const u8, len).to_vec() }
            };
            unsafe { libc::free(value_data as *mut libc::c_void) };

            if bytes.is_empty() {
                continue;
            }

            let name = match classify_key(&key) {
                Ok(name) => name,
                Err(err) => {
                    unsafe { libc::free(values_ptr as *mut libc::c_void) };
                    return Err(err);
                }
            };
            if matches!(name, ValueName::Volume(_)) && !include_without_letter {
                continue;
            }

            out.push(ListedValue { name, mapping: Mapping::decode(&bytes) });
        }

        unsafe { libc::free(values_ptr as *mut libc::c_void) };
        Ok(out)
    }

    /// Exchange the values mapped under `a` and `b`. Both letters must
    /// already carry a non-empty mapping (§4.5, S3).
    pub fn swap(&self, a: char, b: char) -> Result<(), MountmapError> {
        swap_impl(self, a, b)
    }

    /// Move the mapping under `from` onto `to`, then zero out `from`.
    /// `to` must currently be free (absent or a tombstone) (§4.5, S4/S5).
    pub fn change(&self, from: char, to: char) -> Result<(), MountmapError> {
        change_impl(self, from, to)
    }

    /// Zero out the value mapped under `letter`. `letter` must exist.
    pub fn remove(&self, letter: char) -> Result<(), MountmapError> {
        remove_impl(self, letter)
    }

    /// Create a new mapping under `letter`. `letter` must currently be
    /// free (absent or a tombstone).
    pub fn add(&self, letter: char, bytes: &[u8]) -> Result<(), MountmapError> {
        add_impl(self, letter, sys::HIVE_T_REG_BINARY, bytes)
    }
}

impl ValueStore for Hive {
    fn get(&self, key: &str) -> Result<Option<(HiveType, Vec<u8>)>, MountmapError> {
        let c_key = CString::new(key)
            .map_err(|_| UserFault::Other { message: "key contains a NUL byte".into() })?;
        let value_handle = unsafe { sys::hivex_node_get_value(self.handle, self.node, c_key.as_ptr()) };
        if value_handle == 0 {
            return Ok(None);
        }

        let mut t: HiveType = 0;
        let mut len: libc::size_t = 0;
        let value_data = unsafe { sys::hivex_value_value(self.handle, value_handle, &mut t, &mut len) };
        if value_data.is_null() {
            return Err(SystemError::Hive { operation: "hivex_value_value", message: "null value data".into() }.into());
        }
        let bytes = if len == 0 {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(value_data as *const u8, len).to_vec() }
        };
        unsafe { libc::free(value_data as *mut libc::c_void) };

        Ok(Some((t, bytes)))
    }

    fn set(&self, key: &str, t: HiveType, bytes: &[u8]) -> Result<(), MountmapError> {
        let mut c_key = CString::new(key)
            .map_err(|_| UserFault::Other { message: "key contains a NUL byte".into() })?
            .into_bytes_with_nul();
        let mut value_buf = bytes.to_vec();

        let set_value = sys::hive_set_value {
            key: c_key.as_mut_ptr() as *mut libc::c_char,
            t,
            len: value_buf.len(),
            value: if value_buf.is_empty() {
                std::ptr::null_mut()
            } else {
                value_buf.as_mut_ptr() as *mut libc::c_char
            },
        };

        let rc = unsafe { sys::hivex_node_set_value(self.handle, self.node, &set_value, 0) };
        if rc != 0 {
            return Err(SystemError::Hive {
                operation: "hivex_node_set_value",
                message: std::io::Error::last_os_error().to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn commit(&self) -> Result<(), MountmapError> {
        let rc = unsafe { sys::hivex_commit(self.handle, std::ptr::null(), 0) };
        if rc != 0 {
            return Err(SystemError::Hive {
                operation: "hivex_commit",
                message: std::io::Error::last_os_error().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl Drop for Hive {
    fn drop(&mut self) {
        let rc = unsafe { sys::hivex_close(self.handle) };
        if rc != 0 {
            log::warn!("hivex_close failed: {}", std::io::Error::last_os_error());
        }
    }
}

// Mutation algorithms, generic over `ValueStore` so they can be driven by
// a `HashMap`-backed fixture in tests without a real hive file.

fn swap_impl<S: ValueStore>(store: &S, a: char, b: char) -> Result<(), MountmapError> {
    let key_a = ValueName::letter(a).key();
    let key_b = ValueName::letter(b).key();

    let (type_a, bytes_a) = store
        .get(&key_a)?
        .filter(|(_, bytes)| !bytes.is_empty())
        .ok_or(UserFault::DriveLetterNotMapped { letter: a })?;
    let (type_b, bytes_b) = store
        .get(&key_b)?
        .filter(|(_, bytes)| !bytes.is_empty())
        .ok_or(UserFault::DriveLetterNotMapped { letter: b })?;

    store.set(&key_a, type_b, &bytes_b)?;
    store.set(&key_b, type_a, &bytes_a)?;
    store.commit()
}

fn change_impl<S: ValueStore>(store: &S, from: char, to: char) -> Result<(), MountmapError> {
    let key_from = ValueName::letter(from).key();
    let key_to = ValueName::letter(to).key();

    let (type_from, bytes_from) = store
        .get(&key_from)?
        .filter(|(_, bytes)| !bytes.is_empty())
        .ok_or(UserFault::DriveLetterNotMapped { letter: from })?;

    if let Some((_, existing)) = store.get(&key_to)? {
        if !existing.is_empty() {
            return Err(UserFault::DriveLetterTaken { letter: to }.into());
        }
    }

    // Two commits, matching the original's write-then-remove sequence:
    // the new mapping under `to` is durable before `from` is cleared, so
    // a crash between the two steps leaves the mapping duplicated under
    // both letters rather than lost under either.
    store.set(&key_to, type_from, &bytes_from)?;
    store.commit()?;

    remove_impl(store, from)
}

fn remove_impl<S: ValueStore>(store: &S, letter: char) -> Result<(), MountmapError> {
    let key = ValueName::letter(letter).key();
    let (t, _bytes) = store.get(&key)?.ok_or(UserFault::DriveLetterNotMapped { letter })?;
    store.set(&key, t, &[])?;
    store.commit()
}

fn add_impl<S: ValueStore>(store: &S, letter: char, t: HiveType, bytes: &[u8]) -> Result<(), MountmapError> {
    let key = ValueName::letter(letter).key();
    if let Some((_, existing)) = store.get(&key)? {
        if !existing.is_empty() {
            return Err(UserFault::DriveLetterTaken { letter }.into());
        }
    }
    store.set(&key, t, bytes)?;
    store.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// `HashMap`-backed stand-in for a hive, used to drive the mutation
    /// algorithms without linking libhivex or fabricating a hive file.
    struct FakeStore {
        values: RefCell<HashMap<String, (HiveType, Vec<u8>)>>,
        commits: RefCell<u32>,
    }

    impl FakeStore {
        fn new() -> Self {
            Self { values: RefCell::new(HashMap::new()), commits: RefCell::new(0) }
        }

        fn with(mut self, key: &str, t: HiveType, bytes: &[u8]) -> Self {
            self.values.get_mut().insert(key.to_string(), (t, bytes.to_vec()));
            self
        }
    }

    impl ValueStore for FakeStore {
        fn get(&self, key: &str) -> Result<Option<(HiveType, Vec<u8>)>, MountmapError> {
            Ok(self.values.borrow().get(key).cloned())
        }

        fn set(&self, key: &str, t: HiveType, bytes: &[u8]) -> Result<(), MountmapError> {
            self.values.borrow_mut().insert(key.to_string(), (t, bytes.to_vec()));
            Ok(())
        }

        fn commit(&self) -> Result<(), MountmapError> {
            *self.commits.borrow_mut() += 1;
            Ok(())
        }
    }

    #[test]
    fn classify_key_letter_and_volume() {
        assert_eq!(classify_key("\\DosDevices\\C:").unwrap(), ValueName::Letter('C'));
        assert_eq!(
            classify_key("\\??\\Volume{12345678-1234-1234-1234-1234567890AB}").unwrap(),
            ValueName::Volume("12345678-1234-1234-1234-1234567890AB".to_string())
        );
    }

    #[test]
    fn classify_key_rejects_unrecognized_shapes() {
        assert!(classify_key("\\DosDevices\\CC:").is_err());
        assert!(classify_key("garbage").is_err());
        assert!(classify_key("\\??\\Volume{tooshort}").is_err());
    }

    #[test]
    fn value_name_key_round_trips_through_classify() {
        let name = ValueName::letter('d');
        assert_eq!(classify_key(&name.key()).unwrap(), name);

        let name = ValueName::volume("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee");
        assert_eq!(classify_key(&name.key()).unwrap(), name);
    }

    // S3: swap exchanges the two values byte-identically and commits once.
    #[test]
    fn swap_exchanges_values_and_commits_once() {
        let store = FakeStore::new()
            .with("\\DosDevices\\C:", sys::HIVE_T_REG_BINARY, &[1, 2, 3])
            .with("\\DosDevices\\D:", sys::HIVE_T_REG_BINARY, &[4, 5, 6]);

        swap_impl(&store, 'C', 'D').unwrap();

        assert_eq!(store.values.borrow()["\\DosDevices\\C:"].1, vec![4, 5, 6]);
        assert_eq!(store.values.borrow()["\\DosDevices\\D:"].1, vec![1, 2, 3]);
        assert_eq!(*store.commits.borrow(), 1);

        // Re-swapping restores the original byte layout exactly.
        swap_impl(&store, 'C', 'D').unwrap();
        assert_eq!(store.values.borrow()["\\DosDevices\\C:"].1, vec![1, 2, 3]);
        assert_eq!(store.values.borrow()["\\DosDevices\\D:"].1, vec![4, 5, 6]);
    }

    #[test]
    fn swap_rejects_unmapped_letter() {
        let store = FakeStore::new().with("\\DosDevices\\C:", sys::HIVE_T_REG_BINARY, &[1]);
        let err = swap_impl(&store, 'C', 'Z').unwrap_err();
        assert!(matches!(err, MountmapError::UserFault(UserFault::DriveLetterNotMapped { letter: 'Z' })));
    }

    // S4: change onto an already-mapped letter is a hard error.
    #[test]
    fn change_onto_taken_letter_fails() {
        let store = FakeStore::new()
            .with("\\DosDevices\\C:", sys::HIVE_T_REG_BINARY, &[1, 2, 3])
            .with("\\DosDevices\\D:", sys::HIVE_T_REG_BINARY, &[9, 9, 9]);

        let err = change_impl(&store, 'C', 'D').unwrap_err();
        assert!(matches!(err, MountmapError::UserFault(UserFault::DriveLetterTaken { letter: 'D' })));
        // Nothing was mutated.
        assert_eq!(store.values.borrow()["\\DosDevices\\C:"].1, vec![1, 2, 3]);
        assert_eq!(store.values.borrow()["\\DosDevices\\D:"].1, vec![9, 9, 9]);
    }

    // S5: change onto a tombstoned (zero-length) letter succeeds.
    #[test]
    fn change_onto_tombstone_succeeds() {
        let store = FakeStore::new()
            .with("\\DosDevices\\C:", sys::HIVE_T_REG_BINARY, &[1, 2, 3])
            .with("\\DosDevices\\D:", sys::HIVE_T_REG_BINARY, &[]);

        change_impl(&store, 'C', 'D').unwrap();

        assert_eq!(store.values.borrow()["\\DosDevices\\D:"].1, vec![1, 2, 3]);
        assert!(store.values.borrow()["\\DosDevices\\C:"].1.is_empty());
        // One commit for the write under `to`, one for the clear under `from`.
        assert_eq!(*store.commits.borrow(), 2);
    }

    #[test]
    fn change_onto_absent_letter_succeeds() {
        let store = FakeStore::new().with("\\DosDevices\\C:", sys::HIVE_T_REG_BINARY, &[7]);
        change_impl(&store, 'C', 'Z').unwrap();
        assert_eq!(store.values.borrow()["\\DosDevices\\Z:"].1, vec![7]);
        assert!(store.values.borrow()["\\DosDevices\\C:"].1.is_empty());
    }

    #[test]
    fn change_rejects_unmapped_source() {
        let store = FakeStore::new();
        let err = change_impl(&store, 'C', 'D').unwrap_err();
        assert!(matches!(err, MountmapError::UserFault(UserFault::DriveLetterNotMapped { letter: 'C' })));
    }

    #[test]
    fn remove_zeroes_value_and_preserves_type() {
        let store = FakeStore::new().with("\\DosDevices\\C:", sys::HIVE_T_REG_SZ, &[1, 2, 3]);
        remove_impl(&store, 'C').unwrap();
        let (t, bytes) = store.values.borrow()["\\DosDevices\\C:"].clone();
        assert_eq!(t, sys::HIVE_T_REG_SZ);
        assert!(bytes.is_empty());
    }

    #[test]
    fn remove_rejects_absent_letter() {
        let store = FakeStore::new();
        let err = remove_impl(&store, 'Q').unwrap_err();
        assert!(matches!(err, MountmapError::UserFault(UserFault::DriveLetterNotMapped { letter: 'Q' })));
    }

    #[test]
    fn add_creates_a_new_mapping() {
        let store = FakeStore::new();
        add_impl(&store, 'E', sys::HIVE_T_REG_BINARY, &[1, 2]).unwrap();
        assert_eq!(store.values.borrow()["\\DosDevices\\E:"].1, vec![1, 2]);
    }

    #[test]
    fn add_rejects_already_taken_letter() {
        let store = FakeStore::new().with("\\DosDevices\\E:", sys::HIVE_T_REG_BINARY, &[1]);
        let err = add_impl(&store, 'E', sys::HIVE_T_REG_BINARY, &[2]).unwrap_err();
        assert!(matches!(err, MountmapError::UserFault(UserFault::DriveLetterTaken { letter: 'E' })));
    }

    #[test]
    fn add_reuses_a_tombstoned_letter() {
        let store = FakeStore::new().with("\\DosDevices\\E:", sys::HIVE_T_REG_BINARY, &[]);
        add_impl(&store, 'E', sys::HIVE_T_REG_BINARY, &[3]).unwrap();
        assert_eq!(store.values.borrow()["\\DosDevices\\E:"].1, vec![3]);
    }
}
