//! Windows-install discovery over the device inventory (§4.6).
//!
//! `all_windows_installs` surveys every NTFS-typed partition and keeps the
//! ones that actually contain a `Windows\System32\config\SYSTEM` hive,
//! mounting a candidate transiently if it has no live mountpoint.
//! `hive_from_sys_drive`/`hive_from_sys_root`/`hive_from_sys_dir` perform
//! the directory walk itself and are exposed directly for `--sysdrive`/
//! `--sysroot`/`--sysdir`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mountmap_common::error::{MountmapError, SystemError, UserFault};
use mountmap_common::properties::keys;
use mountmap_common::{Criteria, PropertyValue};

use crate::scoped_mount::{self, ScopedMount};

/// One candidate Windows installation found by [`all_windows_installs`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WindowsInstall {
    /// A live mountpoint if the partition was already mounted, otherwise
    /// the partition's block-device path.
    pub path: String,
    pub is_device: bool,
}

impl Ord for WindowsInstall {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.path.cmp(&other.path)
    }
}

impl PartialOrd for WindowsInstall {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A resolved `SYSTEM` hive path, together with any transient mount it
/// depends on. Dropping this drops the mount (and unmounts it) — callers
/// that intend to open the hive afterwards must keep it alive until then.
pub struct ResolvedHive {
    path: PathBuf,
    _guard: Option<Arc<ScopedMount>>,
}

impl ResolvedHive {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Survey every NTFS partition in the inventory, keeping those that
/// contain a `SYSTEM` hive. Failures for individual candidates (not
/// found, mount failure, not NTFS after all) are logged at `debug!` and
/// excluded rather than aborting the whole survey.
pub fn all_windows_installs() -> BTreeSet<WindowsInstall> {
    let mut criteria = Criteria::new();
    criteria.insert(keys::IS_NTFS.to_string(), PropertyValue::String("1".to_string()));

    let mut installs = BTreeSet::new();
    for (device_id, props) in mountmap_inventory::partitions(&criteria) {
        let mountpoint = props.get(keys::MOUNTPOINT).cloned().unwrap_or_default();
        let (path, is_device) = if !mountpoint.is_empty() {
            (mountpoint, false)
        } else {
            let mountable = props.get(keys::MOUNTABLE_PATH).cloned().unwrap_or(device_id);
            (mountable, true)
        };

        // The resolved hive (and any mount it opened) is only needed to
        // confirm the install is real; it is dropped immediately here.
        match hive_from_sys_drive(&path) {
            Ok(_) => {
                installs.insert(WindowsInstall { path, is_device });
            }
            Err(err) => {
                log::debug!("candidate Windows install at {path} rejected: {err}");
            }
        }
    }
    installs
}

/// Resolve a `SYSTEM` hive starting from a block device or a directory
/// (a live mountpoint, or a path the caller has already mounted).
pub fn hive_from_sys_drive(path: &str) -> Result<ResolvedHive, MountmapError> {
    use std::os::unix::fs::FileTypeExt;

    let meta = fs::symlink_metadata(path).map_err(|err| stat_error(path, err))?;

    if meta.file_type().is_block_device() {
        if let Some(mountpoint) = live_mountpoint_for(path) {
            return hive_from_sys_drive(&mountpoint);
        }

        let mount = scoped_mount::mount_ntfs(path)?;
        let target = mount.target().to_string_lossy().into_owned();
        let mut resolved = hive_from_sys_drive(&target)?;
        resolved._guard = Some(mount);
        return Ok(resolved);
    }

    if !meta.is_dir() {
        return Err(UserFault::Other { message: format!("not a device or directory: {path}") }.into());
    }

    hive_from_sys_root(&find_first(Path::new(path), "Windows", true)?)
}

/// Resolve a `SYSTEM` hive starting from a Windows install root
/// (the directory containing `Windows\`).
pub fn hive_from_sys_root(path: &Path) -> Result<ResolvedHive, MountmapError> {
    hive_from_sys_dir(&find_first(path, "System32", true)?)
}

/// Resolve a `SYSTEM` hive starting from `Windows\System32`.
pub fn hive_from_sys_dir(path: &Path) -> Result<ResolvedHive, MountmapError> {
    let config_dir = find_first(path, "config", true)?;
    let system_file = find_first(&config_dir, "SYSTEM", false)?;
    Ok(ResolvedHive { path: system_file, _guard: None })
}

fn live_mountpoint_for(device_path: &str) -> Option<String> {
    let mut criteria = Criteria::new();
    criteria.insert(keys::MOUNTABLE_PATH.to_string(), PropertyValue::String(device_path.to_string()));

    mountmap_inventory::partitions(&criteria)
        .values()
        .find_map(|props| props.get(keys::MOUNTPOINT).filter(|mp| !mp.is_empty()).cloned())
}

fn stat_error(path: &str, err: std::io::Error) -> MountmapError {
    if err.kind() == std::io::ErrorKind::NotFound {
        UserFault::PathDoesNotExist { path: path.to_string() }.into()
    } else {
        SystemError::io("stat", err).into()
    }
}

/// Case-insensitive directory/file search, matching the original's
/// `findFirst`: the entry's `d_type` is accepted if it names the kind
/// being searched for, or if the filesystem didn't report a type at all.
fn find_first(dir: &Path, name: &str, want_dir: bool) -> Result<PathBuf, MountmapError> {
    let entries = fs::read_dir(dir).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            MountmapError::from(UserFault::PathDoesNotExist { path: dir.display().to_string() })
        } else {
            MountmapError::from(SystemError::io("opendir", err))
        }
    })?;

    for entry in entries {
        let entry = entry.map_err(|err| SystemError::io("readdir", err))?;
        let leaf = entry.file_name();
        let Some(leaf) = leaf.to_str() else { continue };
        if !leaf.eq_ignore_ascii_case(name) {
            continue;
        }

        let is_match = match entry.file_type() {
            Ok(file_type) => (want_dir && file_type.is_dir()) || (!want_dir && file_type.is_file()),
            Err(_) => true,
        };
        if is_match {
            return Ok(entry.path());
        }
    }

    let kind = if want_dir { "directory" } else { "file" };
    Err(UserFault::Other { message: format!("no such {kind} in {}: {name}", dir.display()) }.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_first_matches_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("WiNdOwS")).unwrap();

        let found = find_first(dir.path(), "windows", true).unwrap();
        assert_eq!(found, dir.path().join("WiNdOwS"));
    }

    #[test]
    fn find_first_distinguishes_files_from_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SYSTEM"), b"stub").unwrap();

        assert!(find_first(dir.path(), "SYSTEM", true).is_err());
        let found = find_first(dir.path(), "system", false).unwrap();
        assert_eq!(found, dir.path().join("SYSTEM"));
    }

    #[test]
    fn find_first_fails_when_entry_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_first(dir.path(), "Windows", true).unwrap_err();
        assert!(matches!(err, MountmapError::UserFault(UserFault::Other { .. })));
    }

    #[test]
    fn hive_from_sys_dir_walks_config_then_system_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config");
        std::fs::create_dir(&config).unwrap();
        std::fs::write(config.join("SYSTEM"), b"stub").unwrap();

        let resolved = hive_from_sys_dir(dir.path()).unwrap();
        assert_eq!(resolved.path(), config.join("SYSTEM"));
    }

    #[test]
    fn windows_install_ordering_is_by_path() {
        let a = WindowsInstall { path: "/a".into(), is_device: false };
        let b = WindowsInstall { path: "/b".into(), is_device: true };
        assert!(a < b);
    }
}
