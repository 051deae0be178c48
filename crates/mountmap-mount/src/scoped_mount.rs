//! RAII NTFS mount guard (§4.6, §5). Mounting a block device requires
//! superuser privilege and is checked for up front rather than attempted.
//!
//! Mounts are memoized per device path for the life of the process: a
//! second request for a device already mounted by this process returns a
//! clone of the existing guard instead of mounting twice. The cache holds
//! only a [`Weak`] reference, so the underlying mount is torn down as soon
//! as the last [`Arc<ScopedMount>`] is dropped rather than leaking until
//! the process exits.

use std::collections::HashMap;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use mountmap_common::error::{MountmapError, SystemError, UserFault};

/// A temporary directory with a block device mounted as NTFS underneath
/// it. Unmounts (lazily on Linux, forced on macOS) and removes the
/// directory when the last clone is dropped.
pub struct ScopedMount {
    device: String,
    target: PathBuf,
}

impl ScopedMount {
    pub fn target(&self) -> &Path {
        &self.target
    }
}

impl Drop for ScopedMount {
    fn drop(&mut self) {
        if let Err(err) = platform::unmount(&self.target) {
            log::warn!("failed to unmount {}: {err}", self.target.display());
            return;
        }
        if let Err(err) = std::fs::remove_dir(&self.target) {
            log::warn!("failed to remove mount point {}: {err}", self.target.display());
        }
    }
}

fn cache() -> &'static Mutex<HashMap<String, Weak<ScopedMount>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Weak<ScopedMount>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Mount `device` as NTFS under a fresh `mkdtemp`-style temporary
/// directory, or return the process's existing mount for that device.
pub fn mount_ntfs(device: &str) -> Result<Arc<ScopedMount>, MountmapError> {
    let mut cache = cache().lock().unwrap();
    if let Some(existing) = cache.get(device).and_then(Weak::upgrade) {
        return Ok(existing);
    }

    if !is_root() {
        return Err(UserFault::InsufficientPrivilege.into());
    }

    let target = make_temp_dir()?;
    if let Err(err) = platform::mount(device, &target) {
        let _ = std::fs::remove_dir(&target);
        return Err(err);
    }

    let mount = Arc::new(ScopedMount { device: device.to_string(), target });
    cache.insert(device.to_string(), Arc::downgrade(&mount));
    Ok(mount)
}

fn make_temp_dir() -> Result<PathBuf, MountmapError> {
    let mut template = CString::new("/tmp/mountmapXXXXXX").unwrap().into_bytes_with_nul();
    let result = unsafe { libc::mkdtemp(template.as_mut_ptr() as *mut libc::c_char) };
    if result.is_null() {
        return Err(SystemError::io("mkdtemp", std::io::Error::last_os_error()).into());
    }
    template.pop(); // drop the trailing NUL before handing the bytes to PathBuf
    Ok(PathBuf::from(String::from_utf8(template).expect("mkdtemp template is ASCII")))
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod platform {
            use std::ffi::CString;
            use std::os::unix::ffi::OsStrExt;
            use std::path::Path;

            use mountmap_common::error::{MountmapError, SystemError};

            pub fn mount(device: &str, target: &Path) -> Result<(), MountmapError> {
                let c_device = CString::new(device)
                    .map_err(|_| SystemError::Other { operation: "mount", message: "device path contains a NUL byte".into() })?;
                let c_target = CString::new(target.as_os_str().as_bytes())
                    .map_err(|_| SystemError::Other { operation: "mount", message: "target path contains a NUL byte".into() })?;
                let c_fstype = CString::new("ntfs").unwrap();

                let rc = unsafe {
                    libc::mount(
                        c_device.as_ptr(),
                        c_target.as_ptr(),
                        c_fstype.as_ptr(),
                        0,
                        std::ptr::null(),
                    )
                };
                if rc != 0 {
                    return Err(SystemError::io("mount", std::io::Error::last_os_error()).into());
                }
                Ok(())
            }

            pub fn unmount(target: &Path) -> Result<(), MountmapError> {
                let c_target = CString::new(target.as_os_str().as_bytes())
                    .map_err(|_| SystemError::Other { operation: "umount2", message: "target path contains a NUL byte".into() })?;
                let rc = unsafe { libc::umount2(c_target.as_ptr(), libc::MNT_DETACH) };
                if rc != 0 {
                    return Err(SystemError::io("umount2", std::io::Error::last_os_error()).into());
                }
                Ok(())
            }
        }
    } else if #[cfg(target_os = "macos")] {
        mod platform {
            use std::ffi::CString;
            use std::os::unix::ffi::OsStrExt;
            use std::path::Path;

            use mountmap_common::error::{MountmapError, SystemError};

            // Mirrors the original's packed NtfsMountOpts struct, passed
            // as the fourth `mount(2)` argument for the macOS NTFS
            // filesystem implementation.
            #[repr(C, packed)]
            struct NtfsMountOpts {
                device: *const libc::c_char,
                major_ver: u8,
                minor_ver: u8,
            }

            pub fn mount(device: &str, target: &Path) -> Result<(), MountmapError> {
                let c_device = CString::new(device)
                    .map_err(|_| SystemError::Other { operation: "mount", message: "device path contains a NUL byte".into() })?;
                let c_target = CString::new(target.as_os_str().as_bytes())
                    .map_err(|_| SystemError::Other { operation: "mount", message: "target path contains a NUL byte".into() })?;
                let c_fstype = CString::new("ntfs").unwrap();

                let opts = NtfsMountOpts { device: c_device.as_ptr(), major_ver: 0, minor_ver: 0 };
                let rc = unsafe {
                    libc::mount(
                        c_fstype.as_ptr(),
                        c_target.as_ptr(),
                        0,
                        &opts as *const NtfsMountOpts as *mut libc::c_void,
                    )
                };
                if rc != 0 {
                    return Err(SystemError::io("mount", std::io::Error::last_os_error()).into());
                }
                Ok(())
            }

            pub fn unmount(target: &Path) -> Result<(), MountmapError> {
                let c_target = CString::new(target.as_os_str().as_bytes())
                    .map_err(|_| SystemError::Other { operation: "unmount", message: "target path contains a NUL byte".into() })?;
                let rc = unsafe { libc::unmount(c_target.as_ptr(), libc::MNT_FORCE) };
                if rc != 0 {
                    return Err(SystemError::io("unmount", std::io::Error::last_os_error()).into());
                }
                Ok(())
            }
        }
    } else {
        mod platform {
            use std::path::Path;
            use mountmap_common::error::{MountmapError, SystemError};

            pub fn mount(_device: &str, _target: &Path) -> Result<(), MountmapError> {
                Err(SystemError::Other { operation: "mount", message: "NTFS mounting is not supported on this platform".into() }.into())
            }

            pub fn unmount(_target: &Path) -> Result<(), MountmapError> {
                Err(SystemError::Other { operation: "unmount", message: "NTFS mounting is not supported on this platform".into() }.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_without_privilege_fails_fast_before_touching_mount2() {
        if is_root() {
            // Running as root in CI is plausible; the up-front privilege
            // check has nothing to verify in that environment.
            return;
        }
        let err = mount_ntfs("/dev/does-not-exist-mountmap-test").unwrap_err();
        assert!(matches!(err, MountmapError::UserFault(UserFault::InsufficientPrivilege)));
    }
}
