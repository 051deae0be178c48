//! NTFS scoped mounting and Windows-install discovery (C6, §4.6).

mod discovery;
mod scoped_mount;

pub use discovery::{all_windows_installs, hive_from_sys_dir, hive_from_sys_drive, hive_from_sys_root, ResolvedHive, WindowsInstall};
pub use scoped_mount::{mount_ntfs, ScopedMount};
