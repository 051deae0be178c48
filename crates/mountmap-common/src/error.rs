//! Two-category error taxonomy: [`UserFault`] for operator-correctable
//! conditions, [`SystemError`] for OS/library failures. [`MountmapError`]
//! is the top-level type every public fallible function in the core
//! returns.

/// Anything the operator can correct without touching the environment.
#[derive(Debug, thiserror::Error)]
pub enum UserFault {
    #[error("hive not found: {path}")]
    HiveNotFound { path: String },

    #[error("the MountedDevices key was not found in this hive")]
    MountedDevicesKeyMissing,

    #[error("Drive letter {letter}: is already taken")]
    DriveLetterTaken { letter: char },

    #[error("drive letter {letter}: is not mapped")]
    DriveLetterNotMapped { letter: char },

    #[error("path does not exist: {path}")]
    PathDoesNotExist { path: String },

    #[error("operation requires root")]
    InsufficientPrivilege,

    #[error("ambiguous Windows installation, pass --sysdrive, --sysroot, --sysdir or --hive")]
    AmbiguousWindowsInstall,

    #[error("no Windows installation found")]
    NoWindowsInstallFound,

    #[error("corrupt hive: unrecognized MountedDevices key shape: {key}")]
    CorruptHiveKeyShape { key: String },

    #[error("{arg}: not a valid drive letter")]
    InvalidDriveLetter { arg: String },

    #[error("{message}")]
    Other { message: String },
}

/// Wraps an OS errno or external-library failure with the name of the
/// operation that failed.
#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    #[error("{operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation}: hive error: {message}")]
    Hive {
        operation: &'static str,
        message: String,
    },

    #[error("{operation}: {message}")]
    Other {
        operation: &'static str,
        message: String,
    },
}

impl SystemError {
    pub fn io(operation: &'static str, source: std::io::Error) -> Self {
        Self::Io { operation, source }
    }
}

/// Top-level error type returned by every public fallible function in the
/// core. Transparent over the two categories so `main` can match on it once
/// to pick an exit code and a one-line stderr message.
#[derive(Debug, thiserror::Error)]
pub enum MountmapError {
    #[error(transparent)]
    UserFault(#[from] UserFault),

    #[error(transparent)]
    SystemError(#[from] SystemError),
}

impl MountmapError {
    /// Exit code per §7: 0 success, 1 for either error category.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
