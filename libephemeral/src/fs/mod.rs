//! Filesystem executor.
//!
//! Every privileged or blocking filesystem side effect the lifecycle manager
//! needs goes through [`Executor`]: directory creation and removal, sidecar
//! files, bind mounts, unmounts and `statvfs`.  All calls are synchronous and
//! may block; async callers run them on the blocking thread pool.
//!
//! Mounting is delegated to a [`Mounter`] so the lifecycle can be exercised
//! without root privileges (see [`RecordingMounter`]).

pub mod mount;

use std::fs::DirBuilder;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::errno::Errno;
use thiserror::Error;
use tracing::debug;

use crate::types::VolumeUsage;

pub use mount::{MountCall, Mounter, RecordingMounter, SyscallMounter};

/// Permission bits for volume and target directories.
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Classification of a filesystem failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorKind {
    PermissionDenied,
    NotFound,
    /// Something already occupies the path (a file where a directory is
    /// expected, a busy mount point).
    AlreadyExists,
    Io,
}

impl From<ErrorKind> for FsErrorKind {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::PermissionDenied => Self::PermissionDenied,
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::AlreadyExists => Self::AlreadyExists,
            _ => Self::Io,
        }
    }
}

impl From<Errno> for FsErrorKind {
    fn from(errno: Errno) -> Self {
        match errno {
            Errno::EPERM | Errno::EACCES => Self::PermissionDenied,
            Errno::ENOENT => Self::NotFound,
            Errno::EEXIST | Errno::EBUSY => Self::AlreadyExists,
            _ => Self::Io,
        }
    }
}

/// A failed filesystem operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{op} failed at {}: {reason}", path.display())]
pub struct FsError {
    /// What went wrong.
    pub kind: FsErrorKind,
    /// Operation name, e.g. `"bind mount"`.
    pub op: &'static str,
    /// Path the operation was applied to.
    pub path: PathBuf,
    /// Human-readable cause.
    pub reason: String,
}

impl FsError {
    /// Build an error of an explicit kind.
    pub fn new(
        kind: FsErrorKind,
        op: &'static str,
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            op,
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Classify a [`std::io::Error`].
    pub fn io(op: &'static str, path: &Path, err: std::io::Error) -> Self {
        Self::new(err.kind().into(), op, path, err.to_string())
    }

    /// Classify a raw errno from a syscall.
    pub fn errno(op: &'static str, path: &Path, errno: Errno) -> Self {
        Self::new(errno.into(), op, path, errno.desc())
    }
}

/// Uniform front for the blocking filesystem calls of the plugin.
#[derive(Clone)]
pub struct Executor {
    mounter: Arc<dyn Mounter>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor").finish_non_exhaustive()
    }
}

impl Executor {
    /// Executor that mounts through `mounter`.
    pub fn new(mounter: Arc<dyn Mounter>) -> Self {
        Self { mounter }
    }

    /// Executor backed by real `mount(2)` / `umount(2)` calls.
    pub fn host() -> Self {
        Self::new(Arc::new(SyscallMounter))
    }

    /// Create `path` and any missing parents.  Succeeds if the directory is
    /// already there.
    pub fn create_dir(&self, path: &Path, mode: u32) -> Result<(), FsError> {
        DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(path)
            .map_err(|e| FsError::io("create directory", path, e))
    }

    /// Recursively remove `path`.  A missing path is not an error.
    pub fn remove_tree(&self, path: &Path) -> Result<(), FsError> {
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "remove_tree: already gone");
                Ok(())
            }
            Err(e) => Err(FsError::io("remove directory tree", path, e)),
        }
    }

    /// Remove the empty directory `path`.  A missing path is not an error.
    pub fn remove_dir(&self, path: &Path) -> Result<(), FsError> {
        match std::fs::remove_dir(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FsError::io("remove directory", path, e)),
        }
    }

    /// Make `target` an alias of `source`.  Both paths must exist.
    pub fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> Result<(), FsError> {
        for path in [source, target] {
            if !path.exists() {
                return Err(FsError::new(
                    FsErrorKind::NotFound,
                    "bind mount",
                    path,
                    "path does not exist",
                ));
            }
        }
        self.mounter.bind_mount(source, target, read_only)
    }

    /// Undo a bind mount.  An unmounted or missing target is a no-op.
    pub fn unmount(&self, target: &Path) -> Result<(), FsError> {
        self.mounter.unmount(target)
    }

    /// Whether something is mounted at `target`.
    pub fn is_mounted(&self, target: &Path) -> bool {
        self.mounter.is_mounted(target)
    }

    /// Capacity figures of the filesystem holding `path`.
    pub fn stat_filesystem(&self, path: &Path) -> Result<VolumeUsage, FsError> {
        let stat = nix::sys::statvfs::statvfs(path)
            .map_err(|e| FsError::errno("statvfs", path, e))?;

        let frsize = u64::from(stat.fragment_size());
        let total_bytes = u64::from(stat.blocks()) * frsize;
        let available_bytes = u64::from(stat.blocks_available()) * frsize;
        let total_inodes = u64::from(stat.files());
        let free_inodes = u64::from(stat.files_free());

        Ok(VolumeUsage {
            total_bytes,
            used_bytes: total_bytes.saturating_sub(available_bytes),
            available_bytes,
            total_inodes,
            used_inodes: total_inodes.saturating_sub(free_inodes),
            free_inodes,
        })
    }

    /// Write `contents` to `path` through a temporary file and a rename, so a
    /// reader never observes a half-written file.
    pub fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), FsError> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let write = || -> std::io::Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(contents)?;
            file.sync_all()?;
            std::fs::rename(&tmp, path)
        };
        write().map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            FsError::io("write file", path, e)
        })
    }

    /// Read `path` into a string.
    pub fn read_file(&self, path: &Path) -> Result<String, FsError> {
        std::fs::read_to_string(path).map_err(|e| FsError::io("read file", path, e))
    }

    /// Sub-directories directly under `path`.
    pub fn list_dirs(&self, path: &Path) -> Result<Vec<PathBuf>, FsError> {
        let entries = std::fs::read_dir(path).map_err(|e| FsError::io("read directory", path, e))?;
        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| FsError::io("read directory", path, e))?;
            let is_dir = entry
                .file_type()
                .map_err(|e| FsError::io("read directory", path, e))?
                .is_dir();
            if is_dir {
                dirs.push(entry.path());
            }
        }
        Ok(dirs)
    }
}
