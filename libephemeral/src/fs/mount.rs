//! Mount providers.
//!
//! [`SyscallMounter`] talks to the kernel directly; [`RecordingMounter`]
//! only remembers what it was asked to do.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use nix::errno::Errno;
use nix::mount::MsFlags;
use tracing::{debug, warn};

use super::{FsError, FsErrorKind};

/// Bind-mount capability used by the [`Executor`](super::Executor).
pub trait Mounter: Send + Sync {
    /// Bind-mount `source` onto `target`, optionally read-only.
    fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> Result<(), FsError>;

    /// Remove the mount at `target`.  Must succeed when nothing is mounted
    /// there, so retries are safe.
    fn unmount(&self, target: &Path) -> Result<(), FsError>;

    /// Whether `target` is currently a mount point.
    fn is_mounted(&self, target: &Path) -> bool;
}

// ---------------------------------------------------------------------------
// Kernel mounts
// ---------------------------------------------------------------------------

/// Mounts through `mount(2)` and `umount(2)`.  Requires `CAP_SYS_ADMIN`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyscallMounter;

impl Mounter for SyscallMounter {
    fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> Result<(), FsError> {
        nix::mount::mount(
            Some(source),
            target,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| FsError::errno("bind mount", target, e))?;

        // MS_RDONLY is ignored on the initial bind; it takes a remount.
        if read_only {
            let remount = nix::mount::mount(
                None::<&str>,
                target,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None::<&str>,
            );
            if let Err(e) = remount {
                if let Err(undo) = nix::mount::umount(target) {
                    warn!(target = %target.display(), error = %undo, "failed to undo bind mount");
                }
                return Err(FsError::errno("remount read-only", target, e));
            }
        }
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), FsError> {
        if !self.is_mounted(target) {
            debug!(target = %target.display(), "not a mount point, nothing to unmount");
            return Ok(());
        }
        match nix::mount::umount(target) {
            Ok(()) => Ok(()),
            // Lost a race with another unmount.
            Err(Errno::EINVAL | Errno::ENOENT) => Ok(()),
            Err(e) => Err(FsError::errno("unmount", target, e)),
        }
    }

    fn is_mounted(&self, target: &Path) -> bool {
        let contents = match std::fs::read_to_string("/proc/self/mounts") {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "cannot read /proc/self/mounts");
                return false;
            }
        };
        let Some(target) = target.to_str() else {
            return false;
        };
        // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>
        contents
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .any(|mountpoint| unescape_mount_field(mountpoint) == target)
    }
}

/// Decode the octal escapes (`\040` for space, `\011` for tab, ...) the kernel
/// uses in `/proc/self/mounts`.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------

/// A call observed by [`RecordingMounter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    Bind {
        source: PathBuf,
        target: PathBuf,
        read_only: bool,
    },
    Unmount {
        target: PathBuf,
    },
}

#[derive(Debug, Default)]
struct Recorded {
    calls: Vec<MountCall>,
    /// target -> source
    mounted: HashMap<PathBuf, PathBuf>,
    fail_next_bind: Option<FsErrorKind>,
}

/// Mounter that records calls and tracks a virtual mount table without
/// touching the kernel.
#[derive(Debug, Default)]
pub struct RecordingMounter {
    state: Mutex<Recorded>,
}

impl RecordingMounter {
    fn state(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<MountCall> {
        self.state().calls.clone()
    }

    /// Source currently bound at `target`, if any.
    pub fn mounted_source(&self, target: &Path) -> Option<PathBuf> {
        self.state().mounted.get(target).cloned()
    }

    /// Number of active virtual mounts.
    pub fn mount_count(&self) -> usize {
        self.state().mounted.len()
    }

    /// Make the next `bind_mount` fail with `kind`.
    pub fn fail_next_bind(&self, kind: FsErrorKind) {
        self.state().fail_next_bind = Some(kind);
    }
}

impl Mounter for RecordingMounter {
    fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> Result<(), FsError> {
        let mut state = self.state();
        state.calls.push(MountCall::Bind {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            read_only,
        });
        if let Some(kind) = state.fail_next_bind.take() {
            return Err(FsError::new(kind, "bind mount", target, "injected failure"));
        }
        if state.mounted.contains_key(target) {
            return Err(FsError::errno("bind mount", target, Errno::EBUSY));
        }
        state
            .mounted
            .insert(target.to_path_buf(), source.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), FsError> {
        let mut state = self.state();
        state.calls.push(MountCall::Unmount {
            target: target.to_path_buf(),
        });
        state.mounted.remove(target);
        Ok(())
    }

    fn is_mounted(&self, target: &Path) -> bool {
        self.state().mounted.contains_key(target)
    }
}
