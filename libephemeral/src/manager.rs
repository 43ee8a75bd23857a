//! Volume lifecycle manager.
//!
//! [`VolumeManager`] drives volumes through
//! created → published → unpublished → deleted by pairing [`Registry`]
//! transitions with [`Executor`] side effects.
//!
//! # Concurrency
//!
//! Registry updates are short critical sections; no lock is held while a
//! filesystem call runs.  Blocking calls go to Tokio's blocking pool.  When a
//! filesystem step fails after its registry step succeeded, the registry step
//! is reverted before the error is returned.  Concurrent creations of the same
//! name share one attempt and all report its outcome.  Other side effects of
//! concurrent calls on the *same* volume are not ordered; callers serialize
//! those.
//!
//! # On-disk layout
//!
//! ```text
//! <base_dir>/
//!   <volume-id>/               # volume data, bind-mounted on publish
//!     .csi-volume.json         # VolumeRecord, used for recovery
//! ```
//!
//! The record is rewritten on every publish and unpublish, so a restarted
//! plugin still knows which volumes are mounted.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::error::CsiError;
use crate::fs::{DEFAULT_DIR_MODE, Executor, FsError};
use crate::registry::{Insertion, RECORD_FILE, Registry, VolumeRecord, derive_id};
use crate::types::{DEFAULT_CAPACITY_BYTES, Volume, VolumeId, VolumeUsage};

/// Capacity recorded for a request of `required_bytes`.
pub fn capacity_for(required_bytes: i64) -> u64 {
    u64::try_from(required_bytes)
        .ok()
        .filter(|&bytes| bytes > 0)
        .unwrap_or(DEFAULT_CAPACITY_BYTES)
}

type CreateOutcome = Arc<OnceCell<Result<Volume, CsiError>>>;

/// Owner of the registry and of everything under the base directory.
#[derive(Debug)]
pub struct VolumeManager {
    base_dir: PathBuf,
    registry: Registry,
    fs: Executor,
    /// Creations in flight, keyed by the derived id.
    creating: DashMap<VolumeId, CreateOutcome>,
}

enum Reservation {
    Reserved {
        volume_path: PathBuf,
        record: VolumeRecord,
    },
    AlreadyPublished,
}

impl VolumeManager {
    /// Create the base directory if needed and rebuild the registry from the
    /// volume records found there.
    pub async fn open(base_dir: impl Into<PathBuf>, fs: Executor) -> Result<Self, CsiError> {
        let manager = Self {
            base_dir: base_dir.into(),
            registry: Registry::new(),
            fs,
            creating: DashMap::new(),
        };
        let base = manager.base_dir.clone();
        manager
            .blocking(move |fs| fs.create_dir(&base, DEFAULT_DIR_MODE))
            .await?;
        manager.recover().await?;
        Ok(manager)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Number of tracked volumes.
    pub fn volume_count(&self) -> usize {
        self.registry.len()
    }

    /// Run a blocking filesystem call off the async worker threads.
    async fn blocking<T, F>(&self, f: F) -> Result<T, CsiError>
    where
        F: FnOnce(&Executor) -> Result<T, FsError> + Send + 'static,
        T: Send + 'static,
    {
        let fs = self.fs.clone();
        tokio::task::spawn_blocking(move || f(&fs))
            .await
            .map_err(CsiError::internal)?
            .map_err(CsiError::from)
    }

    /// Scan the base directory and track every volume with a valid record.
    ///
    /// Directories without a readable record, or whose record names a
    /// different id, are left alone and never adopted.  Recorded mount
    /// targets are kept only while they are still mounted.
    pub async fn recover(&self) -> Result<usize, CsiError> {
        let base = self.base_dir.clone();
        let found = self
            .blocking(move |fs| {
                let mut found = Vec::new();
                for dir in fs.list_dirs(&base)? {
                    let record = fs.read_file(&dir.join(RECORD_FILE));
                    found.push((dir, record));
                }
                Ok(found)
            })
            .await?;

        let mut recovered = 0;
        for (dir, record) in found {
            let json = match record {
                Ok(json) => json,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "no volume record, skipping");
                    continue;
                }
            };
            let record: VolumeRecord = match serde_json::from_str(&json) {
                Ok(r) => r,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "unparsable volume record, skipping");
                    continue;
                }
            };
            let dir_name = dir.file_name().and_then(|n| n.to_str());
            if dir_name != Some(record.volume_id.as_str()) {
                warn!(
                    path = %dir.display(),
                    volume_id = %record.volume_id,
                    "volume record does not match its directory, skipping",
                );
                continue;
            }

            let mut volume = record.into_volume(dir);
            if volume.is_published() {
                let recorded = std::mem::take(&mut volume.mount_targets);
                let live: BTreeSet<PathBuf> = self
                    .blocking(move |fs| {
                        Ok(recorded
                            .into_iter()
                            .filter(|target| fs.is_mounted(target))
                            .collect())
                    })
                    .await?;
                if live.is_empty() {
                    debug!(volume_id = %volume.volume_id, "recorded targets no longer mounted");
                    volume.sub_path = None;
                }
                volume.mount_targets = live;
            }

            if let Insertion::Inserted(_) = self.registry.insert_if_absent(volume) {
                recovered += 1;
            }
        }

        info!(base_dir = %self.base_dir.display(), recovered, "recovery complete");
        Ok(recovered)
    }

    /// Create the volume called `name`, or return it unchanged if it exists.
    ///
    /// A call racing an in-flight creation of the same name waits for that
    /// creation and reports its result.
    #[instrument(skip(self, parameters), fields(volume_id))]
    pub async fn create_volume(
        &self,
        name: &str,
        required_bytes: i64,
        parameters: HashMap<String, String>,
    ) -> Result<Volume, CsiError> {
        let id = derive_id(name);
        tracing::Span::current().record("volume_id", id.as_str());

        let outcome = self.creating.entry(id.clone()).or_default().value().clone();
        let result = outcome
            .get_or_init(|| self.create_once(id.clone(), name, required_bytes, parameters))
            .await
            .clone();
        self.creating
            .remove_if(&id, |_, current| Arc::ptr_eq(current, &outcome));
        result
    }

    async fn create_once(
        &self,
        id: VolumeId,
        name: &str,
        required_bytes: i64,
        parameters: HashMap<String, String>,
    ) -> Result<Volume, CsiError> {
        let path = self.base_dir.join(id.as_str());
        let volume = Volume::new(
            id.clone(),
            name,
            path.clone(),
            capacity_for(required_bytes),
            parameters,
        );

        let volume = match self.registry.insert_if_absent(volume) {
            Insertion::Existing(existing) => {
                debug!("volume already exists, returning it");
                return Ok(existing);
            }
            Insertion::Inserted(volume) => volume,
        };

        let record = serde_json::to_vec_pretty(&VolumeRecord::from(&volume))
            .map_err(CsiError::internal);
        let created = match record {
            Ok(record) => {
                let dir = path.clone();
                self.blocking(move |fs| {
                    fs.create_dir(&dir, DEFAULT_DIR_MODE)?;
                    fs.write_file(&dir.join(RECORD_FILE), &record)
                })
                .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = created {
            warn!(error = %e, "volume creation failed, rolling back");
            if let Err(cleanup) = self.blocking(move |fs| fs.remove_tree(&path)).await {
                warn!(error = %cleanup, "failed to remove partial volume directory");
            }
            let _ = self.registry.remove(&id);
            return Err(e);
        }

        info!(path = %volume.path.display(), capacity_bytes = volume.capacity_bytes, "volume created");
        Ok(volume)
    }

    /// Remove the volume's directory tree, then forget it.
    ///
    /// If the directory cannot be removed the volume stays tracked so the
    /// call can be retried.
    #[instrument(skip(self))]
    pub async fn delete_volume(&self, id: &VolumeId) -> Result<(), CsiError> {
        let volume = self.registry.get(id)?;
        if let Some(target) = volume.mount_targets.iter().next() {
            return Err(CsiError::Conflict(format!(
                "volume {id} is still published at {}",
                target.display()
            )));
        }

        let path = volume.path.clone();
        self.blocking(move |fs| fs.remove_tree(&path)).await?;

        if self.registry.remove(id).is_err() {
            debug!("volume was removed concurrently");
        }
        info!("volume deleted");
        Ok(())
    }

    /// Snapshot of a tracked volume.
    pub fn get_volume(&self, id: &VolumeId) -> Result<Volume, CsiError> {
        self.registry.get(id)
    }

    /// Snapshot of every tracked volume.
    pub fn list_volumes(&self) -> Vec<Volume> {
        self.registry.list()
    }

    /// Bind-mount the volume (or `sub_path` inside it) at `target`.
    ///
    /// Publishing again to the active target succeeds without side effects;
    /// publishing to a second target while one is active is a conflict.
    #[instrument(skip(self, target), fields(target = %target.display()))]
    pub async fn publish_volume(
        &self,
        id: &VolumeId,
        target: &Path,
        sub_path: Option<&str>,
        read_only: bool,
    ) -> Result<(), CsiError> {
        if !target.is_absolute() {
            return Err(CsiError::InvalidArgument(format!(
                "target path must be absolute, got {}",
                target.display()
            )));
        }
        if let Some(sub) = sub_path {
            validate_sub_path(sub)?;
        }

        let reservation = self.registry.try_mutate(id, |volume| {
            if volume.mount_targets.contains(target) {
                return Ok(Reservation::AlreadyPublished);
            }
            if let Some(active) = volume.mount_targets.iter().next() {
                return Err(CsiError::Conflict(format!(
                    "volume {id} is already published at {}",
                    active.display()
                )));
            }
            volume.mount_targets.insert(target.to_path_buf());
            volume.sub_path = sub_path.map(str::to_owned);
            Ok(Reservation::Reserved {
                volume_path: volume.path.clone(),
                record: VolumeRecord::from(&*volume),
            })
        })?;

        let (volume_path, record) = match reservation {
            Reservation::AlreadyPublished => {
                debug!("volume already published at target");
                return Ok(());
            }
            Reservation::Reserved {
                volume_path,
                record,
            } => (volume_path, record),
        };

        let source = match sub_path {
            Some(sub) => volume_path.join(sub),
            None => volume_path.clone(),
        };
        let mounted = match serde_json::to_vec_pretty(&record) {
            Ok(body) => {
                let (src, dst) = (source.clone(), target.to_path_buf());
                let record_path = volume_path.join(RECORD_FILE);
                self.blocking(move |fs| {
                    fs.create_dir(&src, DEFAULT_DIR_MODE)?;
                    fs.create_dir(&dst, DEFAULT_DIR_MODE)?;
                    fs.bind_mount(&src, &dst, read_only)?;
                    // An unrecorded mount would be invisible after a restart.
                    if let Err(e) = fs.write_file(&record_path, &body) {
                        if let Err(undo) = fs.unmount(&dst) {
                            warn!(error = %undo, "failed to undo bind mount");
                        }
                        return Err(e);
                    }
                    Ok(())
                })
                .await
            }
            Err(e) => Err(CsiError::internal(e)),
        };

        if let Err(e) = mounted {
            warn!(error = %e, "publish failed, releasing target");
            let _ = self.registry.mutate(id, |volume| {
                volume.mount_targets.remove(target);
                if volume.mount_targets.is_empty() {
                    volume.sub_path = None;
                }
            });
            return Err(e);
        }

        if !self.registry.contains(id) {
            warn!("volume vanished while publishing, undoing mount");
            let dst = target.to_path_buf();
            self.blocking(move |fs| fs.unmount(&dst)).await?;
            return Err(CsiError::VolumeNotFound(id.to_string()));
        }

        info!(source = %source.display(), read_only, "volume published");
        Ok(())
    }

    /// Unmount `target` and remove its directory.  A target that is already
    /// unmounted or gone is not an error, but the volume must exist.
    #[instrument(skip(self, target), fields(target = %target.display()))]
    pub async fn unpublish_volume(&self, id: &VolumeId, target: &Path) -> Result<(), CsiError> {
        self.registry.get(id)?;

        let dst = target.to_path_buf();
        self.blocking(move |fs| {
            fs.unmount(&dst)?;
            fs.remove_dir(&dst)
        })
        .await?;

        let changed = self.registry.mutate(id, |volume| {
            let removed = volume.mount_targets.remove(target);
            if volume.mount_targets.is_empty() {
                volume.sub_path = None;
            }
            removed.then(|| (volume.path.clone(), VolumeRecord::from(&*volume)))
        });
        match changed {
            Ok(Some((volume_path, record))) => {
                // A stale target in the record is dropped by recovery, so a
                // failed rewrite does not fail the unpublish.
                if let Err(e) = self.write_record(volume_path, &record).await {
                    warn!(error = %e, "failed to update volume record");
                }
            }
            Ok(None) => debug!("target was not recorded"),
            Err(_) => debug!("volume was removed concurrently"),
        }
        info!("volume unpublished");
        Ok(())
    }

    /// Filesystem usage for the volume, also recorded in the registry.
    #[instrument(skip(self))]
    pub async fn get_usage(&self, id: &VolumeId) -> Result<VolumeUsage, CsiError> {
        let path = self.registry.get(id)?.path;
        let usage = self.blocking(move |fs| fs.stat_filesystem(&path)).await?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let _ = self.registry.mutate(id, |volume| {
            volume.usage_bytes = usage.used_bytes;
            volume.last_access = Some(now);
        });
        Ok(usage)
    }

    async fn write_record(&self, volume_path: PathBuf, record: &VolumeRecord) -> Result<(), CsiError> {
        let body = serde_json::to_vec_pretty(record).map_err(CsiError::internal)?;
        self.blocking(move |fs| fs.write_file(&volume_path.join(RECORD_FILE), &body))
            .await
    }
}

/// A sub-path must stay inside the volume: relative, no `..`, no root.
fn validate_sub_path(sub_path: &str) -> Result<(), CsiError> {
    let escapes = Path::new(sub_path)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(CsiError::InvalidArgument(format!(
            "sub path {sub_path:?} must be relative to the volume"
        )));
    }
    Ok(())
}
