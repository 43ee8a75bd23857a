//! Volume registry.
//!
//! [`Registry`] is the in-memory table of volume id to [`Volume`] and the
//! single source of truth for existence, size and active mount targets.  It
//! is owned by the [`VolumeManager`](crate::manager::VolumeManager) and only
//! reachable through the accessor methods below; readers get clones, never
//! references into the table.
//!
//! The table itself is a [`DashMap`]: lookups on different ids proceed in
//! parallel while every mutation holds the write lock of its shard for the
//! duration of the closure and nothing longer.
//!
//! Durability comes from a [`VolumeRecord`] sidecar stored inside each
//! volume directory, from which the registry is rebuilt on startup.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CsiError;
use crate::types::{Volume, VolumeId};

/// Prefix of every derived volume id.
pub const VOLUME_ID_PREFIX: &str = "vol-";

/// File name of the metadata sidecar inside a volume directory.
pub const RECORD_FILE: &str = ".csi-volume.json";

/// Namespace for name-based (v5) volume ids.
const VOLUME_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_9c3e_52d4_4b8a_9e07_3f2c_d15b_7a40);

/// Derive the volume id for a creation request name.
///
/// The id is a SHA-1 name-based UUID, so the same name always maps to the
/// same id, distinct names do not collide in practice, and the result is
/// always a safe single path component regardless of what the name contains.
pub fn derive_id(name: &str) -> VolumeId {
    let uuid = Uuid::new_v5(&VOLUME_ID_NAMESPACE, name.as_bytes());
    VolumeId(format!("{VOLUME_ID_PREFIX}{uuid}"))
}

/// Outcome of [`Registry::insert_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    /// The volume was added.
    Inserted(Volume),
    /// An entry with the same id was already present; it is returned as is.
    Existing(Volume),
}

/// Concurrent map of tracked volumes.
#[derive(Debug, Default)]
pub struct Registry {
    volumes: DashMap<VolumeId, Volume>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `volume` unless its id is already tracked.  Never overwrites.
    pub fn insert_if_absent(&self, volume: Volume) -> Insertion {
        match self.volumes.entry(volume.volume_id.clone()) {
            Entry::Occupied(existing) => Insertion::Existing(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(volume.clone());
                Insertion::Inserted(volume)
            }
        }
    }

    /// Remove and return the entry for `id`.
    pub fn remove(&self, id: &VolumeId) -> Result<Volume, CsiError> {
        self.volumes
            .remove(id)
            .map(|(_, volume)| volume)
            .ok_or_else(|| CsiError::VolumeNotFound(id.to_string()))
    }

    /// Snapshot of the entry for `id`.
    pub fn get(&self, id: &VolumeId) -> Result<Volume, CsiError> {
        self.volumes
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CsiError::VolumeNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &VolumeId) -> bool {
        self.volumes.contains_key(id)
    }

    /// Point-in-time copy of every tracked volume, in no particular order.
    pub fn list(&self) -> Vec<Volume> {
        self.volumes
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Apply `f` to the entry for `id` under its write lock.
    pub fn mutate<R>(&self, id: &VolumeId, f: impl FnOnce(&mut Volume) -> R) -> Result<R, CsiError> {
        let mut entry = self
            .volumes
            .get_mut(id)
            .ok_or_else(|| CsiError::VolumeNotFound(id.to_string()))?;
        Ok(f(entry.value_mut()))
    }

    /// Like [`Self::mutate`], for updates that may reject the transition.
    /// `f` must leave the volume untouched when it returns an error.
    pub fn try_mutate<R>(
        &self,
        id: &VolumeId,
        f: impl FnOnce(&mut Volume) -> Result<R, CsiError>,
    ) -> Result<R, CsiError> {
        self.mutate(id, f)?
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

/// On-disk metadata written next to a volume's data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeRecord {
    pub volume_id: VolumeId,
    pub name: String,
    pub capacity_bytes: u64,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Targets the volume was bind-mounted at when the record was written.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub mount_targets: BTreeSet<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

impl From<&Volume> for VolumeRecord {
    fn from(volume: &Volume) -> Self {
        Self {
            volume_id: volume.volume_id.clone(),
            name: volume.name.clone(),
            capacity_bytes: volume.capacity_bytes,
            parameters: volume.parameters.clone(),
            mount_targets: volume.mount_targets.clone(),
            sub_path: volume.sub_path.clone(),
        }
    }
}

impl VolumeRecord {
    /// Rebuild the [`Volume`] located at `path`, with the recorded targets.
    pub fn into_volume(self, path: PathBuf) -> Volume {
        let mut volume = Volume::new(
            self.volume_id,
            self.name,
            path,
            self.capacity_bytes,
            self.parameters,
        );
        volume.mount_targets = self.mount_targets;
        volume.sub_path = self.sub_path;
        volume
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use crate::types::DEFAULT_CAPACITY_BYTES;

    fn volume(name: &str) -> Volume {
        let id = derive_id(name);
        let path = PathBuf::from("/base").join(id.as_str());
        Volume::new(id, name, path, DEFAULT_CAPACITY_BYTES, HashMap::new())
    }

    #[test]
    fn derive_id_is_stable_and_distinct() {
        assert_eq!(derive_id("v1"), derive_id("v1"));
        assert_ne!(derive_id("v1"), derive_id("v2"));
        assert!(derive_id("v1").as_str().starts_with(VOLUME_ID_PREFIX));
    }

    #[test]
    fn derive_id_is_a_single_path_component() {
        let id = derive_id("../../etc/passwd");
        assert!(!id.as_str().contains('/'));
        assert!(!id.as_str().contains(".."));
    }

    #[test]
    fn insert_if_absent_never_overwrites() {
        let registry = Registry::new();
        let first = volume("data");
        assert_eq!(
            registry.insert_if_absent(first.clone()),
            Insertion::Inserted(first.clone())
        );

        let mut second = volume("data");
        second.capacity_bytes = 42;
        assert_eq!(registry.insert_if_absent(second), Insertion::Existing(first));
        assert_eq!(registry.get(&derive_id("data")).unwrap().capacity_bytes, DEFAULT_CAPACITY_BYTES);
    }

    #[test]
    fn remove_and_get_report_not_found() {
        let registry = Registry::new();
        let id = derive_id("ghost");
        assert!(matches!(registry.get(&id), Err(CsiError::VolumeNotFound(_))));
        assert!(matches!(registry.remove(&id), Err(CsiError::VolumeNotFound(_))));
        assert!(matches!(
            registry.mutate(&id, |v| v.usage_bytes = 1),
            Err(CsiError::VolumeNotFound(_))
        ));
    }

    #[test]
    fn list_is_a_snapshot() {
        let registry = Registry::new();
        registry.insert_if_absent(volume("a"));
        let snapshot = registry.list();

        registry
            .mutate(&derive_id("a"), |v| v.usage_bytes = 99)
            .unwrap();
        assert_eq!(snapshot[0].usage_bytes, 0);
        assert_eq!(registry.get(&derive_id("a")).unwrap().usage_bytes, 99);
    }

    #[test]
    fn try_mutate_propagates_rejection() {
        let registry = Registry::new();
        registry.insert_if_absent(volume("a"));
        let res: Result<(), _> = registry.try_mutate(&derive_id("a"), |_| {
            Err(CsiError::Conflict("nope".into()))
        });
        assert!(matches!(res, Err(CsiError::Conflict(_))));
    }

    #[test]
    fn concurrent_inserts_keep_every_entry() {
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.insert_if_absent(volume(&format!("v{i}"))))
            })
            .collect();
        for handle in handles {
            assert!(matches!(handle.join().unwrap(), Insertion::Inserted(_)));
        }
        assert_eq!(registry.len(), 16);
    }

    #[test]
    fn record_keeps_mount_targets() {
        let mut vol = volume("persisted");
        vol.mount_targets.insert(PathBuf::from("/mnt/a"));
        vol.sub_path = Some("logs".into());
        let json = serde_json::to_string(&VolumeRecord::from(&vol)).unwrap();
        let restored = serde_json::from_str::<VolumeRecord>(&json)
            .unwrap()
            .into_volume(vol.path.clone());
        assert_eq!(restored.volume_id, vol.volume_id);
        assert_eq!(restored.name, "persisted");
        assert!(restored.mount_targets.contains(Path::new("/mnt/a")));
        assert_eq!(restored.sub_path.as_deref(), Some("logs"));
    }

    #[test]
    fn record_without_targets_reads_as_unpublished() {
        let raw = format!(
            r#"{{"volume_id":"{}","name":"old","capacity_bytes":1}}"#,
            derive_id("old")
        );
        let restored = serde_json::from_str::<VolumeRecord>(&raw)
            .unwrap()
            .into_volume(PathBuf::from("/base/old"));
        assert!(!restored.is_published());
        assert_eq!(restored.sub_path, None);
    }

    #[test]
    fn emptiness_follows_inserts_and_removes() {
        let registry = Registry::new();
        assert!(registry.is_empty());
        registry.insert_if_absent(volume("a"));
        assert!(!registry.is_empty());
        assert!(registry.contains(&derive_id("a")));
        registry.remove(&derive_id("a")).unwrap();
        assert!(registry.is_empty());
        assert!(!registry.contains(&derive_id("a")));
    }
}
