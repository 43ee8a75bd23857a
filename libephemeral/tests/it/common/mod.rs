use std::path::{Path, PathBuf};
use std::sync::Arc;

use libephemeral::fs::{Executor, RecordingMounter};
use libephemeral::{DriverConfig, EphemeralDriver};

pub const NODE_ID: &str = "it-node";

/// A driver rooted in a temporary directory with mounts recorded instead of
/// performed.
pub struct TestNode {
    pub dir: tempfile::TempDir,
    pub mounter: Arc<RecordingMounter>,
    pub driver: EphemeralDriver,
}

impl TestNode {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mounter = Arc::new(RecordingMounter::default());
        let driver = start_driver(dir.path(), &mounter).await;
        Self {
            dir,
            mounter,
            driver,
        }
    }

    /// Drop the driver and start a new one over the same base directory.
    pub async fn restart(self) -> Self {
        let Self { dir, mounter, .. } = self;
        let driver = start_driver(dir.path(), &mounter).await;
        Self {
            dir,
            mounter,
            driver,
        }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.dir.path().join("volumes")
    }

    pub fn target(&self, name: &str) -> String {
        self.dir
            .path()
            .join("pods")
            .join(name)
            .to_string_lossy()
            .into_owned()
    }
}

async fn start_driver(dir: &Path, mounter: &Arc<RecordingMounter>) -> EphemeralDriver {
    let config = DriverConfig::new(NODE_ID).with_base_dir(dir.join("volumes"));
    EphemeralDriver::new(config, Executor::new(mounter.clone()))
        .await
        .expect("start driver")
}
