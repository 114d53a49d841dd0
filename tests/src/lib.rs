//! Shared fixtures for the brim integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tempfile::TempDir;

use brim_fs::MirrorTree;
use brim_keys::{KeyPipeline, NormalizationForm, PlatformProfile};
use brim_queue::{OpQueue, QueueConfig};
use brim_remote::{MemoryStore, ObjectStore};
use brim_sync::{MirrorEngine, SyncOptions};

/// A fully wired mirror over an in-memory store and a temp directory.
pub struct TestMirror {
    /// The remote double; seed it with [`MemoryStore::put`].
    pub store: Arc<MemoryStore>,
    /// The engine under test.
    pub engine: Arc<MirrorEngine>,
    /// The mirror root on disk.
    pub root: PathBuf,
    _dir: TempDir,
}

impl TestMirror {
    /// Build a mirror with the given reconciliation mode and optional
    /// Unicode normalization.
    pub fn new(remove: bool, form: Option<NormalizationForm>) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path().join("mirror");
        let store = Arc::new(MemoryStore::new());
        let tree = Arc::new(MirrorTree::new(&root).expect("mirror tree"));
        let queue = OpQueue::new(QueueConfig {
            reaper_interval: Duration::from_millis(50),
            ..QueueConfig::default()
        });
        let pipeline = KeyPipeline::from_options(PlatformProfile::posix(), true, true, form);
        let engine = MirrorEngine::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            tree,
            queue,
            pipeline,
            SyncOptions {
                remove,
                prefix: None,
                suffix: None,
                max_keys: 1000,
            },
        );
        Self {
            store,
            engine,
            root,
            _dir: dir,
        }
    }

    /// Seed a remote object whose `last_modified` lies in the past, so a
    /// freshly written local copy counts as up to date.
    pub fn seed(&self, key: &str, body: &'static [u8]) {
        self.store.put(key, Bytes::from_static(body), past(3600));
    }

    /// Run one full sync and wait for every queued action to finish.
    pub async fn sync_and_drain(&self) -> brim_sync::SyncReport {
        let report = self.engine.full_sync().await.expect("full sync");
        self.engine.queue().wait_idle().await;
        report
    }

    /// Relative paths of all files currently in the mirror, sorted.
    pub fn local_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        collect_files(&self.root, &self.root, &mut files);
        files.sort();
        files
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else {
            let rel = path
                .strip_prefix(root)
                .expect("under root")
                .to_string_lossy()
                .into_owned();
            out.push(rel);
        }
    }
}

/// An instant `secs` seconds before now.
pub fn past(secs: u64) -> SystemTime {
    SystemTime::now() - Duration::from_secs(secs)
}

/// An instant `secs` seconds after now.
pub fn future(secs: u64) -> SystemTime {
    SystemTime::now() + Duration::from_secs(secs)
}
