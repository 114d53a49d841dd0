//! The mirror engine: turns [`FileAction`]s into queue tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use brim_fs::MirrorTree;
use brim_keys::KeyPipeline;
use brim_queue::{OpQueue, TaskFailure};
use brim_remote::{ObjectStore, RemoteError};
use brim_types::FileAction;

use crate::error::SyncError;
use crate::list;
use crate::reconcile;

/// Anything that accepts file actions for execution.
///
/// The notification ingress holds an `Arc<dyn ActionSink>` so it stays
/// decoupled from the engine internals; tests substitute a recording
/// sink.
pub trait ActionSink: Send + Sync {
    /// Enqueue an action for execution, keyed by its target path.
    fn submit(&self, action: FileAction) -> Result<(), SyncError>;
}

/// Behavior knobs for full synchronization.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Permit deletions during reconciliation.
    pub remove: bool,
    /// Remote key prefix filter (applied at list time).
    pub prefix: Option<String>,
    /// Remote key suffix filter (applied client-side).
    pub suffix: Option<String>,
    /// List page size.
    pub max_keys: u32,
}

/// Outcome of one full-sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Write and mkdir actions submitted.
    pub writes: usize,
    /// Unlink and recursive-removal actions submitted.
    pub removals: usize,
    /// Whether the pass was skipped because another one was running.
    pub skipped: bool,
}

/// Executes file actions against the mirror tree through the operation
/// queue, and drives full synchronization passes.
pub struct MirrorEngine {
    store: Arc<dyn ObjectStore>,
    tree: Arc<MirrorTree>,
    queue: Arc<OpQueue>,
    pipeline: KeyPipeline,
    options: SyncOptions,
    /// Reentrancy guard: while a full sync runs, further passes (resync
    /// timer ticks) are no-ops.
    sync_running: AtomicBool,
}

impl MirrorEngine {
    /// Assemble an engine.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        tree: Arc<MirrorTree>,
        queue: Arc<OpQueue>,
        pipeline: KeyPipeline,
        options: SyncOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            tree,
            queue,
            pipeline,
            options,
            sync_running: AtomicBool::new(false),
        })
    }

    /// The operation queue (for drain at shutdown).
    pub fn queue(&self) -> &Arc<OpQueue> {
        &self.queue
    }

    /// The key pipeline bound at start-up.
    pub fn pipeline(&self) -> &KeyPipeline {
        &self.pipeline
    }

    /// Run one full list-and-compare pass.
    ///
    /// Returns a skipped report when another pass is already in flight.
    /// The submitted actions drain asynchronously through the queue; use
    /// [`OpQueue::wait_idle`] to observe completion.
    pub async fn full_sync(&self) -> Result<SyncReport, SyncError> {
        if self.sync_running.swap(true, Ordering::SeqCst) {
            debug!("full sync already running — skipping this pass");
            return Ok(SyncReport {
                skipped: true,
                ..SyncReport::default()
            });
        }
        let result = self.run_full_sync().await;
        self.sync_running.store(false, Ordering::SeqCst);
        result
    }

    async fn run_full_sync(&self) -> Result<SyncReport, SyncError> {
        let remote = list::snapshot(
            &self.store,
            self.options.prefix.as_deref(),
            self.options.suffix.as_deref(),
            self.options.max_keys,
            &self.pipeline,
        )
        .await?;
        let local = self.tree.list(&self.pipeline).await?;

        let mut report = SyncReport::default();
        let mut submit_err = None;
        reconcile::reconcile(&remote, &local, self.options.remove, |action| {
            if submit_err.is_some() {
                return;
            }
            match action {
                FileAction::WriteObject { .. } | FileAction::Mkdir { .. } => report.writes += 1,
                FileAction::RemoveFile { .. } | FileAction::RemoveDirRecursive { .. } => {
                    report.removals += 1;
                }
            }
            if let Err(e) = self.submit(action) {
                submit_err = Some(e);
            }
        });
        if let Some(e) = submit_err {
            return Err(e);
        }

        info!(
            remote = remote.len(),
            local = local.len(),
            writes = report.writes,
            removals = report.removals,
            "full sync pass submitted"
        );
        Ok(report)
    }

    /// Execute one action against the mirror tree. Runs inside a queue
    /// task; only one execution per target path is in flight.
    async fn execute(
        store: Arc<dyn ObjectStore>,
        tree: Arc<MirrorTree>,
        action: FileAction,
    ) -> Result<(), SyncError> {
        match action {
            FileAction::WriteObject {
                key,
                transformed_key,
                ..
            } => {
                let body = store.get(&key).await?;
                tree.write_object(&transformed_key, body).await?;
            }
            FileAction::Mkdir { relative_path } => {
                tree.ensure_dir(&relative_path).await?;
            }
            FileAction::RemoveFile { relative_path } => {
                tree.remove_file(&relative_path).await?;
            }
            FileAction::RemoveDirRecursive { relative_path } => {
                tree.remove_dir_recursive(&relative_path).await?;
            }
        }
        Ok(())
    }
}

impl ActionSink for MirrorEngine {
    fn submit(&self, action: FileAction) -> Result<(), SyncError> {
        let key = action.target().to_owned();
        let store = Arc::clone(&self.store);
        let tree = Arc::clone(&self.tree);
        let label = action.to_string();
        self.queue.submit(
            key,
            Box::pin(async move {
                match Self::execute(store, tree, action).await {
                    Ok(()) => Ok(()),
                    // Acceptable outcomes: the target was already in the
                    // desired state, or the object vanished remotely. The
                    // next notification or resync settles any residue.
                    Err(SyncError::Remote(e)) if e.is_acceptable() => {
                        warn!(action = %label, error = %e, "remote object gone — skipping");
                        Ok(())
                    }
                    Err(SyncError::Fs(e)) if e.is_acceptable() => {
                        warn!(action = %label, error = %e, "target already settled — skipping");
                        Ok(())
                    }
                    Err(e) => Err(Box::new(e) as brim_queue::TaskError),
                }
            }),
        )?;
        Ok(())
    }
}

/// Whether a queue task failure is a hard remote error that must shut the
/// daemon down (lost bucket, rejected credentials).
pub fn failure_is_fatal(failure: &TaskFailure) -> bool {
    matches!(
        failure.error.downcast_ref::<SyncError>(),
        Some(SyncError::Remote(e)) if e.is_fatal()
    )
}
