//! Per-record filtering and dispatch into the action sink.

use std::sync::Arc;

use tracing::{debug, warn};

use brim_keys::KeyPipeline;
use brim_sync::ActionSink;
use brim_types::FileAction;

use crate::envelope::{S3Event, S3EventRecord, decode_object_key};
use crate::error::IngressError;

/// Supported record schema major version.
const SUPPORTED_MAJOR: u32 = 2;

/// Record-level acceptance rules.
#[derive(Debug, Clone)]
pub struct RecordFilter {
    /// Only records for this bucket are processed.
    pub bucket: String,
    /// Object-key prefix filter.
    pub prefix: Option<String>,
    /// Object-key suffix filter.
    pub suffix: Option<String>,
    /// Minimum supported minor version under major 2.
    pub min_minor_version: u32,
}

impl RecordFilter {
    /// A filter accepting every key of `bucket` at schema ≥ 2.1.
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: None,
            suffix: None,
            min_minor_version: 1,
        }
    }
}

/// Outcome counts for one record batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Write/mkdir actions submitted.
    pub writes: usize,
    /// Removal actions submitted.
    pub removals: usize,
    /// Records skipped by version, bucket, filters, or event name.
    pub skipped: usize,
}

/// Turns accepted records into [`FileAction`]s on the shared sink.
pub struct Dispatcher {
    sink: Arc<dyn ActionSink>,
    pipeline: KeyPipeline,
    filter: RecordFilter,
}

impl Dispatcher {
    /// Create a dispatcher.
    pub fn new(sink: Arc<dyn ActionSink>, pipeline: KeyPipeline, filter: RecordFilter) -> Self {
        Self {
            sink,
            pipeline,
            filter,
        }
    }

    /// Process a record batch. Record-level problems skip the record;
    /// only a queue refusing submissions aborts the batch.
    pub fn dispatch(&self, event: &S3Event) -> Result<DispatchStats, IngressError> {
        let mut stats = DispatchStats::default();
        for record in &event.records {
            match self.action_for(record) {
                Some(action) => {
                    match &action {
                        FileAction::WriteObject { .. } | FileAction::Mkdir { .. } => {
                            stats.writes += 1;
                        }
                        FileAction::RemoveFile { .. }
                        | FileAction::RemoveDirRecursive { .. } => stats.removals += 1,
                    }
                    debug!(action = %action, event = %record.event_name, "dispatching record");
                    self.sink.submit(action)?;
                }
                None => stats.skipped += 1,
            }
        }
        Ok(stats)
    }

    /// Apply the record-level gates; `None` means "skip this record".
    fn action_for(&self, record: &S3EventRecord) -> Option<FileAction> {
        match record.version() {
            Some((major, minor))
                if major == SUPPORTED_MAJOR && minor >= self.filter.min_minor_version => {}
            _ => {
                warn!(
                    version = %record.event_version,
                    "unsupported record version — skipping"
                );
                return None;
            }
        }

        if record.s3.bucket.name != self.filter.bucket {
            warn!(
                bucket = %record.s3.bucket.name,
                expected = %self.filter.bucket,
                "record for foreign bucket — skipping"
            );
            return None;
        }

        let key = decode_object_key(&record.s3.object.key);
        if let Some(prefix) = &self.filter.prefix
            && !key.starts_with(prefix.as_str())
        {
            debug!(%key, "key outside prefix — skipping");
            return None;
        }
        if let Some(suffix) = &self.filter.suffix
            && !key.ends_with(suffix.as_str())
        {
            debug!(%key, "key outside suffix — skipping");
            return None;
        }

        let Some(transformed_key) = self.pipeline.apply(&key) else {
            debug!(%key, "key transforms to nothing — skipping");
            return None;
        };

        let name = record.event_name.as_str();
        if name.starts_with("ObjectCreated:") || name.starts_with("ObjectRestore:") {
            if transformed_key.ends_with('/') || transformed_key.ends_with('\\') {
                Some(FileAction::Mkdir {
                    relative_path: transformed_key,
                })
            } else {
                Some(FileAction::WriteObject {
                    key,
                    transformed_key,
                    last_modified: None,
                    size: record.s3.object.size,
                })
            }
        } else if name.starts_with("ObjectRemoved:") {
            Some(FileAction::RemoveFile {
                relative_path: transformed_key,
            })
        } else {
            debug!(event = %name, "unhandled event name — skipping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use brim_keys::PlatformProfile;
    use brim_sync::SyncError;

    #[derive(Default)]
    struct RecordingSink {
        actions: Mutex<Vec<FileAction>>,
    }

    impl ActionSink for RecordingSink {
        fn submit(&self, action: FileAction) -> Result<(), SyncError> {
            self.actions.lock().unwrap().push(action);
            Ok(())
        }
    }

    fn record(event_name: &str, bucket: &str, key: &str, version: &str) -> S3EventRecord {
        serde_json::from_str(&format!(
            r#"{{"eventVersion": "{version}", "eventName": "{event_name}",
                "s3": {{"bucket": {{"name": "{bucket}"}},
                        "object": {{"key": "{key}", "size": 3}}}}}}"#
        ))
        .unwrap()
    }

    fn dispatcher(filter: RecordFilter) -> (Dispatcher, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let pipeline = KeyPipeline::from_options(PlatformProfile::posix(), true, true, None);
        (
            Dispatcher::new(Arc::clone(&sink) as Arc<dyn ActionSink>, pipeline, filter),
            sink,
        )
    }

    #[test]
    fn test_created_restored_and_removed_map_to_actions() {
        let (dispatcher, sink) = dispatcher(RecordFilter::for_bucket("b"));
        let event = S3Event {
            records: vec![
                record("ObjectCreated:Put", "b", "1.txt", "2.1"),
                record("ObjectRestore:Completed", "b", "a.txt", "2.1"),
                record("ObjectRemoved:Delete", "b", "z.txt", "2.1"),
            ],
        };
        let stats = dispatcher.dispatch(&event).unwrap();
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.removals, 1);
        assert_eq!(stats.skipped, 0);

        let actions = sink.actions.lock().unwrap();
        assert!(matches!(actions[0], FileAction::WriteObject { .. }));
        assert!(matches!(actions[2], FileAction::RemoveFile { .. }));
    }

    #[test]
    fn test_version_gate() {
        let (dispatcher, sink) = dispatcher(RecordFilter::for_bucket("b"));
        let event = S3Event {
            records: vec![
                record("ObjectCreated:Put", "b", "old.txt", "1.0"),
                record("ObjectCreated:Put", "b", "minor.txt", "2.0"),
                record("ObjectCreated:Put", "b", "future.txt", "3.0"),
                record("ObjectCreated:Put", "b", "ok.txt", "2.3"),
            ],
        };
        let stats = dispatcher.dispatch(&event).unwrap();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.skipped, 3);
        assert_eq!(sink.actions.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_foreign_bucket_is_skipped() {
        let (dispatcher, sink) = dispatcher(RecordFilter::for_bucket("mine"));
        let event = S3Event {
            records: vec![record("ObjectCreated:Put", "theirs", "x.txt", "2.1")],
        };
        let stats = dispatcher.dispatch(&event).unwrap();
        assert_eq!(stats.skipped, 1);
        assert!(sink.actions.lock().unwrap().is_empty());
    }

    #[test]
    fn test_prefix_and_suffix_filters_apply_to_decoded_key() {
        let mut filter = RecordFilter::for_bucket("b");
        filter.prefix = Some("docs/".into());
        filter.suffix = Some(".txt".into());
        let (dispatcher, sink) = dispatcher(filter);
        let event = S3Event {
            records: vec![
                record("ObjectCreated:Put", "b", "docs/in+scope.txt", "2.1"),
                record("ObjectCreated:Put", "b", "docs/skip.log", "2.1"),
                record("ObjectCreated:Put", "b", "other/out.txt", "2.1"),
            ],
        };
        let stats = dispatcher.dispatch(&event).unwrap();
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.skipped, 2);

        let actions = sink.actions.lock().unwrap();
        let FileAction::WriteObject {
            key,
            transformed_key,
            ..
        } = &actions[0]
        else {
            panic!("expected a write");
        };
        assert_eq!(key, "docs/in scope.txt");
        assert_eq!(transformed_key, "docs/in scope.txt");
    }

    #[test]
    fn test_unknown_event_names_are_skipped() {
        let (dispatcher, sink) = dispatcher(RecordFilter::for_bucket("b"));
        let event = S3Event {
            records: vec![record(
                "ReducedRedundancyLostObject",
                "b",
                "x.txt",
                "2.1",
            )],
        };
        let stats = dispatcher.dispatch(&event).unwrap();
        assert_eq!(stats.skipped, 1);
        assert!(sink.actions.lock().unwrap().is_empty());
    }

    #[test]
    fn test_folder_creation_becomes_mkdir() {
        let (dispatcher, sink) = dispatcher(RecordFilter::for_bucket("b"));
        let event = S3Event {
            records: vec![record("ObjectCreated:Put", "b", "newdir/", "2.1")],
        };
        let stats = dispatcher.dispatch(&event).unwrap();
        assert_eq!(stats.writes, 1);
        let actions = sink.actions.lock().unwrap();
        assert!(matches!(actions[0], FileAction::Mkdir { .. }));
    }
}
