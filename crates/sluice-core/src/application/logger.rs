//! Best-effort instance audit logging.

use crate::domain::instance::InstanceId;
use crate::domain::log::{LogEntry, LogOperation};
use crate::domain::repository::LogRepository;
use crate::EngineError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Writes audit log entries for instances.
///
/// Logging never fails the caller: a repository error is downgraded to
/// a `tracing::warn!` and the advance continues. Sequence numbers come
/// from a process-wide counter, so entries order correctly even when
/// timestamps collide.
pub struct InstanceLogger {
    repository: Arc<dyn LogRepository>,
    sequence: AtomicU64,
}

impl InstanceLogger {
    /// Create a logger over a log repository
    pub fn new(repository: Arc<dyn LogRepository>) -> Self {
        Self {
            repository,
            sequence: AtomicU64::new(0),
        }
    }

    /// Build an entry with the next sequence number
    pub fn entry(
        &self,
        instance_id: InstanceId,
        operation: LogOperation,
        message: impl Into<String>,
    ) -> LogEntry {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        LogEntry::new(instance_id, sequence, operation, message)
    }

    /// Append an entry, swallowing repository failures
    pub async fn append(&self, entry: LogEntry) {
        if let Err(e) = self.repository.append(entry.clone()).await {
            tracing::warn!(
                instance_id = %entry.instance_id.0,
                sequence = entry.sequence,
                error = %e,
                "failed to append audit log entry"
            );
        }
    }

    /// All entries for an instance, in sequence order
    pub async fn list(&self, instance_id: &InstanceId) -> Result<Vec<LogEntry>, EngineError> {
        let mut entries = self.repository.list_for_instance(instance_id).await?;
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct RecordingLogRepository {
        entries: Mutex<Vec<LogEntry>>,
        fail: bool,
    }

    impl RecordingLogRepository {
        fn new(fail: bool) -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl LogRepository for RecordingLogRepository {
        async fn append(&self, entry: LogEntry) -> Result<(), EngineError> {
            if self.fail {
                return Err(EngineError::PersistenceError("store down".to_string()));
            }
            self.entries.lock().await.push(entry);
            Ok(())
        }

        async fn list_for_instance(
            &self,
            id: &InstanceId,
        ) -> Result<Vec<LogEntry>, EngineError> {
            Ok(self
                .entries
                .lock()
                .await
                .iter()
                .filter(|e| &e.instance_id == id)
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let repo = Arc::new(RecordingLogRepository::new(false));
        let logger = InstanceLogger::new(repo);
        let instance = InstanceId("i1".to_string());

        for i in 0..5 {
            let entry = logger.entry(
                instance.clone(),
                LogOperation::StatusChanged,
                format!("entry {}", i),
            );
            logger.append(entry).await;
        }

        let entries = logger.list(&instance).await.unwrap();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_repository_failure_does_not_propagate() {
        let repo = Arc::new(RecordingLogRepository::new(true));
        let logger = InstanceLogger::new(repo);

        let entry = logger.entry(
            InstanceId("i1".to_string()),
            LogOperation::Anomaly,
            "dropped on the floor",
        );
        // Must not panic or return an error
        logger.append(entry).await;
    }
}
