// Audit recorder
//
// Wraps an activity log sink with bounded retries. Entries that still cannot
// be written are parked in a per-workflow backlog that is drained, in order,
// before any newer entry of the same workflow is written. Workflows never wait
// on each other's backlog, and the backlog never causes a transition to fail.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::log::ActivityLog;
use super::types::{ActivityLogEntry, AuditStatus};
use crate::config::RetryPolicy;
use crate::store::StoreError;
use crate::workflow::WorkflowId;

type Backlog = Arc<Mutex<VecDeque<ActivityLogEntry>>>;

pub struct AuditRecorder {
    log: Arc<dyn ActivityLog>,
    retry: RetryPolicy,
    /// Pending entries keyed by the workflow they belong to
    backlogs: Mutex<HashMap<Option<WorkflowId>, Backlog>>,
}

impl AuditRecorder {
    pub fn new(log: Arc<dyn ActivityLog>, retry: RetryPolicy) -> Self {
        Self {
            log,
            retry,
            backlogs: Mutex::new(HashMap::new()),
        }
    }

    pub fn log(&self) -> &Arc<dyn ActivityLog> {
        &self.log
    }

    pub fn set_retry(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    /// Number of entries waiting to be written
    pub async fn pending(&self) -> usize {
        let mut total = 0;
        for backlog in self.all_backlogs().await {
            total += backlog.lock().await.len();
        }
        total
    }

    /// Queue `entries` behind their workflow's backlog and write as much as possible
    pub async fn record(&self, entries: Vec<ActivityLogEntry>) -> AuditStatus {
        let mut groups: Vec<(Option<WorkflowId>, Vec<ActivityLogEntry>)> = Vec::new();
        for entry in entries {
            match groups.iter_mut().find(|(key, _)| *key == entry.workflow_id) {
                Some((_, group)) => group.push(entry),
                None => groups.push((entry.workflow_id, vec![entry])),
            }
        }

        let mut status = AuditStatus::Recorded;
        for (key, group) in groups {
            let backlog = self.backlog_for(key).await;
            let mut backlog = backlog.lock().await;
            backlog.extend(group);
            status = merge(status, self.drain(&mut backlog).await);
        }
        status
    }

    /// Retry every backlog without adding new entries
    pub async fn flush(&self) -> AuditStatus {
        let mut status = AuditStatus::Recorded;
        for backlog in self.all_backlogs().await {
            let mut backlog = backlog.lock().await;
            status = merge(status, self.drain(&mut backlog).await);
        }
        status
    }

    async fn backlog_for(&self, key: Option<WorkflowId>) -> Backlog {
        let mut backlogs = self.backlogs.lock().await;
        // Drop queues that are empty and not in use
        backlogs.retain(|k, backlog| {
            *k == key
                || Arc::strong_count(backlog) > 1
                || backlog.try_lock().map_or(true, |queue| !queue.is_empty())
        });
        backlogs.entry(key).or_default().clone()
    }

    async fn all_backlogs(&self) -> Vec<Backlog> {
        self.backlogs.lock().await.values().cloned().collect()
    }

    async fn drain(&self, backlog: &mut VecDeque<ActivityLogEntry>) -> AuditStatus {
        while let Some(entry) = backlog.front() {
            match self.write_with_retry(entry).await {
                Ok(()) => {
                    backlog.pop_front();
                }
                Err(e) => {
                    warn!(
                        "Activity log write failed; {} entr{} pending: {}",
                        backlog.len(),
                        if backlog.len() == 1 { "y" } else { "ies" },
                        e
                    );
                    return AuditStatus::Degraded {
                        pending: backlog.len(),
                        error: e.to_string(),
                    };
                }
            }
        }

        AuditStatus::Recorded
    }

    async fn write_with_retry(&self, entry: &ActivityLogEntry) -> Result<(), StoreError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.log.append(entry).await {
                Ok(()) => {
                    debug!("Recorded {} ({})", entry.activity_type, entry.id);
                    return Ok(());
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        "Activity log write attempt {}/{} failed, retrying in {:?}: {}",
                        attempt, max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn merge(current: AuditStatus, next: AuditStatus) -> AuditStatus {
    match (current, next) {
        (AuditStatus::Recorded, next) => next,
        (current, AuditStatus::Recorded) => current,
        (AuditStatus::Degraded { pending, error }, AuditStatus::Degraded { pending: more, .. }) => {
            AuditStatus::Degraded {
                pending: pending + more,
                error,
            }
        }
    }
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::activity::{ActivityType, MemoryActivityLog};
    use crate::workflow::Actor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use uuid::Uuid;

    /// Sink that fails while `failing` is set, then delegates to memory
    #[derive(Default)]
    pub(crate) struct FlakyLog {
        pub failing: AtomicBool,
        pub failures: AtomicUsize,
        pub inner: MemoryActivityLog,
    }

    #[async_trait]
    impl ActivityLog for FlakyLog {
        async fn append(&self, entry: &ActivityLogEntry) -> Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("audit sink offline".to_string()));
            }
            self.inner.append(entry).await
        }

        async fn entries_for_workflow(
            &self,
            workflow_id: &WorkflowId,
            limit: Option<usize>,
        ) -> Result<Vec<ActivityLogEntry>, StoreError> {
            self.inner.entries_for_workflow(workflow_id, limit).await
        }
    }

    fn entry(description: &str) -> ActivityLogEntry {
        ActivityLogEntry::new(ActivityType::WorkflowStarted, Actor::new("u-1", "Dana"), description)
            .for_workflow(Uuid::nil())
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_records_when_sink_is_healthy() {
        let log = Arc::new(MemoryActivityLog::new());
        let recorder = AuditRecorder::new(log.clone(), fast_retry());

        let status = recorder.record(vec![entry("a"), entry("b")]).await;
        assert_eq!(status, AuditStatus::Recorded);
        assert_eq!(log.len().await, 2);
    }

    #[tokio::test]
    async fn test_failed_writes_are_retried_then_backlogged() {
        let log = Arc::new(FlakyLog::default());
        log.failing.store(true, Ordering::SeqCst);
        let recorder = AuditRecorder::new(log.clone(), fast_retry());

        let status = recorder.record(vec![entry("a"), entry("b")]).await;
        assert!(matches!(status, AuditStatus::Degraded { pending: 2, .. }));
        assert_eq!(log.failures.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.pending().await, 2);

        log.failing.store(false, Ordering::SeqCst);
        assert_eq!(recorder.flush().await, AuditStatus::Recorded);
        assert_eq!(recorder.pending().await, 0);

        let written = log.inner.all_entries().await;
        let order: Vec<&str> = written.iter().map(|e| e.description.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_backlog_drains_before_new_entries() {
        let log = Arc::new(FlakyLog::default());
        let recorder = AuditRecorder::new(log.clone(), RetryPolicy::none());

        log.failing.store(true, Ordering::SeqCst);
        assert!(recorder.record(vec![entry("old")]).await.is_degraded());

        log.failing.store(false, Ordering::SeqCst);
        assert_eq!(recorder.record(vec![entry("new")]).await, AuditStatus::Recorded);

        let written = log.inner.all_entries().await;
        let order: Vec<&str> = written.iter().map(|e| e.description.as_str()).collect();
        assert_eq!(order, vec!["old", "new"]);
    }

    /// Sink whose writes for one workflow wait until released
    struct GatedLog {
        gated: WorkflowId,
        gate: Notify,
        inner: MemoryActivityLog,
    }

    #[async_trait]
    impl ActivityLog for GatedLog {
        async fn append(&self, entry: &ActivityLogEntry) -> Result<(), StoreError> {
            if entry.workflow_id == Some(self.gated) {
                self.gate.notified().await;
            }
            self.inner.append(entry).await
        }

        async fn entries_for_workflow(
            &self,
            workflow_id: &WorkflowId,
            limit: Option<usize>,
        ) -> Result<Vec<ActivityLogEntry>, StoreError> {
            self.inner.entries_for_workflow(workflow_id, limit).await
        }
    }

    #[tokio::test]
    async fn test_slow_workflow_does_not_hold_up_others() {
        let slow = Uuid::new_v4();
        let log = Arc::new(GatedLog {
            gated: slow,
            gate: Notify::new(),
            inner: MemoryActivityLog::new(),
        });
        let recorder = Arc::new(AuditRecorder::new(log.clone(), fast_retry()));

        let pending = {
            let recorder = recorder.clone();
            tokio::spawn(async move { recorder.record(vec![entry("slow").for_workflow(slow)]).await })
        };
        tokio::task::yield_now().await;

        let other = entry("other").for_workflow(Uuid::new_v4());
        let status = tokio::time::timeout(Duration::from_secs(1), recorder.record(vec![other]))
            .await
            .expect("write for another workflow was blocked");
        assert_eq!(status, AuditStatus::Recorded);

        log.gate.notify_one();
        assert_eq!(pending.await.unwrap(), AuditStatus::Recorded);
        assert_eq!(log.inner.len().await, 2);
    }

    #[tokio::test]
    async fn test_flush_reports_pending_across_workflows() {
        let log = Arc::new(FlakyLog::default());
        let recorder = AuditRecorder::new(log.clone(), RetryPolicy::none());

        log.failing.store(true, Ordering::SeqCst);
        recorder.record(vec![entry("a").for_workflow(Uuid::new_v4())]).await;
        recorder.record(vec![entry("b").for_workflow(Uuid::new_v4())]).await;
        assert!(matches!(recorder.flush().await, AuditStatus::Degraded { pending: 2, .. }));

        log.failing.store(false, Ordering::SeqCst);
        assert_eq!(recorder.flush().await, AuditStatus::Recorded);
        assert_eq!(recorder.pending().await, 0);
    }
}
