//! Cancellation / log-flush supervisor.
//!
//! Bridges the log relay's push sequence to the control plane's
//! pull/push model while a job runs. A single task selects between the
//! next log record and a fixed 1-second tick:
//!
//! - dirty tick → push the full accumulated buffer via a job update and
//!   clear the flag;
//! - clean tick → lightweight status read instead, avoiding redundant
//!   uploads.
//!
//! Either response reporting `CancelPending` fires the cancellation
//! token (idempotent). When the relay ends, the loop exits and performs
//! one unconditional final flush so no trailing records are lost. Being
//! a single task, no tick can run after — or overlap with — that final
//! flush.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ControlPlane, JobStatus, JobUpdate, LogRecord};
use crate::executor::logs::LogReceiver;

/// Cadence of the flush/poll tick.
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Accumulated supervisor state, explicit so the drain/tick interplay
/// stays local and testable.
#[derive(Default)]
struct FlushState {
    logs: Vec<LogRecord>,
    dirty: bool,
}

impl FlushState {
    fn absorb(&mut self, record: LogRecord) {
        self.logs.push(record);
        self.dirty = true;
    }
}

/// Drains the log sequence of one running job until it ends, uploading
/// logs and reacting to remote cancellation requests along the way.
///
/// API failures are logged and swallowed; the next tick retries
/// naturally. The buffer stays dirty across a failed flush so nothing
/// is dropped.
pub async fn supervise(
    api: &dyn ControlPlane,
    job_id: &str,
    mut records: LogReceiver,
    cancel: &CancellationToken,
) {
    let mut state = FlushState::default();
    let mut tick = tokio::time::interval(FLUSH_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first interval tick completes immediately; consume it so the
    // first real flush happens one cadence after the job starts.
    tick.tick().await;

    loop {
        tokio::select! {
            record = records.recv() => match record {
                Some(Ok(record)) => state.absorb(record),
                Some(Err(e)) => {
                    warn!("log relay for job {job_id} ended on a fault: {e}");
                    break;
                }
                None => break,
            },
            _ = tick.tick() => {
                let status = if state.dirty {
                    match api.update_job(&JobUpdate::logs(job_id, state.logs.clone())).await {
                        Ok(status) => {
                            state.dirty = false;
                            Some(status)
                        }
                        Err(e) => {
                            warn!("failed to upload logs for job {job_id}: {e:#}");
                            None
                        }
                    }
                } else {
                    match api.job_status(job_id).await {
                        Ok(status) => Some(status),
                        Err(e) => {
                            warn!("failed to read status of job {job_id}: {e:#}");
                            None
                        }
                    }
                };

                if status == Some(JobStatus::CancelPending) {
                    debug!("cancellation requested for job {job_id}");
                    cancel.cancel();
                }
            }
        }
    }

    // Final flush, unconditional: the buffer may hold records that
    // arrived after the last tick.
    if let Err(e) = api
        .update_job(&JobUpdate::logs(job_id, state.logs.clone()))
        .await
    {
        warn!("final log flush for job {job_id} failed: {e:#}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use anyhow::Result;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    use crate::api::mock::MockControlPlane;
    use crate::api::LogSource;

    fn record(text: &str) -> Result<LogRecord> {
        Ok(LogRecord::now(LogSource::Stdout, text.to_string()))
    }

    fn spawn_supervisor(
        api: Arc<MockControlPlane>,
        records: LogReceiver,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            supervise(api.as_ref(), "job-1", records, &cancel).await;
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_dirty_tick_uploads_full_buffer() {
        let api = Arc::new(MockControlPlane::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = spawn_supervisor(api.clone(), rx, cancel.clone());

        tx.send(record("a")).unwrap();
        tx.send(record("b")).unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        {
            let updates = api.updates.lock().unwrap();
            assert_eq!(updates.len(), 1);
            let logs = updates[0].logs.as_ref().unwrap();
            assert_eq!(logs.len(), 2);
            assert_eq!(logs[0].text, "a");
            assert_eq!(logs[1].text, "b");
        }
        assert!(api.status_reads.lock().unwrap().is_empty());

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_tick_reads_status_instead() {
        let api = Arc::new(MockControlPlane::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = spawn_supervisor(api.clone(), rx, cancel.clone());

        tokio::time::sleep(Duration::from_millis(2100)).await;

        assert_eq!(api.status_reads.lock().unwrap().len(), 2);
        assert!(api.updates.lock().unwrap().is_empty());

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_fires_token() {
        let api = Arc::new(MockControlPlane::new());
        api.set_poll_status(crate::api::JobStatus::CancelPending);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = spawn_supervisor(api.clone(), rx, cancel.clone());

        tx.send(record("output")).unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(cancel.is_cancelled());

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_pending_detected_on_clean_read() {
        let api = Arc::new(MockControlPlane::new());
        api.set_poll_status(crate::api::JobStatus::CancelPending);
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = spawn_supervisor(api.clone(), rx, cancel.clone());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(cancel.is_cancelled());

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_flush_even_when_clean() {
        let api = Arc::new(MockControlPlane::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = spawn_supervisor(api.clone(), rx, cancel.clone());

        // Relay ends without a single record and before the first tick.
        drop(tx);
        handle.await.unwrap();

        let updates = api.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].logs.as_ref().unwrap().len(), 0);
        assert!(updates[0].status.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_records_reach_final_flush() {
        let api = Arc::new(MockControlPlane::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = spawn_supervisor(api.clone(), rx, cancel.clone());

        tx.send(record("early")).unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        // Arrives after the last tick, then the relay closes.
        tx.send(record("late")).unwrap();
        drop(tx);
        handle.await.unwrap();

        let updates = api.updates.lock().unwrap();
        assert_eq!(updates.len(), 2);
        let last = updates[1].logs.as_ref().unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[1].text, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_keeps_buffer_dirty() {
        let api = Arc::new(MockControlPlane::new());
        *api.fail_updates.lock().unwrap() = Some("control plane down".to_string());
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = spawn_supervisor(api.clone(), rx, cancel.clone());

        tx.send(record("kept")).unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(api.updates.lock().unwrap().is_empty());

        // Control plane recovers; the next tick retries the upload.
        *api.fail_updates.lock().unwrap() = None;
        tokio::time::sleep(Duration::from_secs(1)).await;

        {
            let updates = api.updates.lock().unwrap();
            assert_eq!(updates.len(), 1);
            assert_eq!(updates[0].logs.as_ref().unwrap()[0].text, "kept");
        }

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_fault_still_flushes() {
        let api = Arc::new(MockControlPlane::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = spawn_supervisor(api.clone(), rx, cancel.clone());

        tx.send(record("before fault")).unwrap();
        tx.send(Err(anyhow::anyhow!("invalid UTF-8"))).unwrap();
        handle.await.unwrap();

        let updates = api.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].logs.as_ref().unwrap()[0].text, "before fault");
    }
}
