//! Buffered, retried log writes so a Repository hiccup never blocks a tool
//! call or a watchdog tick. Modeled on `LogBuffer` from the original
//! database layer: writes that fail are queued and a background task
//! retries them with exponentially growing intervals.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::sync::{Mutex, mpsc};
use tracing::warn;

#[cfg(feature = "metrics")]
use fluidmcp_metrics::{counter, gauge, persistence as persistence_metrics};

use crate::{repository::Repository, types::LogEntry};

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Runtime stats surfaced for diagnostics/metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogBufferStats {
    pub buffered: usize,
    pub failed_total: u64,
    pub success_total: u64,
}

struct Inner {
    failed: VecDeque<LogEntry>,
    failed_total: u64,
    success_total: u64,
}

/// Handle for appending log entries; the actual write happens on a
/// background task so the caller's hot path never waits on the Repository.
#[derive(Clone)]
pub struct BufferedLogWriter {
    tx: mpsc::Sender<LogEntry>,
    stats: Arc<Mutex<Inner>>,
}

impl BufferedLogWriter {
    #[must_use]
    pub fn spawn(repo: Arc<dyn Repository>) -> Self {
        Self::spawn_with_capacity(repo, DEFAULT_BUFFER_CAPACITY)
    }

    #[must_use]
    pub fn spawn_with_capacity(repo: Arc<dyn Repository>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let stats = Arc::new(Mutex::new(Inner {
            failed: VecDeque::new(),
            failed_total: 0,
            success_total: 0,
        }));
        tokio::spawn(run(repo, rx, Arc::clone(&stats)));
        Self { tx, stats }
    }

    /// Enqueue a log entry. Never blocks on the Repository; only backs up if
    /// the channel itself is saturated.
    pub async fn append(&self, entry: LogEntry) {
        if self.tx.send(entry).await.is_err() {
            warn!("log buffer writer task has exited; dropping log entry");
        }
    }

    pub async fn stats(&self) -> LogBufferStats {
        let inner = self.stats.lock().await;
        LogBufferStats {
            buffered: inner.failed.len(),
            failed_total: inner.failed_total,
            success_total: inner.success_total,
        }
    }
}

async fn run(
    repo: Arc<dyn Repository>,
    mut rx: mpsc::Receiver<LogEntry>,
    stats: Arc<Mutex<Inner>>,
) {
    let mut retry_delay = INITIAL_RETRY_DELAY;

    loop {
        let has_failed = !stats.lock().await.failed.is_empty();
        tokio::select! {
            biased;

            maybe_entry = rx.recv() => {
                match maybe_entry {
                    Some(entry) => write_one(&repo, entry, &stats).await,
                    None => break,
                }
            }

            () = tokio::time::sleep(retry_delay), if has_failed => {
                let front = stats.lock().await.failed.pop_front();
                if let Some(entry) = front {
                    match repo.append_log(entry.clone()).await {
                        Ok(()) => {
                            retry_delay = INITIAL_RETRY_DELAY;
                            let mut inner = stats.lock().await;
                            inner.success_total += 1;
                            #[cfg(feature = "metrics")]
                            counter!(persistence_metrics::LOG_WRITE_SUCCESS_TOTAL).increment(1);
                        }
                        Err(e) => {
                            warn!(error = %e, "retrying buffered log write failed again");
                            retry_delay = (retry_delay * 2).min(MAX_RETRY_DELAY);
                            stats.lock().await.failed.push_front(entry);
                        }
                    }
                }
            }
        }

        #[cfg(feature = "metrics")]
        gauge!(persistence_metrics::LOG_BUFFER_SIZE)
            .set(stats.lock().await.failed.len() as f64);
    }
}

async fn write_one(repo: &Arc<dyn Repository>, entry: LogEntry, stats: &Arc<Mutex<Inner>>) {
    match repo.append_log(entry.clone()).await {
        Ok(()) => {
            let mut inner = stats.lock().await;
            inner.success_total += 1;
            #[cfg(feature = "metrics")]
            counter!(persistence_metrics::LOG_WRITE_SUCCESS_TOTAL).increment(1);
        },
        Err(e) => {
            warn!(error = %e, server = %entry.server_id, "buffering failed log write for retry");
            let mut inner = stats.lock().await;
            inner.failed_total += 1;
            inner.failed.push_back(entry);
            #[cfg(feature = "metrics")]
            counter!(persistence_metrics::LOG_WRITE_FAILURES_TOTAL).increment(1);
        },
    }
}
