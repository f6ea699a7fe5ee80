use crate::error::{Result, ShortenerError};
use burrow_core::{Repository, ShortCode, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// A user's request to soft-delete some of their short codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub short_codes: Vec<String>,
    pub user: UserId,
}

/// Counters describing what the daemon has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionStats {
    /// Requests whose batch delete reached the repository successfully.
    pub applied: u64,
    /// Requests dropped because the repository returned an error.
    pub failed: u64,
    /// Short codes that could not be decoded and were ignored.
    pub skipped_codes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    applied: AtomicU64,
    failed: AtomicU64,
    skipped_codes: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DeletionStats {
        DeletionStats {
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped_codes: self.skipped_codes.load(Ordering::Relaxed),
        }
    }
}

/// Producer side of the deletion daemon.
///
/// Dropping every clone closes the queue; the daemon then drains what is
/// left and exits.
#[derive(Debug, Clone)]
pub struct DeleteQueue {
    tx: mpsc::Sender<DeleteRequest>,
}

impl DeleteQueue {
    /// Queues `request`, waiting only while the queue is full.
    pub async fn enqueue(&self, request: DeleteRequest) -> Result<()> {
        self.tx
            .send(request)
            .await
            .map_err(|_| ShortenerError::QueueClosed)
    }
}

/// Owner side of a running deletion daemon.
#[derive(Debug)]
pub struct DeletionHandle {
    task: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl DeletionHandle {
    pub fn stats(&self) -> DeletionStats {
        self.counters.snapshot()
    }

    /// Waits for the daemon to drain its queue and exit.
    ///
    /// Only returns once every [`DeleteQueue`] has been dropped.
    pub async fn join(self) -> DeletionStats {
        if let Err(err) = self.task.await {
            error!(error = %err, "deletion daemon terminated abnormally");
        }
        self.counters.snapshot()
    }
}

/// Single consumer applying delete requests in arrival order.
pub struct DeletionDaemon<R> {
    repository: R,
    rx: mpsc::Receiver<DeleteRequest>,
    counters: Arc<Counters>,
}

impl<R: Repository> DeletionDaemon<R> {
    /// Starts the daemon on the current runtime with a queue holding at most
    /// `capacity` pending requests (at least one).
    pub fn spawn(repository: R, capacity: usize) -> (DeleteQueue, DeletionHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());

        let daemon = Self {
            repository,
            rx,
            counters: counters.clone(),
        };
        let task = tokio::spawn(daemon.run());

        (DeleteQueue { tx }, DeletionHandle { task, counters })
    }

    async fn run(mut self) {
        info!("deletion daemon started");
        while let Some(request) = self.rx.recv().await {
            self.apply(request).await;
        }
        info!(stats = ?self.counters.snapshot(), "deletion daemon stopped");
    }

    async fn apply(&self, request: DeleteRequest) {
        let DeleteRequest { short_codes, user } = request;

        let mut ids = Vec::with_capacity(short_codes.len());
        for code in &short_codes {
            match ShortCode::parse(code) {
                Ok(code) => ids.push(code.id()),
                Err(err) => {
                    warn!(
                        user = %user,
                        code = %code,
                        error = %err,
                        "skipping undecodable short code"
                    );
                    self.counters.skipped_codes.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if ids.is_empty() {
            return;
        }

        match self.repository.mark_batch_as_deleted(&ids, user).await {
            Ok(()) => {
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
                debug!(user = %user, count = ids.len(), "applied delete request");
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                error!(user = %user, ids = ?ids, error = %err, "dropping delete request");
            }
        }
    }
}
