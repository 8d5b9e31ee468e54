use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use chrono::Utc;
use forge_protocol::{BuildId, BuildStatus, BuildTask, QueueStatus};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

pub type BuildJob = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Finished tasks kept in memory before the oldest are evicted.
pub const DEFAULT_RETAINED_TASKS: usize = 256;

struct QueuedJob {
    build_id: BuildId,
    job: BuildJob,
    done: oneshot::Sender<BuildStatus>,
}

struct QueueState {
    tasks: Mutex<HashMap<BuildId, BuildTask>>,
    finished: Mutex<VecDeque<BuildId>>,
    retained: usize,
    waiting: AtomicUsize,
    processing: AtomicBool,
}

impl QueueState {
    fn new(retained: usize) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            finished: Mutex::new(VecDeque::new()),
            retained,
            waiting: AtomicUsize::new(0),
            processing: AtomicBool::new(false),
        }
    }

    fn update(&self, build_id: &BuildId, apply: impl FnOnce(&mut BuildTask)) {
        if let Some(task) = self.tasks.lock().get_mut(build_id) {
            apply(task);
        }
    }

    /// Record a terminal task, evicting the oldest finished ones past `retained`.
    fn retire(&self, build_id: &BuildId) {
        let mut finished = self.finished.lock();
        finished.push_back(build_id.clone());
        while finished.len() > self.retained {
            let Some(evicted) = finished.pop_front() else {
                break;
            };
            self.tasks.lock().remove(&evicted);
            debug!(build_id = %evicted, "finished build evicted from queue state");
        }
    }
}

/// FIFO build queue with a single consumer task: at most one queued job runs
/// at a time. Cloning shares the same queue.
#[derive(Clone)]
pub struct BuildQueue {
    sender: mpsc::Sender<QueuedJob>,
    state: Arc<QueueState>,
}

impl BuildQueue {
    /// Spawn the consumer on the current tokio runtime. The consumer stops once
    /// every handle to the queue is dropped and the backlog is drained.
    pub fn start(capacity: usize) -> Self {
        Self::start_with_retention(capacity, DEFAULT_RETAINED_TASKS)
    }

    /// Like [`start`](Self::start), keeping at most `retained` finished tasks.
    pub fn start_with_retention(capacity: usize, retained: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let state = Arc::new(QueueState::new(retained));
        tokio::spawn(consume(receiver, state.clone()));
        Self { sender, state }
    }

    #[instrument(skip(self, job), fields(build_id = %build_id))]
    pub async fn enqueue<F>(&self, build_id: BuildId, job: F) -> Result<QueuedBuild>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.state
            .tasks
            .lock()
            .insert(build_id.clone(), BuildTask::pending(build_id.clone()));

        let (done, completion) = oneshot::channel();
        self.state.update(&build_id, |task| task.status = BuildStatus::Queued);
        self.state.waiting.fetch_add(1, Ordering::SeqCst);

        let queued = QueuedJob {
            build_id: build_id.clone(),
            job: Box::pin(job),
            done,
        };
        if self.sender.send(queued).await.is_err() {
            self.state.waiting.fetch_sub(1, Ordering::SeqCst);
            self.state.update(&build_id, |task| {
                task.status = BuildStatus::Failed;
                task.end_time = Some(Utc::now());
            });
            self.state.retire(&build_id);
            return Err(anyhow!("build queue consumer is not running"));
        }

        info!("build queued");
        Ok(QueuedBuild {
            build_id,
            completion,
        })
    }

    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            queue_length: self.state.waiting.load(Ordering::SeqCst),
            is_processing: self.state.processing.load(Ordering::SeqCst),
        }
    }

    /// Status and timestamps as tracked by the queue; logs live in the build
    /// log. Finished tasks past the retention limit are gone.
    pub fn task(&self, build_id: &BuildId) -> Option<BuildTask> {
        self.state.tasks.lock().get(build_id).cloned()
    }
}

async fn consume(mut receiver: mpsc::Receiver<QueuedJob>, state: Arc<QueueState>) {
    while let Some(queued) = receiver.recv().await {
        state.waiting.fetch_sub(1, Ordering::SeqCst);
        state.processing.store(true, Ordering::SeqCst);
        state.update(&queued.build_id, |task| {
            task.status = BuildStatus::Building;
            task.start_time = Some(Utc::now());
        });
        debug!(build_id = %queued.build_id, "build picked up");

        // A panicking job must not take the consumer down with it.
        let status = match tokio::spawn(queued.job).await {
            Ok(Ok(())) => BuildStatus::Success,
            Ok(Err(err)) => {
                warn!(build_id = %queued.build_id, error = %format!("{err:#}"), "build failed");
                BuildStatus::Failed
            }
            Err(join_error) => {
                error!(build_id = %queued.build_id, error = %join_error, "build job aborted");
                BuildStatus::Failed
            }
        };

        state.update(&queued.build_id, |task| {
            task.status = status;
            task.end_time = Some(Utc::now());
        });
        state.retire(&queued.build_id);
        state.processing.store(false, Ordering::SeqCst);
        info!(build_id = %queued.build_id, ?status, "build finished");
        let _ = queued.done.send(status);
    }
    debug!("build queue consumer stopped");
}

/// Handle returned by [`BuildQueue::enqueue`].
#[derive(Debug)]
pub struct QueuedBuild {
    build_id: BuildId,
    completion: oneshot::Receiver<BuildStatus>,
}

impl QueuedBuild {
    pub fn build_id(&self) -> &BuildId {
        &self.build_id
    }

    /// Wait for the terminal status. Returns `Failed` if the queue went away.
    pub async fn wait(self) -> BuildStatus {
        self.completion.await.unwrap_or(BuildStatus::Failed)
    }

    /// Detach from completion, keeping only the id.
    pub fn into_build_id(self) -> BuildId {
        self.build_id
    }
}
