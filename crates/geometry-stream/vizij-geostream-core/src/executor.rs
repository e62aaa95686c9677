//! Task submission seam between the ring manager and whatever runs reads.

use std::fmt;
use std::sync::Mutex;

use crate::error::StreamError;

/// A unit of background work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs read jobs. The manager only submits; completion is observed through
/// the job handles, never through the executor.
pub trait JobExecutor: Send + Sync + fmt::Debug {
    fn execute(&self, job: Job);

    /// Submit a tick's worth of jobs at once.
    fn execute_batch(&self, jobs: Vec<Job>) {
        for job in jobs {
            self.execute(job);
        }
    }

    /// Number of threads reads may run on
    fn worker_count(&self) -> usize;

    /// Start anything submitted but held back. Called before the manager
    /// blocks on outstanding reads.
    fn flush(&self) {}
}

/// Worker pool backed by a dedicated rayon thread pool.
pub struct RayonExecutor {
    pool: rayon::ThreadPool,
}

impl RayonExecutor {
    /// `None` sizes the pool to the available hardware threads.
    pub fn new(threads: Option<usize>) -> Result<Self, StreamError> {
        let threads = threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("geostream-io-{i}"))
            .build()
            .map_err(|e| StreamError::WorkerPool {
                reason: e.to_string(),
            })?;
        Ok(Self { pool })
    }
}

impl fmt::Debug for RayonExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RayonExecutor")
            .field("threads", &self.pool.current_num_threads())
            .finish()
    }
}

impl JobExecutor for RayonExecutor {
    fn execute(&self, job: Job) {
        self.pool.spawn(job);
    }

    fn worker_count(&self) -> usize {
        self.pool.current_num_threads()
    }
}

/// Runs every job on the calling thread during submission.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl JobExecutor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }

    fn worker_count(&self) -> usize {
        1
    }
}

/// Queues jobs until [`ManualExecutor::run_pending`] is called.
///
/// Lets hosts and tests observe slots in the `Loading` state and decide
/// exactly when reads land. Anything still queued runs when the manager
/// waits on it (`wait_idle`, `close` or drop).
#[derive(Default)]
pub struct ManualExecutor {
    queue: Mutex<Vec<Job>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Run everything queued so far; returns how many jobs ran.
    pub fn run_pending(&self) -> usize {
        let jobs = match self.queue.lock() {
            Ok(mut q) => std::mem::take(&mut *q),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        let count = jobs.len();
        for job in jobs {
            job();
        }
        count
    }
}

impl fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending())
            .finish()
    }
}

impl JobExecutor for ManualExecutor {
    fn execute(&self, job: Job) {
        match self.queue.lock() {
            Ok(mut q) => q.push(job),
            Err(poisoned) => poisoned.into_inner().push(job),
        }
    }

    fn worker_count(&self) -> usize {
        1
    }

    fn flush(&self) {
        let ran = self.run_pending();
        if ran > 0 {
            log::debug!("ran {ran} queued jobs before waiting");
        }
    }
}
