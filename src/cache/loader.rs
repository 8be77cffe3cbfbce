use std::sync::Arc;

use log::debug;
use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

use super::tiered::TieredCache;
use super::Lookup;

/// Count of submitted but unfinished tasks
struct Outstanding {
    count: Mutex<usize>,
    cv: Condvar,
}

impl Outstanding {
    fn acquire(&self, limit: usize) {
        let mut count = self.count.lock();
        while *count >= limit {
            self.cv.wait(&mut count);
        }
        *count += 1;
    }

    fn release(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        self.cv.notify_all();
    }
}

/// Releases a task slot when the task ends, panicking or not.
struct Slot(Arc<Outstanding>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Runs cache lookups on a bounded worker pool.
///
/// At most `max_concurrency` lookups run at once. Once `queue_capacity`
/// tasks are outstanding, [`submit`](Loader::submit) blocks the caller until
/// one of them finishes.
pub struct Loader {
    cache: Arc<TieredCache>,
    pool: ThreadPool,
    outstanding: Arc<Outstanding>,
    limit: usize,
}

impl Loader {
    pub fn new(cache: Arc<TieredCache>) -> Result<Loader, ThreadPoolBuildError> {
        let workers = cache.config().max_concurrency.max(1);
        let limit = cache.config().queue_capacity.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("cache-loader-{}", idx))
            .build()?;
        debug!("loader pool with {} workers, {} queued tasks", workers, limit);
        Ok(Loader {
            cache,
            pool,
            outstanding: Arc::new(Outstanding {
                count: Mutex::new(0),
                cv: Condvar::new(),
            }),
            limit,
        })
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    /// Looks `key` up on a worker thread and hands the result to `done`.
    pub fn submit<F>(&self, key: impl Into<String>, done: F)
    where
        F: FnOnce(Lookup) + Send + 'static,
    {
        self.outstanding.acquire(self.limit);
        let slot = Slot(Arc::clone(&self.outstanding));
        let cache = Arc::clone(&self.cache);
        let key = key.into();
        self.pool.spawn(move || {
            let _slot = slot;
            done(cache.lookup(&key));
        });
    }

    /// Number of submitted tasks that have not finished
    pub fn outstanding(&self) -> usize {
        *self.outstanding.count.lock()
    }

    /// Blocks until every submitted task has finished.
    pub fn wait_idle(&self) {
        let mut count = self.outstanding.count.lock();
        while *count > 0 {
            self.outstanding.cv.wait(&mut count);
        }
    }
}
