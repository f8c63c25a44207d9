//! The shared worker pool for parallel walking and build dispatch.
//!
//! One explicitly constructed pool is passed to both the parallel dependency
//! walker and the pipeline builder so the two phases never oversubscribe the
//! machine. Each client opens its own [`TaskGroup`], giving it an isolated
//! drain barrier: waiting on one group does not wait for tasks spawned
//! through another.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// Error constructing the underlying thread pool.
#[derive(Debug, thiserror::Error)]
#[error("failed to build worker pool: {source}")]
pub struct PoolError {
    /// The underlying builder error.
    #[from]
    source: rayon::ThreadPoolBuildError,
}

/// A bounded worker-thread pool shared by walkers and the builder.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Creates a pool with an explicit thread count; `0` selects the number
    /// of logical cores.
    pub fn new(threads: usize) -> Result<Self, PoolError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("kiln-worker-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    /// Returns the number of worker threads in the pool.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Opens a new task group on this pool.
    pub fn group(self: &Arc<Self>) -> TaskGroup {
        TaskGroup {
            pool: Arc::clone(self),
            pending: Arc::new(Pending {
                count: Mutex::new(0),
                drained: Condvar::new(),
            }),
        }
    }
}

struct Pending {
    count: Mutex<usize>,
    drained: Condvar,
}

/// A handle for spawning tasks and waiting for all of them to finish.
///
/// Tasks may themselves spawn further tasks through a clone of the group;
/// [`wait`](TaskGroup::wait) blocks until every transitively spawned task has
/// completed. The counter is decremented on task exit even if the task
/// panics, so a panicking task cannot wedge the barrier.
#[derive(Clone)]
pub struct TaskGroup {
    pool: Arc<WorkerPool>,
    pending: Arc<Pending>,
}

impl TaskGroup {
    /// Spawns a task on the shared pool, tracked by this group.
    pub fn spawn(&self, task: impl FnOnce() + Send + 'static) {
        *self.pending.count.lock() += 1;
        let guard = TaskGuard {
            pending: Arc::clone(&self.pending),
        };
        self.pool.pool.spawn(move || {
            let _guard = guard;
            task();
        });
    }

    /// Blocks until every task spawned through this group has finished.
    pub fn wait(&self) {
        let mut count = self.pending.count.lock();
        while *count > 0 {
            self.pending.drained.wait(&mut count);
        }
    }
}

struct TaskGuard {
    pending: Arc<Pending>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let mut count = self.pending.count.lock();
        *count -= 1;
        if *count == 0 {
            self.pending.drained.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn wait_drains_all_tasks() {
        let pool = Arc::new(WorkerPool::new(4).unwrap());
        let group = pool.group();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let counter = Arc::clone(&counter);
            group.spawn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        group.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn wait_covers_nested_spawns() {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let group = pool.group();
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_group = group.clone();
        let inner_counter = Arc::clone(&counter);
        group.spawn(move || {
            inner_counter.fetch_add(1, Ordering::SeqCst);
            for _ in 0..8 {
                let counter = Arc::clone(&inner_counter);
                inner_group.spawn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        group.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn groups_are_independent() {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let a = pool.group();
        let b = pool.group();
        let hit = Arc::new(AtomicUsize::new(0));
        let hit2 = Arc::clone(&hit);
        a.spawn(move || {
            hit2.fetch_add(1, Ordering::SeqCst);
        });
        // Waiting on an empty group returns immediately even while another
        // group has work outstanding.
        b.wait();
        a.wait();
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_thread_count_is_positive() {
        let pool = WorkerPool::new(0).unwrap();
        assert!(pool.threads() >= 1);
    }
}
