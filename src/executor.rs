//! worker dispatch seam.

use core::fmt;

use std::sync::Arc;

use threadpool::ThreadPool;

/// Runs queued worker tasks. One task services one request, blocking on the shared
/// buffers as needed, so the executor must provide real threads.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

impl<T> Executor for Arc<T>
where
    T: Executor + ?Sized,
{
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        (**self).execute(task)
    }
}

/// [threadpool] backed executor.
pub struct ThreadPoolExecutor {
    pool: ThreadPool,
}

impl ThreadPoolExecutor {
    pub fn new(workers: usize) -> Self {
        Self {
            pool: ThreadPool::new(workers),
        }
    }

    /// Park the calling thread until every queued task has finished.
    pub fn join(&self) {
        self.pool.join();
    }
}

impl Default for ThreadPoolExecutor {
    fn default() -> Self {
        Self {
            pool: threadpool::Builder::new().build(),
        }
    }
}

impl Executor for ThreadPoolExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        self.pool.execute(task);
    }
}

impl fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("workers", &self.pool.max_count())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[test]
    fn runs_queued_tasks() {
        let executor = ThreadPoolExecutor::new(2);
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let count = Arc::clone(&count);
            executor.execute(Box::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
            }));
        }

        executor.join();
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }
}
