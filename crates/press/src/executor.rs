use crate::error::{PressError, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::thread;

/// Bounded worker pool for per-item build work.
pub struct Executor {
    pool: ThreadPool,
    threads: usize,
}

impl Executor {
    /// `threads` defaults to the available parallelism.
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let threads = threads
            .filter(|threads| *threads > 0)
            .unwrap_or_else(|| thread::available_parallelism().map(usize::from).unwrap_or(1));

        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("press-worker-{index}"))
            .build()
            .map_err(|error| PressError::InvalidConfig {
                key: "threads".to_string(),
                message: error.to_string(),
            })?;

        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs `work` inside the pool so nested rayon iterators use it.
    pub fn install<R, F>(&self, work: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(work)
    }

    pub fn join<A, B, RA, RB>(&self, first: A, second: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        self.pool.join(first, second)
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("threads", &self.threads)
            .finish()
    }
}
