//! A fixed set of worker threads fed from one shared queue.

use anyhow::anyhow;
use std::num::NonZeroUsize;
use std::sync::{mpsc, Arc, Mutex};

/// A unit of work; receives the index of the worker running it.
type Job<'a> = Box<dyn FnOnce(usize) + Send + 'a>;

pub struct ThreadPoolExecutor<'a> {
    sender: mpsc::Sender<Job<'a>>,
}

impl<'a> ThreadPoolExecutor<'a> {
    pub fn execute<F: FnOnce(usize) + Send + 'a>(&self, f: F) -> anyhow::Result<()> {
        self.sender
            .send(Box::new(f))
            .map_err(|_| anyhow!("all workers have exited"))
    }
}

/// Runs `scope` with a pool of `num_threads` workers.  Returns once `scope`
/// has returned and every queued job has finished.
pub fn scoped_thread_pool<'env, T, F: FnOnce(&ThreadPoolExecutor<'env>) -> T>(
    num_threads: NonZeroUsize,
    scope: F,
) -> T {
    std::thread::scope(|s| {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        for worker in 0..num_threads.get() {
            let receiver = receiver.clone();
            s.spawn(move || loop {
                let message = match receiver.lock() {
                    Ok(receiver) => receiver.recv(),
                    Err(_) => break,
                };
                match message {
                    Ok(job) => job(worker),
                    Err(_) => break,
                }
            });
        }

        let pool: ThreadPoolExecutor<'env> = ThreadPoolExecutor { sender };
        scope(&pool)
    })
}
