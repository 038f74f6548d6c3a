use crossbeam_channel::{Receiver, SendTimeoutError, Sender, bounded, unbounded};
use parking_lot::{Condvar, Mutex};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

const SUBMIT_RETRY: Duration = Duration::from_millis(400);
const WAIT_SLICE: Duration = Duration::from_millis(100);

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("executor '{0}' is stopped")]
    Stopped(&'static str),
    #[error("a task panicked: {0}")]
    TaskPanicked(String),
    #[error("failed to spawn thread: {0}")]
    Spawn(String),
}

struct Shared {
    name: &'static str,
    started: AtomicU64,
    finished: Mutex<u64>,
    all_done: Condvar,
    failure: Mutex<Option<ExecutorError>>,
}

impl Shared {
    fn mark_finished(&self) {
        let mut finished = self.finished.lock();
        *finished += 1;
        self.all_done.notify_all();
    }

    fn record(&self, error: ExecutorError) {
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(error);
        }
    }
}

/// A fixed pool of worker threads fed through a bounded queue, plus one listener thread.
///
/// Each submission is a `(task, listener)` pair. The task runs on a worker; its result is handed
/// to the listener, which runs on the single listener thread, so listeners never run
/// concurrently with each other. [`wait_for_finish`](Self::wait_for_finish) is the barrier the
/// phase engine uses between phases.
///
/// A panicking task or listener is caught, counted as finished, and reported by the next
/// `submit` or `wait_for_finish`.
pub struct TaskExecutor {
    parallelism: usize,
    jobs: Option<Sender<Job>>,
    listeners: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl TaskExecutor {
    pub fn start(
        name: &'static str,
        parallelism: usize,
        queue_capacity: usize,
    ) -> Result<Self, ExecutorError> {
        let parallelism = parallelism.max(1);
        let (job_tx, job_rx) = bounded::<Job>(queue_capacity);
        let (listen_tx, listen_rx) = unbounded::<Job>();
        let shared = Arc::new(Shared {
            name,
            started: AtomicU64::new(0),
            finished: Mutex::new(0),
            all_done: Condvar::new(),
            failure: Mutex::new(None),
        });

        let mut workers = Vec::with_capacity(parallelism);
        for i in 0..parallelism {
            let rx: Receiver<Job> = job_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", name, i))
                .spawn(move || {
                    for job in rx.iter() {
                        job();
                    }
                })
                .map_err(|e| ExecutorError::Spawn(e.to_string()))?;
            workers.push(handle);
        }

        let listener = thread::Builder::new()
            .name(format!("{}-listener", name))
            .spawn(move || {
                for job in listen_rx.iter() {
                    job();
                }
            })
            .map_err(|e| ExecutorError::Spawn(e.to_string()))?;

        debug!(
            "Started executor '{}' with {} workers (queue capacity {}).",
            name, parallelism, queue_capacity
        );
        Ok(Self {
            parallelism,
            jobs: Some(job_tx),
            listeners: Some(listen_tx),
            workers,
            listener: Some(listener),
            shared,
        })
    }

    #[inline]
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn is_running(&self) -> bool {
        self.jobs.is_some()
    }

    pub fn num_pending(&self) -> u64 {
        let finished = *self.shared.finished.lock();
        self.shared.started.load(Ordering::SeqCst) - finished
    }

    fn take_failure(&self) -> Result<(), ExecutorError> {
        match self.shared.failure.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Queues `task` for a worker. Blocks while the queue is full.
    pub fn submit<T, F, L>(&self, task: F, listener: L) -> Result<(), ExecutorError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        L: FnOnce(T) + Send + 'static,
    {
        self.take_failure()?;
        let (Some(jobs), Some(listeners)) = (&self.jobs, &self.listeners) else {
            return Err(ExecutorError::Stopped(self.shared.name));
        };

        let shared = self.shared.clone();
        let listeners = listeners.clone();
        let mut job: Job = Box::new(move || match catch_unwind(AssertUnwindSafe(task)) {
            Ok(value) => {
                let done = shared.clone();
                let listen: Job = Box::new(move || {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(value))) {
                        done.record(ExecutorError::TaskPanicked(panic_message(&panic)));
                    }
                    done.mark_finished();
                });
                if listeners.send(listen).is_err() {
                    shared.record(ExecutorError::Stopped(shared.name));
                    shared.mark_finished();
                }
            }
            Err(panic) => {
                shared.record(ExecutorError::TaskPanicked(panic_message(&panic)));
                shared.mark_finished();
            }
        });

        self.shared.started.fetch_add(1, Ordering::SeqCst);
        loop {
            match jobs.send_timeout(job, SUBMIT_RETRY) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => {
                    trace!("Executor '{}' queue is full, retrying.", self.shared.name);
                    if let Err(e) = self.take_failure() {
                        self.shared.mark_finished();
                        return Err(e);
                    }
                    job = returned;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    self.shared.mark_finished();
                    return Err(ExecutorError::Stopped(self.shared.name));
                }
            }
        }
    }

    /// Blocks until every submitted task's listener has run.
    pub fn wait_for_finish(&self) -> Result<(), ExecutorError> {
        let mut finished = self.shared.finished.lock();
        while *finished < self.shared.started.load(Ordering::SeqCst) {
            self.shared.all_done.wait_for(&mut finished, WAIT_SLICE);
        }
        drop(finished);
        self.take_failure()
    }

    /// Closes the queues and joins all threads. Pending tasks still run to completion.
    pub fn stop(&mut self) {
        if self.jobs.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.listeners.take();
        if let Some(handle) = self.listener.take() {
            let _ = handle.join();
        }
        debug!("Stopped executor '{}'.", self.shared.name);
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread::ThreadId;

    #[test]
    fn listeners_receive_every_result() {
        let executor = TaskExecutor::start("test", 4, 2).unwrap();
        let total = Arc::new(AtomicUsize::new(0));
        for i in 1..=20 {
            let total = total.clone();
            executor
                .submit(move || i * 2, move |v| {
                    total.fetch_add(v, Ordering::SeqCst);
                })
                .unwrap();
        }
        executor.wait_for_finish().unwrap();
        assert_eq!(total.load(Ordering::SeqCst), 420);
        assert_eq!(executor.num_pending(), 0);
    }

    #[test]
    fn listeners_run_on_a_single_thread() {
        let executor = TaskExecutor::start("test", 3, 0).unwrap();
        let threads: Arc<Mutex<Vec<ThreadId>>> = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..12 {
            let threads = threads.clone();
            executor
                .submit(
                    || thread::sleep(Duration::from_millis(1)),
                    move |_| threads.lock().push(thread::current().id()),
                )
                .unwrap();
        }
        executor.wait_for_finish().unwrap();
        let threads = threads.lock();
        assert_eq!(threads.len(), 12);
        assert!(threads.iter().all(|id| *id == threads[0]));
    }

    #[test]
    fn panicking_task_is_reported_and_does_not_hang_waiters() {
        let executor = TaskExecutor::start("test", 2, 1).unwrap();
        executor
            .submit(|| -> usize { panic!("boom") }, |_| {})
            .unwrap();
        let result = executor.wait_for_finish();
        assert!(matches!(result, Err(ExecutorError::TaskPanicked(ref m)) if m == "boom"));
        executor.wait_for_finish().unwrap();
    }

    #[test]
    fn submit_after_stop_fails() {
        let mut executor = TaskExecutor::start("test", 1, 1).unwrap();
        executor.stop();
        assert!(!executor.is_running());
        assert_eq!(
            executor.submit(|| 1, |_| {}),
            Err(ExecutorError::Stopped("test"))
        );
    }

    #[test]
    fn stop_drains_already_queued_work() {
        let mut executor = TaskExecutor::start("test", 1, 8).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let count = count.clone();
            executor
                .submit(|| (), move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }
        executor.stop();
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }
}
