//! Fixed-size worker pool with a bounded task queue.
//!
//! `submit` enqueues a move-only callable, applying backpressure when the
//! queue is full. `startup` spawns the worker threads; `shutdown` signals
//! them and joins. Submission after shutdown is dropped (the core never
//! submits past shutdown).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

/// A unit of background work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Bounded multi-producer task queue shared between submitters and workers.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    tasks: Mutex<VecDeque<Task>>,
    capacity: usize,
    /// Signalled when a task becomes available or the pool shuts down.
    available: Condvar,
    /// Signalled when queue space frees up.
    space: Condvar,
    closed: AtomicBool,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl TaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                tasks: Mutex::new(VecDeque::new()),
                capacity: capacity.max(1),
                available: Condvar::new(),
                space: Condvar::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueue a task, blocking while the queue is at capacity. Returns
    /// `false` (dropping the task) once the queue is closed.
    pub fn push(&self, task: Task) -> bool {
        let mut tasks = self.inner.tasks.lock();
        while tasks.len() >= self.inner.capacity {
            if self.inner.closed.load(Ordering::Acquire) {
                return false;
            }
            self.inner.space.wait(&mut tasks);
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return false;
        }
        tasks.push_back(task);
        self.inner.available.notify_one();
        true
    }

    /// Dequeue the next task, parking until one arrives. Returns `None` once
    /// the queue is closed and drained.
    fn pop(&self) -> Option<Task> {
        let mut tasks = self.inner.tasks.lock();
        loop {
            if let Some(task) = tasks.pop_front() {
                self.inner.space.notify_one();
                return Some(task);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            self.inner.available.wait(&mut tasks);
        }
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let _guard = self.inner.tasks.lock();
        self.inner.available.notify_all();
        self.inner.space.notify_all();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.tasks.lock().is_empty()
    }
}

/// Fixed-size pool of worker threads looping on dequeue-and-run.
pub struct WorkerPool {
    name: String,
    num_workers: usize,
    queue: TaskQueue,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(name: impl Into<String>, num_workers: usize, queue: TaskQueue) -> Self {
        Self {
            name: name.into(),
            num_workers: num_workers.max(1),
            queue,
            workers: Vec::new(),
        }
    }

    /// Spawn the worker threads. Idempotent once started.
    pub fn startup(&mut self) {
        if !self.workers.is_empty() {
            return;
        }
        debug!(pool = %self.name, workers = self.num_workers, "worker pool starting");
        for ordinal in 0..self.num_workers {
            let queue = self.queue.clone();
            let thread_name = format!("{}-{ordinal}", self.name);
            let handle = thread::Builder::new()
                .name(thread_name)
                .spawn(move || {
                    while let Some(task) = queue.pop() {
                        task();
                    }
                })
                .expect("failed to spawn worker thread");
            self.workers.push(handle);
        }
    }

    /// Submit a task for execution. Returns `false` if the pool has shut
    /// down, in which case the task is dropped.
    pub fn submit(&self, task: Task) -> bool {
        self.queue.push(task)
    }

    /// Close the queue, drain remaining tasks, and join every worker.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.queue.close();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        debug!(pool = %self.name, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
