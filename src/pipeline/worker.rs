//! Dedicated worker context: one background thread with a serial task queue
//!
//! The worker owns a piece of state `S` for as long as it runs. Tasks get
//! `&mut S`, so whatever lives in `S` is only ever touched from this one
//! thread. Delayed tasks are timers on a current-thread tokio runtime that
//! push the task back into the queue when they fire, so execution stays
//! strictly serial.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::{debug, info, trace};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to build worker runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("worker is already running")]
    AlreadyRunning,

    #[error("worker cannot join itself")]
    JoinFromWorker,

    #[error("worker thread panicked")]
    Panicked,

    #[error("worker state was lost")]
    StateLost,
}

pub type Task<S> = Box<dyn FnOnce(&mut S, &WorkerHandle<S>) + Send>;

enum Message<S> {
    /// `epoch: None` tasks are never cancelled
    Run { epoch: Option<u64>, task: Task<S> },
    Delayed {
        delay: Duration,
        epoch: u64,
        task: Task<S>,
    },
    Quit,
}

/// Cloneable handle used to post work onto the worker.
pub struct WorkerHandle<S> {
    tx: flume::Sender<Message<S>>,
    epoch: Arc<AtomicU64>,
    thread: Arc<OnceCell<ThreadId>>,
    /// Epoch of the cancellable task this handle was lent to. Work it posts
    /// is cancelled together with it.
    task_epoch: Option<u64>,
}

impl<S> Clone for WorkerHandle<S> {
    /// Clones are detached from the running task.
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            epoch: self.epoch.clone(),
            thread: self.thread.clone(),
            task_epoch: None,
        }
    }
}

impl<S: 'static> WorkerHandle<S> {
    /// Run `task` as soon as the queue reaches it.
    ///
    /// Returns `false` when the worker has already stopped.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S, &WorkerHandle<S>) + Send + 'static,
    {
        self.send(Message::Run {
            epoch: None,
            task: Box::new(task),
        })
    }

    /// Like [`post`](Self::post), but dropped by [`remove_pending`](Self::remove_pending).
    pub fn post_cancellable<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S, &WorkerHandle<S>) + Send + 'static,
    {
        self.send(Message::Run {
            epoch: Some(self.posting_epoch()),
            task: Box::new(task),
        })
    }

    /// Run `task` after `delay`. Cancellable.
    ///
    /// Posted from inside a cancellable task, it belongs to that task's epoch,
    /// so a self-reposting chain stops even if it was cancelled mid-run.
    pub fn post_delayed<F>(&self, delay: Duration, task: F) -> bool
    where
        F: FnOnce(&mut S, &WorkerHandle<S>) + Send + 'static,
    {
        self.send(Message::Delayed {
            delay,
            epoch: self.posting_epoch(),
            task: Box::new(task),
        })
    }

    /// Drop every cancellable and delayed task posted so far.
    pub fn remove_pending(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        trace!("Cancelled pending worker tasks (epoch {})", epoch);
    }

    pub fn is_worker_thread(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn posting_epoch(&self) -> u64 {
        self.task_epoch.unwrap_or_else(|| self.current_epoch())
    }

    fn send(&self, message: Message<S>) -> bool {
        self.tx.send(message).is_ok()
    }

    fn run(&self, epoch: Option<u64>, task: Task<S>, state: &mut S) {
        match epoch {
            Some(epoch) if epoch != self.current_epoch() => trace!("Skipping cancelled task"),
            Some(epoch) => {
                let scoped = WorkerHandle {
                    task_epoch: Some(epoch),
                    ..self.clone()
                };
                task(state, &scoped)
            }
            None => task(state, self),
        }
    }
}

/// A running worker thread that owns `S`.
pub struct Worker<S> {
    handle: WorkerHandle<S>,
    thread: Option<JoinHandle<Option<S>>>,
    name: String,
}

impl<S: Send + 'static> Worker<S> {
    /// Start the worker thread.
    ///
    /// On failure the state is handed back when it can be recovered.
    pub fn spawn(name: impl Into<String>, state: S) -> Result<Self, (WorkerError, Option<S>)> {
        let name = name.into();

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => return Err((WorkerError::Runtime(e), Some(state))),
        };

        let (tx, rx) = flume::unbounded();
        let handle = WorkerHandle {
            tx,
            epoch: Arc::new(AtomicU64::new(0)),
            thread: Arc::new(OnceCell::new()),
            task_epoch: None,
        };

        // State travels through a one-slot channel so a failed spawn can
        // still take it back out.
        let (state_tx, state_rx) = flume::bounded(1);
        let unclaimed = state_rx.clone();
        let _ = state_tx.send(state);

        let loop_handle = handle.clone();
        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            let mut state = state_rx.recv().ok()?;
            run_loop(runtime, rx, &loop_handle, &mut state);
            Some(state)
        });

        match spawned {
            Ok(thread) => {
                let _ = handle.thread.set(thread.thread().id());
                info!("Worker {} started", name);
                Ok(Self {
                    handle,
                    thread: Some(thread),
                    name,
                })
            }
            Err(e) => Err((WorkerError::Spawn(e), unclaimed.try_recv().ok())),
        }
    }

    pub fn handle(&self) -> &WorkerHandle<S> {
        &self.handle
    }

    /// Stop after the tasks already queued. Timers that have not fired yet
    /// are dropped.
    pub fn quit_safely(&self) {
        let _ = self.handle.tx.send(Message::Quit);
    }

    /// Quit safely and wait for the thread, getting the state back.
    pub fn join(mut self) -> Result<S, WorkerError> {
        self.quit_safely();
        if self.handle.is_worker_thread() {
            return Err(WorkerError::JoinFromWorker);
        }

        let Some(thread) = self.thread.take() else {
            return Err(WorkerError::StateLost);
        };
        match thread.join() {
            Ok(Some(state)) => {
                info!("Worker {} stopped", self.name);
                Ok(state)
            }
            Ok(None) => Err(WorkerError::StateLost),
            Err(_) => Err(WorkerError::Panicked),
        }
    }
}

impl<S> Drop for Worker<S> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            // Detach, but let the thread finish
            let _ = self.handle.tx.send(Message::Quit);
        }
    }
}

fn run_loop<S: 'static>(
    runtime: Runtime,
    rx: flume::Receiver<Message<S>>,
    handle: &WorkerHandle<S>,
    state: &mut S,
) {
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async {
        while let Ok(message) = rx.recv_async().await {
            match message {
                Message::Run { epoch, task } => handle.run(epoch, task, state),
                Message::Delayed { delay, epoch, task } => {
                    let tx = handle.tx.clone();
                    tokio::task::spawn_local(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Message::Run {
                            epoch: Some(epoch),
                            task,
                        });
                    });
                }
                Message::Quit => break,
            }
        }
    });

    let mut drained = 0usize;
    for message in rx.drain() {
        if let Message::Run { epoch, task } = message {
            handle.run(epoch, task, state);
            drained += 1;
        }
    }
    debug!("Worker drained {} queued tasks", drained);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn wait_for(rx: &flume::Receiver<()>) {
        rx.recv_timeout(Duration::from_secs(2))
            .expect("worker did not respond");
    }

    #[test]
    fn tasks_run_in_order_on_the_worker_thread() {
        let worker = Worker::spawn("test-worker", Vec::<u32>::new()).unwrap();
        let handle = worker.handle().clone();
        assert!(!handle.is_worker_thread());

        for i in 0..5 {
            handle.post(move |log: &mut Vec<u32>, w| {
                assert!(w.is_worker_thread());
                assert_eq!(thread::current().name(), Some("test-worker"));
                log.push(i);
            });
        }

        let log = worker.join().unwrap();
        assert_eq!(log, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn delayed_task_waits() {
        let worker = Worker::spawn("delay", ()).unwrap();
        let (done_tx, done_rx) = flume::bounded(1);
        let start = Instant::now();
        worker
            .handle()
            .post_delayed(Duration::from_millis(50), move |_, _| {
                let _ = done_tx.send(());
            });

        wait_for(&done_rx);
        assert!(start.elapsed() >= Duration::from_millis(50));
        worker.join().unwrap();
    }

    #[test]
    fn remove_pending_cancels_only_cancellable_work() {
        let worker = Worker::spawn("cancel", Vec::<&'static str>::new()).unwrap();
        let handle = worker.handle().clone();

        handle.post_delayed(Duration::from_millis(30), |log: &mut Vec<_>, _| {
            log.push("delayed")
        });
        handle.post(|_, w| {
            // Queued behind this task, then cancelled before it runs
            w.post_cancellable(|log: &mut Vec<_>, _| log.push("cancellable"));
            w.remove_pending();
        });
        handle.post(|log: &mut Vec<_>, _| log.push("plain"));

        thread::sleep(Duration::from_millis(80));
        let log = worker.join().unwrap();
        assert_eq!(log, vec!["plain"]);
    }

    #[test]
    fn self_reposting_task_stops_when_cancelled() {
        fn tick(count: &mut u32, w: &WorkerHandle<u32>) {
            *count += 1;
            w.post_delayed(Duration::from_millis(5), tick);
        }

        let worker = Worker::spawn("repost", 0u32).unwrap();
        worker.handle().post_cancellable(tick);
        thread::sleep(Duration::from_millis(60));
        worker.handle().post(|_, w| w.remove_pending());
        thread::sleep(Duration::from_millis(20));

        let (tx, rx) = flume::bounded(1);
        worker.handle().post(move |count, _| {
            let _ = tx.send(*count);
        });
        let seen = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        thread::sleep(Duration::from_millis(30));

        let count = worker.join().unwrap();
        assert!(seen > 1);
        assert_eq!(count, seen);
    }

    #[test]
    fn repost_from_a_task_cancelled_mid_run_is_dropped() {
        fn tick(count: &mut u32, w: &WorkerHandle<u32>) {
            *count += 1;
            if *count == 1 {
                // Cancelled from outside while this tick is still running
                thread::sleep(Duration::from_millis(40));
            }
            w.post_delayed(Duration::from_millis(5), tick);
        }

        let worker = Worker::spawn("mid-run", 0u32).unwrap();
        let handle = worker.handle().clone();
        handle.post_cancellable(tick);
        thread::sleep(Duration::from_millis(10));
        handle.remove_pending();
        thread::sleep(Duration::from_millis(80));

        assert_eq!(worker.join().unwrap(), 1);
    }

    #[test]
    fn quit_drains_queued_tasks() {
        let worker = Worker::spawn("drain", 0u32).unwrap();
        let handle = worker.handle().clone();
        let (gate_tx, gate_rx) = flume::bounded::<()>(1);

        handle.post(move |_, _| {
            let _ = gate_rx.recv_timeout(Duration::from_secs(2));
        });
        for _ in 0..10 {
            handle.post(|count: &mut u32, _| *count += 1);
        }
        worker.quit_safely();
        for _ in 0..10 {
            // Behind the quit marker but already queued when the loop exits
            handle.post(|count: &mut u32, _| *count += 1);
        }
        gate_tx.send(()).unwrap();

        assert_eq!(worker.join().unwrap(), 20);
        assert!(!handle.post(|_, _| {}));
    }

    #[test]
    fn delayed_work_is_dropped_on_quit() {
        let worker = Worker::spawn("quit", 0u32).unwrap();
        worker
            .handle()
            .post_delayed(Duration::from_millis(200), |count: &mut u32, _| *count += 1);
        assert_eq!(worker.join().unwrap(), 0);
    }

    #[test]
    fn join_from_worker_is_refused() {
        let worker = Worker::spawn("self-join", ()).unwrap();
        let handle = worker.handle().clone();
        let (tx, rx) = flume::bounded(1);
        let slot = Arc::new(std::sync::Mutex::new(Some(worker)));
        let inner = slot.clone();

        handle.post(move |_, _| {
            let worker = inner.lock().unwrap().take().unwrap();
            let _ = tx.send(matches!(worker.join(), Err(WorkerError::JoinFromWorker)));
        });

        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
    }
}
