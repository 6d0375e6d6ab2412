//! Blocking task worker
//!
//! A [`TaskWorker`] owns one named OS thread and a bounded queue of tasks.
//! The daemon uses workers for everything that must not block the async
//! control loop: polling the USB bus and waiting on installer processes.
//!
//! Workers run in one of two modes:
//! - reactive: the thread blocks on the queue and runs tasks as they arrive
//! - interval: the thread wakes on a fixed period and runs a tick closure
//!
//! Shutdown is cooperative. [`TaskWorker::stop`] marks the worker as
//! shutting down, wakes the thread, and waits a bounded time for it to
//! finish. A task that is already running can observe the shutdown through
//! [`WorkerContext::is_stopping`]; tasks still sitting in the queue are
//! abandoned.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Poll step while waiting for a freshly spawned thread to come up.
const PING_POLL: Duration = Duration::from_millis(5);

/// Poll step while waiting for a stopping thread to exit.
const STOP_POLL: Duration = Duration::from_millis(10);

/// Errors returned by worker operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker {0} queue is full")]
    QueueFull(String),

    #[error("worker {0} is not running")]
    NotRunning(String),

    #[error("operation invoked from the worker's own thread")]
    SelfCall,

    #[error("worker {0} runs on an interval and does not accept tasks")]
    ModeMismatch(String),

    #[error("worker {0} thread failed to start")]
    Faulted(String),
}

/// Lifecycle state of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not running: either not started yet or already exited.
    Down = 0,
    /// Blocked waiting for work.
    Waiting = 1,
    /// Executing a task or an interval tick.
    Busy = 2,
    /// Stop requested, thread has not exited yet.
    ShuttingDown = 3,
    /// The thread could not be spawned. Permanent.
    Faulted = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Down,
            1 => WorkerState::Waiting,
            2 => WorkerState::Busy,
            3 => WorkerState::ShuttingDown,
            _ => WorkerState::Faulted,
        }
    }
}

/// Progress of one queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued = 0,
    Running = 1,
    Done = 2,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Queued,
            1 => TaskState::Running,
            _ => TaskState::Done,
        }
    }
}

/// Handle to observe a queued task.
#[derive(Debug, Clone)]
pub struct TaskTicket {
    state: Arc<AtomicU8>,
}

impl TaskTicket {
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_done(&self) -> bool {
        self.state() == TaskState::Done
    }
}

/// A unit of work executed on the worker thread.
///
/// Implemented for any `FnMut(&WorkerContext) + Send` closure.
pub trait Task: Send {
    fn run(&mut self, ctx: &WorkerContext);
}

impl<F> Task for F
where
    F: FnMut(&WorkerContext) + Send,
{
    fn run(&mut self, ctx: &WorkerContext) {
        self(ctx)
    }
}

#[derive(Debug)]
struct WorkerShared {
    state: AtomicU8,
    thread_id: OnceLock<ThreadId>,
    name: String,
}

impl WorkerShared {
    fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Handed to tasks and ticks while they run on the worker thread.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    shared: Arc<WorkerShared>,
}

impl WorkerContext {
    /// True once a stop was requested. Long-running tasks should poll this
    /// and bail out promptly.
    pub fn is_stopping(&self) -> bool {
        self.shared.get() == WorkerState::ShuttingDown
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

/// Tuning knobs for a worker.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Thread name, also used in errors and logs.
    pub name: String,
    /// Queue capacity for reactive workers.
    pub queue_capacity: usize,
    /// How long a liveness check waits for the thread to come up.
    pub idle_cycle: Duration,
    /// How long [`TaskWorker::stop`] waits for the thread to exit.
    pub stop_timeout: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            queue_capacity: 16,
            idle_cycle: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerOptions {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Reactive,
    Interval(Duration),
}

type TickFn = Box<dyn FnMut(&WorkerContext) + Send>;

struct QueuedTask {
    task: Box<dyn Task>,
    state: Arc<AtomicU8>,
}

/// A named OS thread with a bounded task queue.
///
/// Dropping a worker signals shutdown and detaches the thread; call
/// [`TaskWorker::stop`] for a bounded, observable shutdown.
#[derive(Debug)]
pub struct TaskWorker {
    tx: Option<Sender<QueuedTask>>,
    shared: Arc<WorkerShared>,
    handle: Option<thread::JoinHandle<()>>,
    opts: WorkerOptions,
    interval: bool,
}

impl TaskWorker {
    /// Spawn a reactive worker that executes pushed tasks.
    pub fn reactive(opts: WorkerOptions) -> Self {
        Self::spawn(opts, Mode::Reactive, None)
    }

    /// Spawn an interval worker that runs `tick` every `period`.
    ///
    /// Interval workers do not accept pushed tasks.
    pub fn interval(
        opts: WorkerOptions,
        period: Duration,
        tick: impl FnMut(&WorkerContext) + Send + 'static,
    ) -> Self {
        Self::spawn(opts, Mode::Interval(period), Some(Box::new(tick)))
    }

    fn spawn(opts: WorkerOptions, mode: Mode, tick: Option<TickFn>) -> Self {
        let (tx, rx) = bounded(opts.queue_capacity);
        let shared = Arc::new(WorkerShared {
            state: AtomicU8::new(WorkerState::Down as u8),
            thread_id: OnceLock::new(),
            name: opts.name.clone(),
        });

        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(opts.name.clone())
            .spawn(move || worker_loop(rx, thread_shared, mode, tick));

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("failed to spawn worker thread {}: {}", opts.name, e);
                shared.set(WorkerState::Faulted);
                None
            }
        };

        Self {
            tx: Some(tx),
            shared,
            handle,
            interval: matches!(mode, Mode::Interval(_)),
            opts,
        }
    }

    /// Queue a task for execution.
    ///
    /// Fails fast when called from the worker's own thread, when the queue
    /// is full, or when the worker is not (or no longer) running. A worker
    /// that was just spawned is given up to two idle cycles to come up.
    pub fn push(&self, task: impl Task + 'static) -> Result<TaskTicket, WorkerError> {
        if self.interval {
            return Err(WorkerError::ModeMismatch(self.opts.name.clone()));
        }
        if self.on_own_thread() {
            return Err(WorkerError::SelfCall);
        }
        match self.await_up() {
            WorkerState::Waiting | WorkerState::Busy => {}
            WorkerState::Faulted => return Err(WorkerError::Faulted(self.opts.name.clone())),
            WorkerState::Down | WorkerState::ShuttingDown => {
                return Err(WorkerError::NotRunning(self.opts.name.clone()));
            }
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| WorkerError::NotRunning(self.opts.name.clone()))?;

        let state = Arc::new(AtomicU8::new(TaskState::Queued as u8));
        let queued = QueuedTask {
            task: Box::new(task),
            state: state.clone(),
        };
        match tx.try_send(queued) {
            Ok(()) => Ok(TaskTicket { state }),
            Err(TrySendError::Full(_)) => Err(WorkerError::QueueFull(self.opts.name.clone())),
            Err(TrySendError::Disconnected(_)) => {
                Err(WorkerError::NotRunning(self.opts.name.clone()))
            }
        }
    }

    /// Check that the worker thread is alive, waiting up to two idle cycles
    /// for one that is still starting.
    pub fn ping(&self) -> bool {
        if self.on_own_thread() {
            return true;
        }
        matches!(self.await_up(), WorkerState::Waiting | WorkerState::Busy)
    }

    /// Request shutdown and wait up to `stop_timeout` for the thread to
    /// exit. Returns whether it did.
    ///
    /// Queued tasks are abandoned; the running task keeps the thread alive
    /// until it returns or observes [`WorkerContext::is_stopping`].
    pub fn stop(&mut self) -> bool {
        if self.on_own_thread() {
            error!("worker {} cannot stop itself", self.opts.name);
            return false;
        }

        match self.shared.get() {
            WorkerState::Down | WorkerState::Faulted => {
                self.tx = None;
                self.join_exited();
                return true;
            }
            _ => {}
        }

        debug!("stopping worker {}", self.opts.name);
        self.shared.set(WorkerState::ShuttingDown);
        // Dropping the sender wakes a blocked recv.
        self.tx = None;

        let deadline = Instant::now() + self.opts.stop_timeout;
        loop {
            if self.shared.get() == WorkerState::Down {
                self.join_exited();
                return true;
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(STOP_POLL);
        }

        warn!(
            "worker {} did not stop within {:?}",
            self.opts.name, self.opts.stop_timeout
        );
        false
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.shared.get()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), WorkerState::Waiting | WorkerState::Busy)
    }

    pub fn name(&self) -> &str {
        &self.opts.name
    }

    fn on_own_thread(&self) -> bool {
        self.shared.thread_id.get().copied() == Some(thread::current().id())
    }

    /// Wait up to two idle cycles for a starting thread, then report its
    /// state.
    fn await_up(&self) -> WorkerState {
        let deadline = Instant::now() + self.opts.idle_cycle * 2;
        loop {
            let state = self.shared.get();
            if state != WorkerState::Down || self.handle.is_none() {
                return state;
            }
            if Instant::now() >= deadline {
                return state;
            }
            thread::sleep(PING_POLL);
        }
    }

    fn join_exited(&mut self) {
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.join()
        {
            error!("worker {} thread panicked: {:?}", self.opts.name, e);
        }
    }
}

impl Drop for TaskWorker {
    fn drop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        // Signal and detach; stop() is the graceful path.
        self.shared.set(WorkerState::ShuttingDown);
        self.tx = None;
        self.handle.take();
    }
}

fn worker_loop(
    rx: Receiver<QueuedTask>,
    shared: Arc<WorkerShared>,
    mode: Mode,
    mut tick: Option<TickFn>,
) {
    let _ = shared.thread_id.set(thread::current().id());
    shared.set(WorkerState::Waiting);
    debug!("worker {} started", shared.name);

    let ctx = WorkerContext {
        shared: shared.clone(),
    };

    loop {
        let received = match mode {
            Mode::Reactive => match rx.recv() {
                Ok(task) => Some(task),
                Err(_) => break,
            },
            Mode::Interval(period) => match rx.recv_timeout(period) {
                Ok(task) => Some(task),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
        };

        // A disconnected queue still yields tasks that were already queued;
        // on shutdown those are abandoned, not run.
        if shared.get() == WorkerState::ShuttingDown {
            if received.is_some() {
                debug!("worker {} abandoning queued task on shutdown", shared.name);
            }
            break;
        }

        shared.set(WorkerState::Busy);
        match received {
            Some(mut queued) => {
                queued.state.store(TaskState::Running as u8, Ordering::SeqCst);
                queued.task.run(&ctx);
                queued.state.store(TaskState::Done as u8, Ordering::SeqCst);
            }
            None => {
                if let Some(tick) = tick.as_mut() {
                    tick(&ctx);
                }
            }
        }

        if shared.get() == WorkerState::ShuttingDown {
            break;
        }
        shared.set(WorkerState::Waiting);
    }

    shared.set(WorkerState::Down);
    debug!("worker {} stopped", shared.name);
}
