//! Concurrent task executor
//!
//! Runs external commands (compiler, linker, hooks) on a fixed pool of tokio
//! workers while respecting dependencies between tasks.
//!
//! Submissions go through a bounded queue, so a producer that outpaces the
//! pool waits instead of growing memory. A dispatcher admits each submission:
//! a task whose dependencies have all completed goes straight to the ready
//! queue, anything else is parked with a countdown of its missing
//! dependencies and released when the last one succeeds. A failed dependency
//! fails its dependents without running them. Workers never wait on other
//! tasks.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::defaults;
use crate::error::{ExecutorError, TaskError};

/// One external command to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Stable identifier, unique per executor
    pub id: String,
    /// Program to run
    pub command: String,
    /// Program arguments
    pub args: Vec<String>,
    /// Working directory (inherited when unset)
    pub working_dir: Option<PathBuf>,
    /// Environment overrides on top of the process environment
    pub env: BTreeMap<String, String>,
    /// Ids of tasks that must succeed before this one runs
    pub dependencies: Vec<String>,
}

impl Task {
    /// Create a task with no arguments or dependencies
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Set the arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add environment overrides
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Add a dependency on another task
    #[must_use]
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Command line for log messages
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured outcome of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    /// Task id
    pub id: String,
    /// `Ok` when the command ran and exited successfully
    pub outcome: Result<(), TaskError>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// When the command started (unset if it never ran)
    pub started_at: Option<Instant>,
    /// When the command finished (unset if it never ran)
    pub ended_at: Option<Instant>,
}

impl TaskResult {
    fn failed(id: impl Into<String>, error: TaskError) -> Self {
        Self {
            id: id.into(),
            outcome: Err(error),
            stdout: String::new(),
            stderr: String::new(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Whether the task succeeded
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Wall time spent running the command
    pub fn duration(&self) -> Duration {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }
}

/// One-shot completion signal. Consumed when fired, so a task can only be
/// signalled once.
#[derive(Debug)]
struct Completion(oneshot::Sender<TaskResult>);

impl Completion {
    fn signal(self, result: TaskResult) {
        // The submitter may have dropped its handle
        let _ = self.0.send(result);
    }
}

/// Handle to a submitted task
#[derive(Debug)]
pub struct TaskHandle {
    id: String,
    receiver: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    /// Id of the task
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the task to finish
    pub async fn wait(self) -> TaskResult {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => TaskResult::failed(self.id, TaskError::Abandoned),
        }
    }
}

/// Executor configuration
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Capacity of the submission queue
    pub queue_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            queue_capacity: defaults::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ExecutorConfig {
    /// Configuration with a specific worker count
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            ..Self::default()
        }
    }
}

/// Snapshot of executor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    /// Tasks that finished successfully
    pub completed: usize,
    /// Tasks that failed, were cancelled, or never ran
    pub failed: usize,
    /// Highest number of commands running at the same time
    pub peak_concurrency: usize,
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicUsize,
    failed: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            peak_concurrency: self.peak.load(Ordering::SeqCst),
        }
    }
}

/// A submitted task together with its completion signal
#[derive(Debug)]
struct Job {
    task: Task,
    completion: Completion,
}

#[derive(Debug)]
struct Parked {
    job: Job,
    remaining: usize,
}

/// Scheduler state shared between the dispatcher and the workers
#[derive(Debug)]
struct Scheduler {
    submitted: HashSet<String>,
    completed: HashSet<String>,
    failed: HashSet<String>,
    parked: HashMap<String, Parked>,
    /// dependency id -> ids of parked tasks waiting on it
    waiters: HashMap<String, Vec<String>>,
    /// Jobs sent to the ready queue and not yet finished
    in_flight: usize,
    submissions_closed: bool,
    ready_tx: Option<mpsc::UnboundedSender<Job>>,
    results_tx: Option<mpsc::UnboundedSender<TaskResult>>,
}

impl Scheduler {
    fn admit(&mut self, job: Job, counters: &Counters) {
        let id = job.task.id.clone();

        if let Some(dep) = job.task.dependencies.iter().find(|d| self.failed.contains(*d)) {
            let error = TaskError::DependencyFailed {
                dependency: dep.clone(),
            };
            self.settle(job.completion, TaskResult::failed(id, error), counters);
            return;
        }

        let missing: HashSet<&String> = job
            .task
            .dependencies
            .iter()
            .filter(|d| !self.completed.contains(*d))
            .collect();

        if missing.is_empty() {
            self.make_ready(job);
            return;
        }

        tracing::debug!("Parking task {id} on {} dependencies", missing.len());
        for dep in &missing {
            self.waiters
                .entry((*dep).clone())
                .or_default()
                .push(id.clone());
        }
        let remaining = missing.len();
        self.parked.insert(id, Parked { job, remaining });
    }

    fn make_ready(&mut self, job: Job) {
        match &self.ready_tx {
            Some(tx) => {
                self.in_flight += 1;
                if let Err(mpsc::error::SendError(job)) = tx.send(job) {
                    self.in_flight -= 1;
                    tracing::warn!("Ready queue closed, dropping task {}", job.task.id);
                }
            }
            None => tracing::warn!("Ready queue closed, dropping task {}", job.task.id),
        }
    }

    /// Record a finished task, release or fail its dependents, publish the
    /// result and fire the completion signal.
    fn settle(&mut self, completion: Completion, result: TaskResult, counters: &Counters) {
        let mut queue = VecDeque::from([(completion, result)]);

        while let Some((completion, result)) = queue.pop_front() {
            let id = result.id.clone();
            let waiting = self.waiters.remove(&id).unwrap_or_default();

            match &result.outcome {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                    self.completed.insert(id.clone());
                    for waiter in waiting {
                        let Some(parked) = self.parked.get_mut(&waiter) else {
                            continue;
                        };
                        parked.remaining -= 1;
                        if parked.remaining == 0 {
                            if let Some(parked) = self.parked.remove(&waiter) {
                                self.make_ready(parked.job);
                            }
                        }
                    }
                }
                Err(error) => {
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                    self.failed.insert(id.clone());
                    for waiter in waiting {
                        let Some(parked) = self.parked.remove(&waiter) else {
                            continue;
                        };
                        let cascaded = match error {
                            TaskError::Cancelled => TaskError::Cancelled,
                            _ => TaskError::DependencyFailed {
                                dependency: id.clone(),
                            },
                        };
                        queue.push_back((
                            parked.job.completion,
                            TaskResult::failed(waiter, cascaded),
                        ));
                    }
                }
            }

            if let Some(tx) = &self.results_tx {
                let _ = tx.send(result.clone());
            }
            completion.signal(result);
        }
    }

    /// Once nothing can make progress, fail parked tasks and close the
    /// queues so workers and the results stream end.
    fn close_if_idle(&mut self, counters: &Counters) {
        if !self.submissions_closed || self.in_flight > 0 || self.ready_tx.is_none() {
            return;
        }

        let stranded: Vec<String> = self.parked.keys().cloned().collect();
        for id in stranded {
            let Some(parked) = self.parked.remove(&id) else {
                continue;
            };
            let mut missing: Vec<String> = parked
                .job
                .task
                .dependencies
                .iter()
                .filter(|d| !self.completed.contains(*d))
                .cloned()
                .collect();
            missing.sort();
            missing.dedup();
            tracing::warn!("Task {id} never became ready, missing {}", missing.join(", "));
            self.settle(
                parked.job.completion,
                TaskResult::failed(id, TaskError::UnresolvedDependencies { missing }),
                counters,
            );
        }

        self.close();
    }

    fn cancel_parked(&mut self, counters: &Counters) {
        let ids: Vec<String> = self.parked.keys().cloned().collect();
        for id in ids {
            if let Some(parked) = self.parked.remove(&id) {
                self.settle(
                    parked.job.completion,
                    TaskResult::failed(id, TaskError::Cancelled),
                    counters,
                );
            }
        }
    }

    fn close(&mut self) {
        self.ready_tx = None;
        self.results_tx = None;
    }
}

#[derive(Debug)]
struct Shared {
    scheduler: Mutex<Scheduler>,
    counters: Counters,
}

impl Shared {
    fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, job: Job, result: TaskResult) {
        let mut scheduler = self.scheduler();
        scheduler.in_flight = scheduler.in_flight.saturating_sub(1);
        scheduler.settle(job.completion, result, &self.counters);
        scheduler.close_if_idle(&self.counters);
    }
}

/// Worker pool running tasks in dependency order
#[derive(Debug)]
pub struct Executor {
    config: ExecutorConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    submit_tx: Option<mpsc::Sender<Job>>,
    ready_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
    results_rx: mpsc::UnboundedReceiver<TaskResult>,
    pending_start: Option<(mpsc::Sender<Job>, mpsc::Receiver<Job>)>,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    shut_down: bool,
}

impl Executor {
    /// Create an executor. Nothing runs until [`Executor::start`].
    pub fn new(config: ExecutorConfig) -> Self {
        let config = ExecutorConfig {
            workers: config.workers.max(1),
            queue_capacity: config.queue_capacity.max(1),
        };
        let (submit_tx, submit_rx) = mpsc::channel(config.queue_capacity);
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        let scheduler = Scheduler {
            submitted: HashSet::new(),
            completed: HashSet::new(),
            failed: HashSet::new(),
            parked: HashMap::new(),
            waiters: HashMap::new(),
            in_flight: 0,
            submissions_closed: false,
            ready_tx: Some(ready_tx),
            results_tx: Some(results_tx),
        };

        Self {
            config,
            shared: Arc::new(Shared {
                scheduler: Mutex::new(scheduler),
                counters: Counters::default(),
            }),
            cancel: CancellationToken::new(),
            submit_tx: None,
            ready_rx: Arc::new(tokio::sync::Mutex::new(ready_rx)),
            results_rx,
            pending_start: Some((submit_tx, submit_rx)),
            dispatcher: None,
            workers: Vec::new(),
            shut_down: false,
        }
    }

    /// Number of workers
    pub fn workers(&self) -> usize {
        self.config.workers
    }

    /// Spawn the dispatcher and the worker pool. Must be called from within a
    /// tokio runtime; calling it twice has no effect.
    pub fn start(&mut self) {
        let Some((submit_tx, submit_rx)) = self.pending_start.take() else {
            return;
        };

        tracing::debug!("Starting executor with {} workers", self.config.workers);
        self.submit_tx = Some(submit_tx);
        self.dispatcher = Some(tokio::spawn(dispatch(
            submit_rx,
            Arc::clone(&self.shared),
            self.cancel.clone(),
        )));
        self.workers = (0..self.config.workers)
            .map(|index| {
                tokio::spawn(work(
                    index,
                    Arc::clone(&self.ready_rx),
                    Arc::clone(&self.shared),
                    self.cancel.clone(),
                ))
            })
            .collect();
    }

    /// Submit a task. Waits while the submission queue is full.
    pub async fn submit(&self, task: Task) -> Result<TaskHandle, ExecutorError> {
        if self.shut_down {
            return Err(ExecutorError::ShutDown);
        }
        let tx = self.submit_tx.as_ref().ok_or(ExecutorError::NotStarted)?;

        if !self.shared.scheduler().submitted.insert(task.id.clone()) {
            return Err(ExecutorError::DuplicateTask { id: task.id });
        }

        let (sender, receiver) = oneshot::channel();
        let id = task.id.clone();
        tx.send(Job {
            task,
            completion: Completion(sender),
        })
        .await
        .map_err(|_| ExecutorError::ShutDown)?;

        Ok(TaskHandle { id, receiver })
    }

    /// Wait for a single task
    pub async fn wait_for_task(&self, handle: TaskHandle) -> TaskResult {
        handle.wait().await
    }

    /// Stop accepting submissions and let everything already submitted
    /// finish. Tasks waiting on dependencies that were never submitted fail
    /// with [`TaskError::UnresolvedDependencies`].
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.submit_tx = None;

        if self.pending_start.take().is_some() {
            // Never started: nothing was accepted
            self.shared.scheduler().close();
            return;
        }

        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(e) = dispatcher.await {
                tracing::warn!("Dispatcher ended abnormally: {e}");
            }
        }
        self.join_workers().await;
    }

    /// Cancel everything. Running commands are killed and every task that has
    /// not finished completes with [`TaskError::Cancelled`].
    pub async fn shutdown_now(&mut self) {
        self.cancel.cancel();
        self.shutdown().await;

        // Jobs still queued for workers that already left
        let mut ready = self.ready_rx.lock().await;
        ready.close();
        while let Ok(job) = ready.try_recv() {
            let id = job.task.id.clone();
            self.shared
                .finish(job, TaskResult::failed(id, TaskError::Cancelled));
        }
        drop(ready);

        let mut scheduler = self.shared.scheduler();
        scheduler.cancel_parked(&self.shared.counters);
        scheduler.close();
    }

    /// Close submissions, wait for the pool to drain, and return every result
    /// in completion order.
    pub async fn wait_for_all(&mut self) -> Vec<TaskResult> {
        self.shutdown().await;

        let mut results = Vec::new();
        while let Some(result) = self.results_rx.recv().await {
            results.push(result);
        }
        results
    }

    /// Current counters
    pub fn stats(&self) -> ExecutorStats {
        self.shared.counters.snapshot()
    }

    async fn join_workers(&mut self) {
        for result in futures::future::join_all(self.workers.drain(..)).await {
            if let Err(e) = result {
                tracing::warn!("Worker ended abnormally: {e}");
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn dispatch(mut submit_rx: mpsc::Receiver<Job>, shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            job = submit_rx.recv() => job,
        };
        let Some(job) = next else { break };
        shared.scheduler().admit(job, &shared.counters);
    }

    // After cancellation, anything still queued is cancelled unseen
    submit_rx.close();
    while let Ok(job) = submit_rx.try_recv() {
        let id = job.task.id.clone();
        shared
            .scheduler()
            .settle(job.completion, TaskResult::failed(id, TaskError::Cancelled), &shared.counters);
    }

    let mut scheduler = shared.scheduler();
    scheduler.submissions_closed = true;
    scheduler.close_if_idle(&shared.counters);
}

async fn work(
    index: usize,
    ready_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        let next = {
            let mut ready = ready_rx.lock().await;
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                job = ready.recv() => job,
            }
        };
        let Some(job) = next else { break };

        tracing::debug!("Worker {index} running {}", job.task.id);
        let result = run(&job.task, &shared.counters, &cancel).await;
        shared.finish(job, result);
    }
    tracing::trace!("Worker {index} exiting");
}

async fn run(task: &Task, counters: &Counters, cancel: &CancellationToken) -> TaskResult {
    let mut command = tokio::process::Command::new(&task.command);
    command
        .args(&task.args)
        .envs(&task.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &task.working_dir {
        command.current_dir(dir);
    }

    let running = counters.running.fetch_add(1, Ordering::SeqCst) + 1;
    counters.peak.fetch_max(running, Ordering::SeqCst);
    let started_at = Instant::now();

    let output = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        output = command.output() => Some(output),
    };

    counters.running.fetch_sub(1, Ordering::SeqCst);
    let ended_at = Instant::now();

    let mut result = TaskResult {
        id: task.id.clone(),
        outcome: Ok(()),
        stdout: String::new(),
        stderr: String::new(),
        started_at: Some(started_at),
        ended_at: Some(ended_at),
    };

    match output {
        None => result.outcome = Err(TaskError::Cancelled),
        Some(Err(e)) => {
            result.outcome = Err(TaskError::Spawn {
                command: task.command.clone(),
                error: e.to_string(),
            });
        }
        Some(Ok(output)) => {
            result.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            result.stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if !output.status.success() {
                result.outcome = Err(TaskError::ExitStatus {
                    status: output.status.to_string(),
                    stderr: result.stderr.trim().to_string(),
                });
            }
        }
    }

    result
}
