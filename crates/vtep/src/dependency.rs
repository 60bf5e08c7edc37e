use crate::registry::{DeviceInfo, RowClass};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Action = Box<dyn FnOnce(&DeviceInfo) + Send>;
type Task = Box<dyn FnOnce() + Send>;

/// `DependentJob` is a mutation held back until the rows it references are
/// present: config-side intent, oper-side confirmations, or both.
pub struct DependentJob {
    config_dependencies: Vec<(RowClass, String)>,
    oper_dependencies: Vec<(RowClass, String)>,
    action: Action,
}

impl DependentJob {
    pub fn new(action: impl FnOnce(&DeviceInfo) + Send + 'static) -> Self {
        DependentJob {
            config_dependencies: Vec::new(),
            oper_dependencies: Vec::new(),
            action: Box::new(action),
        }
    }

    pub fn waiting_on_config(mut self, class: RowClass, key: impl Into<String>) -> Self {
        self.config_dependencies.push((class, key.into()));
        self
    }

    pub fn waiting_on_oper(mut self, class: RowClass, key: impl Into<String>) -> Self {
        self.oper_dependencies.push((class, key.into()));
        self
    }

    pub(crate) fn config_dependencies(&self) -> &[(RowClass, String)] {
        &self.config_dependencies
    }

    pub(crate) fn oper_dependencies(&self) -> &[(RowClass, String)] {
        &self.oper_dependencies
    }

    fn run(self, registry: &DeviceInfo) {
        (self.action)(registry)
    }
}

/// `DependencyQueue` holds jobs whose references have not yet appeared, and
/// replays them when the registry's data-arrival hooks fire. One worker
/// task executes everything: replays and directly submitted dispatches
/// share its ordering.
pub struct DependencyQueue {
    config_waiting: Mutex<Vec<DependentJob>>,
    oper_waiting: Mutex<Vec<DependentJob>>,
    worker: Mutex<Option<mpsc::UnboundedSender<Task>>>,
}

impl DependencyQueue {
    pub(crate) fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                task();
            }
            tracing::debug!("dependency queue worker stopped");
        });
        DependencyQueue {
            config_waiting: Mutex::new(Vec::new()),
            oper_waiting: Mutex::new(Vec::new()),
            worker: Mutex::new(Some(tx)),
        }
    }

    /// Park a job until its dependencies settle. Jobs with config-side
    /// dependencies wait on config arrivals; the rest on oper arrivals.
    pub fn add_to_queue(&self, job: DependentJob) {
        if !job.config_dependencies.is_empty() {
            self.config_waiting.lock().unwrap().push(job);
        } else {
            self.oper_waiting.lock().unwrap().push(job);
        }
    }

    pub fn process_ready_jobs_from_config_queue(&self, registry: &Arc<DeviceInfo>) {
        self.process(&self.config_waiting, registry);
    }

    pub fn process_ready_jobs_from_op_queue(&self, registry: &Arc<DeviceInfo>) {
        self.process(&self.oper_waiting, registry);
    }

    fn process(&self, waiting: &Mutex<Vec<DependentJob>>, registry: &Arc<DeviceInfo>) {
        // Ready jobs leave the queue before they execute, so a job runs at
        // most once even under concurrent hook invocations.
        let ready: Vec<DependentJob> = {
            let mut waiting = waiting.lock().unwrap();
            let (ready, parked): (Vec<_>, Vec<_>) = waiting
                .drain(..)
                .partition(|job| registry.dependencies_met(job));
            *waiting = parked;
            ready
        };
        for job in ready {
            let registry = registry.clone();
            self.submit(move || job.run(&registry));
        }
    }

    /// Serialize a task onto the queue's worker. Ordinary transaction
    /// dispatches go through here so that they interleave with replays in
    /// a single order.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        let worker = self.worker.lock().unwrap();
        let sent = worker
            .as_ref()
            .map(|tx| tx.send(Box::new(task)).is_ok())
            .unwrap_or(false);
        if !sent {
            tracing::debug!("dependency queue is shut down; dropping task");
        }
    }

    /// Drop queued jobs without running them and stop the worker once its
    /// backlog drains. Idempotent.
    pub fn shutdown(&self) {
        self.config_waiting.lock().unwrap().clear();
        self.oper_waiting.lock().unwrap().clear();
        *self.worker.lock().unwrap() = None;
    }
}
