//! In-memory collaborators for unit tests.
use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use hive_model::{TaskDescriptor, TaskName, WorkModel};

use crate::{
    broker::{Broker, BrokerError, QueueProbe},
    config::{ConfigError, Rejected, TaskSet, TaskSource},
    launcher::{LaunchError, Launcher, StartOptions},
    process::{ExitStatus, Pid, ProcessControl, ProcessError, Signal},
    registry::{TaskRegistry, TaskType},
    signals::{SignalError, SignalSource},
    task::{TaskFn, WorkerContext},
};

pub(crate) fn descriptor(name: &str, model: WorkModel, max: usize) -> TaskDescriptor {
    TaskDescriptor::new(TaskName::new(name).unwrap(), model, max)
}

pub(crate) fn registry_with(types: &[(&str, WorkModel)]) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    for (name, model) in types {
        let task = TaskFn::arc(name.to_string(), |_ctx: WorkerContext| async { Ok(()) });
        registry
            .register(TaskType::new(TaskName::new(*name).unwrap(), *model, task))
            .unwrap();
    }
    registry
}

#[derive(Default)]
struct LauncherState {
    next_pid: i32,
    starts: Vec<(String, StartOptions, Pid)>,
    remaining_ok: Option<usize>,
}

/// Hands out increasing fake pids and records every start.
#[derive(Clone, Default)]
pub(crate) struct FakeLauncher {
    inner: Arc<Mutex<LauncherState>>,
}

impl FakeLauncher {
    pub(crate) fn new() -> Self {
        let l = Self::default();
        l.inner.lock().unwrap().next_pid = 1000;
        l
    }

    pub(crate) fn starts(&self) -> Vec<(String, StartOptions)> {
        self.inner
            .lock()
            .unwrap()
            .starts
            .iter()
            .map(|(n, o, _)| (n.clone(), *o))
            .collect()
    }

    pub(crate) fn pids_for(&self, name: &str) -> Vec<Pid> {
        self.inner
            .lock()
            .unwrap()
            .starts
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, _, p)| *p)
            .collect()
    }

    /// Allow `n` more successful starts, then refuse.
    pub(crate) fn fail_after(&self, n: usize) {
        self.inner.lock().unwrap().remaining_ok = Some(n);
    }
}

impl Launcher for FakeLauncher {
    fn start(&mut self, descriptor: &TaskDescriptor, opts: StartOptions) -> Result<Pid, LaunchError> {
        let mut s = self.inner.lock().unwrap();
        if let Some(remaining) = s.remaining_ok.as_mut() {
            if *remaining == 0 {
                return Err(LaunchError::Spawn("refused by test".into()));
            }
            *remaining -= 1;
        }
        s.next_pid += 1;
        let pid = Pid::from_raw(s.next_pid);
        s.starts.push((descriptor.name.to_string(), opts, pid));
        Ok(pid)
    }
}

#[derive(Default)]
struct ProcState {
    sent: Vec<(Pid, Signal)>,
    gone: HashSet<Pid>,
    exits: VecDeque<(Pid, ExitStatus)>,
    exit_on_term: bool,
}

/// Records signals; optionally turns `TERM` into an exit. `KILL` always does.
#[derive(Clone, Default)]
pub(crate) struct FakeProcesses {
    inner: Arc<Mutex<ProcState>>,
}

impl FakeProcesses {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn exit_on_term(&self, yes: bool) {
        self.inner.lock().unwrap().exit_on_term = yes;
    }

    pub(crate) fn mark_gone(&self, pid: Pid) {
        self.inner.lock().unwrap().gone.insert(pid);
    }

    pub(crate) fn push_exit(&self, pid: Pid, status: ExitStatus) {
        let mut s = self.inner.lock().unwrap();
        s.gone.insert(pid);
        s.exits.push_back((pid, status));
    }

    pub(crate) fn count(&self, pid: Pid, signal: Signal) -> usize {
        self.inner
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(p, s)| *p == pid && *s == signal)
            .count()
    }

    /// How many of `pids` received `signal` at least once.
    pub(crate) fn sent_to_all(&self, pids: &[Pid], signal: Signal) -> usize {
        pids.iter().filter(|p| self.count(**p, signal) > 0).count()
    }

    pub(crate) fn total(&self, signal: Signal) -> usize {
        self.inner
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter(|(_, s)| *s == signal)
            .count()
    }
}

impl ProcessControl for FakeProcesses {
    fn signal(&self, pid: Pid, signal: Signal) -> Result<(), ProcessError> {
        let mut s = self.inner.lock().unwrap();
        if s.gone.contains(&pid) {
            return Err(ProcessError::NoSuchProcess(pid));
        }
        s.sent.push((pid, signal));
        if signal == Signal::Kill || (signal == Signal::Term && s.exit_on_term) {
            s.gone.insert(pid);
            s.exits.push_back((pid, ExitStatus::Signaled(signal.as_raw())));
        }
        Ok(())
    }

    fn try_reap(&mut self) -> Result<Option<(Pid, ExitStatus)>, ProcessError> {
        Ok(self.inner.lock().unwrap().exits.pop_front())
    }
}

struct BrokerState {
    depth: u64,
    consumers: u64,
    fail_next: Option<BrokerError>,
    refuse: bool,
    connects: usize,
    depth_queries: usize,
}

/// Broker whose answers are set by the test.
#[derive(Clone)]
pub(crate) struct ScriptedBroker {
    inner: Arc<Mutex<BrokerState>>,
}

impl ScriptedBroker {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BrokerState {
                depth: 0,
                consumers: 0,
                fail_next: None,
                refuse: false,
                connects: 0,
                depth_queries: 0,
            })),
        }
    }

    pub(crate) fn set_depth(&self, depth: u64) {
        self.inner.lock().unwrap().depth = depth;
    }

    pub(crate) fn set_consumers(&self, consumers: u64) {
        self.inner.lock().unwrap().consumers = consumers;
    }

    pub(crate) fn fail_next(&self, error: BrokerError) {
        self.inner.lock().unwrap().fail_next = Some(error);
    }

    pub(crate) fn refuse_connects(&self, refuse: bool) {
        self.inner.lock().unwrap().refuse = refuse;
    }

    pub(crate) fn connects(&self) -> usize {
        self.inner.lock().unwrap().connects
    }

    pub(crate) fn depth_queries(&self) -> usize {
        self.inner.lock().unwrap().depth_queries
    }
}

impl Broker for ScriptedBroker {
    fn connect(&self) -> Result<Box<dyn QueueProbe>, BrokerError> {
        let mut s = self.inner.lock().unwrap();
        if s.refuse {
            return Err(BrokerError::ChannelClosed("connection refused".into()));
        }
        s.connects += 1;
        Ok(Box::new(ScriptedProbe {
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct ScriptedProbe {
    inner: Arc<Mutex<BrokerState>>,
}

impl QueueProbe for ScriptedProbe {
    fn current_depth(&mut self, _queue: &str) -> Result<u64, BrokerError> {
        let mut s = self.inner.lock().unwrap();
        if let Some(e) = s.fail_next.take() {
            return Err(e);
        }
        s.depth_queries += 1;
        Ok(s.depth)
    }

    fn consumer_count(&mut self, _queue: &str) -> Result<u64, BrokerError> {
        let mut s = self.inner.lock().unwrap();
        if let Some(e) = s.fail_next.take() {
            return Err(e);
        }
        Ok(s.consumers)
    }
}

#[derive(Default)]
struct SignalState {
    batches: VecDeque<Vec<Signal>>,
    armed: Vec<Signal>,
    ignored: Vec<Signal>,
    waits: Vec<Duration>,
}

/// Returns queued batches from `wait_for_signals`, one per call.
#[derive(Clone, Default)]
pub(crate) struct ScriptedSignals {
    inner: Arc<Mutex<SignalState>>,
}

impl ScriptedSignals {
    pub(crate) fn push(&self, batch: &[Signal]) {
        self.inner.lock().unwrap().batches.push_back(batch.to_vec());
    }

    pub(crate) fn armed(&self) -> Vec<Signal> {
        self.inner.lock().unwrap().armed.clone()
    }

    pub(crate) fn ignored(&self) -> Vec<Signal> {
        self.inner.lock().unwrap().ignored.clone()
    }

    pub(crate) fn waits(&self) -> Vec<Duration> {
        self.inner.lock().unwrap().waits.clone()
    }
}

impl SignalSource for ScriptedSignals {
    fn arm(&mut self, signals: &[Signal]) -> Result<(), SignalError> {
        self.inner.lock().unwrap().armed.extend_from_slice(signals);
        Ok(())
    }

    fn wait_for_signals(&mut self, timeout: Duration) -> Result<Vec<Signal>, SignalError> {
        let mut s = self.inner.lock().unwrap();
        s.waits.push(timeout);
        Ok(s.batches.pop_front().unwrap_or_default())
    }

    fn ignore(&mut self, signals: &[Signal]) -> Result<(), SignalError> {
        self.inner.lock().unwrap().ignored.extend_from_slice(signals);
        Ok(())
    }

    fn restore_defaults(&mut self, _signals: &[Signal]) -> Result<(), SignalError> {
        Ok(())
    }
}

#[derive(Default)]
struct SourceState {
    descriptors: Vec<TaskDescriptor>,
    rejected: Vec<String>,
    broken: bool,
    loads: usize,
}

/// Task source whose contents the test swaps between loads.
#[derive(Clone, Default)]
pub(crate) struct StaticSource {
    inner: Arc<Mutex<SourceState>>,
}

impl StaticSource {
    pub(crate) fn new(descriptors: Vec<TaskDescriptor>) -> Self {
        let s = Self::default();
        s.set(descriptors);
        s
    }

    pub(crate) fn set(&self, descriptors: Vec<TaskDescriptor>) {
        let mut s = self.inner.lock().unwrap();
        s.descriptors = descriptors;
        s.rejected.clear();
    }

    pub(crate) fn reject(&self, name: &str) {
        self.inner.lock().unwrap().rejected.push(name.to_string());
    }

    pub(crate) fn break_source(&self, broken: bool) {
        self.inner.lock().unwrap().broken = broken;
    }

    pub(crate) fn loads(&self) -> usize {
        self.inner.lock().unwrap().loads
    }
}

impl TaskSource for StaticSource {
    fn load(&self) -> Result<TaskSet, ConfigError> {
        let mut s = self.inner.lock().unwrap();
        s.loads += 1;
        if s.broken {
            return Err(ConfigError::Parse("unreadable".into()));
        }
        Ok(TaskSet {
            descriptors: s.descriptors.clone(),
            rejected: s
                .rejected
                .iter()
                .map(|name| Rejected {
                    name: name.clone(),
                    error: ConfigError::UnknownTask(name.clone()),
                })
                .collect(),
        })
    }
}
