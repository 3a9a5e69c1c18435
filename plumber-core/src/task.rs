//! Task table & ready queue (spec §4.6, C8) — the scheduler's largest single
//! component by the original LOC budget. Tracks, per request, which graph
//! nodes have a pending invocation, how many of their required inputs have
//! arrived or been cancelled, and which invocations are ready to step.
//!
//! Grounded on the original `sched/task.c`: a task is created lazily the
//! first time a pipe targets it, counts required-vs-settled inputs to decide
//! readiness, and a request's side-channel scope is destroyed the moment its
//! last task is freed. Unlike the original, `input_cancelled` here is
//! idempotent per pipe slot (REDESIGN FLAG #1 in SPEC_FULL.md) rather than
//! allowing a slot to be double-cancelled, and ownership is plain `&mut self`
//! rather than a lock (REDESIGN FLAG #4) because the scheduler owns the
//! table from a single task per spec §5.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::graph::{NodeId, PipeBindings, Service};
use crate::pipe::PipeId;
use crate::scope::RequestScope;
use crate::servlet::LocalPipeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Identifies one node's invocation within one request — the key both the
/// task table and [`crate::pipe::PipeHandle::owner`] use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub request: RequestId,
    pub node: NodeId,
}

/// Whether a popped task should be stepped or has already failed closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Ready,
    Dead,
}

/// One node's pending invocation within a request.
pub struct TaskEntry {
    required_inputs: u32,
    assigned_inputs: u32,
    cancelled_slots: HashSet<LocalPipeId>,
    bound: PipeBindings,
    queued: bool,
}

impl TaskEntry {
    fn new(required_inputs: u32) -> Self {
        TaskEntry {
            required_inputs,
            assigned_inputs: 0,
            cancelled_slots: HashSet::new(),
            bound: PipeBindings::new(),
            queued: false,
        }
    }

    fn settled(&self) -> u32 {
        self.assigned_inputs + self.cancelled_slots.len() as u32
    }

    fn is_complete(&self) -> bool {
        self.settled() >= self.required_inputs
    }

    /// A task is dead once every required input settled as a cancellation
    /// and none arrived live — there is no data left for it to act on.
    pub fn is_dead(&self) -> bool {
        self.required_inputs > 0
            && self.cancelled_slots.len() as u32 == self.required_inputs
            && self.assigned_inputs == 0
    }

    pub fn bound_pipes(&self) -> &PipeBindings {
        &self.bound
    }
}

/// Per-request bookkeeping: its side-channel scope and how many of its tasks
/// are still outstanding.
struct RequestEntry {
    service: Arc<Service>,
    scope: RequestScope,
    pending_tasks: usize,
}

/// The scheduler's live task table and FIFO ready queue.
#[derive(Default)]
pub struct TaskTable {
    tasks: HashMap<TaskKey, TaskEntry>,
    requests: HashMap<RequestId, RequestEntry>,
    ready: VecDeque<TaskKey>,
    next_request_id: u64,
}

impl TaskTable {
    pub fn new() -> Self {
        TaskTable::default()
    }

    /// Like [`new`](Self::new), but pre-sizes the ready queue's backing
    /// `VecDeque` per [`crate::config::Config::ready_queue_hint`] to avoid
    /// reallocating it during a request's first few steps.
    pub fn with_ready_capacity(capacity: usize) -> Self {
        TaskTable { ready: VecDeque::with_capacity(capacity), ..Default::default() }
    }

    /// Admit a new request against `service`, returning its id. The request
    /// owns a fresh [`RequestScope`] that lives exactly as long as it has an
    /// outstanding task.
    pub fn new_request(&mut self, service: Arc<Service>) -> RequestId {
        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;
        self.requests.insert(id, RequestEntry { service, scope: RequestScope::new(), pending_tasks: 0 });
        id
    }

    pub fn scope(&self, request: RequestId) -> Result<&RequestScope> {
        Ok(&self.request_entry(request)?.scope)
    }

    pub fn scope_mut(&mut self, request: RequestId) -> Result<&mut RequestScope> {
        Ok(&mut self.request_entry_mut(request)?.scope)
    }

    pub fn service(&self, request: RequestId) -> Result<Arc<Service>> {
        Ok(self.request_entry(request)?.service.clone())
    }

    fn request_entry(&self, request: RequestId) -> Result<&RequestEntry> {
        self.requests
            .get(&request)
            .ok_or_else(|| Error::InvalidArg(format!("no such request {request:?}")))
    }

    fn request_entry_mut(&mut self, request: RequestId) -> Result<&mut RequestEntry> {
        self.requests
            .get_mut(&request)
            .ok_or_else(|| Error::InvalidArg(format!("no such request {request:?}")))
    }

    /// Ensure a task entry exists for `key`, creating it (and bumping the
    /// request's pending-task count) on first reference — the lazy
    /// runtime-task instantiation spec §4.6 calls for.
    pub fn ensure_task(&mut self, key: TaskKey, required_inputs: u32) -> Result<()> {
        if self.tasks.contains_key(&key) {
            return Ok(());
        }
        self.request_entry_mut(key.request)?.pending_tasks += 1;
        self.tasks.insert(key, TaskEntry::new(required_inputs));
        Ok(())
    }

    fn task_mut(&mut self, key: TaskKey) -> Result<&mut TaskEntry> {
        self.tasks.get_mut(&key).ok_or_else(|| Error::InvalidArg(format!("no such task {key:?}")))
    }

    pub fn task(&self, key: TaskKey) -> Result<&TaskEntry> {
        self.tasks.get(&key).ok_or_else(|| Error::InvalidArg(format!("no such task {key:?}")))
    }

    /// Bind a live input pipe to `local` on `key`'s task, counting it toward
    /// readiness.
    pub fn input_pipe(&mut self, key: TaskKey, local: LocalPipeId, pipe: PipeId) -> Result<()> {
        let task = self.task_mut(key)?;
        if task.cancelled_slots.contains(&local) {
            return Err(Error::InvalidArg(format!("pipe slot {local} already cancelled")));
        }
        task.bound.insert((key.node, local), pipe);
        task.assigned_inputs += 1;
        self.maybe_enqueue(key)
    }

    /// Record an already-resolved output (or shadow) pipe for `key`; output
    /// pipes never count toward readiness.
    pub fn output_pipe(&mut self, key: TaskKey, local: LocalPipeId, pipe: PipeId) -> Result<()> {
        self.task_mut(key)?.bound.insert((key.node, local), pipe);
        Ok(())
    }

    pub fn output_shadow(&mut self, key: TaskKey, local: LocalPipeId, pipe: PipeId) -> Result<()> {
        self.output_pipe(key, local, pipe)
    }

    /// Mark one input slot cancelled. Idempotent-per-slot: cancelling the
    /// same slot twice is an error rather than silently double-counting
    /// (REDESIGN FLAG #1).
    pub fn input_cancelled(&mut self, key: TaskKey, local: LocalPipeId) -> Result<()> {
        let task = self.task_mut(key)?;
        if !task.cancelled_slots.insert(local) {
            return Err(Error::InvalidArg(format!("pipe slot {local} cancelled twice")));
        }
        self.maybe_enqueue(key)
    }

    fn maybe_enqueue(&mut self, key: TaskKey) -> Result<()> {
        let task = self.task_mut(key)?;
        if task.is_complete() && !task.queued {
            task.queued = true;
            self.ready.push_back(key);
        }
        Ok(())
    }

    /// Pop the next ready task, reporting whether it still has live data to
    /// act on ([`TaskStatus::Ready`]) or settled entirely through
    /// cancellation ([`TaskStatus::Dead`]). The caller is responsible for
    /// freeing the task once it has handled either outcome.
    pub fn next_ready_task(&mut self) -> Option<(TaskKey, TaskStatus)> {
        let key = self.ready.pop_front()?;
        let status = if self.tasks.get(&key).is_some_and(TaskEntry::is_dead) {
            TaskStatus::Dead
        } else {
            TaskStatus::Ready
        };
        Some((key, status))
    }

    /// Remove a finished or dead task. When this was the request's last
    /// outstanding task, the request entry (and its [`RequestScope`]) is
    /// dropped here.
    pub fn free(&mut self, key: TaskKey) -> Result<()> {
        self.tasks
            .remove(&key)
            .ok_or_else(|| Error::InvalidArg(format!("no such task {key:?}")))?;
        let entry = self.request_entry_mut(key.request)?;
        entry.pending_tasks -= 1;
        if entry.pending_tasks == 0 {
            self.requests.remove(&key.request);
        }
        Ok(())
    }

    pub fn is_request_live(&self, request: RequestId) -> bool {
        self.requests.contains_key(&request)
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// True once every admitted request has run to completion (or been
    /// fully cancelled) and freed — the signal the dispatcher waits for
    /// during a draining shutdown.
    pub fn is_idle(&self) -> bool {
        self.requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::PipeFlags;
    use crate::graph::ServiceBuilder;
    use crate::pipe::PipeArena;
    use crate::servlet::{ExecPipes, Pdt, Servlet};
    use async_trait::async_trait;

    struct NoopServlet(Pdt);
    #[async_trait]
    impl Servlet for NoopServlet {
        fn pdt(&self) -> &Pdt {
            &self.0
        }
        async fn exec(&self, _pipes: &mut ExecPipes<'_>, _scope: &RequestScope) -> Result<()> {
            Ok(())
        }
    }

    fn trivial_service() -> Arc<Service> {
        let mut b = ServiceBuilder::new();
        let n = b.add_node(Arc::new(NoopServlet(Pdt::new(["in", "out"]))), vec![]);
        Arc::new(b.build((n, 0), (n, 1)).unwrap())
    }

    fn module() -> crate::inmemory_module::InMemoryModule {
        crate::inmemory_module::InMemoryModule::new()
    }

    #[test]
    fn a_task_becomes_ready_once_all_required_inputs_settle() {
        let mut table = TaskTable::new();
        let service = trivial_service();
        let req = table.new_request(service.clone());
        let node = service.input_node();
        let key = TaskKey { request: req, node };
        table.ensure_task(key, 2).unwrap();

        let mut arena = PipeArena::new();
        let m = module();
        let pid = arena.allocate(crate::pipe::PipeHandle::new(0, PipeFlags::INPUT, 0));

        table.input_pipe(key, 0, pid).unwrap();
        assert_eq!(table.ready_len(), 0);
        table.input_cancelled(key, 1).unwrap();
        assert_eq!(table.ready_len(), 1);
        let _ = m;

        let (popped, status) = table.next_ready_task().unwrap();
        assert_eq!(popped, key);
        assert_eq!(status, TaskStatus::Ready);
    }

    #[test]
    fn cancelling_every_required_input_marks_the_task_dead() {
        let mut table = TaskTable::new();
        let service = trivial_service();
        let req = table.new_request(service.clone());
        let key = TaskKey { request: req, node: service.input_node() };
        table.ensure_task(key, 2).unwrap();

        table.input_cancelled(key, 0).unwrap();
        table.input_cancelled(key, 1).unwrap();

        let (_, status) = table.next_ready_task().unwrap();
        assert_eq!(status, TaskStatus::Dead);
    }

    #[test]
    fn cancelling_the_same_slot_twice_is_an_error() {
        let mut table = TaskTable::new();
        let service = trivial_service();
        let req = table.new_request(service.clone());
        let key = TaskKey { request: req, node: service.input_node() };
        table.ensure_task(key, 1).unwrap();

        table.input_cancelled(key, 0).unwrap();
        assert!(table.input_cancelled(key, 0).is_err());
    }

    #[test]
    fn freeing_the_last_task_drops_the_request() {
        let mut table = TaskTable::new();
        let service = trivial_service();
        let req = table.new_request(service.clone());
        let key = TaskKey { request: req, node: service.input_node() };
        table.ensure_task(key, 0).unwrap();
        assert!(table.is_request_live(req));
        table.free(key).unwrap();
        assert!(!table.is_request_live(req));
    }
}
