use crate::types::{Task, TaskSnapshot, TaskSpec, TaskStatus};
use attestor_core::{AttestorError, AttestorResult};
use chrono::Utc;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

/// A task queue with dependency gating, priority ordering, and failure
/// propagation.
///
/// A task becomes dispatchable (`Queued`) only once every dependency has
/// `Succeeded`. When a dependency fails or is cancelled, every transitive
/// dependent that has not started is cancelled with `DependencyFailed`.
pub struct TaskQueue {
    tasks: HashMap<Uuid, Task>,
    next_sequence: u64,
}

/// First task of `order` from which a cycle is reachable.
///
/// Existing tasks cannot depend on new ones, so only edges inside the batch
/// can close a cycle. The walk keeps its own stack so long chains do not
/// grow the call stack.
fn find_cycle(batch: &HashMap<Uuid, &TaskSpec>, order: &[Uuid]) -> Option<Uuid> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Open,
        Done,
    }

    let mut marks: HashMap<Uuid, Mark> = HashMap::with_capacity(batch.len());
    for &root in order {
        if marks.contains_key(&root) {
            continue;
        }
        marks.insert(root, Mark::Open);
        let mut stack: Vec<(Uuid, usize)> = vec![(root, 0)];
        while let Some(frame) = stack.last_mut() {
            let (id, index) = *frame;
            let deps = batch
                .get(&id)
                .map_or(&[][..], |spec| spec.dependencies.as_slice());
            let Some(&dep) = deps.get(index) else {
                marks.insert(id, Mark::Done);
                stack.pop();
                continue;
            };
            frame.1 += 1;
            if !batch.contains_key(&dep) {
                continue;
            }
            match marks.get(&dep) {
                Some(Mark::Open) => return Some(root),
                Some(Mark::Done) => {}
                None => {
                    marks.insert(dep, Mark::Open);
                    stack.push((dep, 0));
                }
            }
        }
    }
    None
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            next_sequence: 0,
        }
    }

    /// Add a single task.
    pub fn enqueue(&mut self, spec: TaskSpec) -> AttestorResult<Uuid> {
        let ids = self.enqueue_batch(vec![spec])?;
        Ok(ids[0])
    }

    /// Add a set of tasks atomically.
    ///
    /// Tasks in the batch may depend on each other and on tasks already in the
    /// queue. Either every task is accepted or none is.
    pub fn enqueue_batch(&mut self, specs: Vec<TaskSpec>) -> AttestorResult<Vec<Uuid>> {
        let mut batch: HashMap<Uuid, &TaskSpec> = HashMap::with_capacity(specs.len());
        for spec in &specs {
            if self.tasks.contains_key(&spec.id) || batch.insert(spec.id, spec).is_some() {
                return Err(AttestorError::Validation(format!(
                    "duplicate task id {}",
                    spec.id
                )));
            }
        }

        for spec in &specs {
            for dep in &spec.dependencies {
                if !self.tasks.contains_key(dep) && !batch.contains_key(dep) {
                    return Err(AttestorError::UnknownDependency(*dep));
                }
            }
        }

        let ids: Vec<Uuid> = specs.iter().map(|s| s.id).collect();
        if let Some(id) = find_cycle(&batch, &ids) {
            return Err(AttestorError::CyclicDependency(id));
        }

        for spec in specs {
            let task = Task::from_spec(spec, self.next_sequence);
            self.next_sequence += 1;
            self.tasks.insert(task.id, task);
        }

        for id in &ids {
            self.settle(*id);
        }
        Ok(ids)
    }

    /// Recompute the gate of a newly added task from its dependencies.
    fn settle(&mut self, id: Uuid) {
        let Some(task) = self.tasks.get(&id) else {
            return;
        };
        if task.status != TaskStatus::Waiting {
            return;
        }
        let mut broken = None;
        let mut all_done = true;
        for dep in &task.dependencies {
            match self.tasks.get(dep).map(|d| d.status) {
                Some(TaskStatus::Succeeded) => {}
                Some(TaskStatus::Failed | TaskStatus::Cancelled) => {
                    broken = Some(*dep);
                    break;
                }
                _ => all_done = false,
            }
        }
        if let Some(dep) = broken {
            self.cascade_from(dep);
        } else if all_done {
            if let Some(task) = self.tasks.get_mut(&id) {
                task.status = TaskStatus::Queued;
            }
        }
    }

    /// Drop the oldest finished tasks beyond `keep`, in enqueue order.
    ///
    /// A finished task that an unfinished one still depends on is kept.
    /// Returns the removed ids.
    pub fn prune_finished(&mut self, keep: usize) -> Vec<Uuid> {
        let pinned: HashSet<Uuid> = self
            .tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .flat_map(|t| t.dependencies.iter().copied())
            .collect();
        let mut finished: Vec<(u64, Uuid)> = self
            .tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .map(|t| (t.sequence, t.id))
            .collect();
        let excess = finished.len().saturating_sub(keep);
        if excess == 0 {
            return Vec::new();
        }
        finished.sort_unstable();
        let removed: Vec<Uuid> = finished
            .into_iter()
            .map(|(_, id)| id)
            .filter(|id| !pinned.contains(id))
            .take(excess)
            .collect();
        for id in &removed {
            self.tasks.remove(id);
        }
        removed
    }

    /// Tasks that may start now, highest priority first, FIFO within a priority.
    pub fn dispatchable(&self) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Queued)
            .collect();
        ready.sort_by_key(|t| (Reverse(t.priority), t.sequence));
        ready
    }

    /// Move a queued task to running. Returns the task when the transition
    /// happened.
    pub fn mark_running(&mut self, id: Uuid) -> Option<&Task> {
        let deps_ok = {
            let task = self.tasks.get(&id)?;
            task.status == TaskStatus::Queued
                && task.dependencies.iter().all(|d| {
                    self.tasks
                        .get(d)
                        .is_some_and(|t| t.status == TaskStatus::Succeeded)
                })
        };
        if !deps_ok {
            return None;
        }
        let task = self.tasks.get_mut(&id)?;
        task.status = TaskStatus::Running;
        task.started_at = Some(Utc::now());
        Some(task)
    }

    /// Record the outcome of a running task and update its dependents.
    ///
    /// Returns the ids of tasks cancelled as a consequence of a failure.
    pub fn complete(&mut self, id: Uuid, outcome: AttestorResult<Value>) -> Vec<Uuid> {
        let Some(task) = self.tasks.get_mut(&id) else {
            return Vec::new();
        };
        if task.status.is_terminal() {
            return Vec::new();
        }
        task.completed_at = Some(Utc::now());
        match outcome {
            Ok(value) => {
                task.status = TaskStatus::Succeeded;
                task.result = Some(value);
                self.promote_dependents(id);
                Vec::new()
            }
            Err(err) => {
                task.status = TaskStatus::Failed;
                task.error = Some(err);
                self.cascade_from(id)
            }
        }
    }

    /// Fail a task that has not finished yet, whatever its state.
    pub fn fail(&mut self, id: Uuid, err: AttestorError) -> Vec<Uuid> {
        self.complete(id, Err(err))
    }

    /// Fail every unfinished task targeting `agent_id`.
    ///
    /// Returns the failed task ids followed by the dependents cancelled as a result.
    pub fn fail_for_agent(&mut self, agent_id: &str, err: &AttestorError) -> Vec<Uuid> {
        let mut targets: Vec<(u64, Uuid)> = self
            .tasks
            .values()
            .filter(|t| t.agent_id == agent_id && !t.status.is_terminal())
            .map(|t| (t.sequence, t.id))
            .collect();
        targets.sort_unstable();
        let mut touched = Vec::new();
        for (_, id) in targets {
            if self.tasks.get(&id).is_some_and(|t| !t.status.is_terminal()) {
                touched.push(id);
                touched.extend(self.fail(id, err.clone()));
            }
        }
        touched
    }

    /// Cancel a task that has not started.
    ///
    /// Running tasks cannot be cancelled; their dependents are cancelled when
    /// they fail.
    pub fn cancel(&mut self, id: Uuid, reason: &str) -> AttestorResult<Vec<Uuid>> {
        let task = self
            .tasks
            .get_mut(&id)
            .ok_or(AttestorError::TaskNotFound(id))?;
        match task.status {
            TaskStatus::Queued | TaskStatus::Waiting => {
                task.status = TaskStatus::Cancelled;
                task.error = Some(AttestorError::Cancelled(reason.to_string()));
                task.completed_at = Some(Utc::now());
                let mut cancelled = vec![id];
                cancelled.extend(self.cascade_from(id));
                Ok(cancelled)
            }
            other => Err(AttestorError::Validation(format!(
                "task {id} cannot be cancelled while {other}"
            ))),
        }
    }

    /// Cancel every task that has not started.
    pub fn cancel_pending(&mut self, reason: &str) -> Vec<Uuid> {
        let pending: Vec<Uuid> = self
            .tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Queued | TaskStatus::Waiting))
            .map(|t| t.id)
            .collect();
        let mut cancelled = Vec::new();
        for id in pending {
            if let Ok(ids) = self.cancel(id, reason) {
                cancelled.extend(ids);
            }
        }
        cancelled
    }

    fn promote_dependents(&mut self, id: Uuid) {
        let ready: Vec<Uuid> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Waiting && t.dependencies.contains(&id))
            .filter(|t| {
                t.dependencies.iter().all(|d| {
                    self.tasks
                        .get(d)
                        .is_some_and(|dep| dep.status == TaskStatus::Succeeded)
                })
            })
            .map(|t| t.id)
            .collect();
        for id in ready {
            if let Some(task) = self.tasks.get_mut(&id) {
                task.status = TaskStatus::Queued;
            }
        }
    }

    /// Cancel every unstarted transitive dependent of `root`.
    fn cascade_from(&mut self, root: Uuid) -> Vec<Uuid> {
        let mut cancelled = Vec::new();
        let mut frontier = VecDeque::from([root]);
        let mut seen = HashSet::from([root]);
        while let Some(failed) = frontier.pop_front() {
            let dependents: Vec<Uuid> = self
                .tasks
                .values()
                .filter(|t| {
                    matches!(t.status, TaskStatus::Queued | TaskStatus::Waiting)
                        && t.dependencies.contains(&failed)
                })
                .map(|t| t.id)
                .collect();
            for dep_id in dependents {
                if !seen.insert(dep_id) {
                    continue;
                }
                if let Some(task) = self.tasks.get_mut(&dep_id) {
                    task.status = TaskStatus::Cancelled;
                    task.error = Some(AttestorError::DependencyFailed {
                        task_id: dep_id,
                        dependency: failed,
                    });
                    task.completed_at = Some(Utc::now());
                    cancelled.push(dep_id);
                    frontier.push_back(dep_id);
                }
            }
        }
        cancelled
    }

    /// Get a task by ID.
    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn snapshot(&self, id: Uuid) -> Option<TaskSnapshot> {
        self.tasks.get(&id).map(Task::snapshot)
    }

    /// List all tasks in enqueue order.
    pub fn all_tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by_key(|t| t.sequence);
        tasks
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Total number of tasks.
    pub fn total_count(&self) -> usize {
        self.tasks.len()
    }

    /// Check if all tasks are in a terminal state.
    pub fn is_done(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::{Priority, TaskOptions};
    use serde_json::json;

    fn spec(agent: &str) -> TaskSpec {
        TaskSpec::new(agent, json!({}), TaskOptions::default())
    }

    fn spec_with(agent: &str, options: TaskOptions) -> TaskSpec {
        TaskSpec::new(agent, json!({}), options)
    }

    fn run_ok(queue: &mut TaskQueue, id: Uuid) {
        assert!(queue.mark_running(id).is_some());
        queue.complete(id, Ok(json!({"ok": true})));
    }

    #[test]
    fn test_empty_queue() {
        let queue = TaskQueue::new();
        assert_eq!(queue.total_count(), 0);
        assert!(queue.is_done());
        assert!(queue.dispatchable().is_empty());
    }

    #[test]
    fn test_independent_task_is_queued() {
        let mut queue = TaskQueue::new();
        let id = queue.enqueue(spec("a")).unwrap();
        assert_eq!(queue.get(id).unwrap().status, TaskStatus::Queued);
        assert_eq!(queue.dispatchable().len(), 1);
    }

    #[test]
    fn test_dependent_waits_until_dependency_succeeds() {
        let mut queue = TaskQueue::new();
        let t1 = queue.enqueue(spec("a")).unwrap();
        let t2 = queue
            .enqueue(spec_with("b", TaskOptions::default().with_dependencies(vec![t1])))
            .unwrap();

        assert_eq!(queue.get(t2).unwrap().status, TaskStatus::Waiting);
        assert!(queue.mark_running(t2).is_none());

        run_ok(&mut queue, t1);
        assert_eq!(queue.get(t2).unwrap().status, TaskStatus::Queued);
        assert!(queue.mark_running(t2).is_some());
    }

    #[test]
    fn test_priority_then_fifo() {
        let mut queue = TaskQueue::new();
        let low = queue
            .enqueue(spec_with("a", TaskOptions::default().with_priority(Priority::Low)))
            .unwrap();
        let med1 = queue.enqueue(spec("b")).unwrap();
        let high = queue
            .enqueue(spec_with("c", TaskOptions::default().with_priority(Priority::High)))
            .unwrap();
        let med2 = queue.enqueue(spec("d")).unwrap();

        let order: Vec<Uuid> = queue.dispatchable().iter().map(|t| t.id).collect();
        assert_eq!(order, vec![high, med1, med2, low]);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut queue = TaskQueue::new();
        let ghost = Uuid::new_v4();
        let err = queue
            .enqueue(spec_with("a", TaskOptions::default().with_dependencies(vec![ghost])))
            .unwrap_err();
        assert!(matches!(err, AttestorError::UnknownDependency(id) if id == ghost));
        assert_eq!(queue.total_count(), 0);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut queue = TaskQueue::new();
        let id = Uuid::new_v4();
        let err = queue
            .enqueue(spec_with(
                "a",
                TaskOptions::default().with_id(id).with_dependencies(vec![id]),
            ))
            .unwrap_err();
        assert!(matches!(err, AttestorError::CyclicDependency(_)));
    }

    #[test]
    fn test_batch_cycle_rejected_atomically() {
        let mut queue = TaskQueue::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let err = queue
            .enqueue_batch(vec![
                spec_with("x", TaskOptions::default().with_id(a).with_dependencies(vec![c])),
                spec_with("x", TaskOptions::default().with_id(b).with_dependencies(vec![a])),
                spec_with("x", TaskOptions::default().with_id(c).with_dependencies(vec![b])),
            ])
            .unwrap_err();
        assert!(matches!(err, AttestorError::CyclicDependency(_)));
        assert_eq!(queue.total_count(), 0);
    }

    #[test]
    fn test_batch_forward_reference_accepted() {
        let mut queue = TaskQueue::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        queue
            .enqueue_batch(vec![
                spec_with("x", TaskOptions::default().with_id(b).with_dependencies(vec![a])),
                spec_with("x", TaskOptions::default().with_id(a)),
            ])
            .unwrap();
        assert_eq!(queue.get(a).unwrap().status, TaskStatus::Queued);
        assert_eq!(queue.get(b).unwrap().status, TaskStatus::Waiting);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut queue = TaskQueue::new();
        let id = queue.enqueue(spec("a")).unwrap();
        let err = queue
            .enqueue(spec_with("a", TaskOptions::default().with_id(id)))
            .unwrap_err();
        assert!(matches!(err, AttestorError::Validation(_)));
    }

    #[test]
    fn test_failure_cancels_transitive_dependents() {
        let mut queue = TaskQueue::new();
        let t1 = queue.enqueue(spec("a")).unwrap();
        let t2 = queue
            .enqueue(spec_with("b", TaskOptions::default().with_dependencies(vec![t1])))
            .unwrap();
        let t3 = queue
            .enqueue(spec_with("c", TaskOptions::default().with_dependencies(vec![t2])))
            .unwrap();
        let other = queue.enqueue(spec("d")).unwrap();

        queue.mark_running(t1).unwrap();
        let cancelled = queue.complete(t1, Err(AttestorError::Agent("boom".into())));
        assert_eq!(cancelled, vec![t2, t3]);

        let t3_task = queue.get(t3).unwrap();
        assert_eq!(t3_task.status, TaskStatus::Cancelled);
        assert!(matches!(
            t3_task.error,
            Some(AttestorError::DependencyFailed { dependency, .. }) if dependency == t2
        ));
        assert_eq!(queue.get(other).unwrap().status, TaskStatus::Queued);
    }

    #[test]
    fn test_enqueue_after_failed_dependency_is_cancelled() {
        let mut queue = TaskQueue::new();
        let t1 = queue.enqueue(spec("a")).unwrap();
        queue.mark_running(t1).unwrap();
        queue.complete(t1, Err(AttestorError::Agent("boom".into())));

        let t2 = queue
            .enqueue(spec_with("b", TaskOptions::default().with_dependencies(vec![t1])))
            .unwrap();
        assert_eq!(queue.get(t2).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_cancel_queued_task_cascades() {
        let mut queue = TaskQueue::new();
        let t1 = queue.enqueue(spec("a")).unwrap();
        let t2 = queue
            .enqueue(spec_with("b", TaskOptions::default().with_dependencies(vec![t1])))
            .unwrap();
        let cancelled = queue.cancel(t1, "operator request").unwrap();
        assert_eq!(cancelled, vec![t1, t2]);
        assert!(queue.is_done());
    }

    #[test]
    fn test_cannot_cancel_running_task() {
        let mut queue = TaskQueue::new();
        let t1 = queue.enqueue(spec("a")).unwrap();
        queue.mark_running(t1).unwrap();
        assert!(queue.cancel(t1, "late").is_err());
        assert!(matches!(
            queue.cancel(Uuid::new_v4(), "x"),
            Err(AttestorError::TaskNotFound(_))
        ));
    }

    #[test]
    fn test_fail_for_agent() {
        let mut queue = TaskQueue::new();
        let t1 = queue.enqueue(spec("gone")).unwrap();
        let t2 = queue
            .enqueue(spec_with("other", TaskOptions::default().with_dependencies(vec![t1])))
            .unwrap();
        let keep = queue.enqueue(spec("other")).unwrap();

        let touched =
            queue.fail_for_agent("gone", &AttestorError::AgentNotFound("gone".into()));
        assert_eq!(touched, vec![t1, t2]);
        assert_eq!(queue.get(t1).unwrap().status, TaskStatus::Failed);
        assert_eq!(queue.get(keep).unwrap().status, TaskStatus::Queued);
    }

    #[test]
    fn test_complete_is_idempotent_on_terminal() {
        let mut queue = TaskQueue::new();
        let t1 = queue.enqueue(spec("a")).unwrap();
        run_ok(&mut queue, t1);
        queue.complete(t1, Err(AttestorError::Agent("late".into())));
        assert_eq!(queue.get(t1).unwrap().status, TaskStatus::Succeeded);
        assert_eq!(queue.count(TaskStatus::Succeeded), 1);
    }

    #[test]
    fn test_cancel_pending() {
        let mut queue = TaskQueue::new();
        let t1 = queue.enqueue(spec("a")).unwrap();
        queue.enqueue(spec("b")).unwrap();
        queue.mark_running(t1).unwrap();
        let cancelled = queue.cancel_pending("shutdown");
        assert_eq!(cancelled.len(), 1);
        assert_eq!(queue.count(TaskStatus::Running), 1);
    }

    fn chain(len: usize) -> (Vec<Uuid>, Vec<TaskSpec>) {
        let ids: Vec<Uuid> = (0..len).map(|_| Uuid::new_v4()).collect();
        let specs = ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let deps = if i == 0 { vec![] } else { vec![ids[i - 1]] };
                spec_with("x", TaskOptions::default().with_id(*id).with_dependencies(deps))
            })
            .collect();
        (ids, specs)
    }

    #[test]
    fn test_long_chain_batch_accepted() {
        let mut queue = TaskQueue::new();
        let (ids, specs) = chain(50_000);
        queue.enqueue_batch(specs).unwrap();
        assert_eq!(queue.total_count(), 50_000);
        assert_eq!(queue.get(ids[0]).unwrap().status, TaskStatus::Queued);
        assert_eq!(queue.get(ids[49_999]).unwrap().status, TaskStatus::Waiting);
    }

    #[test]
    fn test_long_chain_closed_into_cycle_rejected() {
        let mut queue = TaskQueue::new();
        let (ids, mut specs) = chain(50_000);
        specs[0].dependencies.push(ids[49_999]);
        let err = queue.enqueue_batch(specs).unwrap_err();
        assert!(matches!(err, AttestorError::CyclicDependency(_)));
        assert_eq!(queue.total_count(), 0);
    }

    #[test]
    fn test_prune_keeps_newest_and_pinned_tasks() {
        let mut queue = TaskQueue::new();
        let old = queue.enqueue(spec("a")).unwrap();
        let pinned = queue.enqueue(spec("a")).unwrap();
        let newest = queue.enqueue(spec("a")).unwrap();
        for id in [old, pinned, newest] {
            run_ok(&mut queue, id);
        }
        let blocked = queue.enqueue(spec("a")).unwrap();
        let waiting = queue
            .enqueue(spec_with(
                "b",
                TaskOptions::default().with_dependencies(vec![pinned, blocked]),
            ))
            .unwrap();

        assert!(queue.prune_finished(3).is_empty());
        let removed = queue.prune_finished(2);
        assert_eq!(removed, vec![old]);
        assert!(queue.get(old).is_none());
        assert!(queue.get(pinned).is_some());
        assert!(queue.get(newest).is_some());

        run_ok(&mut queue, blocked);
        assert_eq!(queue.get(waiting).unwrap().status, TaskStatus::Queued);
        assert!(queue.mark_running(waiting).is_some());
    }
}
