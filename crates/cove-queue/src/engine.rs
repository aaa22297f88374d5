use crate::background::{BackgroundBudget, BackgroundOutcome};
use crate::handler::{HandlerRegistry, QueueHandler};
use crate::lanes::QueueLanes;
use crate::policy::ResultPolicy;
use crate::{QueueError, QueueEvent, QueueSettings};
use cove_core::{
    ActionKind, Disposition, ErrorKind, Lane, Placement, QueueStatus, Task, TaskFailure, TaskId,
    TransportFailure,
};
use cove_storage::PersistentQueue;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

pub(crate) type ReadJob = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type Reply<T> = oneshot::Sender<T>;

/// Floor for re-checking a background budget that is not yet exhausted.
const BUDGET_RECHECK: Duration = Duration::from_millis(25);

pub(crate) enum Command {
    AddTask {
        task: Task,
        auto_execute: bool,
        reply: Reply<Result<(), QueueError>>,
    },
    QueueRead(ReadJob),
    RegisterHandler(Arc<dyn QueueHandler>),
    UnregisterHandler(String),
    BackgroundFetch(BackgroundBudget),
    EnterForeground,
    RemoveAllTasks {
        entity_id: String,
        actions: Vec<ActionKind>,
        reply: Reply<usize>,
    },
    DeleteAllQueuedTasks {
        user_id: String,
        reply: Reply<usize>,
    },
    ClearAll(Reply<()>),
    SetNetworkReachable(bool),
    SetHumanCheckRequired(bool),
    IsHumanCheckRequired(Reply<bool>),
    IsAnyQueuedTask {
        user_id: String,
        reply: Reply<bool>,
    },
    QueuedEntityIds {
        lane: Lane,
        reply: Reply<HashSet<String>>,
    },
    CheckQueueStatus(Reply<QueueStatus>),
    Snapshot {
        lane: Lane,
        reply: Reply<Vec<Task>>,
    },
    Finished {
        lane: Lane,
        task: Task,
        result: Result<(), TaskFailure>,
    },
    RetryReady(Lane),
    BudgetDeadline(u64),
    Shutdown(Reply<()>),
}

#[derive(Debug)]
struct LaneSlot {
    store: PersistentQueue,
    /// Dispatched task, including one waiting out its retry backoff.
    in_flight: Option<TaskId>,
    /// Set by a connection issue, cleared by reachability or foreground.
    /// A sign-out at the head still runs.
    paused: bool,
}

impl LaneSlot {
    fn new(store: PersistentQueue) -> Self {
        Self {
            store,
            in_flight: None,
            paused: false,
        }
    }
}

/// Owns both lanes and every piece of dispatch state. Runs on its own tokio
/// task and only reacts to `Command`s, so no state is ever shared.
pub(crate) struct Engine {
    primary: LaneSlot,
    secondary: LaneSlot,
    reads: VecDeque<ReadJob>,
    handlers: HandlerRegistry,
    retries: HashMap<TaskId, u32>,
    policy: ResultPolicy,
    settings: QueueSettings,
    status: QueueStatus,
    network_reachable: bool,
    human_check_required: bool,
    budget: Option<BackgroundBudget>,
    budget_serial: u64,
    restart_head: Option<TaskId>,
    events: broadcast::Sender<QueueEvent>,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Engine {
    pub(crate) fn new(
        lanes: QueueLanes,
        handlers: HandlerRegistry,
        settings: QueueSettings,
        events: broadcast::Sender<QueueEvent>,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        let QueueLanes { primary, secondary } = lanes;
        let restart_head = primary
            .next()
            .filter(|head| settings.fetch_detail_after_restart && head.action().is_upload())
            .map(|head| head.id());
        let status = if primary.is_empty() && secondary.is_empty() {
            QueueStatus::Idle
        } else {
            QueueStatus::Running
        };
        tracing::info!(
            primary = primary.len(),
            secondary = secondary.len(),
            handlers = handlers.len(),
            "queue manager started"
        );

        Self {
            primary: LaneSlot::new(primary),
            secondary: LaneSlot::new(secondary),
            reads: VecDeque::new(),
            handlers,
            retries: HashMap::new(),
            policy: ResultPolicy::new(settings.max_server_retries),
            settings,
            status,
            network_reachable: true,
            human_check_required: false,
            budget: None,
            budget_serial: 0,
            restart_head,
            events,
            commands,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            if let Command::Shutdown(reply) = command {
                self.stop();
                let _ = reply.send(());
                return;
            }
            self.handle(command);
        }
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(mut budget) = self.budget.take() {
            budget.complete(BackgroundOutcome::Cancelled);
        }
        tracing::info!(
            primary = self.primary.store.len(),
            secondary = self.secondary.store.len(),
            "queue manager stopped"
        );
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::AddTask {
                task,
                auto_execute,
                reply,
            } => {
                let admitted = self.add_task(task, auto_execute);
                let _ = reply.send(admitted);
            }
            Command::QueueRead(job) => {
                self.reads.push_back(job);
                self.dequeue_if_needed();
            }
            Command::RegisterHandler(handler) => {
                tracing::info!(user_id = handler.user_id(), "handler registered");
                self.handlers.register(handler);
                self.dequeue_if_needed();
            }
            Command::UnregisterHandler(user_id) => {
                if self.handlers.unregister(&user_id).is_some() {
                    tracing::info!(%user_id, "handler unregistered");
                }
            }
            Command::BackgroundFetch(budget) => {
                if let Some(mut previous) = self.budget.replace(budget) {
                    previous.complete(BackgroundOutcome::Cancelled);
                }
                self.budget_serial += 1;
                self.schedule_budget_check();
                self.dequeue_if_needed();
            }
            Command::EnterForeground => {
                if let Some(mut budget) = self.budget.take() {
                    budget.complete(BackgroundOutcome::Foregrounded);
                }
                self.resume_lanes();
                self.dequeue_if_needed();
            }
            Command::RemoveAllTasks {
                entity_id,
                actions,
                reply,
            } => {
                let removed = self.remove_where(|task| {
                    task.entity_id() == entity_id && actions.contains(&task.action())
                });
                let _ = reply.send(removed);
                self.dequeue_if_needed();
            }
            Command::DeleteAllQueuedTasks { user_id, reply } => {
                let removed = self.remove_where(|task| task.user_id() == user_id);
                tracing::info!(%user_id, removed, "deleted queued tasks for user");
                let _ = reply.send(removed);
                self.dequeue_if_needed();
            }
            Command::ClearAll(reply) => {
                self.primary.store.clear_all();
                self.secondary.store.clear_all();
                self.retries.clear();
                tracing::info!("cleared both lanes");
                let _ = reply.send(());
                self.dequeue_if_needed();
            }
            Command::SetNetworkReachable(reachable) => {
                self.network_reachable = reachable;
                tracing::debug!(reachable, "network reachability changed");
                if reachable {
                    self.resume_lanes();
                    self.dequeue_if_needed();
                }
            }
            Command::SetHumanCheckRequired(required) => {
                self.human_check_required = required;
                if !required {
                    tracing::info!("human verification cleared, resuming");
                    self.dequeue_if_needed();
                }
            }
            Command::IsHumanCheckRequired(reply) => {
                let _ = reply.send(self.human_check_required);
            }
            Command::IsAnyQueuedTask { user_id, reply } => {
                let queued = [&self.primary, &self.secondary]
                    .iter()
                    .any(|slot| slot.store.snapshot().iter().any(|t| t.user_id() == user_id));
                let _ = reply.send(queued);
            }
            Command::QueuedEntityIds { lane, reply } => {
                let ids = self
                    .slot(lane)
                    .store
                    .snapshot()
                    .into_iter()
                    .filter(|task| !task.entity_id().is_empty())
                    .map(|task| task.entity_id().to_string())
                    .collect();
                let _ = reply.send(ids);
            }
            Command::CheckQueueStatus(reply) => {
                self.refresh_status();
                let _ = reply.send(self.status);
            }
            Command::Snapshot { lane, reply } => {
                let _ = reply.send(self.slot(lane).store.snapshot());
            }
            Command::Finished { lane, task, result } => self.finish(lane, task, result),
            Command::RetryReady(lane) => {
                self.slot_mut(lane).in_flight = None;
                self.dequeue_if_needed();
            }
            Command::BudgetDeadline(serial) => self.check_budget(serial),
            Command::Shutdown(_) => unreachable!("shutdown is handled by the run loop"),
        }
    }

    fn slot(&self, lane: Lane) -> &LaneSlot {
        match lane {
            Lane::Primary => &self.primary,
            Lane::Secondary => &self.secondary,
        }
    }

    fn slot_mut(&mut self, lane: Lane) -> &mut LaneSlot {
        match lane {
            Lane::Primary => &mut self.primary,
            Lane::Secondary => &mut self.secondary,
        }
    }

    fn add_task(&mut self, task: Task, auto_execute: bool) -> Result<(), QueueError> {
        if task.user_id().is_empty() {
            return Err(QueueError::InvalidTask(format!(
                "task {} has no user id",
                task.id()
            )));
        }
        if self.primary.store.contains(task.id()) || self.secondary.store.contains(task.id()) {
            return Err(QueueError::InvalidTask(format!(
                "task {} is already queued",
                task.id()
            )));
        }

        match task.action().placement() {
            Placement::Lane(Lane::Primary) => {
                let dependencies = self
                    .primary
                    .store
                    .snapshot()
                    .iter()
                    .filter(|pending| pending.same_entity(&task))
                    .map(Task::id)
                    .collect::<Vec<_>>();
                tracing::debug!(
                    task_id = %task.id(),
                    action = %task.action(),
                    dependencies = dependencies.len(),
                    "queued primary task"
                );
                self.primary.store.add(task.with_dependencies(dependencies));
            }
            Placement::Lane(Lane::Secondary) => {
                tracing::debug!(task_id = %task.id(), action = %task.action(), "queued secondary task");
                self.secondary.store.add(task.with_dependencies(Vec::new()));
            }
            Placement::SignOut => self.admit_sign_out(task),
            Placement::SignIn => self.admit_sign_in(task.user_id()),
            Placement::Rejected => return Err(QueueError::UnsupportedAction(task.action())),
        }

        if auto_execute {
            self.dequeue_if_needed();
        } else {
            self.refresh_status();
        }
        Ok(())
    }

    /// A sign-out supersedes everything its user still has queued and runs
    /// from the head of both lanes.
    fn admit_sign_out(&mut self, task: Task) {
        let user_id = task.user_id().to_string();
        let purged = self.remove_where(|pending| pending.user_id() == user_id);
        self.primary.store.insert(task.clone(), 0);
        self.secondary.store.insert(task.with_fresh_id(), 0);
        tracing::info!(%user_id, purged, "sign-out queued ahead of pending work");
    }

    fn admit_sign_in(&mut self, user_id: &str) {
        for lane in Lane::ALL {
            let slot = self.slot(lane);
            let pending = slot.store.snapshot().into_iter().find(|pending| {
                pending.action() == ActionKind::SignOut
                    && pending.user_id() == user_id
                    && slot.in_flight != Some(pending.id())
            });
            if let Some(sign_out) = pending {
                slot.store.remove(sign_out.id());
                tracing::info!(%user_id, %lane, "sign-in withdrew pending sign-out");
            }
        }
    }

    fn remove_where(&mut self, doomed: impl Fn(&Task) -> bool) -> usize {
        let mut removed = 0;
        for lane in Lane::ALL {
            for task in self.slot(lane).store.snapshot() {
                if doomed(&task) {
                    self.forget(lane, task.id());
                    removed += 1;
                }
            }
        }
        removed
    }

    fn forget(&mut self, lane: Lane, id: TaskId) {
        self.slot(lane).store.remove(id);
        self.retries.remove(&id);
    }

    fn resume_lanes(&mut self) {
        self.primary.paused = false;
        self.secondary.paused = false;
    }

    /// Recomputes the status and returns true while there is work left.
    fn refresh_status(&mut self) -> bool {
        let empty =
            self.primary.store.is_empty() && self.secondary.store.is_empty() && self.reads.is_empty();
        if !empty {
            self.status = QueueStatus::Running;
            return true;
        }

        if self.status == QueueStatus::Running {
            self.status = QueueStatus::Idle;
            tracing::info!("queue drained");
            let _ = self.events.send(QueueEvent::QueueEmpty);
        }
        if let Some(budget) = self.budget.as_mut() {
            budget.complete(BackgroundOutcome::Drained);
        }
        false
    }

    fn allowed_to_dequeue(&mut self) -> bool {
        let nothing_in_flight = self.primary.in_flight.is_none() && self.secondary.in_flight.is_none();
        let threshold = self.settings.background_threshold;
        let Some(budget) = self.budget.as_mut() else {
            return true;
        };
        if !budget.is_exhausted(threshold) {
            return true;
        }
        if nothing_in_flight {
            budget.complete(BackgroundOutcome::TimeExceeded);
        }
        false
    }

    /// Wakes the engine once the budget is predicted to run low, so an
    /// exhausted run is reported even when no other command arrives.
    fn schedule_budget_check(&self) {
        let Some(budget) = self.budget.as_ref().filter(|budget| budget.is_pending()) else {
            return;
        };
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let delay = budget
            .time_until_exhausted(self.settings.background_threshold)
            .max(BUDGET_RECHECK);
        let serial = self.budget_serial;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(Command::BudgetDeadline(serial));
        });
    }

    fn check_budget(&mut self, serial: u64) {
        if serial != self.budget_serial {
            return;
        }
        let Some(budget) = self.budget.as_ref().filter(|budget| budget.is_pending()) else {
            return;
        };
        if budget.is_exhausted(self.settings.background_threshold) {
            self.allowed_to_dequeue();
        } else {
            self.schedule_budget_check();
        }
    }

    fn dequeue_if_needed(&mut self) {
        if !self.refresh_status() || !self.allowed_to_dequeue() {
            return;
        }
        if !self.network_reachable {
            tracing::debug!("network unreachable, holding lanes");
            return;
        }

        self.apply_restart_guard();
        for lane in Lane::ALL {
            self.dequeue_lane(lane);
        }
        self.drain_reads();
    }

    /// An upload restored from disk may already have reached the server, so
    /// the message detail is refreshed before it runs again.
    fn apply_restart_guard(&mut self) {
        let Some(restored) = self.restart_head.take() else {
            return;
        };
        if self.primary.in_flight.is_some() {
            return;
        }
        let Some(head) = self.primary.store.next() else {
            return;
        };
        if head.id() != restored {
            return;
        }

        let mut fetch = Task::new(head.entity_id(), ActionKind::FetchDetail, head.user_id());
        if head.is_bulk_entity() {
            fetch = fetch.for_bulk_entity();
        }
        tracing::info!(
            entity_id = head.entity_id(),
            task_id = %head.id(),
            "refreshing detail before restored upload"
        );
        self.primary.store.insert(fetch, 0);
    }

    fn dequeue_lane(&mut self, lane: Lane) {
        loop {
            if self.human_check_required || !self.allowed_to_dequeue() {
                return;
            }
            let slot = self.slot(lane);
            if slot.in_flight.is_some() {
                return;
            }
            let Some(task) = slot.store.next() else {
                return;
            };
            if slot.paused && task.action() != ActionKind::SignOut {
                return;
            }

            if !task.dependency_ids().is_empty() {
                tracing::warn!(
                    task_id = %task.id(),
                    action = %task.action(),
                    entity_id = task.entity_id(),
                    "prerequisite is gone, dropping the entity's chain"
                );
                self.drop_entity_chain(lane, &task);
                continue;
            }
            if task.action() == ActionKind::Unsupported {
                tracing::warn!(task_id = %task.id(), "dropping task with unknown action");
                self.forget(lane, task.id());
                continue;
            }
            let Some(handler) = self.handlers.get(task.user_id()) else {
                tracing::debug!(
                    task_id = %task.id(),
                    user_id = task.user_id(),
                    "no handler for task owner, dropping"
                );
                self.forget(lane, task.id());
                continue;
            };
            if task.action() == ActionKind::SignOut && self.sign_out_runs_elsewhere(lane, &task) {
                tracing::debug!(user_id = task.user_id(), %lane, "sign-out runs on the other lane");
                self.forget(lane, task.id());
                continue;
            }

            self.dispatch(lane, task, handler);
            return;
        }
    }

    /// The other lane's copy takes over when that copy is already running or
    /// the other lane is free to start it.
    fn sign_out_runs_elsewhere(&self, lane: Lane, sign_out: &Task) -> bool {
        let other = self.slot(lane.other());
        other.store.snapshot().iter().any(|task| {
            task.action() == ActionKind::SignOut
                && task.user_id() == sign_out.user_id()
                && (other.in_flight.is_none() || other.in_flight == Some(task.id()))
        })
    }

    fn dispatch(&mut self, lane: Lane, task: Task, handler: Arc<dyn QueueHandler>) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        self.slot_mut(lane).in_flight = Some(task.id());
        tracing::debug!(%lane, task_id = %task.id(), action = %task.action(), "dispatching task");

        let timeout = self.settings.handler_timeout;
        tokio::spawn(async move {
            let result = run_handler(handler, task.clone(), timeout).await;
            let _ = commands.send(Command::Finished { lane, task, result });
        });
    }

    fn drain_reads(&mut self) {
        if !self.primary.store.is_empty() || !self.secondary.store.is_empty() {
            return;
        }
        if !self.reads.is_empty() {
            tracing::debug!(reads = self.reads.len(), "running deferred reads");
        }
        for job in self.reads.drain(..) {
            tokio::spawn(job);
        }
        self.refresh_status();
    }

    fn finish(&mut self, lane: Lane, task: Task, result: Result<(), TaskFailure>) {
        self.slot_mut(lane).in_flight = None;
        if task.action() == ActionKind::SignOut && self.handlers.unregister(task.user_id()).is_some()
        {
            tracing::info!(user_id = task.user_id(), "sign-out dispatched, handler released");
        }

        if !self.slot(lane).store.contains(task.id()) {
            tracing::debug!(task_id = %task.id(), "task left its lane while in flight");
            self.retries.remove(&task.id());
            self.dequeue_if_needed();
            return;
        }

        let retry_count = self.retries.get(&task.id()).copied().unwrap_or(0);
        let outcome = self.policy.classify(&task, &result, retry_count);
        if let Err(failure) = &result {
            tracing::warn!(
                %lane,
                task_id = %task.id(),
                action = %task.action(),
                disposition = ?outcome.disposition,
                "task failed: {failure}"
            );
        }
        self.announce(outcome.error_kind);

        match outcome.disposition {
            Disposition::None => {
                self.resolve(lane, &task);
                if task.action().is_destructive() {
                    self.confirm(task);
                }
            }
            Disposition::CheckDependents => self.resolve(lane, &task),
            Disposition::CascadeDrop => self.cascade(lane, &task),
            Disposition::DropEntity => self.drop_entity_chain(lane, &task),
            Disposition::ConnectionIssue => {
                if task.action() == ActionKind::SignOut {
                    self.forget(lane, task.id());
                }
                if outcome.error_kind == Some(ErrorKind::HumanVerification) {
                    self.raise_human_check();
                } else {
                    self.slot_mut(lane).paused = true;
                }
            }
            Disposition::Retry => {
                self.retries.insert(task.id(), outcome.retry_count);
                self.schedule_retry(lane, task.id(), outcome.retry_count);
            }
        }

        self.dequeue_if_needed();
    }

    /// Holds the lane on `id` until the backoff for `attempt` has passed.
    fn schedule_retry(&mut self, lane: Lane, id: TaskId, attempt: u32) {
        let delay = self.settings.backoff_for(attempt);
        tracing::debug!(%lane, task_id = %id, attempt, ?delay, "retrying after backoff");
        if delay.is_zero() {
            return;
        }
        let Some(commands) = self.commands.upgrade() else {
            return;
        };

        self.slot_mut(lane).in_flight = Some(id);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(Command::RetryReady(lane));
        });
    }

    /// Removes `task` and releases whatever was waiting on it.
    fn resolve(&mut self, lane: Lane, task: &Task) {
        let store = &self.slot(lane).store;
        for pending in store.snapshot() {
            if pending.depends_on(task.id()) {
                store.update(pending.without_dependency(task.id()));
            }
        }
        self.forget(lane, task.id());
    }

    /// Removes `task` and, transitively, every task depending on it.
    fn cascade(&mut self, lane: Lane, task: &Task) {
        let pending = self.slot(lane).store.snapshot();
        let mut doomed = vec![task.id()];
        let mut frontier = vec![task.id()];
        while let Some(id) = frontier.pop() {
            for dependent in pending.iter().filter(|p| p.depends_on(id)) {
                if !doomed.contains(&dependent.id()) {
                    doomed.push(dependent.id());
                    frontier.push(dependent.id());
                }
            }
        }

        tracing::info!(
            task_id = %task.id(),
            dependents = doomed.len() - 1,
            "dropped task and its dependents"
        );
        for id in doomed.into_iter().rev() {
            self.forget(lane, id);
        }
    }

    fn drop_entity_chain(&mut self, lane: Lane, task: &Task) {
        let in_flight = self.slot(lane).in_flight;
        let doomed = self
            .slot(lane)
            .store
            .snapshot()
            .into_iter()
            .filter(|pending| {
                pending.id() == task.id()
                    || (pending.same_entity(task)
                        && pending.action().is_prerequisite_chain()
                        && in_flight != Some(pending.id()))
            })
            .map(|pending| pending.id())
            .collect::<Vec<_>>();
        for id in doomed {
            self.forget(lane, id);
        }
    }

    fn confirm(&self, task: Task) {
        let Some(handler) = self.handlers.get(task.user_id()) else {
            return;
        };
        tokio::spawn(async move {
            handler.apply_confirmed(&task).await;
        });
    }

    fn announce(&self, kind: Option<ErrorKind>) {
        let event = match kind {
            Some(ErrorKind::Transport(TransportFailure::TimedOut)) => QueueEvent::ConnectionTimedOut,
            Some(ErrorKind::Transport(_)) => QueueEvent::ConnectionLost,
            _ => return,
        };
        let _ = self.events.send(event);
    }

    fn raise_human_check(&mut self) {
        if self.human_check_required {
            return;
        }
        self.human_check_required = true;
        tracing::warn!("server requires human verification, freezing lanes");
        let _ = self.events.send(QueueEvent::HumanCheckRequired);
    }
}

/// Runs one handler call on its own task so a panic or a hang cannot take
/// the engine down with it.
async fn run_handler(
    handler: Arc<dyn QueueHandler>,
    task: Task,
    timeout: Option<Duration>,
) -> Result<(), TaskFailure> {
    let mut worker = tokio::spawn(async move { handler.handle_task(&task).await });
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut worker).await {
            Ok(joined) => joined,
            Err(_) => {
                worker.abort();
                return Err(TaskFailure::Transport(TransportFailure::TimedOut));
            }
        },
        None => worker.await,
    };
    joined.unwrap_or_else(|err| Err(TaskFailure::Internal(format!("handler task failed: {err}"))))
}
