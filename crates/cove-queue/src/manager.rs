use crate::background::{BackgroundBudget, BackgroundCompletion, RemainingTime};
use crate::engine::{Command, Engine};
use crate::handler::{HandlerRegistry, QueueHandler};
use crate::lanes::QueueLanes;
use crate::{QueueError, QueueEvent, QueueSettings};
use cove_config::QueueConfig;
use cove_core::{ActionKind, Lane, QueueStatus, Task};
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

const EVENT_CAPACITY: usize = 64;

/// Handle to a running queue.
///
/// Cloning is cheap; every clone talks to the same engine task. Calls that
/// only change state return as soon as the command is queued, calls that
/// answer a question wait for the engine. Commands are applied in the order
/// they were sent.
#[derive(Debug, Clone)]
pub struct QueueManager {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<QueueEvent>,
}

impl QueueManager {
    /// Spawns the engine on the current tokio runtime.
    pub fn start(lanes: QueueLanes, handlers: HandlerRegistry, settings: QueueSettings) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let engine = Engine::new(lanes, handlers, settings, events.clone(), commands.downgrade());
        tokio::spawn(engine.run(rx));
        Self { commands, events }
    }

    pub fn from_config(
        config: &QueueConfig,
        queue_dir: &Path,
        handlers: HandlerRegistry,
    ) -> Result<Self, QueueError> {
        let lanes = QueueLanes::open(&config.storage, queue_dir)?;
        Ok(Self::start(
            lanes,
            handlers,
            QueueSettings::from(&config.dispatch),
        ))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Admits `task`. With `auto_execute` unset the task is only stored and
    /// runs on the next dequeue trigger.
    pub async fn add_task(&self, task: Task, auto_execute: bool) -> Result<(), QueueError> {
        self.request(|reply| Command::AddTask {
            task,
            auto_execute,
            reply,
        })
        .await?
    }

    /// Defers `job` until both lanes are empty.
    pub fn queue_read<F>(&self, job: F) -> Result<(), QueueError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.send(Command::QueueRead(Box::pin(job)))
    }

    pub fn register_handler(&self, handler: Arc<dyn QueueHandler>) -> Result<(), QueueError> {
        self.send(Command::RegisterHandler(handler))
    }

    pub fn unregister_handler(&self, user_id: impl Into<String>) -> Result<(), QueueError> {
        self.send(Command::UnregisterHandler(user_id.into()))
    }

    /// Starts a time-boxed drain. Dequeuing stops once `probe` reports less
    /// than the configured threshold.
    pub fn background_fetch(
        &self,
        probe: impl RemainingTime,
    ) -> Result<BackgroundCompletion, QueueError> {
        let (budget, completion) = BackgroundBudget::new(probe);
        self.send(Command::BackgroundFetch(budget))?;
        Ok(completion)
    }

    pub fn enter_foreground(&self) -> Result<(), QueueError> {
        self.send(Command::EnterForeground)
    }

    /// Removes queued tasks for `entity_id` whose action is in `actions`,
    /// from both lanes. Returns how many were removed.
    pub async fn remove_all_tasks(
        &self,
        entity_id: impl Into<String>,
        actions: &[ActionKind],
    ) -> Result<usize, QueueError> {
        let entity_id = entity_id.into();
        let actions = actions.to_vec();
        self.request(|reply| Command::RemoveAllTasks {
            entity_id,
            actions,
            reply,
        })
        .await
    }

    pub async fn delete_all_queued_tasks(
        &self,
        user_id: impl Into<String>,
    ) -> Result<usize, QueueError> {
        let user_id = user_id.into();
        self.request(|reply| Command::DeleteAllQueuedTasks { user_id, reply })
            .await
    }

    pub async fn clear_all(&self) -> Result<(), QueueError> {
        self.request(Command::ClearAll).await
    }

    pub async fn is_any_queued_task(&self, user_id: impl Into<String>) -> Result<bool, QueueError> {
        let user_id = user_id.into();
        self.request(|reply| Command::IsAnyQueuedTask { user_id, reply })
            .await
    }

    /// Entity ids with work pending in the primary lane.
    pub async fn queued_entity_ids(&self) -> Result<HashSet<String>, QueueError> {
        self.entity_ids(Lane::Primary).await
    }

    pub async fn queued_secondary_entity_ids(&self) -> Result<HashSet<String>, QueueError> {
        self.entity_ids(Lane::Secondary).await
    }

    pub async fn check_queue_status(&self) -> Result<QueueStatus, QueueError> {
        self.request(Command::CheckQueueStatus).await
    }

    pub async fn snapshot(&self, lane: Lane) -> Result<Vec<Task>, QueueError> {
        self.request(|reply| Command::Snapshot { lane, reply }).await
    }

    pub fn set_network_reachable(&self, reachable: bool) -> Result<(), QueueError> {
        self.send(Command::SetNetworkReachable(reachable))
    }

    pub fn set_human_check_required(&self, required: bool) -> Result<(), QueueError> {
        self.send(Command::SetHumanCheckRequired(required))
    }

    pub async fn is_human_check_required(&self) -> Result<bool, QueueError> {
        self.request(Command::IsHumanCheckRequired).await
    }

    /// Stops the engine. Dispatches still running finish on their own but
    /// their results are discarded.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        self.request(Command::Shutdown).await
    }

    async fn entity_ids(&self, lane: Lane) -> Result<HashSet<String>, QueueError> {
        self.request(|reply| Command::QueuedEntityIds { lane, reply })
            .await
    }

    fn send(&self, command: Command) -> Result<(), QueueError> {
        self.commands
            .send(command)
            .map_err(|_| QueueError::ManagerGone)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply))?;
        rx.await.map_err(|_| QueueError::ManagerGone)
    }
}
