use async_trait::async_trait;
use cove_core::{Task, TaskFailure};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Executes tasks for one signed-in user.
///
/// Exactly one handler is registered per user. The queue looks it up by the
/// task's `user_id` at dispatch time; tasks whose user has no handler are
/// dropped.
#[async_trait]
pub trait QueueHandler: Send + Sync {
    fn user_id(&self) -> &str;

    /// Performs the server call for `task`. Resolve every path: a handler that
    /// never returns holds its lane until the dispatch timeout fires.
    async fn handle_task(&self, task: &Task) -> Result<(), TaskFailure>;

    /// Called after a destructive action succeeded, to apply the matching
    /// local change.
    async fn apply_confirmed(&self, _task: &Task) {}
}

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn QueueHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: Arc<dyn QueueHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Replaces any handler previously registered for the same user.
    pub fn register(&mut self, handler: Arc<dyn QueueHandler>) -> Option<Arc<dyn QueueHandler>> {
        self.handlers.insert(handler.user_id().to_string(), handler)
    }

    pub fn unregister(&mut self, user_id: &str) -> Option<Arc<dyn QueueHandler>> {
        self.handlers.remove(user_id)
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<dyn QueueHandler>> {
        self.handlers.get(user_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop(&'static str);

    #[async_trait]
    impl QueueHandler for Noop {
        fn user_id(&self) -> &str {
            self.0
        }

        async fn handle_task(&self, _task: &Task) -> Result<(), TaskFailure> {
            Ok(())
        }
    }

    #[test]
    fn one_handler_per_user() {
        let mut registry = HandlerRegistry::new().with(Arc::new(Noop("user-1")));
        assert!(registry.register(Arc::new(Noop("user-1"))).is_some());
        assert!(registry.register(Arc::new(Noop("user-2"))).is_none());
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister("user-1").is_some());
        assert!(registry.get("user-1").is_none());
        assert!(registry.get("user-2").is_some());
    }
}
