use cove_config::{StorageConfig, StorageMode};
use cove_core::Lane;
use cove_storage::{Persistence, PersistentQueue, StorageError};
use std::path::Path;

/// The two lanes a manager drains.
#[derive(Debug)]
pub struct QueueLanes {
    pub primary: PersistentQueue,
    pub secondary: PersistentQueue,
}

impl QueueLanes {
    pub fn open(storage: &StorageConfig, queue_dir: &Path) -> Result<Self, StorageError> {
        let persistence = match storage.mode {
            StorageMode::Durable => Persistence::Durable {
                directory: queue_dir.to_path_buf(),
            },
            StorageMode::Ephemeral => Persistence::Ephemeral,
        };

        Ok(Self {
            primary: PersistentQueue::open(Lane::Primary, &storage.primary_lane_file, &persistence)?,
            secondary: PersistentQueue::open(
                Lane::Secondary,
                &storage.secondary_lane_file,
                &persistence,
            )?,
        })
    }

    pub fn ephemeral() -> Self {
        Self {
            primary: PersistentQueue::ephemeral(Lane::Primary),
            secondary: PersistentQueue::ephemeral(Lane::Secondary),
        }
    }

    pub fn get(&self, lane: Lane) -> &PersistentQueue {
        match lane {
            Lane::Primary => &self.primary,
            Lane::Secondary => &self.secondary,
        }
    }
}
