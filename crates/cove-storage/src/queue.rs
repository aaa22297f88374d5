use crate::format::{self, QueueRecord};
use crate::StorageError;
use cove_core::{Lane, Task, TaskId};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;

const CACHEDIR_TAG: &str = "CACHEDIR.TAG";
const CACHEDIR_TAG_CONTENT: &str = "Signature: 8a477f597d28d172789f06886806bc55\n\
# This directory holds the Cove Mail offline queue.\n\
# Backup tools should not copy it.\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    Durable { directory: PathBuf },
    Ephemeral,
}

/// One lane of queued tasks.
///
/// Every mutation happens under the lane's lock and, for durable lanes, is
/// followed by a full rewrite of the lane file. A failed write is logged and
/// otherwise ignored: memory stays authoritative and the next successful
/// write catches the file up.
#[derive(Debug)]
pub struct PersistentQueue {
    lane: Lane,
    path: Option<PathBuf>,
    records: Mutex<Vec<QueueRecord>>,
}

impl PersistentQueue {
    pub fn open(
        lane: Lane,
        file_name: &str,
        persistence: &Persistence,
    ) -> Result<Self, StorageError> {
        let Persistence::Durable { directory } = persistence else {
            return Ok(Self::ephemeral(lane));
        };

        fs::create_dir_all(directory)?;
        exclude_from_backup(directory);

        let path = directory.join(file_name);
        let records = match fs::read(&path) {
            Ok(bytes) => format::decode(lane, &bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        tracing::debug!(
            lane = %lane,
            path = %path.display(),
            restored = records.len(),
            "opened lane"
        );

        Ok(Self {
            lane,
            path: Some(path),
            records: Mutex::new(records),
        })
    }

    pub fn ephemeral(lane: Lane) -> Self {
        Self {
            lane,
            path: None,
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, task: Task) -> TaskId {
        let id = task.id();
        self.mutate(|records| {
            records.push(QueueRecord::new(task));
            true
        });
        id
    }

    /// Inserts at `index`, clamped to the end of the lane.
    pub fn insert(&self, task: Task, index: usize) {
        self.mutate(|records| {
            let index = index.min(records.len());
            records.insert(index, QueueRecord::new(task));
            true
        });
    }

    /// Replaces the record with the task's id. Returns false when it is gone.
    pub fn update(&self, task: Task) -> bool {
        self.mutate(|records| {
            match records
                .iter_mut()
                .find(|record| record.element_id == task.id())
            {
                Some(record) => {
                    *record = QueueRecord::new(task);
                    true
                }
                None => false,
            }
        })
    }

    pub fn remove(&self, id: TaskId) -> bool {
        self.mutate(|records| {
            let before = records.len();
            records.retain(|record| record.element_id != id);
            records.len() != before
        })
    }

    pub fn next(&self) -> Option<Task> {
        self.lock().first().map(|record| record.object.clone())
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.lock().iter().any(|record| record.element_id == id)
    }

    pub fn clear_all(&self) {
        self.mutate(|records| {
            records.clear();
            true
        });
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.lock()
            .iter()
            .map(|record| record.object.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<QueueRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate(&self, change: impl FnOnce(&mut Vec<QueueRecord>) -> bool) -> bool {
        let mut records = self.lock();
        let changed = change(&mut records);
        if changed {
            self.write(&records);
        }
        changed
    }

    fn write(&self, records: &[QueueRecord]) {
        let Some(path) = &self.path else {
            return;
        };
        let written =
            format::encode(self.lane, records).and_then(|bytes| write_atomically(path, &bytes));
        if let Err(err) = written {
            tracing::warn!(
                lane = %self.lane,
                path = %path.display(),
                "failed to persist lane, keeping in-memory state: {err}"
            );
        }
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(directory)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path)?;
    Ok(())
}

fn exclude_from_backup(directory: &Path) {
    let tag = directory.join(CACHEDIR_TAG);
    if tag.exists() {
        return;
    }
    if let Err(err) = fs::write(&tag, CACHEDIR_TAG_CONTENT) {
        tracing::warn!(path = %tag.display(), "failed to mark queue directory as cache: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cove_core::ActionKind;

    const FILE: &str = "lane.json";

    fn durable(dir: &Path) -> Persistence {
        Persistence::Durable {
            directory: dir.to_path_buf(),
        }
    }

    #[test]
    fn reopened_lane_has_every_added_task_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue =
            PersistentQueue::open(Lane::Primary, FILE, &durable(dir.path())).expect("open");

        let save = Task::new("msg-1", ActionKind::SaveDraft, "user-1");
        let upload = Task::new("msg-1", ActionKind::UploadAttachment, "user-1");
        let fetch = Task::new("msg-1", ActionKind::FetchDetail, "user-1");
        queue.add(save.clone());
        queue.add(upload.clone());
        queue.insert(fetch.clone(), 0);
        drop(queue);

        let reopened =
            PersistentQueue::open(Lane::Primary, FILE, &durable(dir.path())).expect("reopen");
        assert_eq!(reopened.snapshot(), vec![fetch, save, upload]);
    }

    #[test]
    fn removal_and_updates_reach_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue =
            PersistentQueue::open(Lane::Primary, FILE, &durable(dir.path())).expect("open");

        let save = Task::new("msg-1", ActionKind::SaveDraft, "user-1");
        let send =
            Task::new("msg-1", ActionKind::Send, "user-1").with_dependencies(vec![save.id()]);
        queue.add(save.clone());
        queue.add(send.clone());

        assert!(queue.update(send.without_dependency(save.id())));
        assert!(queue.remove(save.id()));
        assert!(!queue.remove(save.id()));
        assert!(!queue.contains(save.id()));

        let reopened =
            PersistentQueue::open(Lane::Primary, FILE, &durable(dir.path())).expect("reopen");
        let tasks = reopened.snapshot();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].dependency_ids().is_empty());
    }

    #[test]
    fn update_of_missing_task_changes_nothing() {
        let queue = PersistentQueue::ephemeral(Lane::Secondary);
        assert!(!queue.update(Task::new("m", ActionKind::Read, "u")));
        assert!(queue.is_empty());
    }

    #[test]
    fn insert_past_the_end_appends() {
        let queue = PersistentQueue::ephemeral(Lane::Secondary);
        let first = Task::new("a", ActionKind::Read, "u");
        let second = Task::new("b", ActionKind::Read, "u");
        queue.add(first.clone());
        queue.insert(second.clone(), 10);
        assert_eq!(queue.next(), Some(first));
        assert_eq!(queue.snapshot().last(), Some(&second));
    }

    #[test]
    fn clear_all_empties_the_file_too() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue =
            PersistentQueue::open(Lane::Secondary, FILE, &durable(dir.path())).expect("open");
        queue.add(Task::new("a", ActionKind::Delete, "u"));
        queue.clear_all();
        assert_eq!(queue.len(), 0);

        let reopened =
            PersistentQueue::open(Lane::Secondary, FILE, &durable(dir.path())).expect("reopen");
        assert!(reopened.is_empty());
    }

    #[test]
    fn ephemeral_lane_never_touches_disk() {
        let queue =
            PersistentQueue::open(Lane::Primary, FILE, &Persistence::Ephemeral).expect("open");
        queue.add(Task::new("a", ActionKind::SaveDraft, "u"));
        assert!(queue.path.is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn failed_write_keeps_memory_authoritative() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lane_dir = dir.path().join("lanes");
        let queue =
            PersistentQueue::open(Lane::Primary, FILE, &durable(&lane_dir)).expect("open");

        fs::remove_dir_all(&lane_dir).expect("lane dir removed");
        fs::write(&lane_dir, b"not a directory").expect("blocking file written");

        let task = Task::new("a", ActionKind::SaveDraft, "u");
        let id = queue.add(task.clone());
        assert_eq!(id, task.id());
        assert!(queue.contains(id));
        assert_eq!(queue.snapshot(), vec![task]);
    }

    #[test]
    fn queue_directory_is_tagged_for_backup_tools() {
        let dir = tempfile::tempdir().expect("tempdir");
        PersistentQueue::open(Lane::Primary, FILE, &durable(dir.path())).expect("open");
        let tag = fs::read_to_string(dir.path().join(CACHEDIR_TAG)).expect("tag written");
        assert!(tag.starts_with("Signature: 8a477f597d28d172789f06886806bc55"));
    }

    #[test]
    fn unknown_actions_survive_a_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let raw = serde_json::json!({
            "format_version": 1,
            "lane": "secondary",
            "records": [{
                "element_id": "0b7f3a52-8a43-4d0c-9f36-0f6b1d0b7a11",
                "object": {
                    "id": "0b7f3a52-8a43-4d0c-9f36-0f6b1d0b7a11",
                    "entity_id": "conv-1",
                    "action": "snooze",
                    "user_id": "u",
                    "created_at": "2024-05-01T10:00:00Z"
                }
            }]
        });
        fs::write(dir.path().join(FILE), raw.to_string()).expect("lane file written");

        let queue =
            PersistentQueue::open(Lane::Secondary, FILE, &durable(dir.path())).expect("open");
        let head = queue.next().expect("head present");
        assert_eq!(head.action(), ActionKind::Unsupported);
    }
}
