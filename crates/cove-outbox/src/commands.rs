use anyhow::{Context, Result};
use cove_config::ConfigManager;
use cove_core::{Lane, Task};
use cove_queue::{HandlerRegistry, QueueManager};
use std::path::{Path, PathBuf};

/// Queue opened for maintenance: no handlers are registered and the network
/// is reported unreachable, so nothing is ever dispatched.
pub struct Outbox {
    manager: QueueManager,
    queue_dir: PathBuf,
}

impl Outbox {
    pub fn open(config_dir: Option<&Path>, data_dir: Option<&Path>) -> Result<Self> {
        let config_manager = match config_dir {
            Some(config_dir) => {
                ConfigManager::with_dirs(config_dir, data_dir.unwrap_or(config_dir))?
            }
            None => ConfigManager::new()?,
        };
        let config = config_manager
            .load()
            .with_context(|| format!("failed to load {}", config_manager.config_path().display()))?;
        let queue_dir = config_manager.queue_dir(&config);

        let manager = QueueManager::from_config(&config, &queue_dir, HandlerRegistry::new())
            .with_context(|| format!("failed to open queue in {}", queue_dir.display()))?;
        manager.set_network_reachable(false)?;
        tracing::debug!(queue_dir = %queue_dir.display(), "opened queue for maintenance");

        Ok(Self { manager, queue_dir })
    }
}

pub async fn status(outbox: &Outbox) -> Result<()> {
    let status = outbox.manager.check_queue_status().await?;
    println!("queue:     {}", outbox.queue_dir.display());
    println!("status:    {status:?}");
    for lane in Lane::ALL {
        let tasks = outbox.manager.snapshot(lane).await?;
        println!("{:<10} {} task(s)", format!("{lane}:"), tasks.len());
    }
    outbox.manager.shutdown().await?;
    Ok(())
}

pub async fn list(outbox: &Outbox, lane: Option<Lane>, json: bool) -> Result<()> {
    let lanes = match lane {
        Some(lane) => vec![lane],
        None => Lane::ALL.to_vec(),
    };

    let mut listed = Vec::new();
    for lane in lanes {
        for task in outbox.manager.snapshot(lane).await? {
            listed.push((lane, task));
        }
    }

    if json {
        let tasks = listed
            .iter()
            .map(|(lane, task)| serde_json::json!({ "lane": lane, "task": task }))
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&tasks)?);
    } else if listed.is_empty() {
        println!("no queued tasks");
    } else {
        for (lane, task) in &listed {
            println!("{}", render_line(*lane, task));
        }
    }

    outbox.manager.shutdown().await?;
    Ok(())
}

pub async fn purge_user(outbox: &Outbox, user_id: &str) -> Result<()> {
    let removed = outbox.manager.delete_all_queued_tasks(user_id).await?;
    println!("removed {removed} task(s) for {user_id}");
    outbox.manager.shutdown().await?;
    Ok(())
}

pub async fn clear(outbox: &Outbox) -> Result<()> {
    outbox.manager.clear_all().await?;
    println!("cleared both lanes");
    outbox.manager.shutdown().await?;
    Ok(())
}

fn render_line(lane: Lane, task: &Task) -> String {
    let entity = if task.entity_id().is_empty() {
        "-"
    } else {
        task.entity_id()
    };
    format!(
        "{lane:<9} {id}  {action:<17} user={user} entity={entity} deps={deps} queued={queued}",
        lane = lane.as_str(),
        id = task.id(),
        action = task.action().as_str(),
        user = task.user_id(),
        deps = task.dependency_ids().len(),
        queued = task.created_at().format("%Y-%m-%d %H:%M:%S"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cove_core::ActionKind;

    fn open(root: &Path) -> Outbox {
        Outbox::open(Some(&root.join("config")), Some(&root.join("data"))).expect("outbox opened")
    }

    #[tokio::test]
    async fn purge_only_touches_the_named_user() {
        let root = tempfile::tempdir().expect("tempdir");
        let outbox = open(root.path());
        for (entity, user) in [("conv-1", "alice"), ("conv-2", "bob"), ("conv-3", "alice")] {
            outbox
                .manager
                .add_task(Task::new(entity, ActionKind::Read, user), true)
                .await
                .expect("task admitted");
        }

        purge_user(&outbox, "alice").await.expect("purged");

        let reopened = open(root.path());
        let left = reopened
            .manager
            .snapshot(Lane::Secondary)
            .await
            .expect("snapshot");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].user_id(), "bob");
    }

    #[tokio::test]
    async fn clear_empties_the_stored_lanes() {
        let root = tempfile::tempdir().expect("tempdir");
        let outbox = open(root.path());
        outbox
            .manager
            .add_task(Task::new("msg-1", ActionKind::SaveDraft, "alice"), true)
            .await
            .expect("task admitted");

        clear(&outbox).await.expect("cleared");

        let reopened = open(root.path());
        assert!(reopened
            .manager
            .snapshot(Lane::Primary)
            .await
            .expect("snapshot")
            .is_empty());
    }

    #[test]
    fn sign_out_lines_show_no_entity() {
        let line = render_line(Lane::Primary, &Task::sign_out("alice"));
        assert!(line.starts_with("primary"));
        assert!(line.contains("sign_out"));
        assert!(line.contains("entity=- "));
    }
}
