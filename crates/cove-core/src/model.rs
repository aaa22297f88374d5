use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type TaskId = Uuid;

/// Which of the two persistent lanes a task lives in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Entity-ordered work with dependencies: drafts, attachments, sending.
    Primary,
    /// Independent bulk actions on messages, labels and folders.
    Secondary,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Primary, Lane::Secondary];

    pub fn other(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SaveDraft,
    UploadAttachment,
    UploadPubkey,
    DeleteAttachment,
    Send,
    Read,
    Unread,
    Delete,
    Empty,
    Label,
    Unlabel,
    MoveToFolder,
    UpdateLabel,
    CreateLabel,
    DeleteLabel,
    SignOut,
    SignIn,
    FetchDetail,
    /// Action name written by a release this build does not know about.
    #[serde(other)]
    Unsupported,
}

/// Where admission routes an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Lane(Lane),
    SignOut,
    SignIn,
    Rejected,
}

impl ActionKind {
    /// Actions that cannot outlive a failed prerequisite on the same entity.
    pub const PREREQUISITE_CHAIN: [ActionKind; 5] = [
        ActionKind::SaveDraft,
        ActionKind::UploadAttachment,
        ActionKind::UploadPubkey,
        ActionKind::DeleteAttachment,
        ActionKind::Send,
    ];

    pub fn placement(self) -> Placement {
        match self {
            Self::SaveDraft
            | Self::UploadAttachment
            | Self::UploadPubkey
            | Self::DeleteAttachment
            | Self::Send
            | Self::FetchDetail => Placement::Lane(Lane::Primary),
            Self::Read
            | Self::Unread
            | Self::Delete
            | Self::Empty
            | Self::Label
            | Self::Unlabel
            | Self::MoveToFolder
            | Self::UpdateLabel
            | Self::CreateLabel
            | Self::DeleteLabel => Placement::Lane(Lane::Secondary),
            Self::SignOut => Placement::SignOut,
            Self::SignIn => Placement::SignIn,
            Self::Unsupported => Placement::Rejected,
        }
    }

    pub fn is_prerequisite_chain(self) -> bool {
        Self::PREREQUISITE_CHAIN.contains(&self)
    }

    pub fn is_upload(self) -> bool {
        matches!(self, Self::UploadAttachment | Self::UploadPubkey)
    }

    /// Actions whose local effect is only applied once the server confirmed them.
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            Self::Delete | Self::Empty | Self::DeleteLabel | Self::DeleteAttachment
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SaveDraft => "save_draft",
            Self::UploadAttachment => "upload_attachment",
            Self::UploadPubkey => "upload_pubkey",
            Self::DeleteAttachment => "delete_attachment",
            Self::Send => "send",
            Self::Read => "read",
            Self::Unread => "unread",
            Self::Delete => "delete",
            Self::Empty => "empty",
            Self::Label => "label",
            Self::Unlabel => "unlabel",
            Self::MoveToFolder => "move_to_folder",
            Self::UpdateLabel => "update_label",
            Self::CreateLabel => "create_label",
            Self::DeleteLabel => "delete_label",
            Self::SignOut => "sign_out",
            Self::SignIn => "sign_in",
            Self::FetchDetail => "fetch_detail",
            Self::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued unit of work.
///
/// Tasks are values: the queue never edits one in place. The only thing that
/// changes over a task's life is its dependency list, which shrinks as
/// prerequisites complete; each change produces a new value that replaces
/// the stored record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    id: TaskId,
    entity_id: String,
    action: ActionKind,
    user_id: String,
    #[serde(default)]
    dependency_ids: Vec<TaskId>,
    #[serde(default)]
    is_bulk_entity: bool,
    #[serde(default)]
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        entity_id: impl Into<String>,
        action: ActionKind,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id: entity_id.into(),
            action,
            user_id: user_id.into(),
            dependency_ids: Vec::new(),
            is_bulk_entity: false,
            payload: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn sign_out(user_id: impl Into<String>) -> Self {
        Self::new("", ActionKind::SignOut, user_id)
    }

    pub fn sign_in(user_id: impl Into<String>) -> Self {
        Self::new("", ActionKind::SignIn, user_id)
    }

    /// Marks the entity id as a conversation rather than a single message.
    pub fn for_bulk_entity(mut self) -> Self {
        self.is_bulk_entity = true;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_dependencies(mut self, dependency_ids: Vec<TaskId>) -> Self {
        self.dependency_ids = dependency_ids;
        self
    }

    /// Same task under a fresh id, used for the second lane's sign-out copy.
    pub fn with_fresh_id(mut self) -> Self {
        self.id = Uuid::new_v4();
        self
    }

    pub fn without_dependency(&self, dependency: TaskId) -> Self {
        let mut next = self.clone();
        next.dependency_ids.retain(|id| *id != dependency);
        next
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn action(&self) -> ActionKind {
        self.action
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn dependency_ids(&self) -> &[TaskId] {
        &self.dependency_ids
    }

    pub fn depends_on(&self, id: TaskId) -> bool {
        self.dependency_ids.contains(&id)
    }

    pub fn is_bulk_entity(&self) -> bool {
        self.is_bulk_entity
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn same_entity(&self, other: &Task) -> bool {
        self.user_id == other.user_id && self.entity_id == other.entity_id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Idle,
    Running,
}
