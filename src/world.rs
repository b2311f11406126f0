use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::policy::{self, Denied, Operation};

// ── Entity types ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Which change a pending action would make once approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Update,
    Delete,
}

/// The fields a party may propose to change. Anything else in a client
/// patch (assignee, creator, ids) is refused at deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.due_date.is_none()
            && self.priority.is_none()
            && self.status.is_none()
    }

    pub fn validate(&self) -> Result<(), WorldError> {
        if self.is_empty() {
            return Err(WorldError::EmptyPatch);
        }
        if let Some(title) = &self.title {
            if title.trim().is_empty() {
                return Err(WorldError::InvalidField("title"));
            }
        }
        Ok(())
    }

    /// Copy every field present in the patch onto the task, and nothing else.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(due_date) = self.due_date {
            task.due_date = Some(due_date);
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    pub action: ActionKind,
    pub requested_by: Uuid,
    /// Proposed changes. Only set for updates.
    pub changes: Option<TaskPatch>,
    pub approved_by: Vec<Uuid>,
    pub requested_at: DateTime<Utc>,
}

/// A task tied to exactly two parties: whoever created it and whoever it
/// is assigned to. Names are denormalized at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub created_by: Uuid,
    pub created_by_name: String,
    pub assigned_to: Uuid,
    pub assigned_to_name: String,
    pub pending_action: Option<PendingAction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_party(&self, user_id: Uuid) -> bool {
        self.created_by == user_id || self.assigned_to == user_id
    }

    /// The other party. Creator ↔ assignee; None for outsiders.
    pub fn counterparty(&self, user_id: Uuid) -> Option<Uuid> {
        if user_id == self.created_by {
            Some(self.assigned_to)
        } else if user_id == self.assigned_to {
            Some(self.created_by)
        } else {
            None
        }
    }

    pub fn party_name(&self, user_id: Uuid) -> &str {
        if user_id == self.created_by {
            &self.created_by_name
        } else if user_id == self.assigned_to {
            &self.assigned_to_name
        } else {
            "someone"
        }
    }
}

/// Fields supplied when creating a task. The assignee is resolved
/// separately by username.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
}

// ── Commands ──────────────────────────────────────────────────

/// Something an authenticated user wants to happen to a task.
/// Validated and applied by World::apply, which returns the Event.
#[derive(Debug, Clone)]
pub enum Command {
    CreateTask {
        draft: NewTask,
        assignee: String,
    },
    RequestUpdate {
        task_id: Uuid,
        patch: TaskPatch,
    },
    RequestDelete {
        task_id: Uuid,
    },
    Reject {
        task_id: Uuid,
        action: ActionKind,
    },
    Approve {
        task_id: Uuid,
    },
}

impl Command {
    /// The existing task this command touches, if any.
    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            Command::CreateTask { .. } => None,
            Command::RequestUpdate { task_id, .. }
            | Command::RequestDelete { task_id }
            | Command::Reject { task_id, .. }
            | Command::Approve { task_id } => Some(*task_id),
        }
    }
}

// ── Events ────────────────────────────────────────────────────

/// What actually happened. Carries the task as it stands after the change
/// (or as it stood before removal, for an approved delete).
#[derive(Debug, Clone)]
pub enum Event {
    TaskCreated {
        task: Task,
    },
    ActionRequested {
        task: Task,
        action: ActionKind,
        requested_by: Uuid,
    },
    ActionRejected {
        task: Task,
        action: ActionKind,
        rejected_by: Uuid,
        requested_by: Uuid,
    },
    UpdateApproved {
        task: Task,
        approved_by: Uuid,
        requested_by: Uuid,
    },
    DeleteApproved {
        task: Task,
        approved_by: Uuid,
        requested_by: Uuid,
    },
}

impl Event {
    pub fn task(&self) -> &Task {
        match self {
            Event::TaskCreated { task }
            | Event::ActionRequested { task, .. }
            | Event::ActionRejected { task, .. }
            | Event::UpdateApproved { task, .. }
            | Event::DeleteApproved { task, .. } => task,
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    #[error("task not found")]
    TaskNotFound,

    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("only the creator or the assignee may act on this task")]
    NotAParty,

    #[error("you cannot resolve your own request")]
    OwnRequest,

    #[error(transparent)]
    AssignmentDenied(#[from] Denied),

    #[error("a {} request is already pending on this task", action_name(.0))]
    ActionPending(ActionKind),

    #[error("{}", nothing_pending_message(.0))]
    NothingPending(Option<ActionKind>),

    #[error("you have already approved this request")]
    AlreadyApproved,

    #[error("the patch contains no changes")]
    EmptyPatch,

    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    #[error("username already taken")]
    UsernameTaken,

    #[error("email already registered")]
    EmailTaken,
}

fn action_name(action: &ActionKind) -> &'static str {
    match action {
        ActionKind::Update => "update",
        ActionKind::Delete => "delete",
    }
}

fn nothing_pending_message(action: &Option<ActionKind>) -> &'static str {
    match action {
        Some(ActionKind::Update) => "no update request pending",
        Some(ActionKind::Delete) => "no delete request pending",
        None => "no pending action to approve",
    }
}

// ── The World ──────────────────────────────────────────────────

/// Authoritative state. Lives in memory, loaded from redb on boot.
/// Every task mutation goes through apply().
#[derive(Debug, Default)]
pub struct World {
    pub tasks: HashMap<Uuid, Task>,
    pub users: HashMap<Uuid, User>,
}

impl World {
    pub fn new() -> Self {
        World::default()
    }

    /// Apply a command on behalf of `actor`. A failed guard leaves the
    /// world untouched.
    pub fn apply(&mut self, cmd: Command, actor: Uuid) -> Result<Event, WorldError> {
        match cmd {
            Command::CreateTask { draft, assignee } => self.create_task(draft, &assignee, actor),
            Command::RequestUpdate { task_id, patch } => {
                self.request_action(task_id, actor, ActionKind::Update, Some(patch))
            }
            Command::RequestDelete { task_id } => {
                self.request_action(task_id, actor, ActionKind::Delete, None)
            }
            Command::Reject { task_id, action } => self.reject_action(task_id, actor, action),
            Command::Approve { task_id } => self.approve_action(task_id, actor),
        }
    }

    /// Undo an applied event whose flush failed. `prior` is the task as it
    /// was before the command ran.
    pub fn revert(&mut self, event: &Event, prior: Option<Task>) {
        match event {
            Event::TaskCreated { task } => {
                self.tasks.remove(&task.id);
            }
            _ => {
                if let Some(task) = prior {
                    self.tasks.insert(task.id, task);
                }
            }
        }
    }

    fn create_task(&mut self, draft: NewTask, assignee: &str, actor: Uuid) -> Result<Event, WorldError> {
        let creator = self.users.get(&actor)
            .ok_or_else(|| WorldError::UserNotFound(actor.to_string()))?;
        let assignee = self.get_user_by_username(assignee)
            .ok_or_else(|| WorldError::UserNotFound(assignee.to_string()))?;

        // A task needs two distinct parties.
        if assignee.id == creator.id {
            return Err(WorldError::InvalidField("assignedToName"));
        }
        policy::authorize(creator.role, assignee.role, Operation::AssignTask)?;

        let title = draft.title.trim();
        if title.is_empty() {
            return Err(WorldError::InvalidField("title"));
        }

        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: draft.description,
            due_date: draft.due_date,
            priority: draft.priority,
            status: draft.status,
            created_by: creator.id,
            created_by_name: creator.username.clone(),
            assigned_to: assignee.id,
            assigned_to_name: assignee.username.clone(),
            pending_action: None,
            created_at: now,
            updated_at: now,
        };

        self.tasks.insert(task.id, task.clone());
        Ok(Event::TaskCreated { task })
    }

    /// Register a new account. Usernames and emails are unique.
    pub fn add_user(&mut self, user: User) -> Result<(), WorldError> {
        if self.get_user_by_username(&user.username).is_some() {
            return Err(WorldError::UsernameTaken);
        }
        if self.users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(WorldError::EmailTaken);
        }
        self.users.insert(user.id, user);
        Ok(())
    }

    /// Look up a user by username. Linear scan.
    pub fn get_user_by_username(&self, username: &str) -> Option<&User> {
        self.users.values().find(|u| u.username == username)
    }

    /// Login accepts either the username or the email address.
    pub fn get_user_by_identifier(&self, identifier: &str) -> Option<&User> {
        self.get_user_by_username(identifier).or_else(|| {
            self.users.values().find(|u| u.email.eq_ignore_ascii_case(identifier))
        })
    }

    /// Tasks assigned to a user, newest first.
    pub fn tasks_assigned_to(&self, user_id: Uuid) -> Vec<&Task> {
        self.tasks_where(|t| t.assigned_to == user_id)
    }

    /// Tasks a user created, newest first.
    pub fn tasks_created_by(&self, user_id: Uuid) -> Vec<&Task> {
        self.tasks_where(|t| t.created_by == user_id)
    }

    fn tasks_where(&self, pred: impl Fn(&Task) -> bool) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().filter(|t| pred(t)).collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }
}

// ── Tests ──────────────────────────────────────────────────────
