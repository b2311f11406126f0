//! Shared application state and the operations the HTTP layer calls.
//!
//! Every task command runs start to finish under the World write lock:
//! guard, mutate, flush. If the flush fails the change is reverted and
//! nothing is announced. Notices are planned under the lock and delivered
//! after it is released.

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::auth::{self, CurrentUser, SessionKeys};
use crate::dispatch::{self, Dispatcher};
use crate::error::AppError;
use crate::mail::MailQueue;
use crate::notification::Notification;
use crate::persist::{SaveFile, SaveFileError};
use crate::registry::ConnectionRegistry;
use crate::world::{ActionKind, Command, Event, NewTask, Role, Task, TaskPatch, User, World};

pub struct AppState {
    pub world: RwLock<World>,
    pub save_file: SaveFile,
    pub sessions: SessionKeys,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Dispatcher,
}

pub type SharedState = Arc<AppState>;

/// What an approval did to the task.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Approval {
    Updated { task: Task },
    Deleted {
        #[serde(rename = "taskId")]
        task_id: Uuid,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        UserSummary {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
        }
    }
}

impl AppState {
    pub fn new(world: World, save_file: SaveFile, sessions: SessionKeys, mail: MailQueue) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(save_file.clone(), registry.clone(), mail);
        AppState {
            world: RwLock::new(world),
            save_file,
            sessions,
            registry,
            dispatcher,
        }
    }

    fn read_world(&self) -> RwLockReadGuard<'_, World> {
        self.world.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_world(&self) -> RwLockWriteGuard<'_, World> {
        self.world.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply, flush, then notify. THE task mutation path.
    fn execute(&self, cmd: Command, actor: Uuid) -> Result<Event, AppError> {
        self.execute_with(cmd, actor, |event| self.save_file.flush(event))
    }

    fn execute_with<F>(&self, cmd: Command, actor: Uuid, flush: F) -> Result<Event, AppError>
    where
        F: FnOnce(&Event) -> Result<(), SaveFileError>,
    {
        let (event, notices) = {
            let mut world = self.write_world();
            let prior = cmd.task_id().and_then(|id| world.tasks.get(&id).cloned());

            let event = world.apply(cmd, actor)?;
            if let Err(e) = flush(&event) {
                world.revert(&event, prior);
                return Err(e.into());
            }

            let notices = dispatch::plan(&world, &event);
            (event, notices)
        };

        tracing::info!(task_id = %event.task().id, actor = %actor, event = ?EventName(&event), "task event committed");
        self.dispatcher.deliver(notices);
        Ok(event)
    }

    // ── Tasks ──────────────────────────────────────────────────

    pub fn create_task(&self, actor: Uuid, draft: NewTask, assignee: String) -> Result<Task, AppError> {
        let event = self.execute(Command::CreateTask { draft, assignee }, actor)?;
        Ok(event.task().clone())
    }

    pub fn request_update(&self, task_id: Uuid, actor: Uuid, patch: TaskPatch) -> Result<Task, AppError> {
        let event = self.execute(Command::RequestUpdate { task_id, patch }, actor)?;
        Ok(event.task().clone())
    }

    pub fn request_delete(&self, task_id: Uuid, actor: Uuid) -> Result<Task, AppError> {
        let event = self.execute(Command::RequestDelete { task_id }, actor)?;
        Ok(event.task().clone())
    }

    pub fn reject_update(&self, task_id: Uuid, actor: Uuid) -> Result<Task, AppError> {
        let event = self.execute(Command::Reject { task_id, action: ActionKind::Update }, actor)?;
        Ok(event.task().clone())
    }

    pub fn reject_delete(&self, task_id: Uuid, actor: Uuid) -> Result<Task, AppError> {
        let event = self.execute(Command::Reject { task_id, action: ActionKind::Delete }, actor)?;
        Ok(event.task().clone())
    }

    pub fn approve(&self, task_id: Uuid, actor: Uuid) -> Result<Approval, AppError> {
        match self.execute(Command::Approve { task_id }, actor)? {
            Event::DeleteApproved { task, .. } => Ok(Approval::Deleted { task_id: task.id }),
            event => Ok(Approval::Updated { task: event.task().clone() }),
        }
    }

    /// A single task, visible to its two parties only.
    pub fn task_for(&self, task_id: Uuid, actor: Uuid) -> Result<Task, AppError> {
        let world = self.read_world();
        let task = world.tasks.get(&task_id)
            .ok_or_else(|| AppError::NotFound("task not found".into()))?;
        if !task.is_party(actor) {
            return Err(AppError::Forbidden("not your task".into()));
        }
        Ok(task.clone())
    }

    pub fn tasks_assigned_to(&self, user_id: Uuid) -> Vec<Task> {
        self.read_world().tasks_assigned_to(user_id).into_iter().cloned().collect()
    }

    pub fn tasks_created_by(&self, user_id: Uuid) -> Vec<Task> {
        self.read_world().tasks_created_by(user_id).into_iter().cloned().collect()
    }

    // ── Accounts ───────────────────────────────────────────────

    pub fn register_user(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<(User, String), AppError> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() || email.is_empty() || password.is_empty() {
            return Err(AppError::BadRequest("username, email and password are required".into()));
        }

        // Hash before taking the lock; argon2 is deliberately slow.
        let password_hash = auth::hash_password(password)?;
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            role,
            created_at: chrono::Utc::now(),
        };

        {
            let mut world = self.write_world();
            world.add_user(user.clone())?;
            if let Err(e) = self.save_file.save_user(&user) {
                world.users.remove(&user.id);
                return Err(e.into());
            }
        }

        let token = self.sessions.issue(user.id, user.role)?;
        tracing::info!(user_id = %user.id, username = %user.username, role = ?user.role, "user registered");
        Ok((user, token))
    }

    pub fn login(&self, identifier: &str, password: &str) -> Result<(User, String), AppError> {
        let invalid = || AppError::Unauthorized("invalid credentials".into());

        let user = self.read_world()
            .get_user_by_identifier(identifier.trim())
            .cloned()
            .ok_or_else(invalid)?;

        if !auth::verify_password(password, &user.password_hash) {
            tracing::warn!(user_id = %user.id, "failed login");
            return Err(invalid());
        }

        let token = self.sessions.issue(user.id, user.role)?;
        tracing::info!(user_id = %user.id, username = %user.username, "logged in");
        Ok((user, token))
    }

    pub fn current_user(&self, user_id: Uuid) -> Option<CurrentUser> {
        self.read_world().users.get(&user_id).map(|u| CurrentUser {
            id: u.id,
            username: u.username.clone(),
            role: u.role,
        })
    }

    /// Everyone except the caller, by username.
    pub fn other_users(&self, user_id: Uuid) -> Vec<UserSummary> {
        let world = self.read_world();
        let mut users: Vec<UserSummary> = world.users.values()
            .filter(|u| u.id != user_id)
            .map(UserSummary::from)
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    // ── Notifications ──────────────────────────────────────────

    pub fn notifications(&self, user_id: Uuid) -> Result<Vec<Notification>, AppError> {
        Ok(self.save_file.notifications_for(user_id)?)
    }

    pub fn mark_seen(&self, user_id: Uuid, notification_id: Uuid) -> Result<Notification, AppError> {
        self.save_file.mark_seen(user_id, notification_id)?
            .ok_or_else(|| AppError::NotFound("notification not found".into()))
    }
}

/// Log-friendly event name without dumping the whole task.
struct EventName<'a>(&'a Event);

impl std::fmt::Debug for EventName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.0 {
            Event::TaskCreated { .. } => "task-created",
            Event::ActionRequested { action: ActionKind::Update, .. } => "update-requested",
            Event::ActionRequested { action: ActionKind::Delete, .. } => "delete-requested",
            Event::ActionRejected { action: ActionKind::Update, .. } => "update-rejected",
            Event::ActionRejected { action: ActionKind::Delete, .. } => "delete-rejected",
            Event::UpdateApproved { .. } => "update-approved",
            Event::DeleteApproved { .. } => "delete-approved",
        };
        f.write_str(name)
    }
}

// ── Tests ──────────────────────────────────────────────────────
