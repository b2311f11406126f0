//! World ↔ redb persistence, plus the notification log.
//!
//! Tasks and users are a save file: loaded on boot, flushed on every
//! mutation, never queried at runtime (World is the runtime truth).
//! Notifications live only here and are read on demand.

use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::notification::Notification;
use crate::world::{Event, Role, Task, User, World};

const TASKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tasks");
const USERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("users");
const NOTIFICATIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("notifications");

/// Thin handle to the redb file. Cloneable (Arc inside).
#[derive(Clone)]
pub struct SaveFile {
    db: Arc<Database>,
}

impl SaveFile {
    /// Open (or create) the save file at the given path.
    /// Creates tables if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SaveFileError> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(TASKS)?;
            let _ = txn.open_table(USERS)?;
            let _ = txn.open_table(NOTIFICATIONS)?;
        }
        txn.commit()?;

        Ok(SaveFile { db: Arc::new(db) })
    }

    /// Load tasks and users. Called once at boot.
    pub fn load_world(&self) -> Result<World, SaveFileError> {
        let mut world = World::new();
        let txn = self.db.begin_read()?;

        let tasks = txn.open_table(TASKS)?;
        for entry in tasks.iter()? {
            let (_, value) = entry?;
            let task: Task = decode(value.value())?;
            world.tasks.insert(task.id, task);
        }

        let users = txn.open_table(USERS)?;
        for entry in users.iter()? {
            let (_, value) = entry?;
            let user: User = decode(value.value())?;
            world.users.insert(user.id, user);
        }

        Ok(world)
    }

    /// Write the task affected by an event in one transaction.
    pub fn flush(&self, event: &Event) -> Result<(), SaveFileError> {
        let txn = self.db.begin_write()?;
        {
            let mut tasks = txn.open_table(TASKS)?;
            match event {
                Event::TaskCreated { task }
                | Event::ActionRequested { task, .. }
                | Event::ActionRejected { task, .. }
                | Event::UpdateApproved { task, .. } => {
                    let bytes = encode(task)?;
                    tasks.insert(task.id.as_bytes().as_slice(), bytes.as_slice())?;
                }

                Event::DeleteApproved { task, .. } => {
                    tasks.remove(task.id.as_bytes().as_slice())?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Write a user (registration / seeding).
    pub fn save_user(&self, user: &User) -> Result<(), SaveFileError> {
        let txn = self.db.begin_write()?;
        {
            let mut users = txn.open_table(USERS)?;
            let bytes = encode(user)?;
            users.insert(user.id.as_bytes().as_slice(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Append one row to the notification log.
    pub fn append_notification(&self, notification: &Notification) -> Result<(), SaveFileError> {
        let txn = self.db.begin_write()?;
        {
            let mut log = txn.open_table(NOTIFICATIONS)?;
            let bytes = encode(notification)?;
            let key = log_key(notification.user_id, notification.id);
            log.insert(key.as_slice(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Every notification targeted at a user, newest first.
    /// Scans only that user's key range.
    pub fn notifications_for(&self, user_id: Uuid) -> Result<Vec<Notification>, SaveFileError> {
        let txn = self.db.begin_read()?;
        let log = txn.open_table(NOTIFICATIONS)?;

        let lo = log_key(user_id, Uuid::nil());
        let hi = log_key(user_id, Uuid::from_bytes([0xff; 16]));

        let mut found = Vec::new();
        for entry in log.range(lo.as_slice()..=hi.as_slice())? {
            let (_, value) = entry?;
            let notification: Notification = decode(value.value())?;
            found.push(notification);
        }
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    /// Flip `seen` on a notification owned by `user_id`.
    /// Returns None when no such notification belongs to that user.
    pub fn mark_seen(&self, user_id: Uuid, id: Uuid) -> Result<Option<Notification>, SaveFileError> {
        let key = log_key(user_id, id);
        let txn = self.db.begin_write()?;
        let updated = {
            let mut log = txn.open_table(NOTIFICATIONS)?;
            let current: Option<Notification> = match log.get(key.as_slice())? {
                Some(value) => Some(decode(value.value())?),
                None => None,
            };

            match current {
                Some(mut notification) => {
                    notification.seen = true;
                    let bytes = encode(&notification)?;
                    log.insert(key.as_slice(), bytes.as_slice())?;
                    Some(notification)
                }
                None => None,
            }
        };
        txn.commit()?;
        Ok(updated)
    }

    /// Seed an admin account if no users exist. Returns true if created.
    pub fn ensure_default_user(
        &self,
        world: &mut World,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<bool, SaveFileError> {
        if !world.users.is_empty() {
            return Ok(false);
        }

        let password_hash = crate::auth::hash_password(password)
            .map_err(|e| SaveFileError::Seed(e.to_string()))?;

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            role: Role::Admin,
            created_at: chrono::Utc::now(),
        };

        self.save_user(&user)?;
        world.users.insert(user.id, user);
        Ok(true)
    }
}

/// Notification rows are keyed `user_id ‖ notification_id`, so one user's
/// rows form a contiguous range.
fn log_key(user_id: Uuid, id: Uuid) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(user_id.as_bytes());
    key[16..].copy_from_slice(id.as_bytes());
    key
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, SaveFileError> {
    postcard::to_allocvec(value).map_err(|e| SaveFileError::Encode(e.to_string()))
}

fn decode<'a, T: serde::Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, SaveFileError> {
    postcard::from_bytes(bytes).map_err(|e| SaveFileError::Decode(e.to_string()))
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SaveFileError {
    #[error("redb: {0}")]
    Redb(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("encode: {0}")]
    Encode(String),
    #[error("seed: {0}")]
    Seed(String),
}

// redb 2.x has many error types. Blanket them all into SaveFileError::Redb.
macro_rules! from_redb {
    ($($t:ty),*) => {
        $(impl From<$t> for SaveFileError {
            fn from(e: $t) -> Self { SaveFileError::Redb(e.to_string()) }
        })*
    };
}

from_redb!(
    redb::Error,
    redb::DatabaseError,
    redb::TableError,
    redb::TransactionError,
    redb::StorageError,
    redb::CommitError
);

// ── Tests ──────────────────────────────────────────────────────
