//! Notification dispatcher.
//!
//! Turns a committed event into notices for the parties involved, writes
//! each one to the notification log, then tries a live push. The log write
//! always comes first so a failed push never loses the record. Emails for
//! creations and approval requests go on the mail queue independently.

use std::sync::Arc;
use uuid::Uuid;

use crate::mail::{MailQueue, OutgoingMail};
use crate::notification::{Notification, NotificationKind};
use crate::persist::{SaveFile, SaveFileError};
use crate::registry::ConnectionRegistry;
use crate::world::{ActionKind, Event, World};

/// One notification to record and push, plus an optional email.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub target: Uuid,
    pub kind: NotificationKind,
    pub task_id: Uuid,
    pub message: String,
    pub email: Option<OutgoingMail>,
}

/// Work out who hears about an event. Needs the world only for names and
/// email addresses, so it runs while the caller still holds the lock.
pub fn plan(world: &World, event: &Event) -> Vec<Notice> {
    let task = event.task();
    let title = &task.title;
    let email_of = |user: Uuid| world.users.get(&user).map(|u| u.email.clone());

    match event {
        Event::TaskCreated { .. } => vec![
            Notice {
                target: task.created_by,
                kind: NotificationKind::TaskCreated,
                task_id: task.id,
                message: format!("Task \"{title}\" has been assigned to {}.", task.assigned_to_name),
                email: None,
            },
            Notice {
                target: task.assigned_to,
                kind: NotificationKind::TaskCreated,
                task_id: task.id,
                message: format!(
                    "You have been assigned task \"{title}\" by {}.",
                    task.created_by_name
                ),
                email: email_of(task.assigned_to).map(|to| OutgoingMail {
                    to,
                    subject: "New Task Assigned".into(),
                    body: format!(
                        "{} has assigned you the task \"{title}\". Please log in to view it.",
                        task.created_by_name
                    ),
                }),
            },
        ],

        Event::ActionRequested { action, requested_by, .. } => {
            let Some(target) = task.counterparty(*requested_by) else {
                return Vec::new();
            };
            let requester = task.party_name(*requested_by);
            let (kind, verb, subject) = match action {
                ActionKind::Update => (NotificationKind::UpdateRequest, "update", "Task Update Approval Needed"),
                ActionKind::Delete => (NotificationKind::DeleteRequest, "delete", "Task Deletion Approval Needed"),
            };

            vec![Notice {
                target,
                kind,
                task_id: task.id,
                message: format!("{requester} wants to {verb} task \"{title}\""),
                email: email_of(target).map(|to| OutgoingMail {
                    to,
                    subject: subject.into(),
                    body: format!(
                        "{requester} has requested to {verb} task \"{title}\". Please log in to approve."
                    ),
                }),
            }]
        }

        Event::ActionRejected { action, rejected_by, requested_by, .. } => {
            let (kind, verb) = match action {
                ActionKind::Update => (NotificationKind::UpdateRejected, "update"),
                ActionKind::Delete => (NotificationKind::DeleteRejected, "delete"),
            };
            vec![Notice {
                target: *requested_by,
                kind,
                task_id: task.id,
                message: format!(
                    "{} has rejected the {verb} request for task \"{title}\".",
                    task.party_name(*rejected_by)
                ),
                email: None,
            }]
        }

        Event::UpdateApproved { approved_by, requested_by, .. } => vec![Notice {
            target: *requested_by,
            kind: NotificationKind::UpdateApproved,
            task_id: task.id,
            message: format!(
                "Your update request for task \"{title}\" has been approved by {}",
                task.party_name(*approved_by)
            ),
            email: None,
        }],

        Event::DeleteApproved { approved_by, requested_by, .. } => vec![Notice {
            target: *requested_by,
            kind: NotificationKind::DeleteApproved,
            task_id: task.id,
            message: format!(
                "Your delete request for task \"{title}\" has been approved by {}",
                task.party_name(*approved_by)
            ),
            email: None,
        }],
    }
}

pub struct Dispatcher {
    log: SaveFile,
    registry: Arc<ConnectionRegistry>,
    mail: MailQueue,
}

impl Dispatcher {
    pub fn new(log: SaveFile, registry: Arc<ConnectionRegistry>, mail: MailQueue) -> Self {
        Dispatcher { log, registry, mail }
    }

    /// Record a notification, then push it if the target is connected.
    /// Returns whether it was delivered live.
    pub fn notify(
        &self,
        target: Uuid,
        kind: NotificationKind,
        task_id: Uuid,
        message: String,
    ) -> Result<bool, SaveFileError> {
        let notification = Notification::new(target, kind, task_id, message);
        self.log.append_notification(&notification)?;

        let frame = match serde_json::to_string(&notification) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "notification frame encoding failed");
                return Ok(false);
            }
        };
        Ok(self.registry.push(target, frame))
    }

    /// Deliver every notice. Failures are logged and never propagated.
    pub fn deliver(&self, notices: Vec<Notice>) {
        for notice in notices {
            let Notice { target, kind, task_id, message, email } = notice;

            match self.notify(target, kind, task_id, message) {
                Ok(delivered) => tracing::debug!(
                    user_id = %target,
                    task_id = %task_id,
                    kind = kind.as_str(),
                    delivered,
                    "notification logged"
                ),
                Err(e) => tracing::error!(
                    user_id = %target,
                    task_id = %task_id,
                    kind = kind.as_str(),
                    error = %e,
                    "notification log write failed"
                ),
            }

            if let Some(mail) = email {
                self.mail.enqueue(mail);
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
