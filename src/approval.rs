//! Pending-action state machine.
//!
//! A task is either Stable or waiting on the other party to approve an
//! update or a delete:
//!
//! ```text
//!   Stable ──request update──▶ PendingUpdate ──approve──▶ Stable (patch applied)
//!      ▲                            │
//!      └──────────reject────────────┘
//!
//!   Stable ──request delete──▶ PendingDelete ──approve──▶ (task removed)
//!      ▲                            │
//!      └──────────reject────────────┘
//! ```
//!
//! Only the creator and the assignee have standing. Whoever requested an
//! action can never approve or reject it. Guards are checked before any
//! field is touched, so a failed transition changes nothing.

use chrono::Utc;
use uuid::Uuid;

use crate::world::{ActionKind, Event, PendingAction, Task, TaskPatch, World, WorldError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    Stable,
    PendingUpdate,
    PendingDelete,
}

impl Task {
    pub fn approval_state(&self) -> ApprovalState {
        match self.pending_action.as_ref().map(|p| p.action) {
            None => ApprovalState::Stable,
            Some(ActionKind::Update) => ApprovalState::PendingUpdate,
            Some(ActionKind::Delete) => ApprovalState::PendingDelete,
        }
    }
}

impl World {
    /// Stable → PendingUpdate / PendingDelete.
    pub(crate) fn request_action(
        &mut self,
        task_id: Uuid,
        actor: Uuid,
        action: ActionKind,
        patch: Option<TaskPatch>,
    ) -> Result<Event, WorldError> {
        let task = self.tasks.get_mut(&task_id).ok_or(WorldError::TaskNotFound)?;

        if !task.is_party(actor) {
            return Err(WorldError::NotAParty);
        }
        if let Some(pending) = &task.pending_action {
            return Err(WorldError::ActionPending(pending.action));
        }
        if let Some(patch) = &patch {
            patch.validate()?;
        }

        task.pending_action = Some(PendingAction {
            action,
            requested_by: actor,
            changes: patch,
            approved_by: Vec::new(),
            requested_at: Utc::now(),
        });

        Ok(Event::ActionRequested {
            task: task.clone(),
            action,
            requested_by: actor,
        })
    }

    /// PendingUpdate / PendingDelete → Stable, fields untouched.
    pub(crate) fn reject_action(
        &mut self,
        task_id: Uuid,
        actor: Uuid,
        action: ActionKind,
    ) -> Result<Event, WorldError> {
        let task = self.tasks.get_mut(&task_id).ok_or(WorldError::TaskNotFound)?;

        let requested_by = match &task.pending_action {
            Some(pending) if pending.action == action => pending.requested_by,
            _ => return Err(WorldError::NothingPending(Some(action))),
        };
        if !task.is_party(actor) {
            return Err(WorldError::NotAParty);
        }
        if requested_by == actor {
            return Err(WorldError::OwnRequest);
        }

        task.pending_action = None;

        Ok(Event::ActionRejected {
            task: task.clone(),
            action,
            rejected_by: actor,
            requested_by,
        })
    }

    /// PendingUpdate → Stable with the stored patch applied, or
    /// PendingDelete → task removed.
    pub(crate) fn approve_action(&mut self, task_id: Uuid, actor: Uuid) -> Result<Event, WorldError> {
        let task = self.tasks.get_mut(&task_id).ok_or(WorldError::TaskNotFound)?;
        let is_party = task.is_party(actor);

        let pending = task.pending_action.as_mut()
            .ok_or(WorldError::NothingPending(None))?;
        if pending.requested_by == actor {
            return Err(WorldError::OwnRequest);
        }
        if !is_party {
            return Err(WorldError::NotAParty);
        }
        if pending.approved_by.contains(&actor) {
            return Err(WorldError::AlreadyApproved);
        }
        pending.approved_by.push(actor);

        let requested_by = pending.requested_by;
        let action = pending.action;
        match action {
            ActionKind::Update => {
                let patch = pending.changes.take();
                task.pending_action = None;
                if let Some(patch) = patch {
                    patch.apply_to(task);
                }
                task.updated_at = Utc::now();

                Ok(Event::UpdateApproved {
                    task: task.clone(),
                    approved_by: actor,
                    requested_by,
                })
            }
            ActionKind::Delete => {
                let mut task = self.tasks.remove(&task_id).ok_or(WorldError::TaskNotFound)?;
                task.pending_action = None;

                Ok(Event::DeleteApproved {
                    task,
                    approved_by: actor,
                    requested_by,
                })
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::tests::{create_task, test_world};
    use crate::world::{Command, Priority};

    fn title_patch(title: &str) -> TaskPatch {
        TaskPatch { title: Some(title.into()), ..Default::default() }
    }

    #[test]
    fn outsider_cannot_request() {
        let (mut w, alice, _, carol) = test_world();
        let id = create_task(&mut w, alice, "bob");
        let before = w.tasks[&id].clone();

        let r = w.apply(Command::RequestUpdate { task_id: id, patch: title_patch("X") }, carol);
        assert_eq!(r.unwrap_err(), WorldError::NotAParty);
        let r = w.apply(Command::RequestDelete { task_id: id }, carol);
        assert_eq!(r.unwrap_err(), WorldError::NotAParty);

        assert_eq!(w.tasks[&id], before);
    }

    #[test]
    fn second_request_conflicts() {
        let (mut w, alice, bob, _) = test_world();
        let id = create_task(&mut w, alice, "bob");

        w.apply(Command::RequestUpdate { task_id: id, patch: title_patch("X") }, bob).unwrap();

        let r = w.apply(Command::RequestDelete { task_id: id }, alice);
        assert_eq!(r.unwrap_err(), WorldError::ActionPending(ActionKind::Update));
        let r = w.apply(Command::RequestUpdate { task_id: id, patch: title_patch("Y") }, bob);
        assert_eq!(r.unwrap_err(), WorldError::ActionPending(ActionKind::Update));

        let task = &w.tasks[&id];
        assert_eq!(task.approval_state(), ApprovalState::PendingUpdate);
        assert_eq!(task.pending_action.as_ref().unwrap().changes, Some(title_patch("X")));
    }

    #[test]
    fn empty_patch_is_refused() {
        let (mut w, alice, bob, _) = test_world();
        let id = create_task(&mut w, alice, "bob");

        let r = w.apply(Command::RequestUpdate { task_id: id, patch: TaskPatch::default() }, bob);
        assert_eq!(r.unwrap_err(), WorldError::EmptyPatch);
        assert_eq!(w.tasks[&id].approval_state(), ApprovalState::Stable);
    }

    #[test]
    fn request_on_missing_task() {
        let (mut w, alice, _, _) = test_world();
        let r = w.apply(Command::RequestDelete { task_id: Uuid::new_v4() }, alice);
        assert_eq!(r.unwrap_err(), WorldError::TaskNotFound);
    }

    #[test]
    fn requester_cannot_approve_own_request() {
        let (mut w, alice, bob, _) = test_world();
        let id = create_task(&mut w, alice, "bob");

        w.apply(Command::RequestDelete { task_id: id }, bob).unwrap();
        let r = w.apply(Command::Approve { task_id: id }, bob);
        assert_eq!(r.unwrap_err(), WorldError::OwnRequest);
        assert_eq!(w.tasks[&id].approval_state(), ApprovalState::PendingDelete);
    }

    #[test]
    fn outsider_cannot_approve_even_as_admin() {
        let (mut w, alice, bob, carol) = test_world();
        let id = create_task(&mut w, alice, "bob");

        w.apply(Command::RequestDelete { task_id: id }, bob).unwrap();
        let r = w.apply(Command::Approve { task_id: id }, carol);
        assert_eq!(r.unwrap_err(), WorldError::NotAParty);
        let r = w.apply(Command::Reject { task_id: id, action: ActionKind::Delete }, carol);
        assert_eq!(r.unwrap_err(), WorldError::NotAParty);
        assert!(w.tasks.contains_key(&id));
    }

    #[test]
    fn approve_update_applies_exactly_the_patch() {
        let (mut w, alice, bob, _) = test_world();
        let id = create_task(&mut w, alice, "bob");
        let before = w.tasks[&id].clone();

        w.apply(Command::RequestUpdate { task_id: id, patch: title_patch("X") }, bob).unwrap();
        let event = w.apply(Command::Approve { task_id: id }, alice).unwrap();

        match event {
            Event::UpdateApproved { approved_by, requested_by, .. } => {
                assert_eq!(approved_by, alice);
                assert_eq!(requested_by, bob);
            }
            other => panic!("expected UpdateApproved, got {other:?}"),
        }

        let task = &w.tasks[&id];
        assert_eq!(task.title, "X");
        assert_eq!(task.description, before.description);
        assert_eq!(task.priority, before.priority);
        assert_eq!(task.status, before.status);
        assert_eq!(task.assigned_to, before.assigned_to);
        assert_eq!(task.approval_state(), ApprovalState::Stable);
    }

    #[test]
    fn creator_request_is_approved_by_assignee() {
        let (mut w, alice, bob, _) = test_world();
        let id = create_task(&mut w, alice, "bob");

        let patch = TaskPatch { priority: Some(Priority::High), ..Default::default() };
        w.apply(Command::RequestUpdate { task_id: id, patch }, alice).unwrap();
        w.apply(Command::Approve { task_id: id }, bob).unwrap();

        assert_eq!(w.tasks[&id].priority, Priority::High);
    }

    #[test]
    fn approve_delete_removes_task() {
        let (mut w, alice, bob, _) = test_world();
        let id = create_task(&mut w, alice, "bob");

        w.apply(Command::RequestDelete { task_id: id }, bob).unwrap();
        let event = w.apply(Command::Approve { task_id: id }, alice).unwrap();
        assert!(matches!(event, Event::DeleteApproved { .. }));

        assert!(!w.tasks.contains_key(&id));
        let r = w.apply(Command::Approve { task_id: id }, alice);
        assert_eq!(r.unwrap_err(), WorldError::TaskNotFound);
    }

    #[test]
    fn approve_with_nothing_pending() {
        let (mut w, alice, _, _) = test_world();
        let id = create_task(&mut w, alice, "bob");

        let r = w.apply(Command::Approve { task_id: id }, alice);
        assert_eq!(r.unwrap_err(), WorldError::NothingPending(None));
    }

    #[test]
    fn reject_clears_without_mutating() {
        let (mut w, alice, bob, _) = test_world();
        let id = create_task(&mut w, alice, "bob");
        let before = w.tasks[&id].clone();

        w.apply(Command::RequestUpdate { task_id: id, patch: title_patch("X") }, bob).unwrap();
        let event = w.apply(Command::Reject { task_id: id, action: ActionKind::Update }, alice).unwrap();
        assert!(matches!(event, Event::ActionRejected { requested_by, .. } if requested_by == bob));

        assert_eq!(w.tasks[&id], before);
    }

    #[test]
    fn reject_delete_keeps_task() {
        let (mut w, alice, bob, _) = test_world();
        let id = create_task(&mut w, alice, "bob");

        w.apply(Command::RequestDelete { task_id: id }, bob).unwrap();
        w.apply(Command::Reject { task_id: id, action: ActionKind::Delete }, alice).unwrap();

        assert_eq!(w.tasks[&id].approval_state(), ApprovalState::Stable);
    }

    #[test]
    fn reject_wrong_kind_is_bad_request() {
        let (mut w, alice, bob, _) = test_world();
        let id = create_task(&mut w, alice, "bob");

        // nothing pending at all
        let r = w.apply(Command::Reject { task_id: id, action: ActionKind::Update }, alice);
        assert_eq!(r.unwrap_err(), WorldError::NothingPending(Some(ActionKind::Update)));

        // delete pending, update rejected
        w.apply(Command::RequestDelete { task_id: id }, bob).unwrap();
        let r = w.apply(Command::Reject { task_id: id, action: ActionKind::Update }, alice);
        assert_eq!(r.unwrap_err(), WorldError::NothingPending(Some(ActionKind::Update)));
        assert_eq!(w.tasks[&id].approval_state(), ApprovalState::PendingDelete);
    }

    #[test]
    fn requester_cannot_reject_own_request() {
        let (mut w, alice, bob, _) = test_world();
        let id = create_task(&mut w, alice, "bob");

        w.apply(Command::RequestUpdate { task_id: id, patch: title_patch("X") }, bob).unwrap();
        let r = w.apply(Command::Reject { task_id: id, action: ActionKind::Update }, bob);
        assert_eq!(r.unwrap_err(), WorldError::OwnRequest);
        assert_eq!(w.tasks[&id].approval_state(), ApprovalState::PendingUpdate);
    }

    #[test]
    fn duplicate_approval_is_refused() {
        let (mut w, alice, bob, _) = test_world();
        let id = create_task(&mut w, alice, "bob");

        // A stale approval record left on a still-pending action.
        w.apply(Command::RequestUpdate { task_id: id, patch: title_patch("X") }, bob).unwrap();
        w.tasks.get_mut(&id).unwrap()
            .pending_action.as_mut().unwrap()
            .approved_by.push(alice);

        let r = w.apply(Command::Approve { task_id: id }, alice);
        assert_eq!(r.unwrap_err(), WorldError::AlreadyApproved);
        assert_eq!(w.tasks[&id].title, "Quarterly report");
    }

    #[test]
    fn workflow_can_repeat_after_resolution() {
        let (mut w, alice, bob, _) = test_world();
        let id = create_task(&mut w, alice, "bob");

        w.apply(Command::RequestUpdate { task_id: id, patch: title_patch("X") }, bob).unwrap();
        w.apply(Command::Reject { task_id: id, action: ActionKind::Update }, alice).unwrap();
        w.apply(Command::RequestUpdate { task_id: id, patch: title_patch("Y") }, bob).unwrap();
        w.apply(Command::Approve { task_id: id }, alice).unwrap();

        assert_eq!(w.tasks[&id].title, "Y");
    }
}
