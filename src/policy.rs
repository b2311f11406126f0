//! Role-based permissions.
//!
//! Every role decision in the server funnels through [`authorize`].
//! Task-level standing (creator/assignee) is a separate rule enforced by
//! the approval state machine and is not role-dependent.

use thiserror::Error;

use crate::world::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Create a task assigned to the target user.
    AssignTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Denied {
    #[error("managers can only assign tasks to users")]
    ManagerScope,

    #[error("you don't have permission to assign tasks")]
    NoAssignRights,
}

/// Decide whether `actor` may perform `op` against a user holding `target`.
pub fn authorize(actor: Role, target: Role, op: Operation) -> Result<(), Denied> {
    match op {
        Operation::AssignTask => match (actor, target) {
            (Role::Admin, _) => Ok(()),
            (Role::Manager, Role::User) => Ok(()),
            (Role::Manager, _) => Err(Denied::ManagerScope),
            (Role::User, _) => Err(Denied::NoAssignRights),
        },
    }
}
