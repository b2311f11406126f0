use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    TaskCreated,
    UpdateRequest,
    DeleteRequest,
    UpdateRejected,
    DeleteRejected,
    UpdateApproved,
    DeleteApproved,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::TaskCreated => "task-created",
            NotificationKind::UpdateRequest => "update-request",
            NotificationKind::DeleteRequest => "delete-request",
            NotificationKind::UpdateRejected => "update-rejected",
            NotificationKind::DeleteRejected => "delete-rejected",
            NotificationKind::UpdateApproved => "update-approved",
            NotificationKind::DeleteApproved => "delete-approved",
        }
    }
}

/// One row of the notification log. Append-only; only `seen` ever flips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub task_id: Uuid,
    pub message: String,
    pub seen: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(user_id: Uuid, kind: NotificationKind, task_id: Uuid, message: String) -> Self {
        Notification {
            id: Uuid::new_v4(),
            user_id,
            kind,
            task_id,
            message,
            seen: false,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_uses_wire_names() {
        let n = Notification::new(
            Uuid::nil(),
            NotificationKind::UpdateRequest,
            Uuid::nil(),
            "bob wants to update task \"Report\"".into(),
        );
        let json = serde_json::to_value(&n).unwrap();

        assert_eq!(json["type"], "update-request");
        assert_eq!(json["seen"], false);
        assert!(json.get("taskId").is_some());
        assert!(json.get("userId").is_some());
        assert_eq!(NotificationKind::UpdateRequest.as_str(), "update-request");
    }
}
