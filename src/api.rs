//! REST handlers and the router.
//!
//! Everything under `/api` except register, login, health and the live
//! socket sits behind `auth_middleware`, which puts a [`CurrentUser`] in the
//! request extensions.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::{auth_middleware, CurrentUser};
use crate::error::AppError;
use crate::live;
use crate::notification::Notification;
use crate::state::{Approval, SharedState, UserSummary};
use crate::world::{NewTask, Role, Task, TaskPatch, User};

// ── DTOs ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email.
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: UserSummary,
}

impl SessionResponse {
    fn new(user: &User, token: String) -> Self {
        SessionResponse { token, user: UserSummary::from(user) }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(flatten)]
    pub task: NewTask,
    pub assigned_to_name: String,
}

// ── Router ─────────────────────────────────────────────────────

pub fn router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/api/auth/users", get(list_users))
        .route("/api/tasks", post(create_task))
        .route("/api/tasks/assigned-to-me", get(assigned_to_me))
        .route("/api/tasks/assigned-by-me", get(assigned_by_me))
        .route("/api/tasks/:id", get(get_task).put(update_task).delete(delete_task))
        .route("/api/tasks/:id/approve", post(approve))
        .route("/api/tasks/:id/reject-update", post(reject_update))
        .route("/api/tasks/:id/reject-delete", post(reject_delete))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/:id/seen", post(mark_seen))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/live", get(live::live_handler))
        .merge(protected)
        .with_state(state)
}

// ── Auth ───────────────────────────────────────────────────────

// GET /api/health
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// POST /api/auth/register
pub async fn register(
    State(state): State<SharedState>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let role = body.role.unwrap_or(Role::User);
    let (user, token) = state.register_user(&body.username, &body.email, &body.password, role)?;
    Ok((StatusCode::CREATED, Json(SessionResponse::new(&user, token))))
}

// POST /api/auth/login
pub async fn login(
    State(state): State<SharedState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, AppError> {
    let (user, token) = state.login(&body.identifier, &body.password)?;
    Ok(Json(SessionResponse::new(&user, token)))
}

// GET /api/auth/users
pub async fn list_users(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Json<Vec<UserSummary>> {
    Json(state.other_users(user.id))
}

// ── Tasks ──────────────────────────────────────────────────────

// POST /api/tasks
pub async fn create_task(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    let task = state.create_task(user.id, body.task, body.assigned_to_name)?;
    Ok((StatusCode::CREATED, Json(task)))
}

// GET /api/tasks/assigned-to-me
pub async fn assigned_to_me(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Json<Vec<Task>> {
    Json(state.tasks_assigned_to(user.id))
}

// GET /api/tasks/assigned-by-me
pub async fn assigned_by_me(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Json<Vec<Task>> {
    Json(state.tasks_created_by(user.id))
}

// GET /api/tasks/:id
pub async fn get_task(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(state.task_for(id, user.id)?))
}

// PUT /api/tasks/:id
pub async fn update_task(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(state.request_update(id, user.id, patch)?))
}

// DELETE /api/tasks/:id
pub async fn delete_task(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(state.request_delete(id, user.id)?))
}

// POST /api/tasks/:id/approve
pub async fn approve(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Approval>, AppError> {
    Ok(Json(state.approve(id, user.id)?))
}

// POST /api/tasks/:id/reject-update
pub async fn reject_update(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(state.reject_update(id, user.id)?))
}

// POST /api/tasks/:id/reject-delete
pub async fn reject_delete(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(state.reject_delete(id, user.id)?))
}

// ── Notifications ──────────────────────────────────────────────

// GET /api/notifications
pub async fn list_notifications(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<Notification>>, AppError> {
    Ok(Json(state.notifications(user.id)?))
}

// POST /api/notifications/:id/seen
pub async fn mark_seen(
    State(state): State<SharedState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, AppError> {
    Ok(Json(state.mark_seen(user.id, id)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalState;
    use crate::auth::SessionKeys;
    use crate::mail::MailQueue;
    use crate::persist::SaveFile;
    use crate::state::AppState;
    use crate::world::Priority;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn state() -> (SharedState, TempDir) {
        let dir = TempDir::new().unwrap();
        let save_file = SaveFile::open(dir.path().join("api.redb")).unwrap();
        let world = save_file.load_world().unwrap();
        let (mail, _rx) = MailQueue::channel();
        let state = AppState::new(world, save_file, SessionKeys::new(b"api", 60), mail);
        (Arc::new(state), dir)
    }

    async fn signup(state: &SharedState, name: &str, role: Role) -> CurrentUser {
        let body = RegisterRequest {
            username: name.into(),
            email: format!("{name}@example.com"),
            password: "pw".into(),
            role: Some(role),
        };
        let (status, Json(session)) = register(State(state.clone()), Json(body)).await.unwrap();
        assert_eq!(status, StatusCode::CREATED);
        state.current_user(session.user.id).unwrap()
    }

    fn create_body(assignee: &str) -> CreateTaskRequest {
        serde_json::from_value(json!({
            "title": "Ship it",
            "priority": "high",
            "assignedToName": assignee,
        }))
        .unwrap()
    }

    #[test]
    fn create_request_parses_camel_case() {
        let body = create_body("bob");
        assert_eq!(body.assigned_to_name, "bob");
        assert_eq!(body.task.priority, Priority::High);
        assert!(body.task.description.is_empty());
    }

    #[test]
    fn patch_rejects_reassignment() {
        let result = serde_json::from_value::<TaskPatch>(json!({ "assignedTo": Uuid::new_v4() }));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn register_defaults_to_user_role() {
        let (state, _dir) = state();
        let body = RegisterRequest {
            username: "dave".into(),
            email: "dave@example.com".into(),
            password: "pw".into(),
            role: None,
        };
        let (_, Json(session)) = register(State(state.clone()), Json(body)).await.unwrap();
        assert_eq!(session.user.role, Role::User);

        let login_body = LoginRequest { identifier: "dave@example.com".into(), password: "pw".into() };
        let Json(again) = login(State(state), Json(login_body)).await.unwrap();
        assert_eq!(again.user.id, session.user.id);
    }

    #[tokio::test]
    async fn request_and_approve_over_handlers() {
        let (state, _dir) = state();
        let alice = signup(&state, "alice", Role::Manager).await;
        let bob = signup(&state, "bob", Role::User).await;

        let (status, Json(task)) =
            create_task(State(state.clone()), Extension(alice.clone()), Json(create_body("bob")))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(task.assigned_to, bob.id);

        let patch = TaskPatch { title: Some("Ship it now".into()), ..Default::default() };
        let Json(pending) =
            update_task(State(state.clone()), Extension(bob.clone()), Path(task.id), Json(patch))
                .await
                .unwrap();
        assert_eq!(pending.approval_state(), ApprovalState::PendingUpdate);
        assert_eq!(pending.title, "Ship it");

        // Requester may not approve their own request.
        let err = approve(State(state.clone()), Extension(bob.clone()), Path(task.id))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let Json(outcome) = approve(State(state.clone()), Extension(alice.clone()), Path(task.id))
            .await
            .unwrap();
        match outcome {
            Approval::Updated { task } => assert_eq!(task.title, "Ship it now"),
            other => panic!("expected Updated, got {other:?}"),
        }

        let Json(notes) = list_notifications(State(state.clone()), Extension(bob.clone())).await.unwrap();
        assert_eq!(notes[0].message, "Your update request for task \"Ship it now\" has been approved by alice");
    }

    #[tokio::test]
    async fn user_cannot_assign() {
        let (state, _dir) = state();
        let bob = signup(&state, "bob", Role::User).await;
        signup(&state, "erin", Role::User).await;

        let err = create_task(State(state.clone()), Extension(bob), Json(create_body("erin")))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert!(state.world.read().unwrap().tasks.is_empty());
    }

    #[tokio::test]
    async fn outsiders_cannot_read_a_task() {
        let (state, _dir) = state();
        let alice = signup(&state, "alice", Role::Manager).await;
        signup(&state, "bob", Role::User).await;
        let mallory = signup(&state, "mallory", Role::User).await;

        let (_, Json(task)) =
            create_task(State(state.clone()), Extension(alice), Json(create_body("bob")))
                .await
                .unwrap();

        let err = get_task(State(state.clone()), Extension(mallory.clone()), Path(task.id))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        let err = delete_task(State(state), Extension(mallory), Path(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
