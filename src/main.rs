use axum::http::HeaderValue;
use std::sync::Arc;
use taskgate::{
    api,
    auth::SessionKeys,
    config::Settings,
    mail::{self, LogMailer, MailQueue},
    persist::SaveFile,
    state::{AppState, SharedState},
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::load()?;

    // ── Boot the World ─────────────────────────────────────────
    let save_file = SaveFile::open(&settings.database_path)?;
    let mut world = save_file.load_world()?;

    if save_file.ensure_default_user(
        &mut world,
        &settings.default_admin_username,
        &settings.default_admin_email,
        &settings.default_admin_password,
    )? {
        tracing::warn!(username = %settings.default_admin_username, "created default admin user");
    }

    tracing::info!(
        tasks = world.tasks.len(),
        users = world.users.len(),
        path = %settings.database_path,
        "world loaded"
    );

    // ── Mail worker ────────────────────────────────────────────
    let (mail_queue, mail_rx) = MailQueue::channel();
    let mailer = Arc::new(LogMailer { sender: settings.mail_sender.clone() });
    tokio::spawn(mail::run_mail_worker(mail_rx, mailer));

    // ── Shared state ───────────────────────────────────────────
    let sessions = SessionKeys::new(settings.jwt_secret.as_bytes(), settings.jwt_expiration_in_minutes);
    let state: SharedState = Arc::new(AppState::new(world, save_file, sessions, mail_queue));

    // ── Router ─────────────────────────────────────────────────
    let cors = match &settings.allowed_origin {
        Some(origin) => CorsLayer::new().allow_origin(origin.parse::<HeaderValue>()?),
        None => CorsLayer::new().allow_origin(Any),
    }
    .allow_methods(Any)
    .allow_headers(Any);

    let mut app = api::router(state);
    if let Some(dir) = &settings.static_dir {
        app = app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
    }
    let app = app.layer(cors);

    // ── Start ──────────────────────────────────────────────────
    let addr = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
