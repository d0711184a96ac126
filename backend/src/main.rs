use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod database;
mod entities;
mod error;
mod events;
mod handlers;
mod jobs;
mod pagination;
mod services;
mod state_machine;
mod workflows;

pub use error::{ApiError, ApiResult, AppError};
pub use pagination::{PaginatedResponse, PaginationMeta, PaginationParams};

use events::EventBus;
use services::{EmailService, InvoiceService, JobService, SmsService};
use state_machine::JobStateMachine;
use workflows::{ActionExecutor, AutomationEngine};

pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub state_machine: Arc<JobStateMachine>,
    pub engine: Arc<AutomationEngine>,
    pub event_bus: Arc<EventBus>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let email = EmailService::new(&config.smtp).await?;
    let sms = SmsService::new(&config.sms);
    let invoicing = InvoiceService::new(db_pool.clone());
    let job_service = JobService::new(db_pool.clone());

    let executor = ActionExecutor::new(
        db_pool.clone(),
        email,
        sms,
        invoicing.clone(),
        job_service,
        config.automation.action_timeout(),
    );
    let engine = Arc::new(AutomationEngine::new(db_pool.clone(), executor));
    let event_bus = Arc::new(EventBus::new(engine.clone()));
    let state_machine = Arc::new(JobStateMachine::new(
        db_pool.clone(),
        invoicing,
        event_bus.clone(),
    ));

    let runner = jobs::ScheduleRunner::new(db_pool.clone(), engine.clone(), event_bus.clone());
    let _scheduler = runner.start().await?;

    let app_state = Arc::new(AppState {
        db_pool,
        state_machine,
        engine,
        event_bus,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(|| async { "FieldOps Automation Core v1.0.0" }))
        .route("/health", get(handlers::health_check))
        .route("/internal/events", post(handlers::emit_event))
        .nest("/api/v1/jobs", handlers::job_routes())
        .nest("/api/v1/workflows", handlers::workflow_routes())
        .nest("/api/v1/automation-logs", handlers::automation_log_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
