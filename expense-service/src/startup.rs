//! Application startup and lifecycle management.

use crate::api;
use crate::config::ExpenseConfig;
use crate::models::MatchingRule;
use crate::repository::{
    ApprovalRepository, ExpenseRepository, MatchRepository, MemoryStore, PolicyRepository,
    RecordRepository, RuleRepository, TtlCache,
};
use crate::services::{
    get_metrics, init_metrics, ApprovalWorkflow, Database, Orchestrator, TracingNotifier,
};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use chrono::Utc;
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ExpenseConfig,
    pub records: Arc<dyn RecordRepository>,
    pub expenses: Arc<dyn ExpenseRepository>,
    pub rules: Arc<dyn RuleRepository>,
    pub policies: Arc<dyn PolicyRepository>,
    pub matches: Arc<dyn MatchRepository>,
    pub approvals: Arc<dyn ApprovalRepository>,
    pub rule_cache: Arc<TtlCache<Vec<MatchingRule>>>,
    pub workflow: Arc<ApprovalWorkflow>,
    pub orchestrator: Arc<Orchestrator>,
    database: Option<Arc<Database>>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match &state.database {
        Some(db) => match db.health_check().await {
            Ok(_) => {
                tracing::debug!("Health check passed");
                (
                    StatusCode::OK,
                    Json(json!({
                        "status": "ok",
                        "service": "expense-service",
                        "version": env!("CARGO_PKG_VERSION")
                    })),
                )
            }
            Err(e) => {
                tracing::warn!(error = %e, "Health check failed - database unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({
                        "status": "unhealthy",
                        "service": "expense-service",
                        "error": e.to_string()
                    })),
                )
            }
        },
        None => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "expense-service",
                "version": env!("CARGO_PKG_VERSION"),
                "storage": "memory"
            })),
        ),
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match &state.database {
        Some(db) => match db.health_check().await {
            Ok(_) => StatusCode::OK,
            Err(e) => {
                tracing::warn!(error = %e, "Readiness check failed");
                StatusCode::SERVICE_UNAVAILABLE
            }
        },
        None => StatusCode::OK,
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    let metrics = get_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        metrics,
    )
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration. Without a
    /// configured database the service runs on in-memory repositories.
    pub async fn build(config: ExpenseConfig) -> Result<Self, AppError> {
        init_metrics();

        let (records, expenses, rules, policies, matches, approvals, database) =
            match &config.database {
                Some(db_config) => {
                    let database = Arc::new(
                        Database::new(
                            &db_config.url,
                            db_config.max_connections,
                            db_config.min_connections,
                        )
                        .await
                        .map_err(|e| {
                            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                            AppError::from(e)
                        })?,
                    );
                    database.run_migrations().await.map_err(|e| {
                        tracing::error!(error = %e, "Failed to run migrations");
                        AppError::from(e)
                    })?;
                    (
                        database.clone() as Arc<dyn RecordRepository>,
                        database.clone() as Arc<dyn ExpenseRepository>,
                        database.clone() as Arc<dyn RuleRepository>,
                        database.clone() as Arc<dyn PolicyRepository>,
                        database.clone() as Arc<dyn MatchRepository>,
                        database.clone() as Arc<dyn ApprovalRepository>,
                        Some(database),
                    )
                }
                None => {
                    tracing::info!("DATABASE_URL not configured - using in-memory repositories");
                    let store = Arc::new(MemoryStore::new());
                    (
                        store.clone() as Arc<dyn RecordRepository>,
                        store.clone() as Arc<dyn ExpenseRepository>,
                        store.clone() as Arc<dyn RuleRepository>,
                        store.clone() as Arc<dyn PolicyRepository>,
                        store.clone() as Arc<dyn MatchRepository>,
                        store as Arc<dyn ApprovalRepository>,
                        None,
                    )
                }
            };

        let rule_cache = Arc::new(TtlCache::new());
        let workflow = Arc::new(ApprovalWorkflow::new(
            approvals.clone(),
            expenses.clone(),
            policies.clone(),
            Arc::new(TracingNotifier),
            config.approval.escalation_delay_hours,
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            records.clone(),
            expenses.clone(),
            rules.clone(),
            policies.clone(),
            matches.clone(),
            workflow.clone(),
            rule_cache.clone(),
            config.matching.match_threshold,
            config.matching.auto_confirm_threshold,
        ));

        let state = AppState {
            config: config.clone(),
            records,
            expenses,
            rules,
            policies,
            matches,
            approvals,
            rule_cache,
            workflow,
            orchestrator,
            database,
        };

        let listener = TcpListener::bind((config.common.host.as_str(), config.common.port))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, host = %config.common.host, port = config.common.port, "Failed to bind HTTP listener");
                AppError::from(e)
            })?;
        let port = listener.local_addr()?.port();
        tracing::info!(port = port, "Expense service listener bound");

        Ok(Self {
            port,
            listener,
            state,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .route("/metrics", get(metrics_handler))
            .merge(api::router())
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(self.state.clone());

        // Scheduler collaborator for deadline escalation: a periodic sweep
        // over pending requests past their expiry.
        let sweep_workflow = self.state.workflow.clone();
        let sweep_interval = self.state.config.approval.sweep_interval_secs.max(1);
        let escalation_sweep = async move {
            let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval));
            loop {
                interval.tick().await;
                match sweep_workflow.escalate_due(Utc::now()).await {
                    Ok(actioned) if !actioned.is_empty() => {
                        tracing::info!(count = actioned.len(), "Escalation sweep actioned requests");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "Escalation sweep failed"),
                }
            }
        };

        tracing::info!(
            service = "expense-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        tokio::select! {
            result = axum::serve(self.listener, router) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "HTTP server error");
                    return Err(std::io::Error::other(format!("HTTP server error: {}", e)));
                }
            }
            _ = escalation_sweep => {}
        }

        Ok(())
    }
}
