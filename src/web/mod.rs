//! Web server: a thin admin/API ingress over the control surface and the
//! query layer. Authentication is handled by the outer deployment.

mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::config::RetentionConfig;
use crate::control::ControlSurface;
use crate::db::Store;
use crate::scheduler::Scheduler;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub scheduler: Arc<Scheduler>,
    pub control: Arc<ControlSurface>,
    pub retention: RetentionConfig,
}

pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    pub fn new(
        port: u16,
        store: Arc<Store>,
        scheduler: Arc<Scheduler>,
        control: Arc<ControlSurface>,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            port,
            state: AppState {
                store,
                scheduler,
                control,
                retention,
            },
        }
    }

    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/health", get(handlers::handle_health))
            // Monitors
            .route("/api/monitors", get(handlers::handle_list_monitors))
            .route("/api/monitors", post(handlers::handle_create_monitor))
            .route("/api/monitors/export", get(handlers::handle_export))
            .route("/api/monitors/import", post(handlers::handle_import))
            .route("/api/monitors/test", post(handlers::handle_test_monitor))
            .route("/api/monitors/{id}", get(handlers::handle_get_monitor))
            .route("/api/monitors/{id}", put(handlers::handle_edit_monitor))
            .route("/api/monitors/{id}", delete(handlers::handle_delete_monitor))
            .route("/api/monitors/{id}/toggle", post(handlers::handle_toggle_monitor))
            .route("/api/monitors/{id}/stats", get(handlers::handle_monitor_stats))
            .route("/api/monitors/{id}/chart", get(handlers::handle_chart))
            .route("/api/monitors/{id}/heartbeats", get(handlers::handle_heartbeats))
            .route("/api/monitors/{id}/clear", post(handlers::handle_clear_events))
            // Aggregation (admin hook)
            .route("/api/aggregate", post(handlers::handle_force_aggregation))
            // Notification rules
            .route("/api/notifications", get(handlers::handle_list_notifications))
            .route("/api/notifications", post(handlers::handle_add_notification))
            .route("/api/notifications/test", post(handlers::handle_test_notification))
            .route("/api/notifications/{id}", put(handlers::handle_edit_notification))
            .route("/api/notifications/{id}", delete(handlers::handle_delete_notification))
            .route(
                "/api/notifications/{id}/toggle",
                post(handlers::handle_toggle_notification),
            )
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves. Bind failures propagate so the
    /// process can exit non-zero.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}
