pub mod api;
pub mod chart;
pub mod commands;
pub mod completion;
pub mod config;
pub mod database;
pub mod error;
pub mod intent;
pub mod reply;
pub mod session;

use axum::{
    http::StatusCode,
    response::Json,
};
use std::sync::Arc;

use crate::commands::CommandDispatcher;
use crate::config::AppConfig;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub dispatcher: Arc<CommandDispatcher>,
    pub sessions: Arc<dyn SessionStore>,
}

pub async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "ok",
        "service": "insight-chat-backend"
    })))
}
