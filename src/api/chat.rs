use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::chart::ChartKind;
use crate::database::Row;
use crate::reply::ReplyEnvelope;
use crate::session::DEFAULT_SESSION;
use crate::AppState;

#[derive(Deserialize)]
pub struct ChatRequest {
    // Older clients send `message` (plus an ignored `chatHistory`)
    #[serde(default, alias = "message")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct SessionParams {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct ExecuteSqlRequest {
    // Natural-language request to turn into SQL
    #[serde(default, rename = "chatHistory")]
    pub chat_history: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Serialize)]
pub struct ExecuteSqlResponse {
    query: String,
    dataset: Vec<Row>,
}

#[derive(Deserialize)]
pub struct GenerateGraphRequest {
    #[serde(default)]
    pub dataset: Vec<Row>,
    #[serde(default)]
    pub kind: ChartKind,
}

#[derive(Serialize)]
pub struct GraphResponse {
    image: String,
}

#[derive(Serialize)]
pub struct SchemaResponse {
    #[serde(flatten)]
    envelope: ReplyEnvelope,
    // Same text as `reply`, under the field the schema button reads
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Serialize)]
pub struct SessionResponse {
    session_id: String,
    query: Option<String>,
}

fn session_or_default(session_id: Option<&str>) -> &str {
    session_id
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SESSION)
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> (StatusCode, Json<ReplyEnvelope>) {
    let Some(prompt) = request.prompt else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ReplyEnvelope::failure("Prompt is required")),
        );
    };

    let session_id = session_or_default(request.session_id.as_deref());
    let outcome = state.dispatcher.dispatch(session_id, &prompt).await;

    let (status, envelope) = ReplyEnvelope::from_outcome(outcome);
    (status, Json(envelope))
}

// "Initial query" button: generates the schema query for the session
pub async fn fetch_schema(
    State(state): State<AppState>,
    Query(params): Query<SessionParams>,
) -> (StatusCode, Json<SchemaResponse>) {
    let session_id = session_or_default(params.session_id.as_deref());
    let outcome = state.dispatcher.create(session_id).await;

    let (status, envelope) = ReplyEnvelope::from_outcome(outcome);
    let message = envelope.reply.clone();
    (status, Json(SchemaResponse { envelope, message }))
}

pub async fn kpi_query(
    State(state): State<AppState>,
    request: Option<Json<SessionParams>>,
) -> (StatusCode, Json<ReplyEnvelope>) {
    let params = request.map(|Json(p)| p).unwrap_or_default();
    tracing::info!(
        "[KPI] session={}",
        session_or_default(params.session_id.as_deref())
    );

    let (status, envelope) = ReplyEnvelope::from_outcome(state.dispatcher.kpi().await);
    (status, Json(envelope))
}

pub async fn execute_sql(
    State(state): State<AppState>,
    request: Option<Json<ExecuteSqlRequest>>,
) -> Result<Json<ExecuteSqlResponse>, (StatusCode, Json<ReplyEnvelope>)> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let session_id = session_or_default(request.session_id.as_deref());

    let result = state
        .dispatcher
        .execute_sql(
            session_id,
            request.query.as_deref(),
            request.chat_history.as_deref(),
        )
        .await
        .map_err(|e| {
            tracing::error!("[SQL] {}", e);
            (e.status_code(), Json(ReplyEnvelope::failure(e.to_string())))
        })?;

    Ok(Json(ExecuteSqlResponse {
        query: result.query,
        dataset: result.rows,
    }))
}

pub async fn generate_graph(
    State(state): State<AppState>,
    Json(request): Json<GenerateGraphRequest>,
) -> Result<Json<GraphResponse>, (StatusCode, Json<ReplyEnvelope>)> {
    let image = state
        .dispatcher
        .chart_rows(request.kind, &request.dataset)
        .map_err(|e| {
            tracing::warn!("[GRAPH] {}", e);
            (e.status_code(), Json(ReplyEnvelope::failure(e.to_string())))
        })?;

    Ok(Json(GraphResponse { image }))
}

pub async fn get_session(
    State(state): State<AppState>,
    Query(params): Query<SessionParams>,
) -> Json<SessionResponse> {
    let session_id = session_or_default(params.session_id.as_deref());
    let query = state.sessions.last_query(session_id).await;

    Json(SessionResponse {
        session_id: session_id.to_string(),
        query,
    })
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    use crate::commands::testing::{StubCompletion, StubExecutor, StubRenderer};
    use crate::commands::{CommandDispatcher, CompletionSettings};
    use crate::config::AppConfig;
    use crate::error::GUIDANCE_MESSAGE;
    use crate::session::{InMemorySessionStore, SessionStore, DEFAULT_SESSION};
    use crate::AppState;

    fn app(completion: StubCompletion) -> (Router, Arc<InMemorySessionStore>) {
        app_with(completion, Arc::new(StubExecutor::with_rows(3)))
    }

    fn app_with(
        completion: StubCompletion,
        executor: Arc<StubExecutor>,
    ) -> (Router, Arc<InMemorySessionStore>) {
        let sessions = Arc::new(InMemorySessionStore::new());
        let dispatcher = CommandDispatcher::new(
            Arc::new(completion),
            executor,
            Arc::new(StubRenderer::default()),
            sessions.clone(),
            CompletionSettings {
                max_tokens: 100,
                temperature: 0.0,
            },
            "demo",
        );
        let state = AppState {
            config: Arc::new(AppConfig::default()),
            dispatcher: Arc::new(dispatcher),
            sessions: sessions.clone(),
        };
        (crate::api::router(state), sessions)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_create_prompt_fills_slot() {
        let (app, sessions) = app(StubCompletion::replying(&["SELECT * FROM x"]));

        let prompt = json!({"prompt": "please CREATE the schema"});
        let (status, body) = send(&app, "POST", "/chat", Some(prompt)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["reply"].as_str().unwrap().contains("SELECT * FROM x"));
        assert!(body.get("error").is_none());
        assert_eq!(
            sessions.last_query(DEFAULT_SESSION).await.as_deref(),
            Some("SELECT * FROM x")
        );
    }

    #[tokio::test]
    async fn test_fetch_without_create() {
        let (app, _) = app(StubCompletion::replying(&[]));

        let (status, body) = send(&app, "POST", "/chat", Some(json!({"prompt": "FETCH it"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"error": "No query to fetch. Please CREATE a query first."}));
    }

    #[tokio::test]
    async fn test_unrecognized_prompt_gets_guidance() {
        let (app, _) = app(StubCompletion::replying(&[]));

        let (status, body) = send(&app, "POST", "/chat", Some(json!({"prompt": "hello"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"error": GUIDANCE_MESSAGE}));
    }

    #[tokio::test]
    async fn test_completion_failure_is_500() {
        let (app, _) = app(StubCompletion::replying(&[]));

        let prompt = json!({"prompt": "kpi please"});
        let (status, body) = send(&app, "POST", "/chat", Some(prompt)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().is_some());
        assert!(body.get("reply").is_none());
    }

    #[tokio::test]
    async fn test_legacy_message_field_and_missing_prompt() {
        let (app, _) = app(StubCompletion::replying(&["SELECT 1"]));

        let (status, body) = send(
            &app,
            "POST",
            "/chat",
            Some(json!({"message": "create", "chatHistory": "User: hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["reply"].as_str().unwrap().ends_with("SELECT 1"));

        let (status, body) = send(&app, "POST", "/chat", Some(json!({"chatHistory": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Prompt is required"}));
    }

    #[tokio::test]
    async fn test_graph_returns_image() {
        let (app, _) = app(StubCompletion::replying(&[]));

        let (status, body) = send(&app, "POST", "/chat", Some(json!({"prompt": "GRAPH"}))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["graph"], json!("iVBORw=="));
        assert!(body["reply"].as_str().unwrap().contains("bar chart"));
    }

    #[tokio::test]
    async fn test_fetch_schema_button_and_session_endpoint() {
        let (app, _) = app(StubCompletion::replying(&["SELECT 42"]));

        let (status, body) = send(&app, "GET", "/fetch_schema?session_id=alice", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], body["reply"]);
        assert!(body["message"].as_str().unwrap().ends_with("SELECT 42"));

        let (_, body) = send(&app, "GET", "/api/session?session_id=alice", None).await;
        assert_eq!(body, json!({"session_id": "alice", "query": "SELECT 42"}));

        let (_, body) = send(&app, "GET", "/api/session", None).await;
        assert_eq!(body, json!({"session_id": "default", "query": null}));
    }

    #[tokio::test]
    async fn test_kpi_button_without_body() {
        let (app, _) = app(StubCompletion::replying(&["print('dashboard')"]));

        let (status, body) = send(&app, "POST", "/kpi_query", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"reply": "print('dashboard')"}));
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app(StubCompletion::replying(&[]));
        let (status, body) = send(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("ok"));
    }

    #[tokio::test]
    async fn test_execute_sql_from_chat_history() {
        let executor = Arc::new(StubExecutor::with_rows(2));
        let (app, sessions) = app_with(
            StubCompletion::replying(&["SELECT row_id FROM orders"]),
            executor.clone(),
        );

        let request = json!({"chatHistory": "User: list the order ids"});
        let (status, body) = send(&app, "POST", "/execute_sql", Some(request)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["query"], json!("SELECT row_id FROM orders"));
        assert_eq!(body["dataset"], json!([{"row_id": 0}, {"row_id": 1}]));
        assert_eq!(
            *executor.executed.lock().unwrap(),
            vec!["SELECT row_id FROM orders".to_string()]
        );
        // Running SQL directly never replaces the session's query
        assert_eq!(sessions.last_query(DEFAULT_SESSION).await, None);
    }

    #[tokio::test]
    async fn test_execute_sql_without_query_or_history() {
        let (app, _) = app(StubCompletion::replying(&[]));

        let (status, body) = send(&app, "POST", "/execute_sql", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"error": "No query to fetch. Please CREATE a query first."}));
    }

    #[tokio::test]
    async fn test_generate_graph_from_dataset() {
        let (app, _) = app(StubCompletion::replying(&[]));

        let dataset = json!({
            "dataset": [{"region": "north", "total": 12}, {"region": "south", "total": 7.5}],
            "kind": "line"
        });
        let (status, body) = send(&app, "POST", "/generate_graph", Some(dataset)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"image": "iVBORw=="}));
    }

    #[tokio::test]
    async fn test_generate_graph_rejects_unplottable_dataset() {
        let (app, _) = app(StubCompletion::replying(&[]));

        let dataset = json!({"dataset": [{"region": "north", "note": "n/a"}]});
        let (status, body) = send(&app, "POST", "/generate_graph", Some(dataset)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "dataset has no numeric column to plot"}));

        let (status, _) =
            send(&app, "POST", "/generate_graph", Some(json!({"dataset": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
