use chrono::{Datelike, Local};
use std::sync::Arc;
use tracing::{debug, info, warn};

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::chart::{demo_series, series_from_rows, ChartKind, ChartRenderer};
use crate::completion::{ChatMessage, CompletionClient};
use crate::database::{QueryExecutor, Row};
use crate::error::CommandError;
use crate::intent::Intent;
use crate::session::SessionStore;

/// Rows of a FETCH result shown to the model.
pub const SAMPLE_ROW_LIMIT: usize = 10;

pub const CREATE_LABEL: &str = "Generated SQL query:\n";

const SQL_EXPERT_PROMPT: &str =
    "You are a SQL expert. Answer with SQL only, without markdown fences or commentary.";
const ANALYST_PROMPT: &str = "You are a business intelligence analyst working with SQL data.";

/// A handler's successful output.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    /// Base64-encoded PNG, only produced by GRAPH
    pub graph: Option<String>,
}

impl Reply {
    fn text(text: String) -> Self {
        Self { text, graph: None }
    }
}

/// A query and the rows it returned.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlResult {
    pub query: String,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Copy)]
pub struct CompletionSettings {
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Routes classified instructions to the CREATE, FETCH, KPI and GRAPH handlers.
pub struct CommandDispatcher {
    completion: Arc<dyn CompletionClient>,
    executor: Arc<dyn QueryExecutor>,
    renderer: Arc<dyn ChartRenderer>,
    sessions: Arc<dyn SessionStore>,
    settings: CompletionSettings,
    database_name: String,
}

impl CommandDispatcher {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        executor: Arc<dyn QueryExecutor>,
        renderer: Arc<dyn ChartRenderer>,
        sessions: Arc<dyn SessionStore>,
        settings: CompletionSettings,
        database_name: impl Into<String>,
    ) -> Self {
        Self {
            completion,
            executor,
            renderer,
            sessions,
            settings,
            database_name: database_name.into(),
        }
    }

    pub async fn dispatch(
        &self,
        session_id: &str,
        instruction: &str,
    ) -> Result<Reply, CommandError> {
        let intent = Intent::classify(instruction);
        info!("[Chat] session={} intent={:?}", session_id, intent);

        let outcome = match intent {
            Intent::Create => self.create(session_id).await,
            Intent::Fetch => self.fetch(session_id).await,
            Intent::Kpi => self.kpi().await,
            Intent::Graph => self.graph(ChartKind::from_instruction(instruction)),
            Intent::Unrecognized => Err(CommandError::ClassificationMiss),
        };

        if let Err(e) = &outcome {
            warn!("[Chat] {:?} failed for session {}: {}", intent, session_id, e);
        }
        outcome
    }

    /// Ask the model for a query describing the database structure and remember it.
    pub async fn create(&self, session_id: &str) -> Result<Reply, CommandError> {
        let mut request = format!(
            "Write a SQL query that describes the full structure of the database '{}': \
             every table with its columns, data types, primary keys and foreign keys.",
            self.database_name
        );

        // Schema context is optional, CREATE works without a reachable database
        match self.executor.describe_schema().await {
            Ok(tables) if !tables.is_empty() => {
                request.push_str("\n\nKnown tables:\n");
                for table in &tables {
                    request.push_str(&table.describe());
                    request.push('\n');
                }
            }
            Ok(_) => {}
            Err(e) => debug!("[Create] schema unavailable: {}", e),
        }

        let messages = [ChatMessage::system(SQL_EXPERT_PROMPT), ChatMessage::user(request)];
        let query = self.complete(&messages).await?.trim().to_string();

        self.sessions.set_last_query(session_id, query.clone()).await;
        Ok(Reply::text(format!("{}{}", CREATE_LABEL, query)))
    }

    /// Run the session's last query and ask the model to analyse a sample of the rows.
    pub async fn fetch(&self, session_id: &str) -> Result<Reply, CommandError> {
        let query = self
            .sessions
            .last_query(session_id)
            .await
            .ok_or(CommandError::NoQuery)?;

        let rows = self.executor.execute(&query).await?;
        debug!(
            "[Fetch] {} rows returned, sampling {}",
            rows.len(),
            SAMPLE_ROW_LIMIT.min(rows.len())
        );

        let sample: Vec<String> = rows
            .iter()
            .take(SAMPLE_ROW_LIMIT)
            .map(|row| serde_json::Value::Object(row.clone()).to_string())
            .collect();

        let request = format!(
            "The query below was executed against the database '{}':\n{}\n\n\
             Sample rows (one JSON object per line):\n{}\n\n\
             Analyse this data, propose useful KPIs, and write a new SQL query to compute them.",
            self.database_name,
            query,
            sample.join("\n")
        );

        let messages = [ChatMessage::system(ANALYST_PROMPT), ChatMessage::user(request)];
        let analysis = self.complete(&messages).await?;

        Ok(Reply::text(format!(
            "Executed query:\n{}\n\nAnalysis:\n{}",
            query,
            analysis.trim()
        )))
    }

    pub async fn kpi(&self) -> Result<Reply, CommandError> {
        let request = format!(
            "Write a Python script that builds a KPI dashboard for the database '{}'. \
             Connect using credentials read from environment variables, query the key \
             business metrics, and plot each KPI.",
            self.database_name
        );

        let messages = [ChatMessage::system(ANALYST_PROMPT), ChatMessage::user(request)];
        let script = self.complete(&messages).await?;
        Ok(Reply::text(script.trim().to_string()))
    }

    /// Chart five years of synthetic demo values ending at the current year.
    pub fn graph(&self, kind: ChartKind) -> Result<Reply, CommandError> {
        self.graph_for_year(kind, Local::now().year())
    }

    pub fn graph_for_year(&self, kind: ChartKind, end_year: i32) -> Result<Reply, CommandError> {
        let series = demo_series(end_year, &mut rand::thread_rng());

        let png = self.renderer.render(kind, &series)?;
        let (first, last) = (&series[0].0, &series[series.len() - 1].0);

        Ok(Reply {
            text: format!(
                "Generated a {} chart of synthetic values for {}-{}.",
                kind.as_str(),
                first,
                last
            ),
            graph: Some(STANDARD.encode(png)),
        })
    }

    /// Run an explicit query, or one generated from `instruction`, or the
    /// session's last query, in that order of preference.
    pub async fn execute_sql(
        &self,
        session_id: &str,
        query: Option<&str>,
        instruction: Option<&str>,
    ) -> Result<SqlResult, CommandError> {
        let query = query.map(str::trim).filter(|q| !q.is_empty());
        let instruction = instruction.map(str::trim).filter(|i| !i.is_empty());

        let query = match (query, instruction) {
            (Some(query), _) => query.to_string(),
            (None, Some(instruction)) => self.generate_sql(instruction).await?,
            (None, None) => self
                .sessions
                .last_query(session_id)
                .await
                .ok_or(CommandError::NoQuery)?,
        };

        let rows = self.executor.execute(&query).await?;
        info!("[SQL] session={} returned {} rows", session_id, rows.len());
        Ok(SqlResult { query, rows })
    }

    /// Chart query rows and return the PNG as base64.
    pub fn chart_rows(&self, kind: ChartKind, rows: &[Row]) -> Result<String, CommandError> {
        let series = series_from_rows(rows)?;
        let png = self.renderer.render(kind, &series)?;
        Ok(STANDARD.encode(png))
    }

    async fn generate_sql(&self, instruction: &str) -> Result<String, CommandError> {
        let request = format!(
            "Database: '{}'.\n{}\nReturn a single SQL query.",
            self.database_name, instruction
        );
        let messages = [ChatMessage::system(SQL_EXPERT_PROMPT), ChatMessage::user(request)];
        Ok(self.complete(&messages).await?.trim().to_string())
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CommandError> {
        let text = self
            .completion
            .complete(messages, self.settings.max_tokens, self.settings.temperature)
            .await?;
        Ok(text)
    }
}
