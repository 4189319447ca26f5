use axum::http::StatusCode;
use thiserror::Error;

/// Message returned when an instruction names none of the command keywords.
pub const GUIDANCE_MESSAGE: &str =
    "Unrecognized command. Please include one of the keywords: CREATE, FETCH, KPI or GRAPH.";

/// Message returned when FETCH runs before any CREATE in the session.
pub const NO_QUERY_MESSAGE: &str = "No query to fetch. Please CREATE a query first.";

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error: {status} - {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("no API key configured for {0}")]
    MissingApiKey(&'static str),

    #[error("no response from {0}")]
    EmptyResponse(&'static str),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("no database configured (set INSIGHT_DATABASE_PATH)")]
    NotConfigured,

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("query task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot render an empty series")]
    EmptySeries,

    #[error("dataset has no numeric column to plot")]
    NoNumericColumn,

    #[error("value for '{0}' is not a finite number")]
    InvalidValue(String),

    #[error("failed to encode chart: {0}")]
    Encode(#[from] image::ImageError),
}

/// Outcome of a single command that did not produce a reply.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{}", GUIDANCE_MESSAGE)]
    ClassificationMiss,

    #[error("{}", NO_QUERY_MESSAGE)]
    NoQuery,

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

impl CommandError {
    /// Bad input is answered with 200 and guidance; collaborator failures are server faults.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CommandError::ClassificationMiss | CommandError::NoQuery => StatusCode::OK,
            // Only caller-supplied datasets can be empty or non-numeric
            CommandError::Render(RenderError::EmptySeries | RenderError::NoNumericColumn) => {
                StatusCode::BAD_REQUEST
            }
            CommandError::Completion(_) | CommandError::Query(_) | CommandError::Render(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_input_errors_are_not_server_faults() {
        assert_eq!(CommandError::ClassificationMiss.status_code(), StatusCode::OK);
        assert_eq!(CommandError::NoQuery.status_code(), StatusCode::OK);
        assert_eq!(
            CommandError::from(QueryError::NotConfigured).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            CommandError::from(RenderError::NoNumericColumn).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CommandError::from(RenderError::InvalidValue("2026".to_string())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_messages_surface_underlying_cause() {
        let err = CommandError::from(CompletionError::Api {
            provider: "OpenAI",
            status: 429,
            body: "quota exceeded".to_string(),
        });
        assert_eq!(err.to_string(), "OpenAI API error: 429 - quota exceeded");
        assert_eq!(CommandError::NoQuery.to_string(), NO_QUERY_MESSAGE);
    }
}
