use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::commands::Reply;
use crate::error::CommandError;

/// JSON body of every `/chat` response. Exactly one of `reply` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<String>,
}

impl ReplyEnvelope {
    pub fn success(reply: Reply) -> Self {
        Self {
            reply: Some(reply.text),
            error: None,
            graph: reply.graph,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            reply: None,
            error: Some(message.into()),
            graph: None,
        }
    }

    pub fn from_outcome(outcome: Result<Reply, CommandError>) -> (StatusCode, Self) {
        match outcome {
            Ok(reply) => (StatusCode::OK, Self::success(reply)),
            Err(e) => (e.status_code(), Self::failure(e.to_string())),
        }
    }
}
