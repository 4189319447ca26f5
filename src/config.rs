use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_ai_provider")]
    pub ai_provider: AiProvider,
    #[serde(default)]
    pub ai_base_url: Option<String>,
    #[serde(default = "default_ai_model")]
    pub ai_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_database_name")]
    pub database_name: String,
    #[serde(default = "default_max_result_mb")]
    pub max_result_mb: usize,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    // Secrets only come from the environment
    #[serde(skip)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    OpenAI,
    Ollama,
}

impl AiProvider {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "openai" => Some(AiProvider::OpenAI),
            "ollama" => Some(AiProvider::Ollama),
            _ => None,
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            AiProvider::OpenAI => "https://api.openai.com/v1",
            AiProvider::Ollama => "http://localhost:11434",
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_ai_provider() -> AiProvider {
    AiProvider::OpenAI
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    1500
}

fn default_temperature() -> f32 {
    0.5
}

fn default_database_name() -> String {
    "demo".to_string()
}

fn default_max_result_mb() -> usize {
    100
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ai_provider: default_ai_provider(),
            ai_base_url: None,
            ai_model: default_ai_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            database_path: None,
            database_name: default_database_name(),
            max_result_mb: default_max_result_mb(),
            allowed_origins: Vec::new(),
            api_key: None,
        }
    }
}

impl AppConfig {
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".insightchat")
    }

    pub fn config_file() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Load from `path` (or the default config file when present), then apply
    /// environment overrides.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::read_file(path).await?,
            None => {
                let default_file = Self::config_file();
                if default_file.exists() {
                    Self::read_file(&default_file).await?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    async fn read_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("INSIGHT_BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(provider) = lookup("INSIGHT_AI_PROVIDER") {
            match AiProvider::parse(&provider) {
                Some(p) => self.ai_provider = p,
                None => tracing::warn!("Ignoring unknown INSIGHT_AI_PROVIDER '{}'", provider),
            }
        }
        if let Some(url) = lookup("INSIGHT_AI_BASE_URL") {
            self.ai_base_url = Some(url);
        }
        if let Some(model) = lookup("INSIGHT_AI_MODEL") {
            self.ai_model = model;
        }
        if let Some(tokens) = lookup("INSIGHT_MAX_TOKENS").and_then(|v| v.parse().ok()) {
            self.max_tokens = tokens;
        }
        if let Some(temperature) = lookup("INSIGHT_TEMPERATURE").and_then(|v| v.parse().ok()) {
            self.temperature = temperature;
        }
        if let Some(path) = lookup("INSIGHT_DATABASE_PATH") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(name) = lookup("INSIGHT_DATABASE_NAME") {
            self.database_name = name;
        }
        if let Some(mb) = lookup("INSIGHT_MAX_RESULT_MB").and_then(|v| v.parse().ok()) {
            self.max_result_mb = mb;
        }
        if let Some(origins) = lookup("INSIGHT_ALLOWED_ORIGINS") {
            self.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.api_key = Some(key);
        }
    }

    pub fn ai_base_url(&self) -> &str {
        self.ai_base_url
            .as_deref()
            .unwrap_or_else(|| self.ai_provider.default_base_url())
    }

    pub fn max_result_bytes(&self) -> usize {
        self.max_result_mb.saturating_mul(1024 * 1024)
    }
}
