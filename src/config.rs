use crate::error::AppError;
use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    pub trigger_keywords: Vec<String>,
    pub context_messages: usize,
    pub request_timeout_secs: u64,
    pub max_concurrent_jobs: usize,
    pub trigger_on_private: bool,
    pub trigger_on_mention: bool,
    pub trigger_on_keyword: bool,
}

impl AiConfig {
    fn from_env() -> Self {
        let trigger_keywords = env::var("AI_TRIGGER_KEYWORDS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            enabled: env_bool("AI_ENABLED", true),
            base_url: env::var("AI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            api_key: env::var("AI_API_KEY").unwrap_or_default(),
            model: env::var("AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            system_prompt: env::var("AI_SYSTEM_PROMPT")
                .unwrap_or_else(|_| "You are a helpful participant in a group chat.".to_string()),
            trigger_keywords,
            context_messages: env_parse("AI_CONTEXT_MESSAGES", 10),
            request_timeout_secs: env_parse("AI_REQUEST_TIMEOUT_SECS", 20),
            max_concurrent_jobs: env_parse("AI_MAX_CONCURRENT_JOBS", 4),
            trigger_on_private: env_bool("AI_TRIGGER_ON_PRIVATE", true),
            trigger_on_mention: env_bool("AI_TRIGGER_ON_MENTION", true),
            trigger_on_keyword: env_bool("AI_TRIGGER_ON_KEYWORD", true),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_host: String,
    pub listen_port: u16,
    pub max_connections: usize,
    pub database_url: String,
    pub file_storage_root: String,
    pub max_file_size_bytes: u64,
    pub allowed_file_extensions: Vec<String>,
    pub bootstrap_admin_password: String,
    pub ai: AiConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL missing".into()))?;

        let allowed_file_extensions = env::var("ALLOWED_FILE_EXTENSIONS")
            .unwrap_or_else(|_| "txt,png,jpg,jpeg,gif,pdf,zip,md,log".to_string())
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            listen_host: env::var("LISTEN_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            listen_port: env_parse("LISTEN_PORT", 9999),
            max_connections: env_parse("MAX_CONNECTIONS", 1024),
            database_url,
            file_storage_root: env::var("FILE_STORAGE_ROOT")
                .unwrap_or_else(|_| "./data/files".to_string()),
            max_file_size_bytes: env_parse("MAX_FILE_SIZE_BYTES", 100 * 1024 * 1024),
            allowed_file_extensions,
            bootstrap_admin_password: env::var("BOOTSTRAP_ADMIN_PASSWORD")
                .unwrap_or_else(|_| "changeme123".to_string()),
            ai: AiConfig::from_env(),
        })
    }
}
