//! Service configuration loaded from the environment at startup

use crate::error::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Top-level service configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Database pool configuration
    pub database: DatabaseConfig,

    /// LLM client configuration
    pub llm: LlmConfig,

    /// Request authentication
    pub auth: AuthConfig,
}

/// HTTP server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Port
    pub port: u16,

    /// Per-request deadline for the full pipeline (ms)
    pub request_timeout_ms: u64,
}

/// Database pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection string
    pub url: String,

    /// statement_timeout applied to every checked-out connection (ms)
    pub statement_timeout_ms: u64,

    /// Maximum pooled connections
    pub pool_max_connections: u32,

    /// How long a checkout may wait on a saturated pool (ms)
    pub pool_acquire_timeout_ms: u64,

    /// Idle connection lifetime (ms)
    pub pool_idle_timeout_ms: u64,

    /// Log every executed statement at info level
    pub debug_sql: bool,
}

/// LLM client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// API credential
    pub api_key: String,

    /// Chat-completions endpoint base, OpenAI-compatible
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Client-side timeout for each LLM call (ms)
    pub timeout_ms: u64,
}

/// Request authentication configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Shared secret expected in x-service-key. Same-origin requests are
    /// exempt; deployments on untrusted networks should not rely on that
    /// exemption and should require the key everywhere.
    pub service_api_key: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_ms: 120_000,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_ms: 60_000,
        }
    }
}

impl DatabaseConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Required: `DATABASE_URL`, `OPENAI_API_KEY`, `SERVICE_API_KEY`.
    /// Optional: `PORT`, `HOST`, `DB_QUERY_TIMEOUT_MS`, `REQUEST_TIMEOUT_MS`,
    /// `DB_POOL_MAX`, `OPENAI_BASE_URL`, `OPENAI_MODEL`, `DEBUG_SQL`.
    pub fn from_env() -> ServiceResult<Self> {
        let database_url = require_env("DATABASE_URL")?;
        let api_key = require_env("OPENAI_API_KEY")?;
        let service_api_key = require_env("SERVICE_API_KEY")?;

        let llm_defaults = LlmConfig::default();
        let server_defaults = ServerConfig::default();

        Ok(Self {
            server: ServerConfig {
                host: env::var("HOST").unwrap_or(server_defaults.host),
                port: parse_env("PORT", server_defaults.port),
                request_timeout_ms: parse_env(
                    "REQUEST_TIMEOUT_MS",
                    server_defaults.request_timeout_ms,
                ),
            },
            database: DatabaseConfig {
                url: database_url,
                statement_timeout_ms: parse_env("DB_QUERY_TIMEOUT_MS", 60_000),
                pool_max_connections: parse_env("DB_POOL_MAX", 5),
                pool_acquire_timeout_ms: parse_env("DB_POOL_ACQUIRE_TIMEOUT_MS", 5_000),
                pool_idle_timeout_ms: parse_env("DB_POOL_IDLE_TIMEOUT_MS", 10_000),
                debug_sql: flag_env("DEBUG_SQL"),
            },
            llm: LlmConfig {
                api_key,
                base_url: env::var("OPENAI_BASE_URL").unwrap_or(llm_defaults.base_url),
                model: env::var("OPENAI_MODEL").unwrap_or(llm_defaults.model),
                timeout_ms: parse_env("OPENAI_TIMEOUT_MS", llm_defaults.timeout_ms),
            },
            auth: AuthConfig { service_api_key },
        })
    }
}

fn require_env(name: &'static str) -> ServiceResult<String> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ServiceError::internal(format!(
            "required environment variable {} is not set",
            name
        ))),
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn flag_env(name: &str) -> bool {
    matches!(
        env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let server = ServerConfig::default();
        assert_eq!(server.port, 8080);
        assert_eq!(server.request_timeout(), Duration::from_secs(120));

        let llm = LlmConfig::default();
        assert_eq!(llm.timeout_ms, 60_000);
    }
}
