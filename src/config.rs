use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "./studyhelper.db";
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_UPLOAD_FOLDER: &str = "./uploads";
pub const DEFAULT_CHAT_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CHAT_MODEL: &str = "gpt-3.5-turbo";

/// Process-wide settings, read once at startup and handed to every component.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub server_addr: String,
    pub db_pool_size: u32,
    pub token_secret: String,
    pub token_ttl: Duration,
    pub upload_folder: PathBuf,
    pub max_upload_bytes: usize,
    pub chat: ChatConfig,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let token_secret = env::var("JWT_SECRET_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| anyhow!("JWT_SECRET_KEY must be set"))?;

        let api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty());

        Ok(Config {
            database_url: env::var("DATABASE_URL").unwrap_or(DEFAULT_DB_PATH.to_string()),
            server_addr: env::var("SERVER_ADDR").unwrap_or(DEFAULT_SERVER_ADDR.to_string()),
            db_pool_size: parse_var("DB_POOL_SIZE", 8)?,
            token_secret,
            token_ttl: Duration::from_secs(u64::from(parse_var::<u32>("TOKEN_TTL_SECS", 3600)?)),
            upload_folder: PathBuf::from(
                env::var("UPLOAD_FOLDER").unwrap_or(DEFAULT_UPLOAD_FOLDER.to_string()),
            ),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", 16 * 1024 * 1024)?,
            chat: ChatConfig {
                api_key,
                api_url: env::var("OPENAI_API_URL").unwrap_or(DEFAULT_CHAT_API_URL.to_string()),
                model: env::var("OPENAI_MODEL").unwrap_or(DEFAULT_CHAT_MODEL.to_string()),
                timeout: Duration::from_secs(parse_var("CHAT_TIMEOUT_SECS", 30)?),
            },
        })
    }

    /// Settings for tests and local tooling: in-memory database, fixed secret.
    pub fn for_testing(upload_folder: PathBuf) -> Self {
        Config {
            database_url: ":memory:".to_string(),
            server_addr: DEFAULT_SERVER_ADDR.to_string(),
            db_pool_size: 1,
            token_secret: "test-secret".to_string(),
            token_ttl: Duration::from_secs(3600),
            upload_folder,
            max_upload_bytes: 1024 * 1024,
            chat: ChatConfig {
                api_key: Some("test-key".to_string()),
                api_url: DEFAULT_CHAT_API_URL.to_string(),
                model: DEFAULT_CHAT_MODEL.to_string(),
                timeout: Duration::from_secs(5),
            },
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_when_unset() {
        let value: u64 = parse_var("STUDYHELPER_TEST_UNSET_VAR", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        env::set_var("STUDYHELPER_TEST_BAD_NUMBER", "not-a-number");
        let result: Result<u64> = parse_var("STUDYHELPER_TEST_BAD_NUMBER", 1);
        assert!(result.is_err());
        env::remove_var("STUDYHELPER_TEST_BAD_NUMBER");
    }

    #[test]
    fn test_parse_var_rejects_out_of_range_lifetime() {
        env::set_var("STUDYHELPER_TEST_HUGE_TTL", "18446744073709551615");
        let result: Result<u32> = parse_var("STUDYHELPER_TEST_HUGE_TTL", 3600);
        assert!(result.is_err());
        env::remove_var("STUDYHELPER_TEST_HUGE_TTL");
    }

    #[test]
    fn test_for_testing_uses_memory_db() {
        let config = Config::for_testing(PathBuf::from("/tmp/uploads"));
        assert_eq!(config.database_url, ":memory:");
        assert_eq!(config.db_pool_size, 1);
        assert!(config.chat.api_key.is_some());
    }
}
