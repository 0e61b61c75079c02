//! Process configuration and runtime-mutable integration credentials

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to update env file {path}: {source}")]
    EnvFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid value for {0}: must be a single line")]
    InvalidEntry(String),
}

/// Settings fixed for the lifetime of the process
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub port: u16,
    pub app_url: Option<String>,
    pub jwt_secret: String,
    pub env_file: PathBuf,
    /// Public base URL Twilio calls back into
    pub public_webhook_url: String,
    pub retell_base_url: String,
    pub retell_webhook_secret: Option<String>,
    pub retell_llm_websocket_base: String,
    pub twilio_base_url: String,
    pub openai_base_url: String,
    pub webhook_workers: usize,
    pub delivery_retention_days: i64,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn from_env(port: u16) -> Self {
        Self {
            env: env_opt("APP_ENV").unwrap_or_else(|| "development".to_string()),
            port,
            app_url: env_opt("APP_URL"),
            jwt_secret: env_opt("JWT_SECRET").unwrap_or_else(|| {
                tracing::warn!("JWT_SECRET not set, using an insecure development secret");
                "dev-secret-change-me".to_string()
            }),
            env_file: env_opt("ENV_FILE").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".env")),
            public_webhook_url: env_opt("PUBLIC_WEBHOOK_URL")
                .unwrap_or_else(|| format!("http://localhost:{}", port)),
            retell_base_url: env_opt("RETELL_BASE_URL")
                .unwrap_or_else(|| "https://api.retellai.com".to_string()),
            retell_webhook_secret: env_opt("RETELL_WEBHOOK_SECRET"),
            retell_llm_websocket_base: env_opt("RETELL_LLM_WEBSOCKET_BASE")
                .unwrap_or_else(|| format!("ws://localhost:{}/llm-websocket", port)),
            twilio_base_url: env_opt("TWILIO_BASE_URL")
                .unwrap_or_else(|| "https://api.twilio.com/2010-04-01".to_string()),
            openai_base_url: env_opt("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            webhook_workers: env_opt("WEBHOOK_WORKERS")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(4),
            delivery_retention_days: env_opt("WEBHOOK_DELIVERY_RETENTION_DAYS")
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(30),
        }
    }
}

/// Credentials that can be replaced at runtime through the config API
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntegrationSettings {
    pub retell_api_key: Option<String>,
    pub twilio_account_sid: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_phone_number: Option<String>,
    pub openai_api_key: Option<String>,
}

impl IntegrationSettings {
    pub fn from_env() -> Self {
        Self {
            retell_api_key: env_opt("RETELL_API_KEY"),
            twilio_account_sid: env_opt("TWILIO_ACCOUNT_SID"),
            twilio_auth_token: env_opt("TWILIO_AUTH_TOKEN"),
            twilio_phone_number: env_opt("TWILIO_PHONE_NUMBER"),
            openai_api_key: env_opt("OPENAI_API_KEY"),
        }
    }

    pub fn retell_configured(&self) -> bool {
        has_prefix(&self.retell_api_key, "key_")
    }

    pub fn twilio_configured(&self) -> bool {
        has_prefix(&self.twilio_account_sid, "AC")
    }

    pub fn openai_configured(&self) -> bool {
        has_prefix(&self.openai_api_key, "sk-")
    }

    /// Masked view safe to return to clients
    pub fn view(&self, config: &AppConfig) -> ConfigView {
        ConfigView {
            retell: RetellView {
                configured: self.retell_configured(),
                api_key: mask_secret(self.retell_api_key.as_deref()),
            },
            twilio: TwilioView {
                configured: self.twilio_configured(),
                account_sid: mask_secret(self.twilio_account_sid.as_deref()),
                phone_number: self.twilio_phone_number.clone(),
            },
            openai: OpenAiView {
                configured: self.openai_configured(),
                api_key: mask_secret(self.openai_api_key.as_deref()),
            },
            app: AppView {
                env: config.env.clone(),
                port: config.port,
                app_url: config.app_url.clone(),
            },
        }
    }

    pub fn status(&self) -> IntegrationsStatus {
        let entry = |configured| IntegrationStatus { configured, status: "not_tested" };
        IntegrationsStatus {
            retell: entry(self.retell_configured()),
            twilio: entry(self.twilio_configured()),
            openai: entry(self.openai_configured()),
        }
    }
}

fn has_prefix(value: &Option<String>, prefix: &str) -> bool {
    value.as_deref().is_some_and(|v| v.starts_with(prefix))
}

/// `abcd***wxyz`; anything absent or shorter than 8 chars is fully hidden
pub fn mask_secret(secret: Option<&str>) -> String {
    match secret {
        Some(s) if s.chars().count() >= 8 => {
            let chars: Vec<char> = s.chars().collect();
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}***{}", head, tail)
        }
        _ => "***".to_string(),
    }
}

/// Replace the `KEY=...` line in env-file content, appending when absent
pub fn upsert_env_line(content: &str, key: &str, value: &str) -> Result<String, ConfigError> {
    check_env_entry(key, value)?;
    let prefix = format!("{}=", key);
    let mut found = false;
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            if !found && line.starts_with(&prefix) {
                found = true;
                format!("{}={}", key, value)
            } else {
                line.to_string()
            }
        })
        .collect();

    if !found {
        lines.push(format!("{}={}", key, value));
    }

    let mut updated = lines.join("\n");
    updated.push('\n');
    Ok(updated)
}

/// Keys are bare names and values stay on one line, so an entry can
/// never introduce another assignment
pub fn check_env_entry(key: &str, value: &str) -> Result<(), ConfigError> {
    let bad_key = key.is_empty() || key.contains(|c: char| c == '=' || c == '#' || c.is_whitespace() || c.is_control());
    if bad_key || value.contains(|c: char| c == '\n' || c == '\r' || c == '\0') {
        return Err(ConfigError::InvalidEntry(key.to_string()));
    }
    Ok(())
}

/// Persist a set of keys to the env file, creating it when missing
pub async fn update_env_file(path: &Path, entries: &[(&str, &str)]) -> Result<(), ConfigError> {
    let to_error = |source| ConfigError::EnvFile { path: path.display().to_string(), source };

    let mut content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(to_error(e)),
    };

    for (key, value) in entries {
        check_env_entry(key, value)?;
    }
    for (key, value) in entries {
        content = upsert_env_line(&content, key, value)?;
    }

    tokio::fs::write(path, content).await.map_err(to_error)
}

#[derive(Debug, Serialize)]
pub struct ConfigView {
    pub retell: RetellView,
    pub twilio: TwilioView,
    pub openai: OpenAiView,
    pub app: AppView,
}

#[derive(Debug, Serialize)]
pub struct RetellView {
    pub configured: bool,
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct TwilioView {
    pub configured: bool,
    #[serde(rename = "accountSid")]
    pub account_sid: String,
    #[serde(rename = "phoneNumber")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OpenAiView {
    pub configured: bool,
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct AppView {
    pub env: String,
    pub port: u16,
    #[serde(rename = "appUrl")]
    pub app_url: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct IntegrationStatus {
    pub configured: bool,
    pub status: &'static str,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct IntegrationsStatus {
    pub retell: IntegrationStatus,
    pub twilio: IntegrationStatus,
    pub openai: IntegrationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(Some("key_1234567890abcd")), "key_***abcd");
        assert_eq!(mask_secret(Some("12345678")), "1234***5678");
        assert_eq!(mask_secret(Some("short")), "***");
        assert_eq!(mask_secret(None), "***");
    }

    #[test]
    fn test_configured_prefixes() {
        let settings = IntegrationSettings {
            retell_api_key: Some("key_abc".to_string()),
            twilio_account_sid: Some("XX123".to_string()),
            twilio_auth_token: Some("token".to_string()),
            twilio_phone_number: None,
            openai_api_key: Some("sk-abc".to_string()),
        };
        assert!(settings.retell_configured());
        assert!(!settings.twilio_configured());
        assert!(settings.openai_configured());
        assert!(!IntegrationSettings::default().retell_configured());
    }

    #[test]
    fn test_status_is_not_tested() {
        let status = IntegrationSettings::default().status();
        assert_eq!(status.retell, IntegrationStatus { configured: false, status: "not_tested" });
    }

    #[test]
    fn test_upsert_env_line_replaces_existing() {
        let content = "PORT=3000\nRETELL_API_KEY=old\nOTHER=1\n";
        let updated = upsert_env_line(content, "RETELL_API_KEY", "key_new").unwrap();
        assert_eq!(updated, "PORT=3000\nRETELL_API_KEY=key_new\nOTHER=1\n");
    }

    #[test]
    fn test_upsert_env_line_appends_missing() {
        let updated = upsert_env_line("PORT=3000", "OPENAI_API_KEY", "sk-1").unwrap();
        assert_eq!(updated, "PORT=3000\nOPENAI_API_KEY=sk-1\n");
        // prefix of another key must not match
        let updated = upsert_env_line("TWILIO_AUTH_TOKEN_OLD=x\n", "TWILIO_AUTH_TOKEN", "y").unwrap();
        assert_eq!(updated, "TWILIO_AUTH_TOKEN_OLD=x\nTWILIO_AUTH_TOKEN=y\n");
    }

    #[tokio::test]
    async fn test_update_env_file_creates_file() {
        let path = std::env::temp_dir().join(format!("voice-agents-{}.env", uuid::Uuid::new_v4()));
        update_env_file(&path, &[("A", "1"), ("B", "2")]).await.unwrap();
        update_env_file(&path, &[("A", "3")]).await.unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "A=3\nB=2\n");
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[test]
    fn test_upsert_env_line_rejects_multiline_values() {
        for value in ["key_abc\nDATABASE_URL=postgres://evil", "key_abc\rPORT=1", "key\0"] {
            assert!(matches!(
                upsert_env_line("PORT=3000\n", "RETELL_API_KEY", value),
                Err(ConfigError::InvalidEntry(_))
            ));
        }
    }

    #[test]
    fn test_upsert_env_line_rejects_bad_keys() {
        for key in ["", "DATABASE_URL=x", "A B", "A\nB"] {
            assert!(upsert_env_line("PORT=3000\n", key, "1").is_err());
        }
    }

    #[tokio::test]
    async fn test_update_env_file_leaves_file_untouched_on_bad_entry() {
        let path = std::env::temp_dir().join(format!("voice-agents-{}.env", uuid::Uuid::new_v4()));
        update_env_file(&path, &[("A", "1")]).await.unwrap();
        let result = update_env_file(&path, &[("B", "2"), ("C", "x\nD=evil")]).await;
        assert!(matches!(result, Err(ConfigError::InvalidEntry(key)) if key == "C"));
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content, "A=1\n");
        let _ = tokio::fs::remove_file(&path).await;
    }
}
