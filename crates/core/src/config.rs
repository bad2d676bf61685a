use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub chat: ChatConfig,
    pub webhook: WebhookConfig,
    pub server: ServerConfig,
    pub intake: IntakeConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub bot_token: SecretString,
    /// Shared channel that receives every broadcast.
    pub channel_id: i64,
    pub poll_timeout_secs: u64,
    pub reconnect_max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub shared_secret: Option<SecretString>,
    /// Base URL embedded in deep links when private delivery fails.
    pub deep_link_base_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct IntakeConfig {
    pub form_idle_timeout_secs: u64,
    pub token_ttl_secs: u64,
    /// Whether the conversational flow offers the optional attachment step.
    pub collect_attachment: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bot_token: Option<String>,
    pub channel_id: Option<i64>,
    pub webhook_enabled: Option<bool>,
    pub webhook_shared_secret: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://crewdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            chat: ChatConfig {
                bot_token: String::new().into(),
                channel_id: 0,
                poll_timeout_secs: 30,
                reconnect_max_retries: 5,
            },
            webhook: WebhookConfig { enabled: false, shared_secret: None, deep_link_base_url: None },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            intake: IntakeConfig {
                form_idle_timeout_secs: 900,
                token_ttl_secs: 600,
                collect_attachment: false,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("crewdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(chat) = patch.chat {
            if let Some(bot_token_value) = chat.bot_token {
                self.chat.bot_token = secret_value(bot_token_value);
            }
            if let Some(channel_id) = chat.channel_id {
                self.chat.channel_id = channel_id;
            }
            if let Some(poll_timeout_secs) = chat.poll_timeout_secs {
                self.chat.poll_timeout_secs = poll_timeout_secs;
            }
            if let Some(reconnect_max_retries) = chat.reconnect_max_retries {
                self.chat.reconnect_max_retries = reconnect_max_retries;
            }
        }

        if let Some(webhook) = patch.webhook {
            if let Some(enabled) = webhook.enabled {
                self.webhook.enabled = enabled;
            }
            if let Some(shared_secret_value) = webhook.shared_secret {
                self.webhook.shared_secret = Some(secret_value(shared_secret_value));
            }
            if let Some(deep_link_base_url) = webhook.deep_link_base_url {
                self.webhook.deep_link_base_url = Some(deep_link_base_url);
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(intake) = patch.intake {
            if let Some(form_idle_timeout_secs) = intake.form_idle_timeout_secs {
                self.intake.form_idle_timeout_secs = form_idle_timeout_secs;
            }
            if let Some(token_ttl_secs) = intake.token_ttl_secs {
                self.intake.token_ttl_secs = token_ttl_secs;
            }
            if let Some(collect_attachment) = intake.collect_attachment {
                self.intake.collect_attachment = collect_attachment;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CREWDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CREWDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CREWDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CREWDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CREWDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CREWDESK_CHAT_BOT_TOKEN") {
            self.chat.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("CREWDESK_CHAT_CHANNEL_ID") {
            self.chat.channel_id = parse_i64("CREWDESK_CHAT_CHANNEL_ID", &value)?;
        }
        if let Some(value) = read_env("CREWDESK_CHAT_POLL_TIMEOUT_SECS") {
            self.chat.poll_timeout_secs = parse_u64("CREWDESK_CHAT_POLL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CREWDESK_CHAT_RECONNECT_MAX_RETRIES") {
            self.chat.reconnect_max_retries =
                parse_u32("CREWDESK_CHAT_RECONNECT_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("CREWDESK_WEBHOOK_ENABLED") {
            self.webhook.enabled = parse_bool("CREWDESK_WEBHOOK_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CREWDESK_WEBHOOK_SHARED_SECRET") {
            self.webhook.shared_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("CREWDESK_WEBHOOK_DEEP_LINK_BASE_URL") {
            self.webhook.deep_link_base_url = Some(value);
        }

        if let Some(value) = read_env("CREWDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CREWDESK_SERVER_PORT") {
            self.server.port = parse_u16("CREWDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CREWDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CREWDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("CREWDESK_INTAKE_FORM_IDLE_TIMEOUT_SECS") {
            self.intake.form_idle_timeout_secs =
                parse_u64("CREWDESK_INTAKE_FORM_IDLE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CREWDESK_INTAKE_TOKEN_TTL_SECS") {
            self.intake.token_ttl_secs = parse_u64("CREWDESK_INTAKE_TOKEN_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("CREWDESK_INTAKE_COLLECT_ATTACHMENT") {
            self.intake.collect_attachment =
                parse_bool("CREWDESK_INTAKE_COLLECT_ATTACHMENT", &value)?;
        }

        let log_level =
            read_env("CREWDESK_LOGGING_LEVEL").or_else(|| read_env("CREWDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CREWDESK_LOGGING_FORMAT").or_else(|| read_env("CREWDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bot_token) = overrides.bot_token {
            self.chat.bot_token = secret_value(bot_token);
        }
        if let Some(channel_id) = overrides.channel_id {
            self.chat.channel_id = channel_id;
        }
        if let Some(enabled) = overrides.webhook_enabled {
            self.webhook.enabled = enabled;
        }
        if let Some(shared_secret) = overrides.webhook_shared_secret {
            self.webhook.shared_secret = Some(secret_value(shared_secret));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_chat(&self.chat)?;
        validate_webhook(&self.webhook)?;
        validate_server(&self.server)?;
        validate_intake(&self.intake)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("crewdesk.toml"), PathBuf::from("config/crewdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_chat(chat: &ChatConfig) -> Result<(), ConfigError> {
    if chat.bot_token.expose_secret().is_empty() {
        return Err(ConfigError::Validation(
            "chat.bot_token is required; obtain one from your chat platform's bot registration"
                .to_string(),
        ));
    }

    if chat.channel_id == 0 {
        return Err(ConfigError::Validation(
            "chat.channel_id is required and must reference the shared dispatch channel"
                .to_string(),
        ));
    }

    if chat.poll_timeout_secs == 0 || chat.poll_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "chat.poll_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_webhook(webhook: &WebhookConfig) -> Result<(), ConfigError> {
    if webhook.enabled {
        let missing = webhook
            .shared_secret
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "webhook.shared_secret is required when the webhook is enabled".to_string(),
            ));
        }
    }

    if let Some(base_url) = &webhook.deep_link_base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "webhook.deep_link_base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_intake(intake: &IntakeConfig) -> Result<(), ConfigError> {
    if intake.form_idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "intake.form_idle_timeout_secs must be greater than zero".to_string(),
        ));
    }

    if intake.token_ttl_secs == 0 || intake.token_ttl_secs > 86_400 {
        return Err(ConfigError::Validation(
            "intake.token_ttl_secs must be in range 1..=86400".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    chat: Option<ChatPatch>,
    webhook: Option<WebhookPatch>,
    server: Option<ServerPatch>,
    intake: Option<IntakePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatPatch {
    bot_token: Option<String>,
    channel_id: Option<i64>,
    poll_timeout_secs: Option<u64>,
    reconnect_max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookPatch {
    enabled: Option<bool>,
    shared_secret: Option<String>,
    deep_link_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct IntakePatch {
    form_idle_timeout_secs: Option<u64>,
    token_ttl_secs: Option<u64>,
    collect_attachment: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
