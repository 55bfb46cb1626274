use clap::{Parser, ValueEnum};
use std::ffi::OsString;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Invalid(#[from] clap::Error),
}

impl ConfigError {
    /// Prints the error (or help/version output) and terminates the process.
    pub fn exit(&self) -> ! {
        match self {
            ConfigError::Invalid(e) => e.exit(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Process settings, read once at startup from the environment (or flags).
#[derive(Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Settings {
    #[arg(long, env = "ENV", default_value = "dev")]
    pub env: String,

    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "SENTRY_DSN")]
    pub sentry_dsn: Option<String>,

    #[arg(long, env = "PROJECT_ID")]
    pub project_id: Option<String>,

    #[arg(long = "r2-account-id", env = "CLOUDFLARE_R2_ACCOUNT_ID")]
    pub r2_account_id: Option<String>,

    #[arg(long = "r2-access-key", env = "CLOUDFLARE_R2_ACCESSKEY")]
    pub r2_access_key: Option<String>,

    #[arg(long = "r2-secret-key", env = "CLOUDFLARE_R2_SECRETKEY")]
    pub r2_secret_key: Option<String>,

    #[arg(long = "r2-bucket-name", env = "CLOUDFLARE_R2_BUCKET_NAME")]
    pub r2_bucket_name: Option<String>,

    #[arg(long, env = "COOKIE_DOMAIN", default_value = "localhost")]
    pub cookie_domain: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self::try_parse()?)
    }

    pub fn try_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::try_parse_from(args)?)
    }

    pub fn project_id(&self) -> &str {
        self.project_id.as_deref().unwrap_or_default()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: "dev".to_string(),
            port: 8080,
            database_url: None,
            sentry_dsn: None,
            project_id: None,
            r2_account_id: None,
            r2_access_key: None,
            r2_secret_key: None,
            r2_bucket_name: None,
            cookie_domain: "localhost".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

fn redacted(value: &Option<String>) -> &'static str {
    if value.is_some() { "<redacted>" } else { "<unset>" }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("env", &self.env)
            .field("port", &self.port)
            .field("database_url", &redacted(&self.database_url))
            .field("sentry_dsn", &redacted(&self.sentry_dsn))
            .field("project_id", &self.project_id)
            .field("r2_account_id", &self.r2_account_id)
            .field("r2_access_key", &redacted(&self.r2_access_key))
            .field("r2_secret_key", &redacted(&self.r2_secret_key))
            .field("r2_bucket_name", &self.r2_bucket_name)
            .field("cookie_domain", &self.cookie_domain)
            .field("log_format", &self.log_format)
            .finish()
    }
}
