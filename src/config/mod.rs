// pgvault/src/config/mod.rs
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::errors::{AppError, Result};

pub const DEFAULT_PG_PORT: u16 = 5432;
pub const DEFAULT_BACKUP_DIR: &str = "./backups";
pub const DEFAULT_RETENTION_COUNT: usize = 7;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_S3_REGION: &str = "us-east-1";
pub const DEFAULT_DEV_COMMAND: &str = "npm run dev";

/// Snapshot of the process environment, taken once in `main`.
pub type EnvSource = HashMap<String, String>;

/// Where the dump and restore tools connect to.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub database: String,
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .finish()
    }
}

#[derive(Clone)]
pub struct S3Config {
    pub bucket_name: String,
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub connection: ConnectionDescriptor,
    pub backup_dir: PathBuf,
    /// `None` disables upload and pruning entirely.
    pub s3: Option<S3Config>,
    pub retention_count: usize,
    pub command_timeout: Duration,
    pub dev_command: Vec<String>,
}

impl AppConfig {
    pub fn from_env(env: &EnvSource) -> Result<Self> {
        let connection = resolve_connection(env)?;

        let retention_count: usize =
            parse_number(env, "BACKUP_RETENTION_COUNT", DEFAULT_RETENTION_COUNT)?;
        if retention_count == 0 {
            return Err(AppError::config("BACKUP_RETENTION_COUNT must be at least 1"));
        }

        let timeout_secs: u64 = parse_number(
            env,
            "BACKUP_COMMAND_TIMEOUT_SECS",
            DEFAULT_COMMAND_TIMEOUT_SECS,
        )?;
        if timeout_secs == 0 {
            return Err(AppError::config(
                "BACKUP_COMMAND_TIMEOUT_SECS must be at least 1",
            ));
        }

        let dev_command: Vec<String> = lookup(env, "DEV_COMMAND")
            .unwrap_or(DEFAULT_DEV_COMMAND)
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Ok(AppConfig {
            connection,
            backup_dir: lookup(env, "BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR)),
            s3: load_s3_config(env),
            retention_count,
            command_timeout: Duration::from_secs(timeout_secs),
            dev_command,
        })
    }
}

/// Builds the connection descriptor. Discrete `DB_*` fields win field by
/// field; whatever is left comes from `DATABASE_URL`.
pub fn resolve_connection(env: &EnvSource) -> Result<ConnectionDescriptor> {
    let from_url = match lookup(env, "DATABASE_URL") {
        Some(raw) => parse_database_url(raw)?,
        None => UrlParts::default(),
    };

    let port = match lookup(env, "DB_PORT") {
        Some(raw) => parse_port(raw, "DB_PORT")?,
        None => from_url.port.unwrap_or(DEFAULT_PG_PORT),
    };

    let host = lookup(env, "DB_HOST").map(str::to_string).or(from_url.host);
    let username = lookup(env, "DB_USER").map(str::to_string).or(from_url.username);
    let password = lookup(env, "DB_PASSWORD")
        .map(str::to_string)
        .or(from_url.password);
    let database = lookup(env, "DB_NAME").map(str::to_string).or(from_url.database);

    let mut missing = Vec::new();
    if host.is_none() {
        missing.push("host (DB_HOST)");
    }
    if username.is_none() {
        missing.push("username (DB_USER)");
    }
    if database.is_none() {
        missing.push("database name (DB_NAME)");
    }

    match (host, username, database) {
        (Some(host), Some(username), Some(database)) => Ok(ConnectionDescriptor {
            host,
            port,
            username,
            password,
            database,
        }),
        _ => Err(AppError::config(format!(
            "missing {}; set the DB_* variables or DATABASE_URL",
            missing.join(", ")
        ))),
    }
}

#[derive(Debug, Default)]
struct UrlParts {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    database: Option<String>,
}

// Error messages never echo the URL since it usually carries the password.
fn parse_database_url(raw: &str) -> Result<UrlParts> {
    let url = Url::parse(raw)
        .map_err(|e| AppError::config(format!("DATABASE_URL is not a valid URL: {}", e)))?;

    match url.scheme() {
        "postgres" | "postgresql" => {}
        other => {
            return Err(AppError::config(format!(
                "DATABASE_URL has unsupported scheme '{}', expected postgres://",
                other
            )));
        }
    }

    Ok(UrlParts {
        host: url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .filter(|h| !h.is_empty()),
        port: url.port(),
        username: decode(url.username()),
        password: url.password().and_then(decode),
        database: decode(url.path().trim_start_matches('/')),
    })
}

fn decode(component: &str) -> Option<String> {
    let decoded = percent_decode_str(component).decode_utf8_lossy().into_owned();
    if decoded.is_empty() { None } else { Some(decoded) }
}

fn parse_port(raw: &str, key: &str) -> Result<u16> {
    raw.parse::<u16>()
        .map_err(|_| AppError::config(format!("{} must be a port number, got '{}'", key, raw)))
}

fn parse_number<T: FromStr>(env: &EnvSource, key: &str, default: T) -> Result<T> {
    match lookup(env, key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{} must be a number, got '{}'", key, raw))),
        None => Ok(default),
    }
}

fn load_s3_config(env: &EnvSource) -> Option<S3Config> {
    let bucket_name = lookup(env, "S3_BUCKET")?.to_string();

    let access_key_id = lookup(env, "S3_ACCESS_KEY_ID").map(str::to_string);
    let secret_access_key = lookup(env, "S3_SECRET_ACCESS_KEY").map(str::to_string);
    if access_key_id.is_some() != secret_access_key.is_some() {
        warn!(
            "Only one of S3_ACCESS_KEY_ID / S3_SECRET_ACCESS_KEY is set; falling back to the default AWS credential chain"
        );
    }
    let (access_key_id, secret_access_key) = match (access_key_id, secret_access_key) {
        (Some(id), Some(secret)) => (Some(id), Some(secret)),
        _ => (None, None),
    };

    Some(S3Config {
        bucket_name,
        region: lookup(env, "S3_REGION")
            .unwrap_or(DEFAULT_S3_REGION)
            .to_string(),
        endpoint_url: lookup(env, "S3_ENDPOINT").map(str::to_string),
        access_key_id,
        secret_access_key,
    })
}

/// Trimmed value of `key`; empty values count as unset.
fn lookup<'a>(env: &'a EnvSource, key: &str) -> Option<&'a str> {
    env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
}
