// dbbackup/src/config/mod.rs
use anyhow::{Context, Result};
use clap::Parser;
use std::fmt;
use std::path::PathBuf;

use crate::errors::DumpError;

/// S3 interoperability endpoint of Google Cloud Storage.
pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";

/// Command line surface. Every flag without a default is required.
#[derive(Debug, Parser)]
#[command(name = "dbbackup")]
#[command(about = "Dump PostgreSQL/MySQL databases and archive them to object storage")]
#[command(long_about = None)]
pub struct Cli {
    /// Database engine: postgresql or mysql
    #[arg(long = "db-type", value_parser = DbEngine::parse)]
    pub db_type: DbEngine,

    /// Database host
    #[arg(long)]
    pub host: String,

    /// Database port
    #[arg(long)]
    pub port: u16,

    /// Database username
    #[arg(long)]
    pub username: String,

    /// Database password
    #[arg(long)]
    pub password: String,

    /// Comma-separated list of databases to back up
    #[arg(long)]
    pub databases: String,

    /// Destination bucket name
    #[arg(long = "gcs-bucket")]
    pub gcs_bucket: String,

    /// S3-compatible endpoint of the object store
    #[arg(long, env = "STORAGE_ENDPOINT_URL", default_value = DEFAULT_STORAGE_ENDPOINT)]
    pub storage_endpoint: String,

    #[arg(long, env = "STORAGE_REGION", default_value = "auto")]
    pub storage_region: String,

    /// HMAC access key; falls back to the SDK credential chain when unset
    #[arg(long, env = "STORAGE_ACCESS_KEY_ID")]
    pub access_key_id: Option<String>,

    #[arg(long, env = "STORAGE_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// Directory for temporary dump files (defaults to the system temp dir)
    #[arg(long, env = "BACKUP_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    #[arg(long, env = "PG_DUMP_BIN", default_value = "pg_dump")]
    pub pg_dump_bin: String,

    #[arg(long, env = "MYSQLDUMP_BIN", default_value = "mysqldump")]
    pub mysqldump_bin: String,

    /// Hand the MySQL password to mysqldump through MYSQL_PWD instead of --password
    #[arg(long, env = "MYSQL_PASSWORD_VIA_ENV")]
    pub mysql_password_env: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbEngine {
    PostgreSql,
    MySql,
}

impl DbEngine {
    /// Parses the `--db-type` value. Unknown engines are rejected here, before
    /// any dump tool could be started.
    pub fn parse(value: &str) -> std::result::Result<Self, DumpError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgresql" => Ok(DbEngine::PostgreSql),
            "mysql" => Ok(DbEngine::MySql),
            other => Err(DumpError::UnsupportedEngine(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DbEngine::PostgreSql => "postgresql",
            DbEngine::MySql => "mysql",
        }
    }
}

impl fmt::Display for DbEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection details of the database server being backed up.
#[derive(Clone)]
pub struct BackupTarget {
    pub engine: DbEngine,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

// Keeps the password out of logs.
impl fmt::Debug for BackupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupTarget")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket_name: String,
    pub endpoint_url: String,
    pub region: String,
    pub credentials: Option<StaticCredentials>,
}

#[derive(Debug, Clone)]
pub struct DumpTools {
    pub pg_dump: String,
    pub mysqldump: String,
    pub mysql_password_via_env: bool,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub target: BackupTarget,
    pub databases: Vec<String>,
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backup: BackupConfig,
    pub storage: StorageConfig,
    pub dump_tools: DumpTools,
}

impl AppConfig {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let databases = parse_database_list(&cli.databases)
            .context("Invalid value for --databases")?;

        if cli.gcs_bucket.trim().is_empty() {
            anyhow::bail!("--gcs-bucket cannot be empty");
        }

        let credentials = match (cli.access_key_id, cli.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
                access_key_id,
                secret_access_key,
            }),
            (None, None) => None,
            _ => anyhow::bail!(
                "--access-key-id and --secret-access-key must be provided together"
            ),
        };

        if let Some(dir) = &cli.temp_dir {
            if !dir.is_dir() {
                anyhow::bail!("Temporary directory does not exist: {}", dir.display());
            }
        }

        Ok(AppConfig {
            backup: BackupConfig {
                target: BackupTarget {
                    engine: cli.db_type,
                    host: cli.host,
                    port: cli.port,
                    username: cli.username,
                    password: cli.password,
                },
                databases,
                temp_dir: cli.temp_dir,
            },
            storage: StorageConfig {
                bucket_name: cli.gcs_bucket.trim().to_string(),
                endpoint_url: cli.storage_endpoint,
                region: cli.storage_region,
                credentials,
            },
            dump_tools: DumpTools {
                pg_dump: cli.pg_dump_bin,
                mysqldump: cli.mysqldump_bin,
                mysql_password_via_env: cli.mysql_password_env,
            },
        })
    }
}

/// Splits a comma-separated database list, trimming each entry.
/// Order is preserved; an empty entry anywhere is an error.
pub fn parse_database_list(raw: &str) -> Result<Vec<String>> {
    let databases: Vec<String> = raw.split(',').map(|s| s.trim().to_string()).collect();

    if let Some(position) = databases.iter().position(|db| db.is_empty()) {
        anyhow::bail!(
            "Empty database name at position {} in list {:?}",
            position + 1,
            raw
        );
    }

    Ok(databases)
}
