use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::env;

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// SQLite URL of the record store.
    pub database_url: String,
    /// Root directory of the blob store.
    pub blob_dir: String,
    /// Largest accepted request body, file included.
    pub max_upload_bytes: usize,
    /// Allowed CORS origins; `None` allows any origin.
    pub cors_origins: Option<Vec<String>>,
}

/// What the process should do after loading configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    /// Apply the schema and exit.
    Migrate,
    /// Delete expired items and their files, then exit.
    PurgeExpired,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Share text and files through expiring links")]
pub struct Args {
    /// Host to bind to (overrides VAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides VAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Record store URL, e.g. sqlite://./data/vault.db (overrides VAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Directory where uploaded files are stored (overrides VAULT_BLOB_DIR)
    #[arg(long)]
    pub blob_dir: Option<String>,

    /// Maximum request body size in bytes (overrides VAULT_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Comma-separated allowed CORS origins (overrides VAULT_CORS_ORIGINS)
    #[arg(long)]
    pub cors_origins: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Delete expired items and exit
    #[arg(long, conflicts_with = "migrate")]
    pub purge_expired: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        Self::resolve(Args::parse(), |name| env::var(name).ok())
    }

    /// Merge parsed args with an environment lookup. CLI values win.
    ///
    /// The record store URL and blob directory have no defaults: a process
    /// without them refuses to start.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, RunMode)> {
        let env_port = lookup("VAULT_PORT")
            .map(|value| {
                value
                    .parse::<u16>()
                    .with_context(|| format!("parsing VAULT_PORT value `{}`", value))
            })
            .transpose()?;
        let env_max_upload = lookup("VAULT_MAX_UPLOAD_BYTES")
            .map(|value| {
                value
                    .parse::<usize>()
                    .with_context(|| format!("parsing VAULT_MAX_UPLOAD_BYTES value `{}`", value))
            })
            .transpose()?;

        let database_url = args
            .database_url
            .or_else(|| lookup("VAULT_DATABASE_URL"))
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("VAULT_DATABASE_URL (or --database-url) is required"))?;
        let blob_dir = args
            .blob_dir
            .or_else(|| lookup("VAULT_BLOB_DIR"))
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("VAULT_BLOB_DIR (or --blob-dir) is required"))?;

        let cors_origins = args
            .cors_origins
            .or_else(|| lookup("VAULT_CORS_ORIGINS"))
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|origins| !origins.is_empty());

        let cfg = Self {
            host: args
                .host
                .or_else(|| lookup("VAULT_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.or(env_port).unwrap_or(DEFAULT_PORT),
            database_url,
            blob_dir,
            max_upload_bytes: args
                .max_upload_bytes
                .or(env_max_upload)
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            cors_origins,
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.purge_expired {
            RunMode::PurgeExpired
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
