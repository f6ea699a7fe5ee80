use burrow_shortener::config::{DEFAULT_BASE_URL, DEFAULT_DELETE_QUEUE_CAPACITY};
use burrow_shortener::{Settings, TrustedSubnet};
use clap::{Parser, ValueEnum};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const STORAGE_BACKEND_ENV: &str = "BURROW_STORAGE_BACKEND";
pub const FILE_STORAGE_PATH_ENV: &str = "BURROW_FILE_STORAGE_PATH";
pub const DATABASE_DSN_ENV: &str = "BURROW_DATABASE_DSN";
pub const BASE_URL_ENV: &str = "BURROW_BASE_URL";
pub const TRUSTED_SUBNET_ENV: &str = "BURROW_TRUSTED_SUBNET";
pub const COOKIE_KEY_ENV: &str = "BURROW_COOKIE_KEY";
pub const DELETE_QUEUE_CAPACITY_ENV: &str = "BURROW_DELETE_QUEUE_CAPACITY";
pub const LOG_FORMAT_ENV: &str = "BURROW_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "in-memory")]
    InMemory,
    #[value(name = "file")]
    File,
    #[value(name = "postgres")]
    Postgres,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::InMemory => write!(f, "in-memory"),
            StorageBackendArg::File => write!(f, "file"),
            StorageBackendArg::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "burrow-shortener")]
pub struct CLI {
    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::InMemory
    )]
    pub storage: StorageBackendArg,

    #[arg(long, env = FILE_STORAGE_PATH_ENV, required_if_eq("storage", "file"))]
    pub file_storage_path: Option<PathBuf>,

    #[arg(long, env = DATABASE_DSN_ENV, required_if_eq("storage", "postgres"))]
    pub database_dsn: Option<String>,

    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// CIDR allowed to read aggregate stats, e.g. 10.0.0.0/8.
    #[arg(long, env = TRUSTED_SUBNET_ENV)]
    pub trusted_subnet: Option<TrustedSubnet>,

    #[arg(long, env = COOKIE_KEY_ENV, hide_env_values = true)]
    pub cookie_key: String,

    #[arg(long, env = DELETE_QUEUE_CAPACITY_ENV, default_value_t = DEFAULT_DELETE_QUEUE_CAPACITY)]
    pub delete_queue_capacity: usize,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,
}

impl CLI {
    pub fn settings(&self) -> Settings {
        Settings::builder()
            .base_url(self.base_url.clone())
            .trusted_subnet(self.trusted_subnet)
            .cookie_key(self.cookie_key.clone())
            .delete_queue_capacity(self.delete_queue_capacity)
            .build()
    }
}
