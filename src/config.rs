use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_PASSWORD: &str = "Vnpt@123";
pub const DEFAULT_ROOT_UNIT_NAME: &str = "Branch Office";
pub const DEFAULT_DOCUMENT_DIR: &str = "./data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackendKind {
    Postgres,
    Document,
    Memory,
}

impl FromStr for StoreBackendKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "sql" => Ok(StoreBackendKind::Postgres),
            "document" | "documents" | "file" => Ok(StoreBackendKind::Document),
            "memory" | "mem" => Ok(StoreBackendKind::Memory),
            other => Err(format!("Unknown STORE_BACKEND '{}'", other)),
        }
    }
}

/// Argon2 cost parameters. `None` keeps the argon2 crate default.
#[derive(Debug, Clone, Default)]
pub struct HashingConfig {
    pub memory_kib: Option<u32>,
    pub iterations: Option<u32>,
    pub parallelism: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub jwt_secret: String,
    pub backend: StoreBackendKind,
    pub database_url: Option<String>,
    pub document_dir: PathBuf,
    pub cache_path: Option<PathBuf>,
    pub default_password: String,
    pub root_unit_name: String,
    pub hashing: HashingConfig,
}

impl Config {
    /// Reads the process environment. Call `dotenv().ok()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let jwt_secret = non_empty("JWT_SECRET").ok_or("JWT_SECRET must be set and non-empty")?;

        let backend = match non_empty("STORE_BACKEND") {
            Some(value) => value.parse()?,
            None => StoreBackendKind::Memory,
        };

        let database_url = non_empty("DATABASE_URL");
        if backend == StoreBackendKind::Postgres && database_url.is_none() {
            return Err("DATABASE_URL must be set when STORE_BACKEND=postgres".to_string());
        }

        let parse_u32 = |key: &str| -> Result<Option<u32>, String> {
            non_empty(key)
                .map(|value| {
                    value
                        .trim()
                        .parse::<u32>()
                        .map_err(|_| format!("{} must be a positive integer", key))
                })
                .transpose()
        };

        Ok(Config {
            bind_addr: non_empty("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            jwt_secret,
            backend,
            database_url,
            document_dir: non_empty("DOCUMENT_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCUMENT_DIR)),
            cache_path: non_empty("CACHE_PATH").map(PathBuf::from),
            default_password: non_empty("DEFAULT_PASSWORD")
                .unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
            root_unit_name: non_empty("ROOT_UNIT_NAME")
                .unwrap_or_else(|| DEFAULT_ROOT_UNIT_NAME.to_string()),
            hashing: HashingConfig {
                memory_kib: parse_u32("ARGON2_MEMORY_KIB")?,
                iterations: parse_u32("ARGON2_ITERATIONS")?,
                parallelism: parse_u32("ARGON2_PARALLELISM")?,
            },
        })
    }

    /// In-memory configuration with cheap hashing, for tests and demos.
    pub fn for_tests() -> Self {
        Config {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            jwt_secret: "test-secret".to_string(),
            backend: StoreBackendKind::Memory,
            database_url: None,
            document_dir: PathBuf::from(DEFAULT_DOCUMENT_DIR),
            cache_path: None,
            default_password: DEFAULT_PASSWORD.to_string(),
            root_unit_name: DEFAULT_ROOT_UNIT_NAME.to_string(),
            hashing: HashingConfig {
                memory_kib: Some(256),
                iterations: Some(1),
                parallelism: Some(1),
            },
        }
    }
}
