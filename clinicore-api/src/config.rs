/// Configuration management for the API server
///
/// This module loads configuration from environment variables and provides
/// a type-safe configuration struct.
///
/// # Environment Variables
///
/// - `API_HOST` / `API_PORT`: bind address (default: 0.0.0.0:8080)
/// - `API_PRODUCTION`: enables HSTS (default: false)
/// - `CORS_ORIGINS`: comma-separated origins, `*` for any (default: `*`)
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS` / `DATABASE_MIN_CONNECTIONS`: pool size (20 / 2)
/// - `DATABASE_ACQUIRE_TIMEOUT_SECS`: longest wait for a connection (5)
/// - `MAIN_DOMAIN`: platform domain, e.g. `mainapp.example.com` (required)
/// - `LOCAL_ALIASES`: extra hosts treated as the platform (default: localhost)
/// - `TENANT_CACHE_TTL_SECS`: tenant lookup cache lifetime (60)
/// - `SECRET_STORE`: `vault` or `memory` (default: vault)
/// - `VAULT_ADDR` / `VAULT_TOKEN`: required when `SECRET_STORE=vault`
/// - `VAULT_TIMEOUT_SECS`: per-request timeout (10)
/// - `VAULT_TOKEN_TTL`: lifetime of issued role tokens (24h)
/// - `JWT_SECRET`: secret key for JWT signing, at least 32 bytes (required)
/// - `BOOTSTRAP_ADMIN_EMAIL` / `BOOTSTRAP_ADMIN_PASSWORD`: platform operator
///   created on first start when both are set
/// - `LOG_FORMAT`: `pretty` or `json` (default: pretty)
///
/// # Example
///
/// ```no_run
/// use clinicore_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use anyhow::Context;
use clinicore_shared::auth::password::validate_password_strength;
use clinicore_shared::db::pool::DatabaseConfig;
use clinicore_shared::secrets::{parse_ttl, SecretToken, VaultConfig, DEFAULT_TOKEN_TTL};
use clinicore_shared::tenancy::DirectoryConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Database configuration
    pub database: DatabaseSettings,

    /// Host to tenant resolution
    pub tenancy: TenancyConfig,

    /// Secret store selection and Vault connection
    pub secrets: SecretsConfig,

    /// JWT configuration
    pub jwt: JwtConfig,

    /// Operator account ensured at startup
    pub bootstrap_admin: Option<BootstrapAdmin>,

    pub log_format: LogFormat,
}

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,

    /// Production mode (enables HSTS)
    pub production: bool,

    /// Allowed CORS origins
    pub cors_origins: Vec<String>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in pool
    pub max_connections: u32,

    /// Connections kept open while idle
    pub min_connections: u32,

    /// Longest wait for a pooled connection
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TenancyConfig {
    /// Platform domain; subdomains of it are tenant subdomains
    pub main_domain: String,

    /// Hosts that also resolve to the platform
    pub local_aliases: Vec<String>,

    pub cache_ttl_secs: u64,
}

/// Which secret store backs the API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretBackend {
    Vault,
    /// In-process store; keys are lost on restart
    Memory,
}

impl FromStr for SecretBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vault" => Ok(SecretBackend::Vault),
            "memory" => Ok(SecretBackend::Memory),
            other => anyhow::bail!("SECRET_STORE must be 'vault' or 'memory', got {other:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecretsConfig {
    pub backend: SecretBackend,

    /// Vault connection, present when the backend is Vault
    pub vault: Option<VaultConfig>,

    /// Lifetime of issued role tokens
    pub token_ttl: Duration,
}

/// JWT configuration
#[derive(Clone)]
pub struct JwtConfig {
    /// Secret key for JWT signing
    ///
    /// IMPORTANT: This must be kept secret and should be at least 32 bytes.
    /// Generate with: `openssl rand -hex 32`
    pub secret: String,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig").field("secret", &"<redacted>").finish()
    }
}

/// Credentials of the first platform operator
#[derive(Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("LOG_FORMAT must be 'pretty' or 'json', got {other:?}"),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing
    /// - Environment variables have invalid values
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            var(key).ok_or_else(|| anyhow::anyhow!("{key} environment variable is required"))
        };

        let api = ApiConfig {
            host: var("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(var("API_PORT"), "API_PORT", 8080)?,
            production: parse_or(var("API_PRODUCTION"), "API_PRODUCTION", false)?,
            cors_origins: list_or(var("CORS_ORIGINS"), &["*"]),
        };

        let database = DatabaseSettings {
            url: required("DATABASE_URL")?,
            max_connections: parse_or(var("DATABASE_MAX_CONNECTIONS"), "DATABASE_MAX_CONNECTIONS", 20)?,
            min_connections: parse_or(var("DATABASE_MIN_CONNECTIONS"), "DATABASE_MIN_CONNECTIONS", 2)?,
            acquire_timeout_secs: parse_or(
                var("DATABASE_ACQUIRE_TIMEOUT_SECS"),
                "DATABASE_ACQUIRE_TIMEOUT_SECS",
                5,
            )?,
        };
        if database.max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }

        let tenancy = TenancyConfig {
            main_domain: required("MAIN_DOMAIN")?.trim().to_ascii_lowercase(),
            local_aliases: list_or(var("LOCAL_ALIASES"), &["localhost"]),
            cache_ttl_secs: parse_or(var("TENANT_CACHE_TTL_SECS"), "TENANT_CACHE_TTL_SECS", 60)?,
        };

        let backend: SecretBackend = parse_or(var("SECRET_STORE"), "SECRET_STORE", SecretBackend::Vault)?;
        let token_ttl = match var("VAULT_TOKEN_TTL") {
            Some(raw) => parse_ttl(&raw)
                .ok_or_else(|| anyhow::anyhow!("VAULT_TOKEN_TTL is not a duration: {raw:?}"))?,
            None => DEFAULT_TOKEN_TTL,
        };
        let vault = match backend {
            SecretBackend::Vault => {
                let mut vault = VaultConfig::new(
                    required("VAULT_ADDR")?,
                    SecretToken::new(required("VAULT_TOKEN")?),
                );
                vault.timeout =
                    Duration::from_secs(parse_or(var("VAULT_TIMEOUT_SECS"), "VAULT_TIMEOUT_SECS", 10)?);
                vault.token_ttl = token_ttl;
                Some(vault)
            }
            SecretBackend::Memory => None,
        };

        let jwt_secret = required("JWT_SECRET")?;
        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters long");
        }

        let bootstrap_admin = match (var("BOOTSTRAP_ADMIN_EMAIL"), var("BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => {
                validate_password_strength(&password)
                    .map_err(|e| anyhow::anyhow!("BOOTSTRAP_ADMIN_PASSWORD: {e}"))?;
                Some(BootstrapAdmin {
                    email: email.trim().to_ascii_lowercase(),
                    password,
                })
            }
            (None, None) => None,
            _ => anyhow::bail!(
                "BOOTSTRAP_ADMIN_EMAIL and BOOTSTRAP_ADMIN_PASSWORD must be set together"
            ),
        };

        Ok(Self {
            api,
            database,
            tenancy,
            secrets: SecretsConfig {
                backend,
                vault,
                token_ttl,
            },
            jwt: JwtConfig { secret: jwt_secret },
            bootstrap_admin,
            log_format: parse_or(var("LOG_FORMAT"), "LOG_FORMAT", LogFormat::Pretty)?,
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// Pool settings for the shared database layer
    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.database.url.clone(),
            max_connections: self.database.max_connections,
            min_connections: self.database.min_connections.min(self.database.max_connections),
            acquire_timeout: Duration::from_secs(self.database.acquire_timeout_secs),
            ..Default::default()
        }
    }

    /// Settings for the tenant directory
    pub fn directory_config(&self) -> DirectoryConfig {
        let mut config = DirectoryConfig::new(self.tenancy.main_domain.clone());
        config.local_aliases = self.tenancy.local_aliases.clone();
        config.cache_ttl = Duration::from_secs(self.tenancy.cache_ttl_secs);
        config
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("{key} has an invalid value {raw:?}")),
        None => Ok(default),
    }
}

fn list_or(raw: Option<String>, default: &[&str]) -> Vec<String> {
    match raw {
        Some(raw) => raw
            .split(',')
            .map(|item| item.trim().to_ascii_lowercase())
            .filter(|item| !item.is_empty())
            .collect(),
        None => default.iter().map(|item| item.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("DATABASE_URL", "postgresql://localhost/clinicore"),
        ("MAIN_DOMAIN", "MainApp.example.com"),
        ("SECRET_STORE", "memory"),
        ("JWT_SECRET", "test-secret-key-at-least-32-bytes-long"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(BASE)).unwrap();

        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert!(!config.api.production);
        assert_eq!(config.api.cors_origins, vec!["*"]);
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.tenancy.main_domain, "mainapp.example.com");
        assert_eq!(config.tenancy.local_aliases, vec!["localhost"]);
        assert_eq!(config.secrets.backend, SecretBackend::Memory);
        assert!(config.secrets.vault.is_none());
        assert_eq!(config.secrets.token_ttl, DEFAULT_TOKEN_TTL);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.bootstrap_admin.is_none());

        let directory = config.directory_config();
        assert_eq!(directory.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.database_config().acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_vault_requires_address_and_token() {
        let mut pairs = BASE.to_vec();
        pairs.retain(|(k, _)| *k != "SECRET_STORE");
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        pairs.push(("VAULT_ADDR", "http://vault:8200"));
        pairs.push(("VAULT_TOKEN", "root"));
        pairs.push(("VAULT_TOKEN_TTL", "12h"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();

        let vault = config.secrets.vault.unwrap();
        assert_eq!(vault.addr, "http://vault:8200");
        assert_eq!(vault.token_ttl, Duration::from_secs(12 * 3600));
        assert!(!format!("{vault:?}").contains("\"root\""));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (key, value) in [
            ("API_PORT", "eighty"),
            ("JWT_SECRET", "short"),
            ("SECRET_STORE", "keychain"),
            ("LOG_FORMAT", "xml"),
            ("DATABASE_MAX_CONNECTIONS", "0"),
        ] {
            let mut pairs = BASE.to_vec();
            pairs.retain(|(k, _)| *k != key);
            pairs.push((key, value));
            assert!(Config::from_lookup(lookup(&pairs)).is_err(), "{key}={value}");
        }
    }

    #[test]
    fn test_bootstrap_admin() {
        let mut pairs = BASE.to_vec();
        pairs.push(("BOOTSTRAP_ADMIN_EMAIL", "Ops@MainApp.example.com"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        pairs.push(("BOOTSTRAP_ADMIN_PASSWORD", "password"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());

        pairs.pop();
        pairs.push(("BOOTSTRAP_ADMIN_PASSWORD", "Op3rator-Pass!"));
        let admin = Config::from_lookup(lookup(&pairs)).unwrap().bootstrap_admin.unwrap();
        assert_eq!(admin.email, "ops@mainapp.example.com");
        assert!(!format!("{admin:?}").contains("Op3rator"));
    }

    #[test]
    fn test_lists_are_normalized() {
        let mut pairs = BASE.to_vec();
        pairs.push(("LOCAL_ALIASES", "localhost, 127.0.0.1 ,Dev.Local"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(config.tenancy.local_aliases, vec!["localhost", "127.0.0.1", "dev.local"]);
    }
}
