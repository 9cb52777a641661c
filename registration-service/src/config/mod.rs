use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub identity_provider: IdentityProviderConfig,
    pub saga: SagaConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Connection settings for the Keycloak-compatible identity provider.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityProviderConfig {
    pub base_url: String,
    /// Realm holding the registered accounts and roles.
    pub realm: String,
    /// Realm the admin user authenticates against (usually `master`).
    pub admin_realm: String,
    pub admin_client_id: String,
    pub admin_username: String,
    pub admin_password: Secret<String>,
    /// Client used for end-user login, refresh and logout.
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub token_refresh_margin_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl IdentityProviderConfig {
    pub fn token_refresh_margin(&self) -> Duration {
        Duration::from_secs(self.token_refresh_margin_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SagaConfig {
    pub step_timeout_seconds: u64,
}

impl SagaConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_seconds)
    }
}

impl RegistrationConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = RegistrationConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("registration-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            database: DatabaseConfig {
                url: Secret::new(get_env("DATABASE_URL", None, is_prod)?),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            identity_provider: IdentityProviderConfig {
                base_url: get_env("IDP_BASE_URL", Some("http://localhost:8081"), is_prod)?
                    .trim_end_matches('/')
                    .to_string(),
                realm: get_env("IDP_REALM", None, is_prod)?,
                admin_realm: get_env("IDP_ADMIN_REALM", Some("master"), is_prod)?,
                admin_client_id: get_env("IDP_ADMIN_CLIENT_ID", Some("admin-cli"), is_prod)?,
                admin_username: get_env("IDP_ADMIN_USERNAME", None, is_prod)?,
                admin_password: Secret::new(get_env("IDP_ADMIN_PASSWORD", None, is_prod)?),
                client_id: get_env("IDP_CLIENT_ID", None, is_prod)?,
                client_secret: Secret::new(get_env("IDP_CLIENT_SECRET", None, is_prod)?),
                token_refresh_margin_seconds: parse_env(
                    "IDP_TOKEN_REFRESH_MARGIN_SECONDS",
                    "30",
                    is_prod,
                )?,
                request_timeout_seconds: parse_env("IDP_REQUEST_TIMEOUT_SECONDS", "10", is_prod)?,
            },
            saga: SagaConfig {
                step_timeout_seconds: parse_env("SAGA_STEP_TIMEOUT_SECONDS", "15", is_prod)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.database.url.expose_secret().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_URL must not be empty"
            )));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_MIN_CONNECTIONS cannot exceed DATABASE_MAX_CONNECTIONS"
            )));
        }

        let idp = &self.identity_provider;
        if idp.base_url.is_empty() || idp.realm.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "IDP_BASE_URL and IDP_REALM must not be empty"
            )));
        }

        if idp.request_timeout_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "IDP_REQUEST_TIMEOUT_SECONDS must be positive"
            )));
        }

        if self.saga.step_timeout_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SAGA_STEP_TIMEOUT_SECONDS must be positive"
            )));
        }

        if self.environment == Environment::Prod && !idp.base_url.starts_with("https://") {
            tracing::warn!(
                base_url = %idp.base_url,
                "Identity provider is reached over plain HTTP in production"
            );
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
