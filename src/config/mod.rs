use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;

use crate::auth::AuthUser;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub security: SecurityConfig,
    pub backdrop: BackdropConfig,
    pub varnish: VarnishConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub port: u16,
    pub enable_request_logging: bool,
    pub max_request_size_bytes: usize,
    /// Absolute root of this service, used to build dashboard admin urls
    pub app_root: String,
    /// Root of the public website hosting published dashboards
    pub public_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub enable_audit_logging: bool,
    /// When set, bearer tokens are only looked up in `development_users`
    pub use_development_users: bool,
    pub development_users: HashMap<String, AuthUser>,
    pub signon_url: String,
    pub signon_client_id: String,
    pub signon_cache_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackdropConfig {
    pub enabled: bool,
    pub url: String,
    pub create_collection_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarnishConfig {
    /// `(host, port)` pairs that receive PURGE requests
    pub caches: Vec<(String, u16)>,
    pub app_hostname: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = Some(v);
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // API overrides
        if let Some(v) = env::var("STAGECRAFT_PORT").ok().or_else(|| env::var("PORT").ok()) {
            self.api.port = v.parse().unwrap_or(self.api.port);
        }
        if let Ok(v) = env::var("API_ENABLE_REQUEST_LOGGING") {
            self.api.enable_request_logging = v.parse().unwrap_or(self.api.enable_request_logging);
        }
        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }
        if let Ok(v) = env::var("APP_ROOT") {
            self.api.app_root = v;
        }
        if let Ok(v) = env::var("GOVUK_WEBSITE_ROOT") {
            self.api.public_root = v;
        }

        // Security overrides
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_AUDIT_LOGGING") {
            self.security.enable_audit_logging = v.parse().unwrap_or(self.security.enable_audit_logging);
        }
        if let Ok(v) = env::var("USE_DEVELOPMENT_USERS") {
            self.security.use_development_users = v.parse().unwrap_or(self.security.use_development_users);
        }
        if let Ok(v) = env::var("DEVELOPMENT_USERS") {
            match serde_json::from_str(&v) {
                Ok(users) => self.security.development_users = users,
                Err(e) => tracing::warn!("Ignoring DEVELOPMENT_USERS: {}", e),
            }
        }
        if let Ok(v) = env::var("SIGNON_URL") {
            self.security.signon_url = v;
        }
        if let Ok(v) = env::var("SIGNON_CLIENT_ID") {
            self.security.signon_client_id = v;
        }

        // Backdrop overrides
        if let Ok(v) = env::var("DISABLE_BACKDROP_CONNECTION") {
            self.backdrop.enabled = !v.parse().unwrap_or(!self.backdrop.enabled);
        }
        if let Ok(v) = env::var("BACKDROP_URL") {
            self.backdrop.url = v;
        }
        if let Ok(v) = env::var("CREATE_COLLECTION_ENDPOINT_TOKEN") {
            self.backdrop.create_collection_token = v;
        }

        // Varnish overrides, VARNISH_CACHES=http://cache-1:7999,http://cache-2:7999
        if let Ok(v) = env::var("VARNISH_CACHES") {
            self.varnish.caches = parse_varnish_caches(&v);
        }
        if let Ok(v) = env::var("APP_HOSTNAME") {
            self.varnish.app_hostname = Some(v);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
            },
            api: ApiConfig {
                port: 3103,
                enable_request_logging: true,
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
                app_root: "http://stagecraft.dev.gov.uk".to_string(),
                public_root: "http://spotlight.dev.gov.uk".to_string(),
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec!["http://localhost:3057".to_string()],
                enable_audit_logging: true,
                use_development_users: true,
                development_users: development_users(),
                signon_url: "http://signon.dev.gov.uk".to_string(),
                signon_client_id: String::new(),
                signon_cache_minutes: 15,
            },
            backdrop: BackdropConfig {
                enabled: false,
                url: "http://localhost:3039".to_string(),
                create_collection_token: "dev-create-endpoint-token".to_string(),
            },
            varnish: VarnishConfig {
                caches: vec![],
                app_hostname: None,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                connection_timeout: 10,
            },
            api: ApiConfig {
                port: 3103,
                enable_request_logging: true,
                max_request_size_bytes: 5 * 1024 * 1024, // 5MB
                app_root: "https://stagecraft.staging.performance.service.gov.uk".to_string(),
                public_root: "https://www-origin.staging.publishing.service.gov.uk".to_string(),
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec![],
                enable_audit_logging: true,
                use_development_users: false,
                development_users: HashMap::new(),
                signon_url: "https://signon.staging.publishing.service.gov.uk".to_string(),
                signon_client_id: String::new(),
                signon_cache_minutes: 15,
            },
            backdrop: BackdropConfig {
                enabled: true,
                url: "https://backdrop-write.staging.performance.service.gov.uk".to_string(),
                create_collection_token: String::new(),
            },
            varnish: VarnishConfig {
                caches: vec![
                    ("http://frontend-app-1".to_string(), 7999),
                    ("http://frontend-app-2".to_string(), 7999),
                ],
                app_hostname: None,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connection_timeout: 5,
            },
            api: ApiConfig {
                port: 3103,
                enable_request_logging: false,
                max_request_size_bytes: 2 * 1024 * 1024, // 2MB
                app_root: "https://stagecraft.performance.service.gov.uk".to_string(),
                public_root: "https://www.gov.uk".to_string(),
            },
            security: SecurityConfig {
                enable_cors: true,
                cors_origins: vec![],
                enable_audit_logging: true,
                use_development_users: false,
                development_users: HashMap::new(),
                signon_url: "https://signon.publishing.service.gov.uk".to_string(),
                signon_client_id: String::new(),
                signon_cache_minutes: 15,
            },
            backdrop: BackdropConfig {
                enabled: true,
                url: "https://backdrop-write.performance.service.gov.uk".to_string(),
                create_collection_token: String::new(),
            },
            varnish: VarnishConfig {
                caches: vec![
                    ("http://frontend-app-1".to_string(), 7999),
                    ("http://frontend-app-2".to_string(), 7999),
                ],
                app_hostname: None,
            },
        }
    }
}

/// Tokens accepted when running with development users
fn development_users() -> HashMap<String, AuthUser> {
    let mut users = HashMap::new();
    users.insert(
        "development-oauth-access-token".to_string(),
        AuthUser {
            uid: "00000000-0000-0000-0000-000000000000".to_string(),
            email: "some.user@digital.cabinet-office.gov.uk".to_string(),
            name: Some("Some User".to_string()),
            organisation_slug: Some("cabinet-office".to_string()),
            permissions: [
                "signin",
                "admin",
                "dashboard",
                "organisation",
                "transforms",
                "user",
                "collector",
                "collector-view",
                "user_update_permission",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        },
    );
    users.insert(
        "signin-oauth-access-token".to_string(),
        AuthUser {
            uid: "00000000-0000-0000-0000-000000000001".to_string(),
            email: "another.user@digital.cabinet-office.gov.uk".to_string(),
            name: Some("Another User".to_string()),
            organisation_slug: Some("cabinet-office".to_string()),
            permissions: vec!["signin".to_string()],
        },
    );
    users
}

fn parse_varnish_caches(value: &str) -> Vec<(String, u16)> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|entry| {
            let (host, port) = entry.rsplit_once(':')?;
            match port.parse() {
                Ok(port) => Some((host.to_string(), port)),
                Err(_) => {
                    tracing::warn!("Ignoring varnish cache without a port: {}", entry);
                    None
                }
            }
        })
        .collect()
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert!(config.security.use_development_users);
        assert!(config.security.development_users.contains_key("development-oauth-access-token"));
        assert!(!config.backdrop.enabled);
        assert!(config.varnish.caches.is_empty());
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert!(!config.security.use_development_users);
        assert!(config.security.development_users.is_empty());
        assert!(config.backdrop.enabled);
        assert_eq!(config.varnish.caches.len(), 2);
    }

    #[test]
    fn parses_varnish_cache_list() {
        let caches = parse_varnish_caches("http://cache-1:7999, http://cache-2:8000,broken");
        assert_eq!(
            caches,
            vec![
                ("http://cache-1".to_string(), 7999),
                ("http://cache-2".to_string(), 8000),
            ]
        );
    }
}
