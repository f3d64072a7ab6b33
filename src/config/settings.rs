use serde::Deserialize;

use crate::utils::error::HubError;

/// Development secret, matching the one Mercure ships with. `main` warns
/// when it is still in use.
pub const DEFAULT_JWT_KEY: &str = "!ChangeThisMercureHubJWTSecretKey!";

/// Top-level configuration settings for the hub.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub jwt: JwtSettings,
    pub hub: HubSettings,
    pub backlog: BacklogSettings,
    pub log: LogSettings,
}

/// Where the hub listens and how it advertises itself.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Absolute URL put in `Link: <...>; rel="mercure"`.
    pub hub_url: Option<String>,
}

impl ServerSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn hub_url(&self) -> String {
        self.hub_url
            .clone()
            .unwrap_or_else(|| format!("http://{}/.well-known/mercure", self.addr()))
    }
}

/// JWT verification keys.
///
/// `key` and `algorithm` apply to both roles unless the publisher or
/// subscriber specific values are set.
#[derive(Debug, Deserialize, Clone)]
pub struct JwtSettings {
    pub algorithm: String,
    pub key: String,
    pub publisher_algorithm: Option<String>,
    pub publisher_key: Option<String>,
    pub subscriber_algorithm: Option<String>,
    pub subscriber_key: Option<String>,
    pub leeway_secs: u64,
    pub audience: Option<String>,
    /// Keys addressed by the token's `kid` header.
    pub keys: Vec<KeySettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeySettings {
    pub kid: String,
    pub algorithm: String,
    pub key: String,
}

/// Subscriber-facing behavior.
#[derive(Debug, Deserialize, Clone)]
pub struct HubSettings {
    pub allow_anonymous: bool,
    pub cookie_name: String,
    pub heartbeat_secs: u64,
    /// Per-connection delivery queue; a full queue drops the connection.
    pub queue_capacity: usize,
    pub max_connections: Option<usize>,
    pub max_connection_secs: Option<u64>,
    /// Expose the subscriptions API and publish subscription events.
    pub subscriptions: bool,
    pub cors_origins: Vec<String>,
}

/// Backlog storage and retention.
#[derive(Debug, Deserialize, Clone)]
pub struct BacklogSettings {
    /// `memory` or `sled`.
    pub driver: String,
    pub path: String,
    pub max_entries: Option<usize>,
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from
/// `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub jwt: Option<PartialJwtSettings>,
    pub hub: Option<PartialHubSettings>,
    pub backlog: Option<PartialBacklogSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub hub_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialJwtSettings {
    pub algorithm: Option<String>,
    pub key: Option<String>,
    pub publisher_algorithm: Option<String>,
    pub publisher_key: Option<String>,
    pub subscriber_algorithm: Option<String>,
    pub subscriber_key: Option<String>,
    pub leeway_secs: Option<u64>,
    pub audience: Option<String>,
    pub keys: Option<Vec<KeySettings>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialHubSettings {
    pub allow_anonymous: Option<bool>,
    pub cookie_name: Option<String>,
    pub heartbeat_secs: Option<u64>,
    pub queue_capacity: Option<usize>,
    pub max_connections: Option<usize>,
    pub max_connection_secs: Option<u64>,
    pub subscriptions: Option<bool>,
    pub cors_origins: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBacklogSettings {
    pub driver: Option<String>,
    pub path: Option<String>,
    pub max_entries: Option<usize>,
    pub max_age_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Merge what was provided over `base`.
    pub fn merge(self, base: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let jwt = self.jwt.unwrap_or_default();
        let hub = self.hub.unwrap_or_default();
        let backlog = self.backlog.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(base.server.host),
                port: server.port.unwrap_or(base.server.port),
                hub_url: server.hub_url.or(base.server.hub_url),
            },
            jwt: JwtSettings {
                algorithm: jwt.algorithm.unwrap_or(base.jwt.algorithm),
                key: jwt.key.unwrap_or(base.jwt.key),
                publisher_algorithm: jwt.publisher_algorithm.or(base.jwt.publisher_algorithm),
                publisher_key: jwt.publisher_key.or(base.jwt.publisher_key),
                subscriber_algorithm: jwt.subscriber_algorithm.or(base.jwt.subscriber_algorithm),
                subscriber_key: jwt.subscriber_key.or(base.jwt.subscriber_key),
                leeway_secs: jwt.leeway_secs.unwrap_or(base.jwt.leeway_secs),
                audience: jwt.audience.or(base.jwt.audience),
                keys: jwt.keys.unwrap_or(base.jwt.keys),
            },
            hub: HubSettings {
                allow_anonymous: hub.allow_anonymous.unwrap_or(base.hub.allow_anonymous),
                cookie_name: hub.cookie_name.unwrap_or(base.hub.cookie_name),
                heartbeat_secs: hub.heartbeat_secs.unwrap_or(base.hub.heartbeat_secs),
                queue_capacity: hub.queue_capacity.unwrap_or(base.hub.queue_capacity),
                max_connections: hub.max_connections.or(base.hub.max_connections),
                max_connection_secs: hub.max_connection_secs.or(base.hub.max_connection_secs),
                subscriptions: hub.subscriptions.unwrap_or(base.hub.subscriptions),
                cors_origins: hub.cors_origins.unwrap_or(base.hub.cors_origins),
            },
            backlog: BacklogSettings {
                driver: backlog.driver.unwrap_or(base.backlog.driver),
                path: backlog.path.unwrap_or(base.backlog.path),
                max_entries: backlog.max_entries.or(base.backlog.max_entries),
                max_age_secs: backlog.max_age_secs.or(base.backlog.max_age_secs),
            },
            log: LogSettings {
                level: log.level.unwrap_or(base.log.level),
            },
        }
    }
}

impl Settings {
    /// Reject configurations the hub cannot run with.
    pub fn validate(&self) -> Result<(), HubError> {
        if self.server.host.trim().is_empty() {
            return Err(HubError::config("server.host must not be empty"));
        }
        if let Some(url) = &self.server.hub_url {
            url::Url::parse(url)
                .map_err(|e| HubError::config(format!("server.hub_url `{url}` is invalid: {e}")))?;
        }

        if self.jwt.key.is_empty() {
            return Err(HubError::config("jwt.key must not be empty"));
        }
        for (role, key) in [
            ("publisher", &self.jwt.publisher_key),
            ("subscriber", &self.jwt.subscriber_key),
        ] {
            if key.as_deref().is_some_and(str::is_empty) {
                return Err(HubError::config(format!("jwt.{role}_key must not be empty")));
            }
        }
        for entry in &self.jwt.keys {
            if entry.kid.is_empty() || entry.key.is_empty() {
                return Err(HubError::config("jwt.keys entries need a kid and a key"));
            }
        }

        if self.hub.cookie_name.trim().is_empty() {
            return Err(HubError::config("hub.cookie_name must not be empty"));
        }
        if self.hub.heartbeat_secs == 0 {
            return Err(HubError::config("hub.heartbeat_secs must be at least 1"));
        }
        if self.hub.queue_capacity == 0 {
            return Err(HubError::config("hub.queue_capacity must be at least 1"));
        }
        if self.hub.max_connections == Some(0) {
            return Err(HubError::config("hub.max_connections must be at least 1"));
        }

        match self.backlog.driver.as_str() {
            "memory" => {}
            "sled" if self.backlog.path.trim().is_empty() => {
                return Err(HubError::config("backlog.path is required for the sled driver"));
            }
            "sled" => {}
            other => {
                return Err(HubError::config(format!(
                    "backlog.driver must be `memory` or `sled`, got `{other}`"
                )));
            }
        }

        Ok(())
    }

    pub fn uses_default_key(&self) -> bool {
        self.jwt.key == DEFAULT_JWT_KEY
            && self.jwt.publisher_key.is_none()
            && self.jwt.subscriber_key.is_none()
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the hub has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 3000,
                hub_url: None,
            },
            jwt: JwtSettings {
                algorithm: "HS256".to_string(),
                key: DEFAULT_JWT_KEY.to_string(),
                publisher_algorithm: None,
                publisher_key: None,
                subscriber_algorithm: None,
                subscriber_key: None,
                leeway_secs: 0,
                audience: None,
                keys: Vec::new(),
            },
            hub: HubSettings {
                allow_anonymous: true,
                cookie_name: "mercureAuthorization".to_string(),
                heartbeat_secs: 40,
                queue_capacity: 1000,
                max_connections: None,
                max_connection_secs: None,
                subscriptions: false,
                cors_origins: Vec::new(),
            },
            backlog: BacklogSettings {
                driver: "memory".to_string(),
                path: "mercure_backlog".to_string(),
                max_entries: Some(10_000),
                max_age_secs: None,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
