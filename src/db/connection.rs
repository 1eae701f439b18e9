use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio_postgres::config::Host;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Reported to the server as `application_name`.
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

fn default_application_name() -> String {
    String::from("pgtyped")
}

impl ConnectionConfig {
    /// Parse a `postgres://` URL or a libpq `key=value` connection string.
    ///
    /// Only TCP hosts are supported; the first host and port are used.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed: tokio_postgres::Config = url
            .parse()
            .with_context(|| format!("Invalid connection string: {}", redact(url)))?;

        let host = parsed
            .get_hosts()
            .iter()
            .find_map(|h| match h {
                Host::Tcp(host) => Some(host.clone()),
                #[allow(unreachable_patterns)]
                _ => None,
            })
            .unwrap_or_else(|| String::from("localhost"));

        let defaults = Self::default();
        let username = parsed
            .get_user()
            .map(str::to_string)
            .unwrap_or(defaults.username);
        let database = parsed
            .get_dbname()
            .map(str::to_string)
            .unwrap_or_else(|| username.clone());

        Ok(Self {
            name: format!("{}@{}", username, host),
            port: parsed.get_ports().first().copied().unwrap_or(defaults.port),
            password: parsed
                .get_password()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .unwrap_or_default(),
            application_name: parsed
                .get_application_name()
                .map(str::to_string)
                .unwrap_or(defaults.application_name),
            host,
            database,
            username,
        })
    }

    pub fn display_string(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: String::from("Local PostgreSQL"),
            host: String::from("localhost"),
            port: 5432,
            database: String::from("postgres"),
            username: String::from("postgres"),
            password: String::new(),
            application_name: default_application_name(),
        }
    }
}

/// Hide the password part of a URL before it ends up in an error message.
fn redact(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((credentials, host)) => {
            let user = credentials.split(':').next().unwrap_or_default();
            format!("{}://{}:***@{}", scheme, user, host)
        }
        None => url.to_string(),
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SavedConnections {
    connections: Vec<ConnectionConfig>,
}

pub fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pgtyped")
        .join("connections.toml")
}

pub fn load_saved_connections() -> Result<Vec<ConnectionConfig>> {
    let path = get_config_path();
    if !path.exists() {
        return Ok(vec![]);
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_saved_connections(&content)
}

fn parse_saved_connections(content: &str) -> Result<Vec<ConnectionConfig>> {
    let saved: SavedConnections = toml::from_str(content)?;
    Ok(saved.connections)
}

/// Insert or replace (by name, case-insensitively) a saved connection.
pub fn save_connection(config: &ConnectionConfig) -> Result<()> {
    let mut connections = load_saved_connections()?;
    connections.retain(|c| !c.name.eq_ignore_ascii_case(&config.name));
    connections.push(config.clone());

    let path = get_config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(&SavedConnections { connections })?;
    std::fs::write(&path, content)?;
    Ok(())
}

pub fn find_saved_connection(name: &str) -> Result<Option<ConnectionConfig>> {
    Ok(load_saved_connections()?
        .into_iter()
        .find(|c| c.name.eq_ignore_ascii_case(name)))
}
