//! Configuration for pgseq.
//!
//! Read from `pgseq.yaml` (or a `.toml` file with the same shape):
//!
//! ```yaml
//! migration:
//!   folder: migrations
//!   source: primary
//!   clusters:
//!     prod: [primary, replica]
//!   connections:
//!     primary:
//!       host: localhost
//!       port: 5432
//!       name: app
//!       user: app
//!       password: secret
//!       schemas:
//!         public:
//!           excludes: [audit_log]
//!           with_data: [countries]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;

use crate::error::{SeqError, SeqResult};

/// File names looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["pgseq.yaml", "pgseq.yml", "pgseq.toml"];

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub version: Option<String>,
    pub migration: MigrationConfig,
}

/// Everything under the `migration` key.
#[derive(Debug, Clone, Deserialize)]
pub struct MigrationConfig {
    /// Path or name of the `pg_dump` binary
    #[serde(default = "default_pg_dump")]
    pub pg_dump: String,

    /// Root folder; migrations land in `<folder>/<schema>/`
    #[serde(default = "default_folder")]
    pub folder: PathBuf,

    /// Connection that `generate` reads from and `sync` skips
    #[serde(default = "default_source")]
    pub source: String,

    /// Extraction workers; defaults to the number of cores
    #[serde(default)]
    pub workers: Option<usize>,

    #[serde(default)]
    pub on_write_error: WritePolicy,

    #[serde(default)]
    pub clusters: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub connections: BTreeMap<String, Connection>,
}

fn default_pg_dump() -> String {
    "pg_dump".to_string()
}

fn default_folder() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_source() -> String {
    "source".to_string()
}

fn default_port() -> u16 {
    5432
}

/// What a generation run does when a migration file can't be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritePolicy {
    /// Stop the run and report what was written so far.
    #[default]
    FailFast,
    /// Skip the failed object and keep going.
    Continue,
}

/// One database a migration sequence is applied to.
#[derive(Debug, Clone, Deserialize)]
pub struct Connection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub schemas: BTreeMap<String, ExclusionConfig>,
}

fn default_host() -> String {
    "localhost".to_string()
}

/// Per-schema table filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExclusionConfig {
    /// Tables never turned into migrations
    #[serde(default)]
    pub excludes: BTreeSet<String>,
    /// Tables dumped together with their rows
    #[serde(default)]
    pub with_data: BTreeSet<String>,
}

impl ExclusionConfig {
    /// Whether `table` is dumped without row data.
    pub fn schema_only(&self, table: &str) -> bool {
        !self.with_data.contains(table)
    }
}

impl Connection {
    /// sqlx connect options for this connection.
    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.name);

        if self.password.is_empty() {
            options
        } else {
            options.password(&self.password)
        }
    }

    /// Look up a schema's filters on this connection.
    pub fn schema(&self, schema: &str, connection: &str) -> SeqResult<&ExclusionConfig> {
        self.schemas
            .get(schema)
            .ok_or_else(|| SeqError::unknown_schema(schema, connection))
    }
}

impl Config {
    /// Load a config file, picking the format from its extension.
    pub fn load(path: &Path) -> SeqResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SeqError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
        if is_toml {
            Self::from_toml(&content)
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn from_yaml(content: &str) -> SeqResult<Self> {
        serde_yaml::from_str(content).map_err(|e| SeqError::Config(e.to_string()))
    }

    pub fn from_toml(content: &str) -> SeqResult<Self> {
        toml::from_str(content).map_err(|e| SeqError::Config(e.to_string()))
    }

    /// Find the config file: explicit path first, then the working
    /// directory, then the user config dir.
    pub fn discover(explicit: Option<&Path>) -> SeqResult<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        for name in DEFAULT_CONFIG_FILES {
            let candidate = PathBuf::from(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        if let Some(dir) = dirs::config_dir() {
            let candidate = dir.join("pgseq").join("config.yaml");
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        Err(SeqError::Config(
            "No config found. Create pgseq.yaml or pass --config".to_string(),
        ))
    }

    pub fn connection(&self, name: &str) -> SeqResult<&Connection> {
        self.migration
            .connections
            .get(name)
            .ok_or_else(|| SeqError::UnknownConnection(name.to_string()))
    }

    /// Connection and schema filters in one lookup.
    pub fn schema(&self, connection: &str, schema: &str) -> SeqResult<(&Connection, &ExclusionConfig)> {
        let conn = self.connection(connection)?;
        let filters = conn.schema(schema, connection)?;
        Ok((conn, filters))
    }

    pub fn cluster(&self, name: &str) -> SeqResult<&[String]> {
        self.migration
            .clusters
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| SeqError::UnknownCluster(name.to_string()))
    }

    /// Directory holding one schema's migration files.
    pub fn schema_dir(&self, schema: &str) -> PathBuf {
        self.migration.folder.join(schema)
    }

    /// Whether any connection declares `schema`.
    pub fn has_schema(&self, schema: &str) -> bool {
        self.migration
            .connections
            .values()
            .any(|c| c.schemas.contains_key(schema))
    }

    pub fn workers(&self) -> usize {
        self.migration
            .workers
            .filter(|n| *n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const YAML: &str = r#"
migration:
  folder: out
  source: primary
  clusters:
    prod: [primary, replica]
  connections:
    primary:
      name: app
      user: app
      password: secret
      schemas:
        public:
          excludes: [audit_log]
          with_data: [countries]
        billing: {}
"#;

    #[test]
    fn test_yaml_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.migration.pg_dump, "pg_dump");
        assert_eq!(config.migration.on_write_error, WritePolicy::FailFast);

        let (conn, public) = config.schema("primary", "public").unwrap();
        assert_eq!(conn.port, 5432);
        assert_eq!(conn.host, "localhost");
        assert!(public.excludes.contains("audit_log"));
        assert!(!public.schema_only("countries"));
        assert!(public.schema_only("orders"));

        let (_, billing) = config.schema("primary", "billing").unwrap();
        assert_eq!(billing, &ExclusionConfig::default());
    }

    #[test]
    fn test_lookups_fail_with_typed_errors() {
        let config = Config::from_yaml(YAML).unwrap();
        assert!(matches!(
            config.connection("nope"),
            Err(SeqError::UnknownConnection(_))
        ));
        assert!(matches!(
            config.schema("primary", "nope"),
            Err(SeqError::UnknownSchema { .. })
        ));
        assert!(matches!(config.cluster("dev"), Err(SeqError::UnknownCluster(_))));
        assert_eq!(config.cluster("prod").unwrap().len(), 2);
        assert_eq!(config.schema_dir("public"), PathBuf::from("out/public"));
    }

    #[test]
    fn test_toml_shape() {
        let toml = r#"
[migration]
source = "primary"
on_write_error = "continue"
workers = 3

[migration.connections.primary]
name = "app"
user = "app"

[migration.connections.primary.schemas.public]
excludes = ["tmp"]
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.migration.on_write_error, WritePolicy::Continue);
        assert_eq!(config.workers(), 3);
        assert!(config.has_schema("public"));
        assert!(!config.has_schema("billing"));
    }
}
