//! `pg_dump` invocation.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Connection;

/// Flags that keep the dump free of comments, ownership and other noise.
const BASE_FLAGS: &[&str] = &[
    "--no-comments",
    "--no-publications",
    "--no-security-labels",
    "--no-subscriptions",
    "--no-tablespaces",
    "--no-unlogged-table-data",
    "--no-owner",
    "--no-privileges",
    "--no-blobs",
    "--clean",
    "--if-exists",
];

/// Anything that can produce plain-SQL dump text for one table.
#[async_trait]
pub trait DumpSource: Send + Sync {
    /// Dump `table` (schema-qualified). Failures come back as empty text.
    async fn dump(&self, table: &str, schema_only: bool, cancel: &CancellationToken) -> String;
}

/// The real `pg_dump` binary.
#[derive(Debug, Clone)]
pub struct PgDump {
    program: String,
    connection: Connection,
}

impl PgDump {
    pub fn new(program: impl Into<String>, connection: Connection) -> Self {
        Self {
            program: program.into(),
            connection,
        }
    }

    /// Arguments for one table. The password is never among them.
    pub fn args(&self, table: &str, schema_only: bool) -> Vec<String> {
        let mut args: Vec<String> = BASE_FLAGS.iter().map(|f| f.to_string()).collect();
        args.extend([
            "--username".to_string(),
            self.connection.user.clone(),
            "--port".to_string(),
            self.connection.port.to_string(),
            "--host".to_string(),
            self.connection.host.clone(),
            "--table".to_string(),
            table.to_string(),
        ]);
        args.push(if schema_only { "--schema-only" } else { "--inserts" }.to_string());
        args.push(self.connection.name.clone());
        args
    }

    fn command(&self, table: &str, schema_only: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args(table, schema_only))
            .env("PGPASSWORD", &self.connection.password)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl DumpSource for PgDump {
    async fn dump(&self, table: &str, schema_only: bool, cancel: &CancellationToken) -> String {
        debug!("pg_dump {} (schema_only={})", table, schema_only);

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("pg_dump for {} cancelled", table);
                return String::new();
            }
            output = self.command(table, schema_only).output() => output,
        };

        match output {
            Ok(out) if out.status.success() => {
                let text = String::from_utf8_lossy(&out.stdout).into_owned();
                if text.trim().is_empty() {
                    warn!("pg_dump returned no output for {}", table);
                }
                text
            }
            Ok(out) => {
                warn!(
                    "pg_dump failed for {} ({}): {}",
                    table,
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                String::new()
            }
            Err(e) => {
                warn!("Failed to run {}: {}", self.program, e);
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> Connection {
        Connection {
            host: "db.internal".into(),
            port: 6432,
            name: "app".into(),
            user: "reader".into(),
            password: "hunter2".into(),
            schemas: Default::default(),
        }
    }

    #[test]
    fn test_args_schema_only() {
        let dump = PgDump::new("pg_dump", connection());
        let args = dump.args("public.orders", true);

        assert!(args.contains(&"--schema-only".to_string()));
        assert!(!args.contains(&"--inserts".to_string()));
        assert!(args.contains(&"--clean".to_string()));
        assert!(args.contains(&"--if-exists".to_string()));
        assert!(args.windows(2).any(|w| w == ["--table", "public.orders"]));
        assert!(args.windows(2).any(|w| w == ["--port", "6432"]));
        assert_eq!(args.last().map(String::as_str), Some("app"));
        assert!(!args.iter().any(|a| a.contains("hunter2")));
    }

    #[test]
    fn test_args_only_use_single_table_flags() {
        // parallel-dump flags make pg_dump refuse a plain single-table dump
        let args = PgDump::new("pg_dump", connection()).args("public.orders", true);
        assert!(!args.iter().any(|a| a.contains("synchronized-snapshots")));
        assert!(!args.iter().any(|a| a == "--jobs" || a.starts_with("-j")));
        assert_eq!(args.iter().filter(|a| *a == "--table").count(), 1);
    }

    #[test]
    fn test_args_with_data() {
        let args = PgDump::new("pg_dump", connection()).args("public.countries", false);
        assert!(args.contains(&"--inserts".to_string()));
        assert!(!args.contains(&"--schema-only".to_string()));
    }

    #[tokio::test]
    async fn test_missing_binary_yields_empty_output() {
        let dump = PgDump::new("/nonexistent/pg_dump", connection());
        let text = dump
            .dump("public.orders", true, &CancellationToken::new())
            .await;
        assert!(text.is_empty());
    }
}
