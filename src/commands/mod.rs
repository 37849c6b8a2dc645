//! Command implementations behind the `pgseq` binary.
//!
//! - generate: write migrations from the source database
//! - status: applied versions and drift between databases
//! - sync: bring cluster members and single databases up to date
//! - steps: up, down, run, rollback, set, clean, drop
//! - create: empty hand-written migration pair
//! - check: connectivity and tool checks

pub mod check;
pub mod create;
pub mod generate;
pub mod status;
pub mod steps;
pub mod sync;

use std::path::Path;

use clap::ValueEnum;
use colored::*;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::engine::PgMigrator;
use crate::error::{SeqError, SeqResult};
use crate::layout::read_steps;

/// Output format for reporting commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Loaded configuration plus the run's cancellation token.
pub struct Workspace {
    pub config: Config,
    pub cancel: CancellationToken,
}

impl Workspace {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn load(path: Option<&Path>) -> SeqResult<Self> {
        let path = Config::discover(path)?;
        tracing::debug!("Using config {}", path.display());
        Ok(Self::new(Config::load(&path)?))
    }

    /// Migration engine for `schema` on `connection`.
    pub async fn engine(&self, connection: &str, schema: &str) -> SeqResult<PgMigrator> {
        let (conn, _) = self.config.schema(connection, schema)?;
        PgMigrator::connect(conn, schema, &self.config.schema_dir(schema)).await
    }

    /// Logical steps on disk for `schema`.
    pub fn steps(&self, schema: &str) -> SeqResult<Vec<u64>> {
        read_steps(&self.config.schema_dir(schema))
    }

    /// Connections named by `target`: a cluster's members, or the
    /// connection itself.
    pub fn targets(&self, target: &str) -> SeqResult<Vec<String>> {
        if let Ok(members) = self.config.cluster(target) {
            return Ok(members.to_vec());
        }
        self.config.connection(target)?;
        Ok(vec![target.to_string()])
    }

    /// `schema` if given, otherwise every schema configured on `connection`.
    pub fn schemas_of(&self, connection: &str, schema: Option<&str>) -> SeqResult<Vec<String>> {
        let conn = self.config.connection(connection)?;
        match schema {
            Some(s) => {
                conn.schema(s, connection)?;
                Ok(vec![s.to_string()])
            }
            None => Ok(conn.schemas.keys().cloned().collect()),
        }
    }
}

/// Treat "nothing to do" as success.
pub(crate) fn allow_no_change(result: SeqResult<()>) -> SeqResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(SeqError::NoChange) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Print rows as a box-drawn table.
pub(crate) fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let header: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("{:width$}", h, width = *w))
        .collect();
    println!("{}", header.join(" │ ").white().bold());

    let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
    println!("{}", sep.join("─┼─").dimmed());

    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:width$}", c, width = *w))
            .collect();
        println!("{}", cells.join(" │ "));
    }
}
