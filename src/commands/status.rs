//! `pgseq version` and `pgseq compare`

use anyhow::Result;
use colored::*;
use serde::Serialize;
use tracing::debug;

use super::{OutputFormat, Workspace, print_table};
use crate::engine::MigrationEngine;
use crate::error::SeqResult;
use crate::reconcile::{StepDistance, pending, reconcile};

/// Applied state of one schema on one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRow {
    pub connection: String,
    pub schema: String,
    pub applied: u64,
    pub dirty: bool,
    /// Newest version on disk
    pub latest: Option<u64>,
    pub pending: Option<StepDistance>,
    pub error: Option<String>,
}

impl VersionRow {
    fn failed(connection: &str, schema: &str, error: String) -> Self {
        Self {
            connection: connection.to_string(),
            schema: schema.to_string(),
            applied: 0,
            dirty: false,
            latest: None,
            pending: None,
            error: Some(error),
        }
    }

    pub fn in_sync(&self) -> bool {
        !self.dirty && self.pending.is_some_and(|d| d.is_in_sync())
    }
}

/// Two databases side by side for one schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompareRow {
    pub schema: String,
    pub source: String,
    pub source_version: u64,
    pub compare: String,
    pub compare_version: u64,
    pub distance: Option<StepDistance>,
    pub error: Option<String>,
}

/// Read `engine`'s version and measure it against `steps`.
pub async fn version_row(
    connection: &str,
    schema: &str,
    engine: &dyn MigrationEngine,
    steps: &[u64],
) -> SeqResult<VersionRow> {
    let (applied, dirty) = engine.version().await?;
    let (pending, error) = match pending(applied, steps) {
        Ok(d) => (Some(d), None),
        Err(e) => (None, Some(e.to_string())),
    };

    Ok(VersionRow {
        connection: connection.to_string(),
        schema: schema.to_string(),
        applied,
        dirty,
        latest: steps.last().copied(),
        pending,
        error,
    })
}

/// Signed step distance of `compare` relative to `source`.
pub async fn compare_row(
    schema: &str,
    source_name: &str,
    source: &dyn MigrationEngine,
    compare_name: &str,
    compare: &dyn MigrationEngine,
    steps: &[u64],
) -> SeqResult<CompareRow> {
    let (source_version, _) = source.version().await?;
    let (compare_version, _) = compare.version().await?;
    let (distance, error) = match reconcile(source_version, compare_version, steps) {
        Ok(d) => (Some(d), None),
        Err(e) => (None, Some(e.to_string())),
    };

    Ok(CompareRow {
        schema: schema.to_string(),
        source: source_name.to_string(),
        source_version,
        compare: compare_name.to_string(),
        compare_version,
        distance,
        error,
    })
}

fn describe(distance: Option<StepDistance>) -> String {
    match distance {
        Some(StepDistance::Steps(n)) => n.to_string(),
        Some(StepDistance::NotMigrated) => "not migrated".to_string(),
        None => "-".to_string(),
    }
}

/// `version <connection|cluster> [schema]`
pub async fn version(
    ws: &Workspace,
    target: &str,
    schema: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let mut rows = Vec::new();

    for connection in ws.targets(target)? {
        let conn = ws.config.connection(&connection)?;
        let schemas: Vec<String> = match schema {
            Some(s) if conn.schemas.contains_key(s) => vec![s.to_string()],
            Some(s) => {
                debug!("{} has no schema {}; skipping", connection, s);
                continue;
            }
            None => conn.schemas.keys().cloned().collect(),
        };

        for schema in schemas {
            let row = match ws.engine(&connection, &schema).await {
                Ok(engine) => {
                    let steps = ws.steps(&schema)?;
                    version_row(&connection, &schema, &engine, &steps).await?
                }
                Err(e) => VersionRow::failed(&connection, &schema, e.to_string()),
            };
            rows.push(row);
        }
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Table => {
            let table: Vec<Vec<String>> = rows
                .iter()
                .map(|r| {
                    let mark = if r.error.is_some() {
                        "✗".red().to_string()
                    } else if r.in_sync() {
                        "✓".green().to_string()
                    } else {
                        "○".yellow().to_string()
                    };
                    vec![
                        r.connection.clone(),
                        r.schema.clone(),
                        if r.dirty { format!("{} (dirty)", r.applied) } else { r.applied.to_string() },
                        r.latest.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
                        describe(r.pending),
                        mark,
                    ]
                })
                .collect();
            print_table(&["connection", "schema", "applied", "latest", "pending", ""], &table);
            for r in rows.iter().filter(|r| r.error.is_some()) {
                println!(
                    "{} {}/{}: {}",
                    "Error:".red().bold(),
                    r.connection,
                    r.schema,
                    r.error.as_deref().unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}

/// `compare <source> <compare> [schema]`
pub async fn compare(
    ws: &Workspace,
    source: &str,
    target: &str,
    schema: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let source_conn = ws.config.connection(source)?;
    let target_conn = ws.config.connection(target)?;

    let schemas: Vec<String> = match schema {
        Some(s) => {
            source_conn.schema(s, source)?;
            target_conn.schema(s, target)?;
            vec![s.to_string()]
        }
        None => source_conn
            .schemas
            .keys()
            .filter(|s| target_conn.schemas.contains_key(*s))
            .cloned()
            .collect(),
    };

    let mut rows = Vec::new();
    for schema in &schemas {
        let left = ws.engine(source, schema).await?;
        let right = ws.engine(target, schema).await?;
        let steps = ws.steps(schema)?;
        rows.push(compare_row(schema, source, &left, target, &right, &steps).await?);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Table => {
            let table: Vec<Vec<String>> = rows
                .iter()
                .map(|r| {
                    vec![
                        r.schema.clone(),
                        r.source_version.to_string(),
                        r.compare_version.to_string(),
                        r.error.clone().unwrap_or_else(|| describe(r.distance)),
                    ]
                })
                .collect();
            print_table(&["schema", source, target, "steps"], &table);
        }
    }

    Ok(())
}
