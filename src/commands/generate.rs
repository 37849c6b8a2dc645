//! `pgseq generate [schema]`

use std::sync::Arc;

use anyhow::Result;
use colored::*;

use super::Workspace;
use crate::catalog::PgCatalog;
use crate::extract::PgDump;
use crate::generate::{GenerateReport, Generator};

/// Generate migrations for `schema`, or every schema of the source connection.
pub async fn generate(ws: &Workspace, schema: Option<&str>) -> Result<()> {
    let config = &ws.config;
    let source = config.migration.source.as_str();
    let conn = config.connection(source)?;
    let schemas = ws.schemas_of(source, schema)?;

    println!("{}", "Generating migrations".cyan().bold());
    println!("  Source: {} ({}@{}/{})", source.yellow(), conn.user, conn.host, conn.name);
    println!();

    let catalog = Arc::new(PgCatalog::connect(conn).await?);
    let dump = Arc::new(PgDump::new(config.migration.pg_dump.clone(), conn.clone()));
    let generator = Generator::from_config(config, catalog, dump)?;

    for schema in &schemas {
        let report = generator.run(schema, &ws.cancel).await?;
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &GenerateReport) {
    println!(
        "  {} {}: {} table(s), {} file(s), versions {}..{}",
        "✓".green(),
        report.schema.cyan(),
        report.tables,
        report.written.len(),
        report.versions.start,
        report.versions.end
    );

    for failure in &report.failures {
        println!("    {} {}", "✗".red(), failure);
    }
}
