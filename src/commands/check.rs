//! `pgseq test`: every connection answers and `pg_dump` runs.

use std::process::Stdio;

use anyhow::Result;
use colored::*;
use tokio::process::Command;

use super::Workspace;
use crate::catalog::PgCatalog;
use crate::error::{SeqError, SeqResult};

/// Run `<program> --help` and report whether it exited cleanly.
pub async fn check_pg_dump(program: &str) -> SeqResult<()> {
    let status = Command::new(program)
        .arg("--help")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if status.success() {
        Ok(())
    } else {
        Err(SeqError::Config(format!("{} --help exited with {}", program, status)))
    }
}

pub async fn check(ws: &Workspace) -> Result<()> {
    println!("{}", "Checking configuration".cyan().bold());
    let mut failed = 0;

    for (name, conn) in &ws.config.migration.connections {
        let result = async {
            let catalog = PgCatalog::connect(conn).await?;
            sqlx::query("SELECT 1")
                .execute(catalog.pool())
                .await
                .map_err(SeqError::database)?;
            Ok::<_, SeqError>(())
        }
        .await;

        match result {
            Ok(()) => println!("  {} {} ({}:{}/{})", "✓".green(), name, conn.host, conn.port, conn.name),
            Err(e) => {
                failed += 1;
                println!("  {} {}: {}", "✗".red(), name, e);
            }
        }
    }

    let program = &ws.config.migration.pg_dump;
    match check_pg_dump(program).await {
        Ok(()) => println!("  {} {}", "✓".green(), program),
        Err(e) => {
            failed += 1;
            println!("  {} {}: {}", "✗".red(), program, e);
        }
    }

    if failed > 0 {
        anyhow::bail!("{} check(s) failed", failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_pg_dump_fails() {
        assert!(check_pg_dump("/nonexistent/pg_dump").await.is_err());
    }
}
