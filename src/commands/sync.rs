//! `pgseq sync` and `pgseq make`

use anyhow::Result;
use colored::*;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Workspace, allow_no_change};
use crate::engine::{MigrationEngine, repair_dirty};
use crate::error::{SeqError, SeqResult};

/// What a copy did to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Destination already at the source's version
    InSync(u64),
    /// Destination is past the source; nothing was run
    Ahead { source: u64, destination: u64 },
    Copied { from: u64, to: u64, steps: usize },
}

/// Step `destination` forward one migration at a time until it reaches
/// the version applied on `source`.
pub async fn copy_versions(
    source: &dyn MigrationEngine,
    destination: &dyn MigrationEngine,
    repair: bool,
    cancel: &CancellationToken,
) -> SeqResult<CopyOutcome> {
    let (target, source_dirty) = source.version().await?;
    if source_dirty {
        warn!("Source is dirty at {}", target);
    }

    repair_dirty(destination, repair).await?;
    let (from, _) = destination.version().await?;

    if from == target {
        return Ok(CopyOutcome::InSync(target));
    }
    if from > target {
        return Ok(CopyOutcome::Ahead {
            source: target,
            destination: from,
        });
    }

    let mut steps = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(SeqError::Cancelled);
        }

        match destination.steps(1).await {
            Ok(()) => steps += 1,
            Err(SeqError::NoChange) => return Err(SeqError::VersionNotFound { version: target }),
            Err(e) => return Err(e),
        }

        let (actual, _) = destination.version().await?;
        if actual == target {
            break;
        }
        if actual > target {
            return Err(SeqError::Overshoot { target, actual });
        }
    }

    Ok(CopyOutcome::Copied {
        from,
        to: target,
        steps,
    })
}

/// Bring one database fully up. Returns whether anything ran.
pub async fn sync_engine(engine: &dyn MigrationEngine, repair: bool) -> SeqResult<bool> {
    repair_dirty(engine, repair).await?;
    allow_no_change(engine.up().await)
}

/// `sync <cluster> <schema>`: `up` on every member except the source.
pub async fn sync(ws: &Workspace, cluster: &str, schema: &str, repair: bool) -> Result<()> {
    let members = ws.config.cluster(cluster)?;
    let source = ws.config.migration.source.as_str();

    println!("{} {} / {}", "Syncing".cyan().bold(), cluster.yellow(), schema.yellow());

    for member in members.iter().filter(|m| m.as_str() != source) {
        if ws.cancel.is_cancelled() {
            return Err(SeqError::Cancelled.into());
        }

        let engine = ws.engine(member, schema).await?;
        let changed = sync_engine(&engine, repair).await?;
        let (version, _) = engine.version().await?;
        info!("{}/{} at {}", member, schema, version);

        if changed {
            println!("  {} {} → {}", "✓".green(), member, version.to_string().cyan());
        } else {
            println!("  {} {} already at {}", "○".dimmed(), member, version);
        }
    }

    Ok(())
}

/// `make <schema> <source> <destination>`
pub async fn make(
    ws: &Workspace,
    schema: &str,
    source: &str,
    destination: &str,
    repair: bool,
) -> Result<()> {
    let from = ws.engine(source, schema).await?;
    let to = ws.engine(destination, schema).await?;

    match copy_versions(&from, &to, repair, &ws.cancel).await? {
        CopyOutcome::InSync(v) => {
            println!("  {} {} already at {}", "○".dimmed(), destination, v);
        }
        CopyOutcome::Ahead {
            source: s,
            destination: d,
        } => {
            println!(
                "  {} {} is ahead of {} ({} > {})",
                "⚠".yellow(),
                destination,
                source,
                d,
                s
            );
        }
        CopyOutcome::Copied { from, to, steps } => {
            println!(
                "  {} {}: {} → {} in {} step(s)",
                "✓".green(),
                destination,
                from,
                to.to_string().cyan(),
                steps
            );
        }
    }

    Ok(())
}
