//! Single-database commands: up, down, run, rollback, set, clean, drop.

use anyhow::Result;
use colored::*;

use super::{Workspace, allow_no_change};
use crate::engine::{EngineState, MigrationEngine, repair_dirty};
use crate::error::{SeqError, SeqResult};
use crate::reconcile::next_versions;

/// One state-changing action on a single database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Up,
    Down,
    /// Forward this many steps
    Run(u64),
    /// Back this many steps
    Rollback(u64),
    /// Record a version without running anything
    Set(u64),
    /// Force a dirty version clean and step back once
    Clean,
    Drop,
}

/// Apply `action` to `engine`. `steps` are the logical steps on disk,
/// used to validate `Set`. Returns whether anything changed.
pub async fn apply(
    engine: &dyn MigrationEngine,
    action: StepAction,
    steps: &[u64],
    repair: bool,
) -> SeqResult<bool> {
    match action {
        StepAction::Up => {
            repair_dirty(engine, repair).await?;
            allow_no_change(engine.up().await)
        }
        StepAction::Down => {
            repair_dirty(engine, repair).await?;
            allow_no_change(engine.down().await)
        }
        StepAction::Run(n) | StepAction::Rollback(n) => {
            if n == 0 {
                return Err(SeqError::InvalidStep(0));
            }
            let n = i64::try_from(n).map_err(|_| SeqError::InvalidStep(i64::MAX))?;
            let n = if matches!(action, StepAction::Rollback(_)) { -n } else { n };
            repair_dirty(engine, repair).await?;
            allow_no_change(engine.steps(n).await)
        }
        StepAction::Set(version) => {
            if version != 0 && !steps.contains(&version) {
                return Err(SeqError::VersionNotFound { version });
            }
            engine.force(version).await?;
            Ok(true)
        }
        StepAction::Clean => match engine.state().await? {
            EngineState::Dirty(_) => {
                repair_dirty(engine, true).await?;
                Ok(true)
            }
            _ => Ok(false),
        },
        StepAction::Drop => {
            engine.drop().await?;
            Ok(true)
        }
    }
}

/// Run `action` on `schema` at `connection` and print where it ended up.
pub async fn run(
    ws: &Workspace,
    connection: &str,
    schema: &str,
    action: StepAction,
    repair: bool,
) -> Result<()> {
    let engine = ws.engine(connection, schema).await?;
    let steps = ws.steps(schema)?;

    if let StepAction::Run(n) = action {
        let (applied, _) = engine.version().await?;
        if let Ok(next) = next_versions(applied, &steps, n as usize) {
            for version in next {
                println!("  {} {}", "→".dimmed(), version);
            }
        }
    }

    let changed = apply(&engine, action, &steps, repair).await?;
    let (version, dirty) = engine.version().await?;

    let label = format!("{}/{}", connection, schema);
    if !changed {
        println!("  {} {} no change (at {})", "○".dimmed(), label, version);
    } else if dirty {
        println!("  {} {} dirty at {}", "⚠".yellow(), label, version);
    } else {
        println!("  {} {} at {}", "✓".green(), label, version.to_string().cyan());
    }

    Ok(())
}
