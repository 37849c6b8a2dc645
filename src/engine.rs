//! Migration-state engine.
//!
//! Applies the on-disk sequence to a database and tracks the applied
//! version in `<schema>.schema_migrations`, one row of `(version, dirty)`.
//! A row is marked dirty before a migration runs and cleared after, so a
//! crash mid-migration leaves a visible marker.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::{debug, info, warn};

use crate::config::Connection;
use crate::error::{SeqError, SeqResult};
use crate::layout::{Direction, list_migrations, logical_steps, path_for};

/// Anything that can move a database along the migration sequence.
#[async_trait]
pub trait MigrationEngine: Send + Sync {
    /// Apply every pending migration.
    async fn up(&self) -> SeqResult<()>;

    /// Revert every applied migration.
    async fn down(&self) -> SeqResult<()>;

    /// Move `n` steps; negative moves back.
    async fn steps(&self, n: i64) -> SeqResult<()>;

    /// Record `version` as applied and clean without running anything.
    async fn force(&self, version: u64) -> SeqResult<()>;

    /// Applied version (0 when never migrated) and its dirty flag.
    async fn version(&self) -> SeqResult<(u64, bool)>;

    /// Drop every table in the schema, bookkeeping included.
    async fn drop(&self) -> SeqResult<()>;

    async fn state(&self) -> SeqResult<EngineState> {
        let (version, dirty) = self.version().await?;
        Ok(EngineState::from_record(version, dirty))
    }
}

/// Where a database stands relative to its last migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Clean(u64),
    /// A migration towards `to` is in flight.
    Applying { from: u64, to: u64 },
    /// A migration towards this version started and never finished.
    Dirty(u64),
}

impl EngineState {
    pub fn from_record(version: u64, dirty: bool) -> Self {
        if dirty {
            EngineState::Dirty(version)
        } else {
            EngineState::Clean(version)
        }
    }

    pub fn version(&self) -> u64 {
        match *self {
            EngineState::Clean(v) | EngineState::Dirty(v) => v,
            EngineState::Applying { to, .. } => to,
        }
    }

    /// Start moving to `to`. Only a clean state can start.
    pub fn begin(self, to: u64) -> SeqResult<Self> {
        match self {
            EngineState::Clean(from) => Ok(EngineState::Applying { from, to }),
            EngineState::Dirty(version) => Err(SeqError::Dirty { version }),
            EngineState::Applying { from, to: target } => Err(SeqError::Engine(format!(
                "migration {} -> {} already in progress",
                from, target
            ))),
        }
    }

    pub fn finish(self) -> Self {
        match self {
            EngineState::Applying { to, .. } => EngineState::Clean(to),
            other => other,
        }
    }

    pub fn fail(self) -> Self {
        match self {
            EngineState::Applying { to, .. } => EngineState::Dirty(to),
            other => other,
        }
    }
}

/// One migration to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    /// Version whose file runs
    pub run: u64,
    pub direction: Direction,
    /// Version recorded once it succeeds
    pub to: u64,
}

/// Moves taking `current` `n` steps along `steps`. Stops early at either end.
pub fn plan(steps: &[u64], current: u64, n: i64) -> SeqResult<Vec<Move>> {
    let position = if current == 0 {
        None
    } else {
        Some(
            steps
                .iter()
                .position(|v| *v == current)
                .ok_or(SeqError::VersionNotFound { version: current })?,
        )
    };

    let count = n.unsigned_abs() as usize;

    if n >= 0 {
        let start = position.map_or(0, |i| i + 1);
        Ok(steps
            .iter()
            .skip(start)
            .take(count)
            .map(|&v| Move {
                run: v,
                direction: Direction::Up,
                to: v,
            })
            .collect())
    } else {
        let Some(i) = position else {
            return Ok(Vec::new());
        };
        Ok((0..=i)
            .rev()
            .take(count)
            .map(|k| Move {
                run: steps[k],
                direction: Direction::Down,
                to: if k == 0 { 0 } else { steps[k - 1] },
            })
            .collect())
    }
}

/// Roll back a dirty database when `repair` is set: force the recorded
/// version clean, then step back once.
pub async fn repair_dirty(engine: &dyn MigrationEngine, repair: bool) -> SeqResult<EngineState> {
    match engine.state().await? {
        EngineState::Dirty(version) if repair => {
            warn!("Repairing dirty version {}", version);
            engine.force(version).await?;
            match engine.steps(-1).await {
                Ok(()) | Err(SeqError::NoChange) => {}
                Err(e) => return Err(e),
            }
            engine.state().await
        }
        EngineState::Dirty(version) => Err(SeqError::Dirty { version }),
        state => Ok(state),
    }
}

/// Recorded version of a dirty database that has no migration applied.
pub const NIL_VERSION: i64 = -1;

/// Row to store for `(version, dirty)`. A clean version 0 stores no row;
/// a dirty version 0 stores [`NIL_VERSION`] so the dirty flag survives.
pub fn encode_version(version: u64, dirty: bool) -> Option<i64> {
    match (version, dirty) {
        (0, false) => None,
        (0, true) => Some(NIL_VERSION),
        (v, _) => Some(v as i64),
    }
}

/// Inverse of [`encode_version`]; no row means a clean version 0.
pub fn decode_version(row: Option<(i64, bool)>) -> (u64, bool) {
    match row {
        None => (0, false),
        Some((v, dirty)) if v < 0 => (0, dirty),
        Some((v, dirty)) => (v as u64, dirty),
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// [`MigrationEngine`] over a Postgres pool and a migration directory.
#[derive(Clone)]
pub struct PgMigrator {
    pool: PgPool,
    schema: String,
    dir: PathBuf,
}

impl PgMigrator {
    pub fn new(pool: PgPool, schema: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            schema: schema.into(),
            dir: dir.into(),
        }
    }

    pub async fn connect(conn: &Connection, schema: &str, dir: &Path) -> SeqResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(conn.connect_options())
            .await
            .map_err(|e| SeqError::Connection(e.to_string()))?;

        let migrator = Self::new(pool, schema, dir);
        migrator.ensure_table().await?;
        Ok(migrator)
    }

    fn table(&self) -> String {
        format!("{}.schema_migrations", quote_ident(&self.schema))
    }

    async fn ensure_table(&self) -> SeqResult<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (version bigint NOT NULL PRIMARY KEY, dirty boolean NOT NULL)",
            self.table()
        );
        self.pool.execute(sql.as_str()).await.map_err(SeqError::database)?;
        Ok(())
    }

    async fn set_version(&self, version: u64, dirty: bool) -> SeqResult<()> {
        let mut tx = self.pool.begin().await.map_err(SeqError::database)?;

        let truncate = format!("TRUNCATE {}", self.table());
        sqlx::query(&truncate)
            .execute(&mut *tx)
            .await
            .map_err(SeqError::database)?;

        if let Some(recorded) = encode_version(version, dirty) {
            let insert = format!("INSERT INTO {} (version, dirty) VALUES ($1, $2)", self.table());
            sqlx::query(&insert)
                .bind(recorded)
                .bind(dirty)
                .execute(&mut *tx)
                .await
                .map_err(SeqError::database)?;
        }

        tx.commit().await.map_err(SeqError::database)?;
        Ok(())
    }

    /// Files on disk, keyed by version and direction.
    fn files(&self) -> SeqResult<(Vec<u64>, BTreeMap<(u64, Direction), PathBuf>)> {
        let files = list_migrations(&self.dir)?;
        let steps = logical_steps(&files);
        let mut paths = BTreeMap::new();
        for file in &files {
            paths
                .entry((file.version, file.direction))
                .or_insert_with(|| path_for(&self.dir, file));
        }
        Ok((steps, paths))
    }

    async fn run(&self, n: i64) -> SeqResult<()> {
        let (version, dirty) = self.version().await?;
        let mut state = EngineState::from_record(version, dirty);
        if let EngineState::Dirty(version) = state {
            return Err(SeqError::Dirty { version });
        }

        let (steps, paths) = self.files()?;
        let moves = plan(&steps, version, n)?;
        if moves.is_empty() {
            return Err(SeqError::NoChange);
        }

        for step in moves {
            let path = paths
                .get(&(step.run, step.direction))
                .ok_or(SeqError::VersionNotFound { version: step.run })?;
            let sql = tokio::fs::read_to_string(path).await?;

            state = state.begin(step.to)?;
            self.set_version(step.to, true).await?;

            debug!("Running {}", path.display());
            if let Err(e) = self.pool.execute(sql.as_str()).await {
                state = state.fail();
                warn!("{} failed, {:?}", path.display(), state);
                return Err(SeqError::Engine(format!("{}: {}", path.display(), e)));
            }

            self.set_version(step.to, false).await?;
            state = state.finish();
            info!(
                "{} {} ({})",
                self.schema,
                path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
                step.direction.suffix()
            );
        }

        Ok(())
    }
}

#[async_trait]
impl MigrationEngine for PgMigrator {
    async fn up(&self) -> SeqResult<()> {
        self.run(i64::MAX).await
    }

    async fn down(&self) -> SeqResult<()> {
        self.run(i64::MIN).await
    }

    async fn steps(&self, n: i64) -> SeqResult<()> {
        if n == 0 {
            return Err(SeqError::InvalidStep(n));
        }
        self.run(n).await
    }

    async fn force(&self, version: u64) -> SeqResult<()> {
        self.set_version(version, false).await
    }

    async fn version(&self) -> SeqResult<(u64, bool)> {
        let sql = format!("SELECT version, dirty FROM {} LIMIT 1", self.table());
        let row: Option<(i64, bool)> = sqlx::query_as(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(SeqError::database)?;

        Ok(decode_version(row))
    }

    async fn drop(&self) -> SeqResult<()> {
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = $1 AND table_type = 'BASE TABLE'",
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await
        .map_err(SeqError::database)?;

        for (table,) in tables {
            let sql = format!(
                "DROP TABLE IF EXISTS {}.{} CASCADE",
                quote_ident(&self.schema),
                quote_ident(&table)
            );
            self.pool.execute(sql.as_str()).await.map_err(SeqError::database)?;
        }

        info!("Dropped all tables in {}", self.schema);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const STEPS: &[u64] = &[10, 20, 30];

    #[test]
    fn test_dirty_version_zero_is_recorded() {
        assert_eq!(encode_version(0, false), None);
        assert_eq!(encode_version(0, true), Some(NIL_VERSION));
        assert_eq!(encode_version(20, true), Some(20));

        assert_eq!(decode_version(None), (0, false));
        assert_eq!(decode_version(Some((NIL_VERSION, true))), (0, true));
        assert_eq!(decode_version(Some((20, false))), (20, false));

        for record in [(0, true), (0, false), (30, true), (30, false)] {
            let row = encode_version(record.0, record.1).map(|v| (v, record.1));
            assert_eq!(decode_version(row), record);
        }
    }

    fn runs(moves: &[Move]) -> Vec<(u64, u64)> {
        moves.iter().map(|m| (m.run, m.to)).collect()
    }

    #[test]
    fn test_plan_forward() {
        assert_eq!(runs(&plan(STEPS, 0, 2).unwrap()), vec![(10, 10), (20, 20)]);
        assert_eq!(runs(&plan(STEPS, 20, i64::MAX).unwrap()), vec![(30, 30)]);
        assert!(plan(STEPS, 30, 1).unwrap().is_empty());
    }

    #[test]
    fn test_plan_backward_records_previous_version() {
        let moves = plan(STEPS, 30, -2).unwrap();
        assert_eq!(runs(&moves), vec![(30, 20), (20, 10)]);
        assert!(moves.iter().all(|m| m.direction == Direction::Down));

        assert_eq!(runs(&plan(STEPS, 10, i64::MIN).unwrap()), vec![(10, 0)]);
        assert!(plan(STEPS, 0, -1).unwrap().is_empty());
    }

    #[test]
    fn test_plan_unknown_current_version() {
        assert!(matches!(
            plan(STEPS, 25, 1),
            Err(SeqError::VersionNotFound { version: 25 })
        ));
    }

    #[test]
    fn test_state_machine() {
        let state = EngineState::from_record(10, false);
        let applying = state.begin(20).unwrap();
        assert_eq!(applying, EngineState::Applying { from: 10, to: 20 });
        assert_eq!(applying.finish(), EngineState::Clean(20));
        assert_eq!(applying.fail(), EngineState::Dirty(20));
        assert!(applying.begin(30).is_err());

        let dirty = EngineState::from_record(20, true);
        assert!(matches!(dirty.begin(30), Err(SeqError::Dirty { version: 20 })));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("public"), "\"public\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
