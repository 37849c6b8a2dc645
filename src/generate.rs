//! Migration generation for one schema.
//!
//! Phases run in a fixed order so versions follow dependency order:
//! enums, tables (definition then primary key), foreign keys, functions,
//! views, materialized views.
//!
//! The coordinator owns the [`VersionAllocator`]. Tables get a reserved
//! block of two versions each, handed out by a dispatcher task; extraction
//! workers never pick a version themselves. Foreign keys come back to the
//! coordinator over a channel and are numbered after the block.

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, Inspector, Partitions};
use crate::config::{Config, ExclusionConfig, WritePolicy};
use crate::error::{SeqError, SeqResult};
use crate::extract::{DumpSource, Extractor};
use crate::layout::{Direction, MigrationFile, path_for};
use crate::objects::{
    ObjectKind, SchemaObject, Script, enum_object, function_object, materialized_view_object,
    view_object,
};
use crate::version::VersionAllocator;

/// What a generation run left on disk.
#[derive(Debug, Clone, Default)]
pub struct GenerateReport {
    pub schema: String,
    /// Tables dispatched to extraction workers
    pub tables: usize,
    /// Versions handed out during the run
    pub versions: Range<u64>,
    pub written: Vec<PathBuf>,
    pub failures: Vec<String>,
}

impl GenerateReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One table handed to a worker together with its version.
#[derive(Debug, Clone)]
struct TableJob {
    table: String,
    version: u64,
    schema_only: bool,
}

/// Foreign-key fragment returned by a worker, one per table.
#[derive(Debug)]
struct ForeignKeyFragment {
    name: String,
    script: Script,
}

/// Files written and failures seen by one task.
#[derive(Debug, Default)]
struct Outcome {
    written: Vec<PathBuf>,
    failures: Vec<String>,
}

impl Outcome {
    fn merge(&mut self, other: Outcome) {
        self.written.extend(other.written);
        self.failures.extend(other.failures);
    }

    /// Write the up file then the down file. Returns `false` on the first
    /// failure; the down file is not attempted after a failed up.
    async fn write(
        &mut self,
        dir: &Path,
        version: u64,
        kind: ObjectKind,
        name: &str,
        script: &Script,
    ) -> bool {
        for (direction, sql) in [(Direction::Up, &script.up), (Direction::Down, &script.down)] {
            let path = path_for(dir, &MigrationFile::new(version, Some(kind), name, direction));
            match tokio::fs::write(&path, sql).await {
                Ok(()) => {
                    debug!("Wrote {}", path.display());
                    self.written.push(path);
                }
                Err(e) => {
                    warn!("Failed to write {}: {}", path.display(), e);
                    self.failures.push(format!("{}: {}", path.display(), e));
                    return false;
                }
            }
        }
        true
    }
}

/// Bounded group of file-write tasks.
struct WriteGroup {
    tasks: JoinSet<Outcome>,
    permits: Arc<Semaphore>,
    dir: Arc<PathBuf>,
    policy: WritePolicy,
    cancel: CancellationToken,
}

impl WriteGroup {
    fn new(dir: Arc<PathBuf>, limit: usize, policy: WritePolicy, cancel: CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(limit.max(1))),
            dir,
            policy,
            cancel,
        }
    }

    fn spawn(&mut self, version: u64, object: SchemaObject) {
        if self.cancel.is_cancelled() {
            return;
        }

        let permits = self.permits.clone();
        let dir = self.dir.clone();
        let policy = self.policy;
        let cancel = self.cancel.clone();

        self.tasks.spawn(async move {
            let mut outcome = Outcome::default();
            let Ok(_permit) = permits.acquire_owned().await else {
                return outcome;
            };
            if cancel.is_cancelled() {
                return outcome;
            }
            let ok = outcome
                .write(&dir, version, object.kind, &object.name, &object.script)
                .await;
            if !ok && policy == WritePolicy::FailFast {
                cancel.cancel();
            }
            outcome
        });
    }

    async fn finish(mut self) -> Outcome {
        let mut outcome = Outcome::default();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(o) => outcome.merge(o),
                Err(e) => outcome.failures.push(format!("write task failed: {}", e)),
            }
        }
        outcome
    }
}

/// State shared by every extraction worker of a run.
struct Worker {
    id: usize,
    schema: String,
    dir: Arc<PathBuf>,
    extractor: Extractor,
    jobs: Arc<Mutex<mpsc::Receiver<TableJob>>>,
    results: mpsc::Sender<ForeignKeyFragment>,
    policy: WritePolicy,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) -> Outcome {
        let mut outcome = Outcome::default();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let job = { self.jobs.lock().await.recv().await };
            let Some(job) = job else {
                break;
            };

            debug!("worker {} extracting {}.{} at {}", self.id, self.schema, job.table, job.version);
            let ddl = self
                .extractor
                .extract(&self.schema, &job.table, job.schema_only, &self.cancel)
                .await;

            if ddl.definition.up.trim().is_empty() {
                if !self.cancel.is_cancelled() {
                    warn!("No definition extracted for {}.{}", self.schema, job.table);
                    outcome
                        .failures
                        .push(format!("{}.{}: no definition extracted", self.schema, job.table));
                    if self.policy == WritePolicy::FailFast {
                        self.cancel.cancel();
                    }
                }
            } else {
                let mut ok = outcome
                    .write(&self.dir, job.version, ObjectKind::Table, &ddl.name, &ddl.table_script())
                    .await;
                if ok && !ddl.reference.up.is_empty() {
                    ok = outcome
                        .write(&self.dir, job.version + 1, ObjectKind::PrimaryKey, &ddl.name, &ddl.reference)
                        .await;
                }
                if !ok && self.policy == WritePolicy::FailFast {
                    self.cancel.cancel();
                }
            }

            // Exactly one fragment per dispatched table, whatever happened above.
            let fragment = ForeignKeyFragment {
                name: ddl.name,
                script: ddl.foreign_key,
            };
            if self.results.send(fragment).await.is_err() {
                break;
            }
        }

        outcome
    }
}

/// Generates the migration sequence for the schemas of the source connection.
pub struct Generator {
    source: String,
    schemas: BTreeMap<String, ExclusionConfig>,
    catalog: Arc<dyn Catalog>,
    dump: Arc<dyn DumpSource>,
    folder: PathBuf,
    workers: usize,
    policy: WritePolicy,
    first_version: Option<u64>,
}

impl Generator {
    pub fn new(
        source: impl Into<String>,
        schemas: BTreeMap<String, ExclusionConfig>,
        catalog: Arc<dyn Catalog>,
        dump: Arc<dyn DumpSource>,
        folder: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: source.into(),
            schemas,
            catalog,
            dump,
            folder: folder.into(),
            workers: 4,
            policy: WritePolicy::default(),
            first_version: None,
        }
    }

    /// Generator for the configured source connection.
    pub fn from_config(
        config: &Config,
        catalog: Arc<dyn Catalog>,
        dump: Arc<dyn DumpSource>,
    ) -> SeqResult<Self> {
        let source = &config.migration.source;
        let conn = config.connection(source)?;

        Ok(Self::new(
            source.clone(),
            conn.schemas.clone(),
            catalog,
            dump,
            config.migration.folder.clone(),
        )
        .workers(config.workers())
        .policy(config.migration.on_write_error))
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn policy(mut self, policy: WritePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start numbering at `version` instead of the current timestamp.
    pub fn first_version(mut self, version: u64) -> Self {
        self.first_version = Some(version);
        self
    }

    /// Generate every migration of `schema`.
    pub async fn run(&self, schema: &str, parent: &CancellationToken) -> SeqResult<GenerateReport> {
        let filters = self
            .schemas
            .get(schema)
            .ok_or_else(|| SeqError::unknown_schema(schema, &self.source))?;

        let dir = Arc::new(self.folder.join(schema));
        tokio::fs::create_dir_all(dir.as_path()).await?;

        let cancel = parent.child_token();
        let mut alloc = match self.first_version {
            Some(v) => VersionAllocator::starting_at(v),
            None => VersionAllocator::from_clock(),
        };
        let first = alloc.peek();
        let mut outcome = Outcome::default();

        info!("Generating {} from {} into {}", schema, self.source, dir.display());

        // Enums
        let enums = self.catalog.list_enums(schema).await?;
        info!("{} enum(s)", enums.len());
        let mut group = self.write_group(&dir, &cancel);
        for row in &enums {
            group.spawn(alloc.next_version(), enum_object(row));
        }
        outcome.merge(group.finish().await);

        // Tables
        let inspector = Inspector::new(self.catalog.clone());
        let partitions = inspector
            .partition_tables(schema, &filters.excludes, self.workers)
            .await?;
        let counted = inspector.count_tables(schema, filters.excludes.len()).await?;
        if counted != partitions.total {
            warn!(
                "Catalog counts {} table(s) in {} after exclusions but lists {}",
                counted, schema, partitions.total
            );
        }
        info!("{} table(s) over {} worker(s)", partitions.total, self.workers);

        let table_count = partitions.total;
        let (dispatched, fragments, tables_outcome) =
            self.extract_tables(schema, partitions, filters, &mut alloc, &dir, &cancel).await;
        outcome.merge(tables_outcome);

        if fragments.len() != dispatched {
            warn!(
                "Expected {} foreign-key fragment(s), received {}",
                dispatched,
                fragments.len()
            );
        }

        // Foreign keys, then catalog-built objects
        let mut group = self.write_group(&dir, &cancel);
        let mut foreign_keys = 0;
        for fragment in fragments {
            if fragment.script.up.is_empty() {
                continue;
            }
            foreign_keys += 1;
            group.spawn(
                alloc.next_version(),
                SchemaObject::new(ObjectKind::ForeignKeys, fragment.name, fragment.script),
            );
        }
        info!("{} foreign key migration(s)", foreign_keys);

        if !cancel.is_cancelled() {
            let functions = self.catalog.list_functions(schema).await?;
            info!("{} function(s)", functions.len());
            for row in &functions {
                group.spawn(alloc.next_version(), function_object(schema, row));
            }

            let views = self.catalog.list_views(schema).await?;
            info!("{} view(s)", views.len());
            for row in &views {
                group.spawn(alloc.next_version(), view_object(schema, row));
            }

            let materialized = self.catalog.list_materialized_views(schema).await?;
            info!("{} materialized view(s)", materialized.len());
            for row in &materialized {
                group.spawn(alloc.next_version(), materialized_view_object(schema, row));
            }
        }
        outcome.merge(group.finish().await);

        if parent.is_cancelled() {
            return Err(SeqError::Cancelled);
        }

        if self.policy == WritePolicy::FailFast && !outcome.failures.is_empty() {
            return Err(SeqError::Generation {
                written: outcome.written.len(),
                failures: outcome.failures,
            });
        }

        outcome.written.sort();
        info!("{}: {} file(s) written", schema, outcome.written.len());

        Ok(GenerateReport {
            schema: schema.to_string(),
            tables: table_count,
            versions: first..alloc.peek(),
            written: outcome.written,
            failures: outcome.failures,
        })
    }

    fn write_group(&self, dir: &Arc<PathBuf>, cancel: &CancellationToken) -> WriteGroup {
        WriteGroup::new(dir.clone(), self.workers, self.policy, cancel.clone())
    }

    /// Run the table phase. Returns the number of dispatched tables, their
    /// foreign-key fragments sorted by name, and the workers' outcomes.
    async fn extract_tables(
        &self,
        schema: &str,
        partitions: Partitions,
        filters: &ExclusionConfig,
        alloc: &mut VersionAllocator,
        dir: &Arc<PathBuf>,
        cancel: &CancellationToken,
    ) -> (usize, Vec<ForeignKeyFragment>, Outcome) {
        let mut block = alloc.reserve(2 * partitions.total as u64);
        let (job_tx, job_rx) = mpsc::channel::<TableJob>(self.workers);
        let (fk_tx, mut fk_rx) = mpsc::channel::<ForeignKeyFragment>(self.workers);

        let mut buckets = partitions.buckets;
        let filters = filters.clone();
        let dispatch_cancel = cancel.clone();
        let dispatcher = tokio::spawn(async move {
            let mut dispatched = 0usize;
            while let Some(bucket) = buckets.recv().await {
                for table in bucket {
                    let Some(version) = block.take(2) else {
                        return dispatched;
                    };
                    let job = TableJob {
                        schema_only: filters.schema_only(&table),
                        table,
                        version,
                    };
                    tokio::select! {
                        _ = dispatch_cancel.cancelled() => return dispatched,
                        sent = job_tx.send(job) => {
                            if sent.is_err() {
                                return dispatched;
                            }
                        }
                    }
                    dispatched += 1;
                }
            }
            dispatched
        });

        let extractor = Extractor::new(self.dump.clone(), self.catalog.clone());
        let jobs = Arc::new(Mutex::new(job_rx));
        let mut pool = JoinSet::new();
        for id in 0..self.workers {
            let worker = Worker {
                id,
                schema: schema.to_string(),
                dir: dir.clone(),
                extractor: extractor.clone(),
                jobs: jobs.clone(),
                results: fk_tx.clone(),
                policy: self.policy,
                cancel: cancel.clone(),
            };
            pool.spawn(worker.run());
        }
        // Only the workers hold senders now; the channel closes when the last one exits.
        drop(fk_tx);

        let join_workers = async {
            let mut outcome = Outcome::default();
            while let Some(joined) = pool.join_next().await {
                match joined {
                    Ok(o) => outcome.merge(o),
                    Err(e) => outcome.failures.push(format!("extraction worker failed: {}", e)),
                }
            }
            outcome
        };
        let collect = async {
            let mut fragments = Vec::new();
            while let Some(fragment) = fk_rx.recv().await {
                fragments.push(fragment);
            }
            fragments
        };
        let (outcome, mut fragments) = tokio::join!(join_workers, collect);

        let dispatched = match dispatcher.await {
            Ok(n) => n,
            Err(e) => {
                warn!("Table dispatcher failed: {}", e);
                fragments.len()
            }
        };

        fragments.sort_by(|a, b| a.name.cmp(&b.name));
        (dispatched, fragments, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_outcome_stops_after_failed_up() {
        let dir = std::env::temp_dir().join(format!("pgseq-missing-{}", std::process::id()));
        let mut outcome = Outcome::default();

        // Parent directory doesn't exist, so the up write fails.
        let ok = outcome
            .write(&dir.join("nope"), 1, ObjectKind::Enum, "mood", &Script::new("up", "down"))
            .await;

        assert!(!ok);
        assert!(outcome.written.is_empty());
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].contains("1_enum_mood.up.sql"));
    }

    #[tokio::test]
    async fn test_write_group_respects_cancellation() {
        let dir = std::env::temp_dir().join(format!("pgseq-group-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut group = WriteGroup::new(Arc::new(dir.clone()), 2, WritePolicy::FailFast, cancel);
        group.spawn(7, SchemaObject::new(ObjectKind::View, "v", Script::new("a", "b")));
        let outcome = group.finish().await;

        assert!(outcome.written.is_empty());
        assert!(!dir.join("7_view_v.up.sql").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
