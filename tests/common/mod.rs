//! In-memory stand-ins for the database, the dump tool and the migration engine.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use pgseq::catalog::{Catalog, EnumRow, FunctionRow, ViewRow};
use pgseq::engine::{MigrationEngine, decode_version, encode_version, plan};
use pgseq::error::{SeqError, SeqResult};
use pgseq::extract::DumpSource;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct FakeCatalog {
    pub tables: Vec<String>,
    pub enums: Vec<EnumRow>,
    pub functions: Vec<FunctionRow>,
    pub views: Vec<ViewRow>,
    pub materialized_views: Vec<ViewRow>,
    pub primary_keys: BTreeMap<String, String>,
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn list_tables(&self, _schema: &str) -> SeqResult<Vec<String>> {
        Ok(self.tables.clone())
    }

    async fn count_tables(&self, _schema: &str) -> SeqResult<usize> {
        Ok(self.tables.len())
    }

    async fn list_enums(&self, _schema: &str) -> SeqResult<Vec<EnumRow>> {
        Ok(self.enums.clone())
    }

    async fn list_functions(&self, _schema: &str) -> SeqResult<Vec<FunctionRow>> {
        Ok(self.functions.clone())
    }

    async fn list_views(&self, _schema: &str) -> SeqResult<Vec<ViewRow>> {
        Ok(self.views.clone())
    }

    async fn list_materialized_views(&self, _schema: &str) -> SeqResult<Vec<ViewRow>> {
        Ok(self.materialized_views.clone())
    }

    async fn primary_key(&self, _schema: &str, table: &str) -> SeqResult<Option<String>> {
        Ok(self.primary_keys.get(table).cloned())
    }
}

/// Serves canned dump text per qualified table and records every call.
#[derive(Default)]
pub struct FakeDump {
    pub outputs: BTreeMap<String, String>,
    pub calls: Mutex<Vec<(String, bool)>>,
}

impl FakeDump {
    pub fn with(mut self, table: &str, output: String) -> Self {
        self.outputs.insert(table.to_string(), output);
        self
    }

    pub fn calls(&self) -> Vec<(String, bool)> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

#[async_trait]
impl DumpSource for FakeDump {
    async fn dump(&self, table: &str, schema_only: bool, _cancel: &CancellationToken) -> String {
        self.calls
            .lock()
            .unwrap()
            .push((table.to_string(), schema_only));
        tokio::task::yield_now().await;
        self.outputs.get(table).cloned().unwrap_or_default()
    }
}

/// Dump text for a table with a single-column primary key.
pub fn table_dump(schema: &str, table: &str) -> String {
    format!(
        "--\n-- PostgreSQL database dump\n--\n\
SET statement_timeout = 0;\n\
ALTER TABLE IF EXISTS ONLY {s}.{t} DROP CONSTRAINT IF EXISTS {t}_pkey;\n\
DROP TABLE IF EXISTS {s}.{t};\n\
CREATE TABLE {s}.{t} (\n    id integer NOT NULL\n);\n\
ALTER TABLE ONLY {s}.{t}\n    ADD CONSTRAINT {t}_pkey PRIMARY KEY (id);\n",
        s = schema,
        t = table
    )
}

/// [`table_dump`] plus a foreign key to `target`.
pub fn table_dump_with_fk(schema: &str, table: &str, target: &str) -> String {
    format!(
        "{}ALTER TABLE ONLY {s}.{t}\n    ADD CONSTRAINT {t}_{g}_fkey FOREIGN KEY ({g}_id) REFERENCES {s}.{g}(id);\n",
        table_dump(schema, table),
        s = schema,
        t = table,
        g = target
    )
}

/// Fresh scratch directory under the system temp dir.
pub fn scratch_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "pgseq-{}-{}-{}",
        label,
        std::process::id(),
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn file_names(dir: &std::path::Path) -> BTreeSet<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

/// Engine that keeps its version in memory and walks `steps` like the real one.
pub struct FakeEngine {
    pub steps: Vec<u64>,
    /// `schema_migrations` contents, stored the way `PgMigrator` stores them
    pub row: Mutex<Option<(i64, bool)>>,
    /// Running this version's script, in either direction, fails and leaves it dirty
    pub broken: Option<u64>,
    pub dropped: Mutex<bool>,
}

impl FakeEngine {
    pub fn new(steps: &[u64], version: u64) -> Self {
        Self {
            steps: steps.to_vec(),
            row: Mutex::new(encode_version(version, false).map(|v| (v, false))),
            broken: None,
            dropped: Mutex::new(false),
        }
    }

    pub fn dirty(self) -> Self {
        let (version, _) = self.current();
        self.record(version, true);
        self
    }

    pub fn current(&self) -> (u64, bool) {
        decode_version(*self.row.lock().unwrap())
    }

    pub fn record(&self, version: u64, dirty: bool) {
        *self.row.lock().unwrap() = encode_version(version, dirty).map(|v| (v, dirty));
    }

    fn run(&self, n: i64) -> SeqResult<()> {
        let (version, dirty) = self.current();
        if dirty {
            return Err(SeqError::Dirty { version });
        }
        let moves = plan(&self.steps, version, n)?;
        if moves.is_empty() {
            return Err(SeqError::NoChange);
        }
        for m in moves {
            if Some(m.run) == self.broken {
                self.record(m.to, true);
                return Err(SeqError::Engine(format!("migration {} failed", m.run)));
            }
            self.record(m.to, false);
        }
        Ok(())
    }
}

#[async_trait]
impl MigrationEngine for FakeEngine {
    async fn up(&self) -> SeqResult<()> {
        self.run(i64::MAX)
    }

    async fn down(&self) -> SeqResult<()> {
        self.run(i64::MIN)
    }

    async fn steps(&self, n: i64) -> SeqResult<()> {
        if n == 0 {
            return Err(SeqError::InvalidStep(0));
        }
        self.run(n)
    }

    async fn force(&self, version: u64) -> SeqResult<()> {
        self.record(version, false);
        Ok(())
    }

    async fn version(&self) -> SeqResult<(u64, bool)> {
        Ok(self.current())
    }

    async fn drop(&self) -> SeqResult<()> {
        *self.dropped.lock().unwrap() = true;
        self.record(0, false);
        Ok(())
    }
}
