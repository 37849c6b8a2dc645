//! Catalog metadata queries and table partitioning.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::Connection;
use crate::error::{SeqError, SeqResult};

const QUERY_LIST_TABLES: &str = r#"
SELECT LOWER(table_name)::text AS table_name
FROM information_schema.tables
WHERE table_type = 'BASE TABLE'
    AND table_schema = $1
ORDER BY table_name"#;

const QUERY_COUNT_TABLES: &str = r#"
SELECT COUNT(1) AS total
FROM information_schema.tables
WHERE table_type = 'BASE TABLE'
    AND table_schema = $1"#;

const QUERY_LIST_ENUMS: &str = r#"
SELECT
    pg_catalog.format_type(t.oid, NULL) AS name,
    ARRAY(
        SELECT e.enumlabel::text
        FROM pg_catalog.pg_enum e
        WHERE e.enumtypid = t.oid
        ORDER BY e.enumsortorder
    ) AS labels
FROM pg_catalog.pg_type t
JOIN pg_catalog.pg_namespace n ON n.oid = t.typnamespace
WHERE t.typtype = 'e'
    AND n.nspname = $1
ORDER BY name"#;

const QUERY_LIST_FUNCTIONS: &str = r#"
SELECT
    p.proname::text AS function_name,
    pg_get_functiondef(p.oid) AS function_definition,
    pg_get_function_identity_arguments(p.oid) AS function_arguments
FROM pg_proc p
JOIN pg_namespace n ON n.oid = p.pronamespace
WHERE n.nspname = $1
    AND p.prokind IN ('f', 'p')
ORDER BY p.proname"#;

const QUERY_LIST_VIEWS: &str = r#"
SELECT
    COALESCE(table_name, '')::text AS view_name,
    COALESCE(view_definition, '')::text AS definition
FROM information_schema.views
WHERE table_schema = $1
ORDER BY table_name"#;

const QUERY_LIST_MATERIALIZED_VIEWS: &str = r#"
SELECT
    matviewname::text AS view_name,
    definition AS definition
FROM pg_matviews
WHERE schemaname = $1
ORDER BY matviewname"#;

/// Single-column primary keys only; composite keys return no row.
const QUERY_PRIMARY_KEY: &str = r#"
SELECT a.attname::text
FROM pg_index i
JOIN pg_attribute a
    ON a.attrelid = i.indrelid
    AND a.attnum = ANY(i.indkey)
WHERE i.indrelid = format('%I.%I', $1::text, $2::text)::regclass
    AND i.indisprimary
    AND i.indnatts = 1"#;

/// An enum type with its labels in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumRow {
    pub name: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRow {
    pub name: String,
    pub definition: String,
    /// Identity argument list, as `DROP FUNCTION` expects it
    pub arguments: String,
}

/// A view or materialized view and its query body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRow {
    pub name: String,
    pub definition: String,
}

/// Parameterized catalog lookups.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Base tables in `schema`, lower-cased and ordered by name.
    async fn list_tables(&self, schema: &str) -> SeqResult<Vec<String>>;

    async fn count_tables(&self, schema: &str) -> SeqResult<usize>;

    async fn list_enums(&self, schema: &str) -> SeqResult<Vec<EnumRow>>;

    async fn list_functions(&self, schema: &str) -> SeqResult<Vec<FunctionRow>>;

    async fn list_views(&self, schema: &str) -> SeqResult<Vec<ViewRow>>;

    async fn list_materialized_views(&self, schema: &str) -> SeqResult<Vec<ViewRow>>;

    /// Name of the table's primary key column, when it has exactly one.
    async fn primary_key(&self, schema: &str, table: &str) -> SeqResult<Option<String>>;
}

/// [`Catalog`] backed by a Postgres pool.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a small pool to `conn`.
    pub async fn connect(conn: &Connection) -> SeqResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(conn.connect_options())
            .await
            .map_err(|e| SeqError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn list_tables(&self, schema: &str) -> SeqResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(QUERY_LIST_TABLES)
            .bind(schema)
            .fetch_all(&self.pool)
            .await
            .map_err(SeqError::database)?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn count_tables(&self, schema: &str) -> SeqResult<usize> {
        let (total,): (i64,) = sqlx::query_as(QUERY_COUNT_TABLES)
            .bind(schema)
            .fetch_one(&self.pool)
            .await
            .map_err(SeqError::database)?;

        Ok(total.max(0) as usize)
    }

    async fn list_enums(&self, schema: &str) -> SeqResult<Vec<EnumRow>> {
        let rows: Vec<(String, Vec<String>)> = sqlx::query_as(QUERY_LIST_ENUMS)
            .bind(schema)
            .fetch_all(&self.pool)
            .await
            .map_err(SeqError::database)?;

        Ok(rows
            .into_iter()
            .map(|(name, labels)| EnumRow { name, labels })
            .collect())
    }

    async fn list_functions(&self, schema: &str) -> SeqResult<Vec<FunctionRow>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(QUERY_LIST_FUNCTIONS)
            .bind(schema)
            .fetch_all(&self.pool)
            .await
            .map_err(SeqError::database)?;

        Ok(rows
            .into_iter()
            .map(|(name, definition, arguments)| FunctionRow {
                name,
                definition,
                arguments,
            })
            .collect())
    }

    async fn list_views(&self, schema: &str) -> SeqResult<Vec<ViewRow>> {
        fetch_views(&self.pool, QUERY_LIST_VIEWS, schema).await
    }

    async fn list_materialized_views(&self, schema: &str) -> SeqResult<Vec<ViewRow>> {
        fetch_views(&self.pool, QUERY_LIST_MATERIALIZED_VIEWS, schema).await
    }

    async fn primary_key(&self, schema: &str, table: &str) -> SeqResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(QUERY_PRIMARY_KEY)
            .bind(schema)
            .bind(table)
            .fetch_optional(&self.pool)
            .await
            .map_err(SeqError::database)?;

        Ok(row.map(|(column,)| column))
    }
}

async fn fetch_views(pool: &PgPool, sql: &str, schema: &str) -> SeqResult<Vec<ViewRow>> {
    let rows: Vec<(String, String)> = sqlx::query_as(sql)
        .bind(schema)
        .fetch_all(pool)
        .await
        .map_err(SeqError::database)?;

    Ok(rows
        .into_iter()
        .map(|(name, definition)| ViewRow { name, definition })
        .collect())
}

/// Table listing with exclusion filters applied.
#[derive(Clone)]
pub struct Inspector {
    catalog: Arc<dyn Catalog>,
}

impl Inspector {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Alphabetical base tables of `schema` minus `excludes`.
    pub async fn list_tables(
        &self,
        schema: &str,
        excludes: &BTreeSet<String>,
    ) -> SeqResult<Vec<String>> {
        let mut tables: Vec<String> = self
            .catalog
            .list_tables(schema)
            .await?
            .into_iter()
            .filter(|t| !excludes.contains(t))
            .collect();
        tables.sort();
        Ok(tables)
    }

    /// Base tables in `schema` minus the number of excluded names.
    pub async fn count_tables(&self, schema: &str, num_excluded: usize) -> SeqResult<usize> {
        let total = self.catalog.count_tables(schema).await?;
        Ok(total.saturating_sub(num_excluded))
    }

    /// Filtered tables split into `worker_count` round-robin buckets,
    /// produced on a channel as each bucket is complete.
    pub async fn partition_tables(
        &self,
        schema: &str,
        excludes: &BTreeSet<String>,
        worker_count: usize,
    ) -> SeqResult<Partitions> {
        let tables = self.list_tables(schema, excludes).await?;
        debug!("Partitioning {} tables of {} over {} workers", tables.len(), schema, worker_count);
        Ok(Partitions {
            total: tables.len(),
            buckets: spawn_partitions(tables, worker_count),
        })
    }
}

/// Table buckets on their way to the workers.
#[derive(Debug)]
pub struct Partitions {
    /// Tables across all buckets
    pub total: usize,
    pub buckets: mpsc::Receiver<Vec<String>>,
}

/// Assign `names[i]` to bucket `i % worker_count`. Empty buckets are dropped.
pub fn partition(names: &[String], worker_count: usize) -> Vec<Vec<String>> {
    let worker_count = worker_count.max(1);
    let mut buckets: Vec<Vec<String>> = vec![Vec::new(); worker_count.min(names.len())];

    for (i, name) in names.iter().enumerate() {
        buckets[i % worker_count].push(name.clone());
    }

    buckets
}

/// Emit the buckets of [`partition`] from a producer task.
pub fn spawn_partitions(names: Vec<String>, worker_count: usize) -> mpsc::Receiver<Vec<String>> {
    let (tx, rx) = mpsc::channel(worker_count.max(1));

    tokio::spawn(async move {
        for bucket in partition(&names, worker_count) {
            if tx.send(bucket).await.is_err() {
                break;
            }
        }
    });

    rx
}
