//! # pgseq: ordered migrations from a live Postgres schema
//!
//! Reads a running database and writes a numbered sequence of up/down SQL
//! files that rebuilds it from nothing, then applies and compares that
//! sequence across databases.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use pgseq::prelude::*;
//!
//! let config = Config::load("pgseq.yaml".as_ref())?;
//! let conn = config.connection(&config.migration.source)?;
//! let catalog = Arc::new(PgCatalog::connect(conn).await?);
//! let dump = Arc::new(PgDump::new("pg_dump", conn.clone()));
//!
//! let report = Generator::from_config(&config, catalog, dump)?
//!     .run("public", &CancellationToken::new())
//!     .await?;
//! ```
//!
//! ## File order
//!
//! | Phase              | Kind tag            |
//! |--------------------|---------------------|
//! | enums              | `enum`              |
//! | tables             | `table`             |
//! | primary keys       | `primary_key`       |
//! | foreign keys       | `foreign_keys`      |
//! | functions          | `function`          |
//! | views              | `view`              |
//! | materialized views | `materialized_view` |

pub mod catalog;
pub mod commands;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod generate;
pub mod layout;
pub mod objects;
pub mod reconcile;
pub mod version;

pub mod prelude {
    pub use crate::catalog::{Catalog, Inspector, PgCatalog};
    pub use crate::config::{Config, Connection, ExclusionConfig, WritePolicy};
    pub use crate::engine::{EngineState, MigrationEngine, PgMigrator};
    pub use crate::error::*;
    pub use crate::extract::{DumpSource, Extractor, PgDump, TableDdl};
    pub use crate::generate::{GenerateReport, Generator};
    pub use crate::layout::{Direction, MigrationFile};
    pub use crate::objects::{ObjectKind, Script};
    pub use crate::reconcile::{StepDistance, reconcile};
    pub use std::sync::Arc;
    pub use tokio_util::sync::CancellationToken;
}
