//! Table DDL extraction.
//!
//! `pg_dump` output for a single table is sorted into four script
//! fragments so each can land in its own migration:
//! - definition: the table, its sequences and indexes
//! - reference: primary key and other non-foreign constraints
//! - foreign key: constraints that need other tables to exist first
//! - insert: row data (only for tables dumped with data)

pub mod classify;
pub mod dump;
pub mod rules;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::catalog::Catalog;
use crate::objects::Script;

pub use classify::classify;
pub use dump::{DumpSource, PgDump};

/// Script fragments for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDdl {
    /// Table name with `.` replaced by `_`
    pub name: String,
    pub definition: Script,
    pub reference: Script,
    pub foreign_key: Script,
    pub insert: Option<Script>,
}

impl TableDdl {
    /// Up/down pair for the `table` migration: definition plus any row data.
    pub fn table_script(&self) -> Script {
        match &self.insert {
            Some(insert) => Script {
                up: format!("{}{}", self.definition.up, insert.up),
                down: format!("{}{}", insert.down, self.definition.down),
            },
            None => self.definition.clone(),
        }
    }
}

/// Runs the dump tool and classifies its output.
#[derive(Clone)]
pub struct Extractor {
    dump: Arc<dyn DumpSource>,
    catalog: Arc<dyn Catalog>,
}

impl Extractor {
    pub fn new(dump: Arc<dyn DumpSource>, catalog: Arc<dyn Catalog>) -> Self {
        Self { dump, catalog }
    }

    /// Extract `schema.table`. Never fails: a broken dump or lookup gives
    /// empty fragments for this table only.
    pub async fn extract(
        &self,
        schema: &str,
        table: &str,
        schema_only: bool,
        cancel: &CancellationToken,
    ) -> TableDdl {
        let qualified = format!("{}.{}", schema, table);

        let primary_key = if schema_only {
            None
        } else {
            match self.catalog.primary_key(schema, table).await {
                Ok(pk) => pk,
                Err(e) => {
                    warn!("Primary key lookup failed for {}: {}", qualified, e);
                    None
                }
            }
        };

        let output = self.dump.dump(&qualified, schema_only, cancel).await;
        classify(&output, &qualified, primary_key.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_table_script_folds_rows_into_table_pair() {
        let ddl = TableDdl {
            name: "public_countries".into(),
            definition: Script::new("CREATE TABLE IF NOT EXISTS public.countries ();\n", "DROP TABLE IF EXISTS public.countries;\n"),
            insert: Some(Script::new(
                "INSERT INTO public.countries VALUES ('id');\n",
                "DELETE FROM public.countries WHERE code = 'id';\n",
            )),
            ..Default::default()
        };

        let script = ddl.table_script();
        assert_eq!(
            script.up,
            "CREATE TABLE IF NOT EXISTS public.countries ();\nINSERT INTO public.countries VALUES ('id');\n"
        );
        assert_eq!(
            script.down,
            "DELETE FROM public.countries WHERE code = 'id';\nDROP TABLE IF EXISTS public.countries;\n"
        );
    }
}
