//! Schema objects and the DDL synthesized for them from catalog rows.
//!
//! Enums, functions, views and materialized views never go through
//! `pg_dump`: the catalog hands back enough to build both directions here.

use std::fmt;

use crate::catalog::{EnumRow, FunctionRow, ViewRow};

/// Kind tag embedded in migration file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Table,
    PrimaryKey,
    ForeignKeys,
    Enum,
    Function,
    View,
    MaterializedView,
}

impl ObjectKind {
    /// All kinds, longest tag first so prefix matching is unambiguous.
    pub const ALL: [ObjectKind; 7] = [
        ObjectKind::MaterializedView,
        ObjectKind::ForeignKeys,
        ObjectKind::PrimaryKey,
        ObjectKind::Function,
        ObjectKind::Table,
        ObjectKind::Enum,
        ObjectKind::View,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::PrimaryKey => "primary_key",
            ObjectKind::ForeignKeys => "foreign_keys",
            ObjectKind::Enum => "enum",
            ObjectKind::Function => "function",
            ObjectKind::View => "view",
            ObjectKind::MaterializedView => "materialized_view",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// An up/down script pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    pub up: String,
    pub down: String,
}

impl Script {
    pub fn new(up: impl Into<String>, down: impl Into<String>) -> Self {
        Self {
            up: up.into(),
            down: down.into(),
        }
    }
}

/// A named object ready to be written as a migration pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaObject {
    pub kind: ObjectKind,
    pub name: String,
    pub script: Script,
}

impl SchemaObject {
    pub fn new(kind: ObjectKind, name: impl Into<String>, script: Script) -> Self {
        Self {
            kind,
            name: name.into(),
            script,
        }
    }
}

/// Quote a string literal, doubling embedded single quotes.
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Build the idempotent create/drop pair for an enum type.
///
/// The catalog reports the type as `format_type()` renders it, so `name`
/// may or may not carry the schema prefix; the file name uses the bare part.
pub fn enum_object(row: &EnumRow) -> SchemaObject {
    let short = row.name.rsplit('.').next().unwrap_or(&row.name);
    let labels: Vec<String> = row.labels.iter().map(|l| quote_literal(l)).collect();

    let up = format!(
        "DO $$ BEGIN\n    CREATE TYPE {} AS ENUM ({});\nEXCEPTION\n    WHEN duplicate_object THEN null;\nEND $$;\n",
        row.name,
        labels.join(", ")
    );
    let down = format!("DROP TYPE IF EXISTS {};\n", row.name);

    SchemaObject::new(ObjectKind::Enum, short, Script::new(up, down))
}

/// `pg_get_functiondef` already yields a complete `CREATE OR REPLACE`.
pub fn function_object(schema: &str, row: &FunctionRow) -> SchemaObject {
    let mut up = row.definition.trim_end().to_string();
    if !up.ends_with(';') {
        up.push(';');
    }
    up.push('\n');

    let down = format!(
        "DROP FUNCTION IF EXISTS {}.{}({});\n",
        schema, row.name, row.arguments
    );

    SchemaObject::new(ObjectKind::Function, &row.name, Script::new(up, down))
}

/// Strip the trailing terminator a catalog view body usually carries.
/// Catalog view text minus blank leading lines and the trailing `;`.
/// Leading indentation on the first line is kept as Postgres returns it.
fn view_body(definition: &str) -> &str {
    definition
        .trim_start_matches(['\n', '\r'])
        .trim_end()
        .trim_end_matches(';')
        .trim_end()
}

pub fn view_object(schema: &str, row: &ViewRow) -> SchemaObject {
    let up = format!(
        "CREATE OR REPLACE VIEW {}.{} AS\n{};\n",
        schema,
        row.name,
        view_body(&row.definition)
    );
    let down = format!("DROP VIEW IF EXISTS {}.{};\n", schema, row.name);

    SchemaObject::new(ObjectKind::View, &row.name, Script::new(up, down))
}

pub fn materialized_view_object(schema: &str, row: &ViewRow) -> SchemaObject {
    let up = format!(
        "CREATE MATERIALIZED VIEW IF NOT EXISTS {}.{} AS\n{};\n",
        schema,
        row.name,
        view_body(&row.definition)
    );
    let down = format!("DROP MATERIALIZED VIEW IF EXISTS {}.{};\n", schema, row.name);

    SchemaObject::new(ObjectKind::MaterializedView, &row.name, Script::new(up, down))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_enum_quotes_labels_and_strips_schema_from_name() {
        let obj = enum_object(&EnumRow {
            name: "billing.status".into(),
            labels: vec!["open".into(), "won't pay".into()],
        });

        assert_eq!(obj.kind, ObjectKind::Enum);
        assert_eq!(obj.name, "status");
        assert!(obj
            .script
            .up
            .contains("CREATE TYPE billing.status AS ENUM ('open', 'won''t pay');"));
        assert!(obj.script.up.contains("WHEN duplicate_object THEN null;"));
        assert_eq!(obj.script.down, "DROP TYPE IF EXISTS billing.status;\n");
    }

    #[test]
    fn test_function_down_carries_argument_list() {
        let obj = function_object(
            "public",
            &FunctionRow {
                name: "add".into(),
                definition: "CREATE OR REPLACE FUNCTION public.add(a integer, b integer)\n RETURNS integer\n LANGUAGE sql\nAS $function$ select a + b $function$\n".into(),
                arguments: "a integer, b integer".into(),
            },
        );

        assert!(obj.script.up.ends_with("$function$;\n"));
        assert_eq!(
            obj.script.down,
            "DROP FUNCTION IF EXISTS public.add(a integer, b integer);\n"
        );
    }

    #[test]
    fn test_views_are_wrapped_in_create_statements() {
        let row = ViewRow {
            name: "active_users".into(),
            definition: " SELECT users.id\n   FROM users\n  WHERE users.active;".into(),
        };

        let view = view_object("public", &row);
        assert!(view
            .script
            .up
            .starts_with("CREATE OR REPLACE VIEW public.active_users AS\n SELECT"));
        assert!(view.script.up.ends_with("users.active;\n"));
        assert_eq!(view.script.down, "DROP VIEW IF EXISTS public.active_users;\n");

        let mat = materialized_view_object("public", &row);
        assert_eq!(mat.kind, ObjectKind::MaterializedView);
        assert_eq!(
            mat.script.down,
            "DROP MATERIALIZED VIEW IF EXISTS public.active_users;\n"
        );
    }

    #[test]
    fn test_view_body_keeps_first_line_indent() {
        let row = ViewRow {
            name: "open_orders".into(),
            definition: "\n SELECT orders.id\n   FROM orders;  \n".into(),
        };

        assert_eq!(
            view_object("public", &row).script.up,
            "CREATE OR REPLACE VIEW public.open_orders AS\n SELECT orders.id\n   FROM orders;\n"
        );
        assert_eq!(
            materialized_view_object("public", &row).script.up,
            "CREATE MATERIALIZED VIEW IF NOT EXISTS public.open_orders AS\n SELECT orders.id\n   FROM orders;\n"
        );
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(ObjectKind::ForeignKeys.to_string(), "foreign_keys");
        assert_eq!(ObjectKind::MaterializedView.tag(), "materialized_view");
    }
}
