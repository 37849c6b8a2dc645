//! Line rules for sorting `pg_dump` output.
//!
//! Each rule is a `(predicate, category)` pair checked in order; the first
//! match wins. Matching is purely textual: a column called `fk_flag` inside
//! a `DROP` line is enough to send it to the foreign-key bucket.

use std::sync::LazyLock;

use regex::Regex;

pub const ALTER_TABLE: &str = "ALTER TABLE ONLY";
pub const ADD_CONSTRAINT: &str = "ADD CONSTRAINT";
pub const FOREIGN_KEY: &str = "FOREIGN KEY";
pub const INSERT_INTO: &str = "INSERT INTO";
pub const DROP: &str = "DROP";
pub const STATEMENT_END: &str = ");";

static FOREIGN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"fkey|fk|foreign").expect("static regex"));

static REFERENCE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"fkey|fk|foreign|pkey|pk").expect("static regex"));

/// Where a script line ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragment {
    Definition,
    Reference,
    ForeignKey,
    Insert,
}

type Predicate = fn(&str) -> bool;

/// Routing for lines that contain `DROP`.
///
/// Only the constraint name is looked at. A UNIQUE constraint (`*_key`) is
/// added by the primary-key script (see [`CONSTRAINT_RULES`]) but dropped by
/// the table's down script, so that pair is not symmetric.
pub const DROP_RULES: &[(Predicate, Fragment)] = &[
    (is_foreign_name, Fragment::ForeignKey),
    (is_reference_name, Fragment::Reference),
    (always, Fragment::Definition),
];

/// Routing for the second line of an `ALTER TABLE ONLY` / `ADD CONSTRAINT` pair.
pub const CONSTRAINT_RULES: &[(Predicate, Fragment)] = &[
    (is_foreign_constraint, Fragment::ForeignKey),
    (always, Fragment::Reference),
];

fn always(_: &str) -> bool {
    true
}

pub fn is_foreign_name(line: &str) -> bool {
    FOREIGN_NAME.is_match(line)
}

pub fn is_reference_name(line: &str) -> bool {
    REFERENCE_NAME.is_match(line)
}

pub fn is_foreign_constraint(line: &str) -> bool {
    line.contains(FOREIGN_KEY)
}

/// Preamble and noise that never reaches a script. Lines starting with a
/// backslash are psql meta-commands (`\restrict`, `\connect`), not SQL.
pub fn is_skipped(line: &str) -> bool {
    line.is_empty()
        || line.starts_with("--")
        || line.starts_with('\\')
        || line.starts_with("SET ")
        || line.starts_with("SELECT ")
}

pub fn is_drop(line: &str) -> bool {
    line.contains(DROP)
}

pub fn is_insert(line: &str) -> bool {
    line.contains(INSERT_INTO)
}

/// First half of a two-line constraint statement.
pub fn opens_constraint(line: &str, next: Option<&str>) -> bool {
    line.contains(ALTER_TABLE) && next.is_some_and(|n| n.contains(ADD_CONSTRAINT))
}

/// Whether an insert statement is still open after `line`.
pub fn awaits_terminator(line: &str) -> bool {
    !line.ends_with(STATEMENT_END)
}

/// First category whose predicate accepts `line`.
pub fn route(rules: &[(Predicate, Fragment)], line: &str) -> Fragment {
    rules
        .iter()
        .find(|(predicate, _)| predicate(line))
        .map(|(_, fragment)| *fragment)
        .unwrap_or(Fragment::Definition)
}

const IDEMPOTENT_CREATES: &[&str] = &[
    "CREATE TABLE",
    "CREATE SEQUENCE",
    "CREATE UNIQUE INDEX",
    "CREATE INDEX",
];

const IF_NOT_EXISTS: &str = " IF NOT EXISTS";

/// Add `IF NOT EXISTS` to every bare `CREATE TABLE|SEQUENCE|INDEX`.
pub fn secure_creates(script: &str) -> String {
    let mut out = script.to_string();

    for keyword in IDEMPOTENT_CREATES {
        let mut rewritten = String::with_capacity(out.len());
        let mut rest = out.as_str();

        while let Some(pos) = rest.find(keyword) {
            let end = pos + keyword.len();
            rewritten.push_str(&rest[..end]);
            rest = &rest[end..];

            let at_word_end = rest.chars().next().is_none_or(|c| c.is_whitespace());
            if at_word_end && !rest.starts_with(IF_NOT_EXISTS) {
                rewritten.push_str(IF_NOT_EXISTS);
            }
        }

        rewritten.push_str(rest);
        out = rewritten;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_rules() {
        assert_eq!(
            route(DROP_RULES, "ALTER TABLE ONLY public.orders DROP CONSTRAINT orders_pkey;"),
            Fragment::Reference
        );
        assert_eq!(
            route(
                DROP_RULES,
                "ALTER TABLE IF EXISTS ONLY public.orders DROP CONSTRAINT IF EXISTS orders_customer_fkey;"
            ),
            Fragment::ForeignKey
        );
        assert_eq!(
            route(DROP_RULES, "DROP TABLE IF EXISTS public.orders;"),
            Fragment::Definition
        );
    }

    #[test]
    fn test_rule_table_is_textual() {
        // documented fragility: the name alone decides
        assert_eq!(
            route(DROP_RULES, "DROP INDEX IF EXISTS public.orders_fk_flag_idx;"),
            Fragment::ForeignKey
        );
    }

    #[test]
    fn test_constraint_rules() {
        assert_eq!(
            route(
                CONSTRAINT_RULES,
                "    ADD CONSTRAINT orders_customer_fkey FOREIGN KEY (customer_id) REFERENCES customers(id);"
            ),
            Fragment::ForeignKey
        );
        assert_eq!(
            route(CONSTRAINT_RULES, "    ADD CONSTRAINT orders_pkey PRIMARY KEY (id);"),
            Fragment::Reference
        );
    }

    #[test]
    fn test_unique_constraint_adds_with_keys_but_drops_with_table() {
        let add = "    ADD CONSTRAINT orders_code_key UNIQUE (code);";
        let drop = "ALTER TABLE IF EXISTS ONLY public.orders DROP CONSTRAINT IF EXISTS orders_code_key;";
        assert_eq!(route(CONSTRAINT_RULES, add), Fragment::Reference);
        assert_eq!(route(DROP_RULES, drop), Fragment::Definition);
    }

    #[test]
    fn test_skip_and_openers() {
        assert!(is_skipped(""));
        assert!(is_skipped("-- Name: orders"));
        assert!(is_skipped("SET statement_timeout = 0;"));
        assert!(is_skipped("SELECT pg_catalog.set_config('search_path', '', false);"));
        assert!(!is_skipped("CREATE TABLE public.orders ("));
        assert!(is_skipped("\\restrict 6gPqW1cyfEh3xzaT"));
        assert!(is_skipped("\\unrestrict 6gPqW1cyfEh3xzaT"));

        assert!(opens_constraint("ALTER TABLE ONLY public.orders", Some("    ADD CONSTRAINT x")));
        assert!(!opens_constraint("ALTER TABLE ONLY public.orders", None));
        assert!(!opens_constraint(
            "ALTER TABLE ONLY public.orders ALTER COLUMN id SET DEFAULT 1;",
            Some("ALTER TABLE ONLY public.x")
        ));
    }

    #[test]
    fn test_secure_creates() {
        let script = "CREATE TABLE public.a (\n);\nCREATE SEQUENCE public.a_id_seq\nCREATE INDEX a_idx ON public.a USING btree (id);\nCREATE UNIQUE INDEX a_key ON public.a USING btree (k);\n";
        let secured = secure_creates(script);

        assert!(secured.contains("CREATE TABLE IF NOT EXISTS public.a ("));
        assert!(secured.contains("CREATE SEQUENCE IF NOT EXISTS public.a_id_seq"));
        assert!(secured.contains("CREATE INDEX IF NOT EXISTS a_idx"));
        assert!(secured.contains("CREATE UNIQUE INDEX IF NOT EXISTS a_key"));
        assert_eq!(secure_creates(&secured), secured);
    }

    #[test]
    fn test_secure_creates_leaves_other_words_alone() {
        let script = "CREATE TABLESPACE_LIKE_THING x;\n";
        assert_eq!(secure_creates(script), script);
    }
}
