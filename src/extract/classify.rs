//! Single forward pass over `pg_dump` output with one line of lookahead.

use super::TableDdl;
use super::rules::{
    self, CONSTRAINT_RULES, DROP_RULES, Fragment, awaits_terminator, is_drop, is_insert,
    is_skipped, opens_constraint, secure_creates,
};
use crate::objects::Script;

#[derive(Default)]
struct Buckets {
    definition: Script,
    reference: Script,
    foreign_key: Script,
    insert: Script,
}

impl Buckets {
    fn up(&mut self, fragment: Fragment) -> &mut String {
        match fragment {
            Fragment::Definition => &mut self.definition.up,
            Fragment::Reference => &mut self.reference.up,
            Fragment::ForeignKey => &mut self.foreign_key.up,
            Fragment::Insert => &mut self.insert.up,
        }
    }

    fn down(&mut self, fragment: Fragment) -> &mut String {
        match fragment {
            Fragment::Definition => &mut self.definition.down,
            Fragment::Reference => &mut self.reference.down,
            Fragment::ForeignKey => &mut self.foreign_key.down,
            Fragment::Insert => &mut self.insert.down,
        }
    }
}

fn push_line(buf: &mut String, line: &str) {
    buf.push_str(line);
    buf.push('\n');
}

/// Sort dump output for `table` (schema-qualified) into script fragments.
///
/// With `primary_key` set, every captured row also gets a
/// `DELETE ... WHERE <pk> = <first value>` in the insert down-script.
pub fn classify(output: &str, table: &str, primary_key: Option<&str>) -> TableDdl {
    let lines: Vec<&str> = output.lines().collect();
    let mut buckets = Buckets::default();
    let mut saw_insert = false;
    let mut consumed = false;
    // statement text while an INSERT spans several lines
    let mut open_insert: Option<String> = None;

    for (n, line) in lines.iter().copied().enumerate() {
        if consumed {
            consumed = false;
            continue;
        }

        if let Some(mut statement) = open_insert.take() {
            push_line(buckets.up(Fragment::Insert), line);
            statement.push('\n');
            statement.push_str(line);

            if awaits_terminator(line) {
                open_insert = Some(statement);
            } else {
                close_insert(&mut buckets, &statement, table, primary_key);
            }
            continue;
        }

        if is_skipped(line) {
            continue;
        }

        if is_drop(line) {
            push_line(buckets.down(rules::route(DROP_RULES, line)), line);
            continue;
        }

        let next = lines.get(n + 1).copied();
        if opens_constraint(line, next) {
            let next = next.unwrap_or_default();
            let target = buckets.up(rules::route(CONSTRAINT_RULES, next));
            push_line(target, line);
            push_line(target, next);
            consumed = true;
            continue;
        }

        if is_insert(line) {
            saw_insert = true;
            push_line(buckets.up(Fragment::Insert), line);

            if awaits_terminator(line) {
                open_insert = Some(line.to_string());
            } else {
                close_insert(&mut buckets, line, table, primary_key);
            }
            continue;
        }

        push_line(buckets.up(Fragment::Definition), line);
    }

    if let Some(statement) = open_insert {
        // truncated dump: keep the row, there is no terminator to wait for
        close_insert(&mut buckets, &statement, table, primary_key);
    }

    let Buckets {
        mut definition,
        reference,
        foreign_key,
        insert,
    } = buckets;
    definition.up = secure_creates(&definition.up);

    TableDdl {
        name: table.replace('.', "_"),
        definition,
        reference,
        foreign_key,
        insert: saw_insert.then_some(insert),
    }
}

fn close_insert(buckets: &mut Buckets, statement: &str, table: &str, primary_key: Option<&str>) {
    let Some(pk) = primary_key else {
        return;
    };

    if let Some(value) = first_value(statement) {
        let delete = format!("DELETE FROM {} WHERE {} = {};", table, pk, value);
        push_line(buckets.down(Fragment::Insert), &delete);
    }
}

/// First top-level value after `VALUES (`, quotes and nesting respected.
pub fn first_value(statement: &str) -> Option<&str> {
    const MARKER: &str = "VALUES (";

    let start = statement.find(MARKER)? + MARKER.len();
    let rest = &statement[start..];
    let mut in_quote = false;
    let mut depth = 0usize;

    for (i, c) in rest.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote && depth > 0 => depth -= 1,
            ',' | ')' if !in_quote && depth == 0 => {
                let value = rest[..i].trim();
                return (!value.is_empty()).then_some(value);
            }
            _ => {}
        }
    }

    None
}
