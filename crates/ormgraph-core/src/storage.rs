//! The storage collaborator.
//!
//! The save, merge and load engines never produce SQL text. They hand
//! `(table, column, value)` triples and [`Predicate`] fragments to a
//! [`Storage`] implementation, which may be a real database driver or the
//! bundled [`MemoryStorage`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::Result;
use crate::error::{StorageError, StorageErrorKind};
use crate::row::Row;
use crate::value::Value;

// ============================================================================
// Predicates and statements
// ============================================================================

/// A row filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Every row.
    All,
    /// `column = value`
    Eq(String, Value),
    /// `column IN (values...)`
    In(String, Vec<Value>),
    /// Conjunction of predicates.
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(column.into(), value.into())
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Predicate::In(column.into(), values)
    }

    pub fn and(parts: Vec<Predicate>) -> Self {
        Predicate::And(parts)
    }

    /// Does `row` satisfy this predicate?
    ///
    /// Integer columns compare equal across widths; NULL never matches.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Eq(column, value) => row
                .get_by_name(column)
                .is_some_and(|v| !v.is_null() && v.same_as(value)),
            Predicate::In(column, values) => row
                .get_by_name(column)
                .is_some_and(|v| !v.is_null() && values.iter().any(|x| v.same_as(x))),
            Predicate::And(parts) => parts.iter().all(|p| p.matches(row)),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::All => write!(f, "TRUE"),
            Predicate::Eq(column, value) => write!(f, "{column} = {value}"),
            Predicate::In(column, values) => {
                write!(f, "{column} IN (")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
            Predicate::And(parts) => {
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "{p}")?;
                }
                Ok(())
            }
        }
    }
}

/// A write, as handed to [`Storage::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Insert {
        table: String,
        values: Vec<(String, Value)>,
    },
    Update {
        table: String,
        set: Vec<(String, Value)>,
        filter: Predicate,
    },
    Delete {
        table: String,
        filter: Predicate,
    },
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. } => table,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Statement::Insert { .. })
    }

    pub fn is_update(&self) -> bool {
        matches!(self, Statement::Update { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Statement::Delete { .. })
    }
}

fn write_pairs(f: &mut fmt::Formatter<'_>, pairs: &[(String, Value)]) -> fmt::Result {
    for (i, (column, value)) in pairs.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{column} = {value}")?;
    }
    Ok(())
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Insert { table, values } => {
                write!(f, "INSERT {table} SET ")?;
                write_pairs(f, values)
            }
            Statement::Update { table, set, filter } => {
                write!(f, "UPDATE {table} SET ")?;
                write_pairs(f, set)?;
                write!(f, " WHERE {filter}")
            }
            Statement::Delete { table, filter } => write!(f, "DELETE {table} WHERE {filter}"),
        }
    }
}

// ============================================================================
// Storage trait
// ============================================================================

/// Narrow, synchronous query capability consumed by the engines.
///
/// Identifiers passed in are already canonical table and column names.
/// Every call is a suspension point: errors propagate unchanged through
/// the recursive save, merge and load call stacks.
pub trait Storage {
    /// Rows of `table` matching `filter`.
    #[allow(clippy::result_large_err)]
    fn select_rows(&self, table: &str, filter: &Predicate) -> Result<Vec<Row>>;

    /// Insert a row and return its newly allocated `id`.
    #[allow(clippy::result_large_err)]
    fn insert(&self, table: &str, values: &[(String, Value)]) -> Result<i64>;

    /// Update matching rows; returns the affected-row count.
    #[allow(clippy::result_large_err)]
    fn update(&self, table: &str, set: &[(String, Value)], filter: &Predicate) -> Result<u64>;

    /// Delete matching rows; returns the affected-row count.
    #[allow(clippy::result_large_err)]
    fn delete(&self, table: &str, filter: &Predicate) -> Result<u64>;

    /// Number of matching rows.
    #[allow(clippy::result_large_err)]
    fn select_scalar(&self, table: &str, filter: &Predicate) -> Result<Value> {
        let count = self.select_rows(table, filter)?.len();
        Ok(Value::BigInt(i64::try_from(count).unwrap_or(i64::MAX)))
    }

    /// Run a statement; returns the affected-row count.
    #[allow(clippy::result_large_err)]
    fn execute(&self, statement: &Statement) -> Result<u64> {
        match statement {
            Statement::Insert { table, values } => self.insert(table, values).map(|_| 1),
            Statement::Update { table, set, filter } => self.update(table, set, filter),
            Statement::Delete { table, filter } => self.delete(table, filter),
        }
    }
}

impl<S: Storage + ?Sized> Storage for &S {
    fn select_rows(&self, table: &str, filter: &Predicate) -> Result<Vec<Row>> {
        (**self).select_rows(table, filter)
    }

    fn insert(&self, table: &str, values: &[(String, Value)]) -> Result<i64> {
        (**self).insert(table, values)
    }

    fn update(&self, table: &str, set: &[(String, Value)], filter: &Predicate) -> Result<u64> {
        (**self).update(table, set, filter)
    }

    fn delete(&self, table: &str, filter: &Predicate) -> Result<u64> {
        (**self).delete(table, filter)
    }
}

// ============================================================================
// In-memory storage
// ============================================================================

#[derive(Debug, Default)]
struct Table {
    rows: Vec<BTreeMap<String, Value>>,
    next_id: i64,
}

/// Ordered in-memory tables with auto-increment primary keys.
///
/// Tables spring into existence on first insert. The key column is `id`
/// unless registered with [`MemoryStorage::with_primary_key`]. Every executed write is
/// recorded in a statement log, and every read bumps a counter, so tests
/// can assert exactly what a save or load did.
///
/// # Example
///
/// ```ignore
/// let storage = MemoryStorage::new().with_unique("users", "email");
/// let id = storage.insert("users", &[("email".into(), Value::from("a@b"))])?;
/// assert_eq!(id, 1);
/// assert_eq!(storage.statements().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RefCell<BTreeMap<String, Table>>,
    unique: BTreeSet<(String, String)>,
    primary_keys: BTreeMap<String, String>,
    log: RefCell<Vec<Statement>>,
    reads: Cell<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enforce uniqueness of `column` within `table`.
    #[must_use]
    pub fn with_unique(mut self, table: &str, column: &str) -> Self {
        self.unique.insert((table.to_string(), column.to_string()));
        self
    }

    /// Store the auto-increment key of `table` in `column` instead of `id`.
    #[must_use]
    pub fn with_primary_key(mut self, table: &str, column: &str) -> Self {
        self.primary_keys.insert(table.to_string(), column.to_string());
        self
    }

    fn key_column(&self, table: &str) -> &str {
        self.primary_keys.get(table).map_or("id", String::as_str)
    }

    /// Every write executed so far, oldest first.
    pub fn statements(&self) -> Vec<Statement> {
        self.log.borrow().clone()
    }

    pub fn clear_log(&self) {
        self.log.borrow_mut().clear();
        self.reads.set(0);
    }

    /// Number of `select_rows` calls so far.
    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    /// Rows currently stored in `table`, in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .borrow()
            .get(table)
            .map(|t| t.rows.iter().map(to_row).collect())
            .unwrap_or_default()
    }

    fn check_unique(
        &self,
        table_name: &str,
        table: &Table,
        candidate: &BTreeMap<String, Value>,
        skip: Option<usize>,
    ) -> Result<()> {
        for (t, column) in &self.unique {
            if t != table_name {
                continue;
            }
            let Some(value) = candidate.get(column).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = table.rows.iter().enumerate().any(|(i, row)| {
                Some(i) != skip && row.get(column).is_some_and(|other| other.same_as(value))
            });
            if clash {
                return Err(StorageError::new(
                    StorageErrorKind::Constraint,
                    table_name,
                    format!("duplicate value {value} for unique column '{column}'"),
                )
                .into());
            }
        }
        Ok(())
    }

    fn record(&self, statement: Statement) {
        tracing::trace!(statement = %statement, "MemoryStorage write");
        self.log.borrow_mut().push(statement);
    }
}

fn to_row(map: &BTreeMap<String, Value>) -> Row {
    Row::from_pairs(map.iter().map(|(k, v)| (k.as_str(), v.clone())))
}

impl Storage for MemoryStorage {
    fn select_rows(&self, table: &str, filter: &Predicate) -> Result<Vec<Row>> {
        self.reads.set(self.reads.get() + 1);
        let tables = self.tables.borrow();
        let rows = tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .map(to_row)
                    .filter(|row| filter.matches(row))
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    fn insert(&self, table: &str, values: &[(String, Value)]) -> Result<i64> {
        let id = {
            let mut tables = self.tables.borrow_mut();
            let entry = tables.entry(table.to_string()).or_default();

            let key = self.key_column(table);
            let mut row: BTreeMap<String, Value> = values.iter().cloned().collect();
            let id = match row.get(key).and_then(Value::as_key) {
                Some(explicit) => explicit,
                None => entry.next_id + 1,
            };
            if entry
                .rows
                .iter()
                .any(|r| r.get(key).and_then(Value::as_key) == Some(id))
            {
                return Err(StorageError::new(
                    StorageErrorKind::Constraint,
                    table,
                    format!("duplicate primary key {id}"),
                )
                .into());
            }
            row.insert(key.to_string(), Value::BigInt(id));
            self.check_unique(table, entry, &row, None)?;

            entry.next_id = entry.next_id.max(id);
            entry.rows.push(row);
            id
        };
        self.record(Statement::Insert {
            table: table.to_string(),
            values: values.to_vec(),
        });
        Ok(id)
    }

    fn update(&self, table: &str, set: &[(String, Value)], filter: &Predicate) -> Result<u64> {
        let affected = {
            let mut tables = self.tables.borrow_mut();
            match tables.get_mut(table) {
                Some(entry) => {
                    let targets: Vec<usize> = entry
                        .rows
                        .iter()
                        .enumerate()
                        .filter(|(_, r)| filter.matches(&to_row(r)))
                        .map(|(i, _)| i)
                        .collect();

                    for &i in &targets {
                        let mut updated = entry.rows[i].clone();
                        for (column, value) in set {
                            updated.insert(column.clone(), value.clone());
                        }
                        self.check_unique(table, entry, &updated, Some(i))?;
                        entry.rows[i] = updated;
                    }
                    targets.len() as u64
                }
                None => 0,
            }
        };
        self.record(Statement::Update {
            table: table.to_string(),
            set: set.to_vec(),
            filter: filter.clone(),
        });
        Ok(affected)
    }

    fn delete(&self, table: &str, filter: &Predicate) -> Result<u64> {
        let affected = {
            let mut tables = self.tables.borrow_mut();
            match tables.get_mut(table) {
                Some(entry) => {
                    let before = entry.rows.len();
                    entry.rows.retain(|r| !filter.matches(&to_row(r)));
                    (before - entry.rows.len()) as u64
                }
                None => 0,
            }
        };
        self.record(Statement::Delete {
            table: table.to_string(),
            filter: filter.clone(),
        });
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, Value)]) -> Vec<(String, Value)> {
        items
            .iter()
            .map(|(c, v)| ((*c).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn insert_allocates_ids() {
        let s = MemoryStorage::new();
        assert_eq!(s.insert("users", &pairs(&[("name", "a".into())])).unwrap(), 1);
        assert_eq!(s.insert("users", &pairs(&[("name", "b".into())])).unwrap(), 2);
        assert_eq!(s.insert("cars", &[]).unwrap(), 1);
        assert_eq!(s.rows("users").len(), 2);
        assert_eq!(s.statements().len(), 3);
    }

    #[test]
    fn registered_key_column_is_allocated() {
        let s = MemoryStorage::new().with_primary_key("tickets", "number");
        assert_eq!(s.insert("tickets", &pairs(&[("title", "a".into())])).unwrap(), 1);
        assert_eq!(s.insert("tickets", &pairs(&[("number", 7_i64.into())])).unwrap(), 7);
        assert!(s.insert("tickets", &pairs(&[("number", 7_i64.into())])).is_err());

        let rows = s.rows("tickets");
        assert_eq!(rows[0].get_by_name("number"), Some(&Value::BigInt(1)));
        assert_eq!(rows[0].get_by_name("id"), None);
        assert_eq!(s.insert("tickets", &[]).unwrap(), 8);
    }

    #[test]
    fn predicates_compare_across_widths() {
        let row = Row::from_pairs([("id", Value::BigInt(3)), ("owner_id", Value::Null)]);
        assert!(Predicate::eq("id", Value::Int(3)).matches(&row));
        assert!(!Predicate::eq("owner_id", Value::Null).matches(&row));
        assert!(Predicate::is_in("id", vec![Value::from(1_i64), Value::from(3_i64)]).matches(&row));
        assert!(
            !Predicate::and(vec![Predicate::eq("id", 3_i64), Predicate::eq("missing", 1_i64)])
                .matches(&row)
        );
    }

    #[test]
    fn update_and_delete_count_rows() {
        let s = MemoryStorage::new();
        for owner in [1_i64, 1, 2] {
            s.insert("cars", &pairs(&[("owner_id", owner.into())])).unwrap();
        }
        let n = s
            .update(
                "cars",
                &pairs(&[("owner_id", Value::Null)]),
                &Predicate::eq("owner_id", 1_i64),
            )
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(s.select_scalar("cars", &Predicate::eq("owner_id", 2_i64)).unwrap(), Value::BigInt(1));
        assert_eq!(s.delete("cars", &Predicate::All).unwrap(), 3);
        assert_eq!(s.delete("ghosts", &Predicate::All).unwrap(), 0);
    }

    #[test]
    fn unique_columns_reject_duplicates() {
        let s = MemoryStorage::new().with_unique("users", "email");
        s.insert("users", &pairs(&[("email", "a@x".into())])).unwrap();
        let err = s
            .insert("users", &pairs(&[("email", "a@x".into())]))
            .unwrap_err();
        assert!(err.is_constraint_violation());
        assert_eq!(s.rows("users").len(), 1);
        // Failed writes are not logged.
        assert_eq!(s.statements().len(), 1);
    }

    #[test]
    fn reads_are_counted() {
        let s = MemoryStorage::new();
        s.select_rows("users", &Predicate::All).unwrap();
        s.select_rows("users", &Predicate::All).unwrap();
        assert_eq!(s.reads(), 2);
        s.clear_log();
        assert_eq!(s.reads(), 0);
    }

    #[test]
    fn execute_dispatches() {
        let s = MemoryStorage::new();
        let insert = Statement::Insert {
            table: "tags".into(),
            values: pairs(&[("name", "x".into())]),
        };
        assert_eq!(s.execute(&insert).unwrap(), 1);
        assert_eq!(insert.to_string(), "INSERT tags SET name = 'x'");
        let delete = Statement::Delete {
            table: "tags".into(),
            filter: Predicate::eq("id", 1_i64),
        };
        assert_eq!(delete.to_string(), "DELETE tags WHERE id = 1");
        assert_eq!(s.execute(&delete).unwrap(), 1);
    }
}
