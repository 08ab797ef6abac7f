//! An in-memory reference engine, just complete enough to drive the
//! scenario tests without a real columnar backend.
//!
//! Not a SQL compiler: it recognizes the handful of statement shapes the
//! scenarios exercise (`SELECT $1::int`, `SELECT * FROM t`, `INSERT INTO t
//! VALUES (...)`, transaction control, and a generic DDL fallback) rather
//! than parsing general SQL, since a real compiler is out of scope here.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::engine::{
    ColumnMeta, CompiledStatement, Compiler, Cursor, CursorFactory, CursorStep, DdlOrUpdate,
    InsertOp, ResultMetadata, RowValue, SqlClass, Writer, WriterSource,
};
use crate::errors::EngineError;
use crate::wire::{BindValue, ColumnType, Oid};

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<ColumnMeta>,
    rows: Vec<Vec<RowValue>>,
}

#[derive(Default, Clone)]
pub struct MemoryEngine {
    tables: Rc<RefCell<HashMap<String, Table>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        MemoryEngine::default()
    }

    /// Test/bootstrap helper: create or replace a table with a fixed schema
    /// and row set, used to seed the portal-batching scenario without going
    /// through DDL/INSERT.
    pub fn seed_table(&self, name: &str, columns: Vec<ColumnMeta>, rows: Vec<Vec<RowValue>>) {
        self.tables
            .borrow_mut()
            .insert(name.to_string(), Table { columns, rows });
    }
}

fn bind_to_row_value(v: &BindValue<'_>) -> RowValue {
    match v {
        BindValue::Null => RowValue::Null,
        BindValue::Bool(b) => RowValue::Bool(*b),
        BindValue::Int2(i) => RowValue::Int2(*i),
        BindValue::Int4(i) => RowValue::Int4(*i),
        BindValue::Int8(i) => RowValue::Int8(*i),
        BindValue::Float4(f) => RowValue::Float4(*f),
        BindValue::Float8(f) => RowValue::Float8(*f),
        BindValue::Date(d) => RowValue::Date(*d),
        BindValue::Timestamp(t) => RowValue::Timestamp(*t),
        BindValue::TimestampTz(t) => RowValue::TimestampTz(*t),
        BindValue::Char(c) => RowValue::Char(*c),
        BindValue::Uuid(hi, lo) => RowValue::Uuid(*hi, *lo),
        BindValue::Bytes(b) => RowValue::Bytes(b.to_vec()),
        BindValue::Text(s) => RowValue::Text(s.to_string()),
        BindValue::OwnedText(s) => RowValue::Text(s.clone()),
    }
}

/// Cursor over a cloned row set, used by every factory below. Cloning the
/// rows up front keeps the cursor's lifetime independent of the table lock,
/// so it never depends on state the scheduler might mutate between
/// resumptions.
struct VecCursor {
    rows: Vec<Vec<RowValue>>,
    next: usize,
    current: Vec<RowValue>,
}

impl VecCursor {
    fn new(rows: Vec<Vec<RowValue>>) -> Self {
        VecCursor {
            rows,
            next: 0,
            current: Vec::new(),
        }
    }
}

impl Cursor for VecCursor {
    fn advance(&mut self) -> Result<CursorStep, EngineError> {
        if self.next >= self.rows.len() {
            return Ok(CursorStep::Exhausted);
        }
        self.current = self.rows[self.next].clone();
        self.next += 1;
        Ok(CursorStep::Row)
    }

    fn current_row(&self) -> &[RowValue] {
        &self.current
    }
}

/// `SELECT $1::int` — the scenario-1 literal cast. Returns its single bound
/// parameter back as one INT4 row.
struct CastIntFactory {
    metadata: ResultMetadata,
}

impl CursorFactory for CastIntFactory {
    fn metadata(&self) -> &ResultMetadata {
        &self.metadata
    }

    fn open(&self, params: &[BindValue<'_>]) -> Result<Box<dyn Cursor>, EngineError> {
        let value = match params.first() {
            Some(BindValue::Int4(i)) => RowValue::Int4(*i),
            Some(BindValue::Int2(i)) => RowValue::Int4(*i as i32),
            Some(other) => bind_to_row_value(other),
            None => RowValue::Null,
        };
        Ok(Box::new(VecCursor::new(vec![vec![value]])))
    }

    fn recompile(&self) -> Result<Box<dyn CursorFactory>, EngineError> {
        Ok(Box::new(CastIntFactory {
            metadata: self.metadata.clone(),
        }))
    }
}

/// `SELECT * FROM <table>`, reading a live snapshot of `tables` each time
/// it's opened so `recompile` can observe a schema change.
struct TableScanFactory {
    tables: Rc<RefCell<HashMap<String, Table>>>,
    table_name: String,
    metadata: ResultMetadata,
}

impl CursorFactory for TableScanFactory {
    fn metadata(&self) -> &ResultMetadata {
        &self.metadata
    }

    fn open(&self, _params: &[BindValue<'_>]) -> Result<Box<dyn Cursor>, EngineError> {
        let tables = self.tables.borrow();
        let table = tables
            .get(&self.table_name)
            .ok_or_else(|| EngineError::Sql {
                message: format!("relation {:?} does not exist", self.table_name),
                position: None,
            })?;
        if table.columns.len() != self.metadata.columns.len()
            || table
                .columns
                .iter()
                .zip(self.metadata.columns.iter())
                .any(|(a, b)| a.name != b.name || a.column_type != b.column_type)
        {
            return Err(EngineError::StalePlan);
        }
        Ok(Box::new(VecCursor::new(table.rows.clone())))
    }

    fn recompile(&self) -> Result<Box<dyn CursorFactory>, EngineError> {
        let tables = self.tables.borrow();
        let table = tables
            .get(&self.table_name)
            .ok_or_else(|| EngineError::Sql {
                message: format!("relation {:?} does not exist", self.table_name),
                position: None,
            })?;
        Ok(Box::new(TableScanFactory {
            tables: self.tables.clone(),
            table_name: self.table_name.clone(),
            metadata: ResultMetadata {
                columns: table.columns.clone(),
            },
        }))
    }
}

struct NoopWriter;

impl Writer for NoopWriter {
    fn commit(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), EngineError> {
        Ok(())
    }
}

struct TableInsert {
    tables: Rc<RefCell<HashMap<String, Table>>>,
    table_name: String,
}

impl InsertOp for TableInsert {
    fn execute(&self, _writer: &mut dyn Writer, params: &[BindValue<'_>]) -> Result<u64, EngineError> {
        let row: Vec<RowValue> = params.iter().map(bind_to_row_value).collect();
        let mut tables = self.tables.borrow_mut();
        let table = tables.entry(self.table_name.clone()).or_insert_with(|| Table {
            columns: Vec::new(),
            rows: Vec::new(),
        });
        table.rows.push(row);
        Ok(1)
    }
}

struct NoopDdlOrUpdate {
    affected: u64,
}

impl DdlOrUpdate for NoopDdlOrUpdate {
    fn execute(&self, _params: &[BindValue<'_>]) -> Result<u64, EngineError> {
        Ok(self.affected)
    }
}

/// Every `TableInsert` writes straight into `tables` regardless of the
/// `Writer` handed to it, so commit/rollback is a no-op here; a real
/// columnar backend would stage rows behind this handle instead.
impl WriterSource for MemoryEngine {
    fn writer_for(&self, _table_token: &str) -> Result<Box<dyn Writer>, EngineError> {
        Ok(Box::new(NoopWriter))
    }
}

impl Compiler for MemoryEngine {
    fn compile(&self, sql_text: &str, declared_oids: &[Oid]) -> Result<CompiledStatement, EngineError> {
        let trimmed = sql_text.trim();
        let upper = trimmed.to_ascii_uppercase();

        if trimmed.is_empty() {
            return Ok(empty_statement());
        }
        if upper == "BEGIN" {
            return Ok(control_statement(SqlClass::Begin, "BEGIN"));
        }
        if upper == "COMMIT" {
            return Ok(control_statement(SqlClass::Commit, "COMMIT"));
        }
        if upper == "ROLLBACK" {
            return Ok(control_statement(SqlClass::Rollback, "ROLLBACK"));
        }
        if upper.starts_with("DEALLOCATE") {
            return Ok(CompiledStatement {
                class: SqlClass::Deallocate,
                tag: "DEALLOCATE",
                param_oids: Vec::new(),
                factory: None,
                insert_op: None,
                ddl_or_update: None,
                table_token: None,
                parse_executed: false,
            });
        }
        if upper.starts_with("SELECT") && trimmed.contains("::") {
            return Ok(CompiledStatement {
                class: SqlClass::Select,
                tag: "SELECT",
                param_oids: vec![declared_oids.first().copied().unwrap_or(0)],
                factory: Some(Box::new(CastIntFactory {
                    metadata: ResultMetadata {
                        columns: vec![ColumnMeta {
                            name: "int4".to_string(),
                            column_type: ColumnType::Int4,
                            geo_hash_bit_flag: false,
                        }],
                    },
                })),
                insert_op: None,
                ddl_or_update: None,
                table_token: None,
                parse_executed: false,
            });
        }
        if upper.starts_with("SELECT") && upper.contains("FROM") {
            let table_name = table_name_after(&upper, "FROM")
                .ok_or_else(|| EngineError::Sql {
                    message: "could not determine target relation".to_string(),
                    position: None,
                })?;
            let metadata = {
                let tables = self.tables.borrow();
                let table = tables.get(&table_name).ok_or_else(|| EngineError::Sql {
                    message: format!("relation {table_name:?} does not exist"),
                    position: None,
                })?;
                ResultMetadata {
                    columns: table.columns.clone(),
                }
            };
            return Ok(CompiledStatement {
                class: SqlClass::Select,
                tag: "SELECT",
                param_oids: declared_oids.to_vec(),
                factory: Some(Box::new(TableScanFactory {
                    tables: self.tables.clone(),
                    table_name,
                    metadata,
                })),
                insert_op: None,
                ddl_or_update: None,
                table_token: None,
                parse_executed: false,
            });
        }
        if upper.starts_with("INSERT INTO") {
            let table_name = table_name_after(&upper, "INTO").ok_or_else(|| EngineError::Sql {
                message: "could not determine target relation".to_string(),
                position: None,
            })?;
            return Ok(CompiledStatement {
                class: SqlClass::Insert,
                tag: "INSERT",
                param_oids: declared_oids.to_vec(),
                factory: None,
                insert_op: Some(Box::new(TableInsert {
                    tables: self.tables.clone(),
                    table_name: table_name.clone(),
                })),
                ddl_or_update: None,
                table_token: Some(table_name),
                parse_executed: false,
            });
        }
        if upper.starts_with("UPDATE") {
            let table_name = table_name_after(&upper, "UPDATE");
            return Ok(CompiledStatement {
                class: SqlClass::Update,
                tag: "UPDATE",
                param_oids: declared_oids.to_vec(),
                factory: None,
                insert_op: None,
                ddl_or_update: Some(Box::new(NoopDdlOrUpdate { affected: 0 })),
                table_token: table_name,
                parse_executed: false,
            });
        }

        if upper.starts_with("CREATE TABLE") && upper.contains(" AS SELECT") {
            return Ok(CompiledStatement {
                class: SqlClass::Ctas,
                tag: "SELECT",
                param_oids: Vec::new(),
                factory: None,
                insert_op: None,
                ddl_or_update: Some(Box::new(NoopDdlOrUpdate { affected: 0 })),
                table_token: None,
                parse_executed: true,
            });
        }

        // DDL fallback: CREATE TABLE / ALTER / CREATE USER / etc.
        Ok(CompiledStatement {
            class: SqlClass::Ddl,
            tag: ddl_tag(&upper),
            param_oids: Vec::new(),
            factory: None,
            insert_op: None,
            ddl_or_update: Some(Box::new(NoopDdlOrUpdate { affected: 0 })),
            table_token: None,
            parse_executed: true,
        })
    }
}

fn empty_statement() -> CompiledStatement {
    CompiledStatement {
        class: SqlClass::EmptyQuery,
        tag: "",
        param_oids: Vec::new(),
        factory: None,
        insert_op: None,
        ddl_or_update: None,
        table_token: None,
        parse_executed: false,
    }
}

fn control_statement(class: SqlClass, tag: &'static str) -> CompiledStatement {
    CompiledStatement {
        class,
        tag,
        param_oids: Vec::new(),
        factory: None,
        insert_op: None,
        ddl_or_update: None,
        table_token: None,
        parse_executed: false,
    }
}

fn ddl_tag(upper: &str) -> &'static str {
    if upper.starts_with("CREATE TABLE") {
        "CREATE TABLE"
    } else if upper.starts_with("CREATE USER") {
        "CREATE ROLE"
    } else if upper.starts_with("ALTER USER") {
        "ALTER ROLE"
    } else if upper.starts_with("ALTER") {
        "ALTER TABLE"
    } else {
        "DDL"
    }
}

fn table_name_after(upper: &str, keyword: &str) -> Option<String> {
    let idx = upper.find(keyword)?;
    let rest = upper[idx + keyword.len()..].trim_start();
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cast_int_roundtrip() {
        let engine = MemoryEngine::new();
        let stmt = engine.compile("SELECT $1::int", &[0]).unwrap();
        assert_eq!(stmt.class, SqlClass::Select);
        let factory = stmt.factory.unwrap();
        let mut cursor = factory.open(&[BindValue::Int4(42)]).unwrap();
        assert!(matches!(cursor.advance().unwrap(), CursorStep::Row));
        assert_eq!(cursor.current_row(), &[RowValue::Int4(42)]);
        assert!(matches!(cursor.advance().unwrap(), CursorStep::Exhausted));
    }

    #[test]
    fn insert_then_scan() {
        let engine = MemoryEngine::new();
        engine.seed_table(
            "t",
            vec![
                ColumnMeta {
                    name: "a".into(),
                    column_type: ColumnType::Int4,
                    geo_hash_bit_flag: false,
                },
                ColumnMeta {
                    name: "b".into(),
                    column_type: ColumnType::Int4,
                    geo_hash_bit_flag: false,
                },
            ],
            vec![],
        );
        let insert = engine.compile("INSERT INTO t VALUES ($1,$2)", &[]).unwrap();
        let op = insert.insert_op.unwrap();
        let mut w = NoopWriter;
        op.execute(&mut w, &[BindValue::Int4(1), BindValue::Int4(2)]).unwrap();

        let select = engine.compile("SELECT * FROM t", &[]).unwrap();
        let factory = select.factory.unwrap();
        let mut cursor = factory.open(&[]).unwrap();
        assert!(matches!(cursor.advance().unwrap(), CursorStep::Row));
        assert_eq!(cursor.current_row(), &[RowValue::Int4(1), RowValue::Int4(2)]);
    }

    #[test]
    fn empty_query_is_classified() {
        let engine = MemoryEngine::new();
        let stmt = engine.compile("", &[]).unwrap();
        assert_eq!(stmt.class, SqlClass::EmptyQuery);
    }
}
