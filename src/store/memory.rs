//! In-process store backend.
//!
//! Holds tables in memory and evaluates the statement shapes the pipeline
//! emits (CREATE TABLE, DELETE with timestamp predicates, SELECT with
//! bounds/order/limit). Used by the default binary and the test suite; a
//! production deployment points the pipeline at a wire-client `Store`
//! implementation instead.

use dashmap::DashMap;
use sqlparser::ast::{
    BinaryOperator, Expr, ObjectName, OrderByExpr, SelectItem, SetExpr, Statement,
    TableFactor, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use super::{QueryRow, StoreError, StoreRow};
use crate::data::Value;

#[derive(Debug, Clone)]
struct MemTable {
    columns: Vec<String>,
    rows: Vec<StoreRow>,
}

/// In-memory [`Store`](super::Store) implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: DashMap<String, MemTable>,
    fail_inserts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent inserts fail, for exercising retry paths.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, AtomicOrdering::SeqCst);
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|e| e.key().clone()).collect()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    fn parse_one(stmt: &str) -> Result<Statement, StoreError> {
        let dialect = GenericDialect {};
        let mut statements = Parser::parse_sql(&dialect, stmt)
            .map_err(|e| StoreError::Statement(e.to_string()))?;
        if statements.len() != 1 {
            return Err(StoreError::Statement(
                "expected exactly one statement".to_string(),
            ));
        }
        Ok(statements.remove(0))
    }
}

impl super::Store for MemoryStore {
    async fn execute(&self, stmt: &str) -> Result<(), StoreError> {
        match Self::parse_one(stmt)? {
            Statement::CreateTable {
                if_not_exists,
                name,
                columns,
                ..
            } => {
                let table = object_name(&name);
                if self.tables.contains_key(&table) {
                    if if_not_exists {
                        return Ok(());
                    }
                    return Err(StoreError::Statement(format!(
                        "table '{}' already exists",
                        table
                    )));
                }
                let columns = columns.iter().map(|c| c.name.value.clone()).collect();
                self.tables.insert(
                    table,
                    MemTable {
                        columns,
                        rows: Vec::new(),
                    },
                );
                Ok(())
            }
            Statement::Delete {
                from, selection, ..
            } => {
                let table = delete_table(&from)?;
                let mut entry = self
                    .tables
                    .get_mut(&table)
                    .ok_or_else(|| StoreError::UnknownTable(table.clone()))?;
                let pred = match &selection {
                    Some(expr) => compile_predicate(expr, &[], &mut 0)?,
                    None => Pred::True,
                };
                let columns = entry.columns.clone();
                entry.rows.retain(|row| !pred.eval(&columns, row));
                Ok(())
            }
            other => Err(StoreError::Statement(format!(
                "unsupported statement: {}",
                other
            ))),
        }
    }

    async fn insert(&self, table: &str, rows: &[StoreRow]) -> Result<(), StoreError> {
        if self.fail_inserts.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Rejected("injected insert failure".to_string()));
        }
        let mut entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        for row in rows {
            if row.len() != entry.columns.len() {
                return Err(StoreError::Rejected(format!(
                    "row arity {} does not match table '{}' ({} columns)",
                    row.len(),
                    table,
                    entry.columns.len()
                )));
            }
            entry.rows.push(row.clone());
        }
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<QueryRow>, StoreError> {
        let query = match Self::parse_one(sql)? {
            Statement::Query(q) => q,
            other => {
                return Err(StoreError::Statement(format!(
                    "expected a query, got: {}",
                    other
                )))
            }
        };
        let select = match &*query.body {
            SetExpr::Select(s) => s,
            _ => return Err(StoreError::Statement("unsupported query form".to_string())),
        };

        let table = select_table(&select.from)?;
        let entry = self
            .tables
            .get(&table)
            .ok_or_else(|| StoreError::UnknownTable(table.clone()))?;
        let columns = entry.columns.clone();

        let mut placeholder = 0usize;
        let pred = match &select.selection {
            Some(expr) => compile_predicate(expr, params, &mut placeholder)?,
            None => Pred::True,
        };

        let projection = compile_projection(&select.projection, &columns)?;

        let mut rows: Vec<StoreRow> = entry
            .rows
            .iter()
            .filter(|row| pred.eval(&columns, row))
            .cloned()
            .collect();
        drop(entry);

        apply_order(&mut rows, &columns, &query.order_by)?;

        if let Some(limit) = parse_limit(&query.limit)? {
            rows.truncate(limit);
        }

        Ok(rows
            .into_iter()
            .map(|row| projection.iter().map(|&i| row[i].clone()).collect())
            .collect())
    }
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|i| i.value.clone())
        .collect::<Vec<_>>()
        .join(".")
}

fn delete_table(from: &[sqlparser::ast::TableWithJoins]) -> Result<String, StoreError> {
    match from.first().map(|t| &t.relation) {
        Some(TableFactor::Table { name, .. }) => Ok(object_name(name)),
        _ => Err(StoreError::Statement("DELETE needs a table".to_string())),
    }
}

fn select_table(from: &[sqlparser::ast::TableWithJoins]) -> Result<String, StoreError> {
    if from.len() != 1 || !from[0].joins.is_empty() {
        return Err(StoreError::Statement(
            "only single-table queries are supported".to_string(),
        ));
    }
    match &from[0].relation {
        TableFactor::Table { name, .. } => Ok(object_name(name)),
        _ => Err(StoreError::Statement("unsupported table factor".to_string())),
    }
}

fn compile_projection(
    items: &[SelectItem],
    columns: &[String],
) -> Result<Vec<usize>, StoreError> {
    let mut indices = Vec::with_capacity(items.len());
    for item in items {
        match item {
            SelectItem::UnnamedExpr(Expr::Identifier(ident)) => {
                let idx = columns
                    .iter()
                    .position(|c| c == &ident.value)
                    .ok_or_else(|| {
                        StoreError::Statement(format!("unknown column '{}'", ident.value))
                    })?;
                indices.push(idx);
            }
            SelectItem::Wildcard(_) => {
                indices.extend(0..columns.len());
            }
            other => {
                return Err(StoreError::Statement(format!(
                    "unsupported projection: {:?}",
                    other
                )))
            }
        }
    }
    Ok(indices)
}

#[derive(Debug, Clone, Copy)]
enum CmpOp {
    Eq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug)]
enum Pred {
    True,
    And(Box<Pred>, Box<Pred>),
    Cmp {
        column: String,
        op: CmpOp,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
}

impl Pred {
    fn eval(&self, columns: &[String], row: &[Value]) -> bool {
        match self {
            Pred::True => true,
            Pred::And(a, b) => a.eval(columns, row) && b.eval(columns, row),
            Pred::Cmp { column, op, value } => {
                let Some(actual) = column_value(columns, row, column) else {
                    return false;
                };
                match compare_values(actual, value) {
                    Some(ordering) => match op {
                        CmpOp::Eq => ordering == Ordering::Equal,
                        CmpOp::Lt => ordering == Ordering::Less,
                        CmpOp::LtEq => ordering != Ordering::Greater,
                        CmpOp::Gt => ordering == Ordering::Greater,
                        CmpOp::GtEq => ordering != Ordering::Less,
                    },
                    None => false,
                }
            }
            Pred::In { column, values } => {
                let Some(actual) = column_value(columns, row, column) else {
                    return false;
                };
                values
                    .iter()
                    .any(|v| compare_values(actual, v) == Some(Ordering::Equal))
            }
        }
    }
}

fn column_value<'a>(columns: &[String], row: &'a [Value], name: &str) -> Option<&'a Value> {
    columns.iter().position(|c| c == name).and_then(|i| row.get(i))
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn compile_predicate(
    expr: &Expr,
    params: &[Value],
    placeholder: &mut usize,
) -> Result<Pred, StoreError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => {
                let a = compile_predicate(left, params, placeholder)?;
                let b = compile_predicate(right, params, placeholder)?;
                Ok(Pred::And(Box::new(a), Box::new(b)))
            }
            BinaryOperator::Eq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq => {
                let column = column_name(left)?;
                let value = literal(right, params, placeholder)?;
                let op = match op {
                    BinaryOperator::Eq => CmpOp::Eq,
                    BinaryOperator::Lt => CmpOp::Lt,
                    BinaryOperator::LtEq => CmpOp::LtEq,
                    BinaryOperator::Gt => CmpOp::Gt,
                    BinaryOperator::GtEq => CmpOp::GtEq,
                    _ => unreachable!(),
                };
                Ok(Pred::Cmp { column, op, value })
            }
            other => Err(StoreError::Statement(format!(
                "unsupported operator: {:?}",
                other
            ))),
        },
        Expr::InList {
            expr,
            list,
            negated: false,
        } => {
            let column = column_name(expr)?;
            let values = list
                .iter()
                .map(|e| literal(e, params, placeholder))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Pred::In { column, values })
        }
        Expr::Nested(inner) => compile_predicate(inner, params, placeholder),
        other => Err(StoreError::Statement(format!(
            "unsupported predicate: {:?}",
            other
        ))),
    }
}

fn column_name(expr: &Expr) -> Result<String, StoreError> {
    match expr {
        Expr::Identifier(ident) => Ok(ident.value.clone()),
        other => Err(StoreError::Statement(format!(
            "expected a column name, got {:?}",
            other
        ))),
    }
}

fn literal(expr: &Expr, params: &[Value], placeholder: &mut usize) -> Result<Value, StoreError> {
    match expr {
        Expr::Value(SqlValue::Placeholder(_)) => {
            let value = params.get(*placeholder).cloned().ok_or_else(|| {
                StoreError::Statement("not enough bound parameters".to_string())
            })?;
            *placeholder += 1;
            Ok(value)
        }
        Expr::Value(SqlValue::Number(n, _)) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Value::Timestamp(i))
            } else {
                n.parse::<f64>()
                    .map(Value::Number)
                    .map_err(|_| StoreError::Statement(format!("invalid number '{}'", n)))
            }
        }
        Expr::Value(SqlValue::SingleQuotedString(s)) => Ok(Value::String(s.clone())),
        Expr::Value(SqlValue::Boolean(b)) => Ok(Value::Bool(*b)),
        Expr::Value(SqlValue::Null) => Ok(Value::Null),
        Expr::UnaryOp {
            op: sqlparser::ast::UnaryOperator::Minus,
            expr,
        } => match literal(expr, params, placeholder)? {
            Value::Timestamp(i) => Ok(Value::Timestamp(-i)),
            Value::Number(f) => Ok(Value::Number(-f)),
            other => Err(StoreError::Statement(format!(
                "cannot negate {:?}",
                other
            ))),
        },
        other => Err(StoreError::Statement(format!(
            "expected a literal, got {:?}",
            other
        ))),
    }
}

fn apply_order(
    rows: &mut [StoreRow],
    columns: &[String],
    order_by: &[OrderByExpr],
) -> Result<(), StoreError> {
    let Some(order) = order_by.first() else {
        return Ok(());
    };
    let column = column_name(&order.expr)?;
    let idx = columns
        .iter()
        .position(|c| c == &column)
        .ok_or_else(|| StoreError::Statement(format!("unknown column '{}'", column)))?;
    let descending = order.asc == Some(false);

    rows.sort_by(|a, b| {
        let ordering = compare_values(&a[idx], &b[idx]).unwrap_or(Ordering::Equal);
        if descending {
            ordering.reverse()
        } else {
            ordering
        }
    });
    Ok(())
}

fn parse_limit(limit: &Option<Expr>) -> Result<Option<usize>, StoreError> {
    match limit {
        None => Ok(None),
        Some(Expr::Value(SqlValue::Number(n, _))) => n
            .parse::<usize>()
            .map(Some)
            .map_err(|_| StoreError::Statement(format!("invalid limit '{}'", n))),
        Some(other) => Err(StoreError::Statement(format!(
            "unsupported limit: {:?}",
            other
        ))),
    }
}
