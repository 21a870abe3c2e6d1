//! The store collaborator boundary.
//!
//! The pipeline talks to the columnar store through three primitives:
//! `execute` for DDL and deletes, `insert` for bulk writes, `query` for
//! parameterized reads. Connection management, authentication and transport
//! belong to the implementation behind the trait.

pub mod memory;

use std::future::Future;

use crate::data::Value;

pub use memory::MemoryStore;

/// One result row, column-ordered as selected.
pub type QueryRow = Vec<Value>;

/// One insert row, column-ordered as the table was created.
pub type StoreRow = Vec<Value>;

pub trait Store: Send + Sync + 'static {
    /// Run a DDL or delete statement. Literals are inlined.
    fn execute(&self, stmt: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Bulk-insert rows into one table.
    fn insert(
        &self,
        table: &str,
        rows: &[StoreRow],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Run a parameterized SELECT; `?` placeholders bind to `params` in
    /// order.
    fn query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<Vec<QueryRow>, StoreError>> + Send;
}

/// Store failures. Clonable so a failed flush outcome can be shared across
/// all callers joined on the same flight.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("malformed statement: {0}")]
    Statement(String),

    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Quote an identifier for inlining into a statement.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
