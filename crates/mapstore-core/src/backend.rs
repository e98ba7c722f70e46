//! The storage backend contract.
//!
//! The mapper consumes backends exclusively through the object-safe traits
//! in this module: [`Backend`] resolves collections and opens transactions,
//! [`Transaction`] scopes collection resolution to one transaction,
//! [`Collection`] inserts records and seeds queries, and [`QueryHandle`]
//! carries accumulated query state to exactly one backend execution.
//!
//! Every call that can reach the wire takes a leading [`Context`]: an
//! opaque cancellation/deadline token the mapper forwards verbatim and
//! never interprets.

use crate::error::Result;
use crate::record::Record;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque per-call context forwarded to the backend.
///
/// Backends that support deadlines or cancellation tokens can downcast the
/// carried value; the mapper itself only clones and forwards it.
#[derive(Clone, Default)]
pub struct Context {
    token: Option<Arc<dyn Any + Send + Sync>>,
}

impl Context {
    /// An empty context carrying no token.
    #[must_use]
    pub const fn none() -> Self {
        Self { token: None }
    }

    /// Wrap an arbitrary token value.
    pub fn new(token: impl Any + Send + Sync) -> Self {
        Self {
            token: Some(Arc::new(token)),
        }
    }

    /// Whether a token is attached.
    pub fn is_set(&self) -> bool {
        self.token.is_some()
    }

    /// Try to view the carried token as a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.token.as_deref().and_then(|token| token.downcast_ref())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("token", &self.token.as_ref().map(|_| "<opaque>"))
            .finish()
    }
}

/// Comparison operator of a filter term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,
}

/// One filter term: `column <op> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cond {
    /// Column the term constrains.
    pub column: String,
    /// Comparison operator.
    pub op: CmpOp,
    /// Comparison operand.
    pub value: Value,
}

impl Cond {
    /// Build a term with an explicit operator.
    pub fn new(column: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, CmpOp::Eq, value)
    }

    /// `column != value`
    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, CmpOp::Ne, value)
    }

    /// `column < value`
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, CmpOp::Lt, value)
    }

    /// `column <= value`
    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, CmpOp::Le, value)
    }

    /// `column > value`
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, CmpOp::Gt, value)
    }

    /// `column >= value`
    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, CmpOp::Ge, value)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending
    #[default]
    Asc,
    /// Descending
    Desc,
}

/// One sort term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Column to sort by.
    pub column: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl Order {
    /// Ascending sort on a column.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Descending sort on a column.
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// A backend connection: resolves collections and opens transactions.
pub trait Backend: Send + Sync {
    /// Resolve a collection handle by name.
    fn collection(&self, cx: &Context, name: &str) -> Result<Arc<dyn Collection>>;

    /// Begin a transaction.
    fn begin(&self, cx: &Context) -> Result<Arc<dyn Transaction>>;
}

/// An open backend transaction.
///
/// Exposes the same collection-resolution capability as [`Backend`], scoped
/// to the transaction. Commit and rollback are each meaningful once; the
/// backend closes the underlying resource on either outcome.
pub trait Transaction: Send + Sync {
    /// Resolve a collection handle scoped to this transaction.
    fn collection(&self, cx: &Context, name: &str) -> Result<Arc<dyn Collection>>;

    /// Make the transaction's effects permanent.
    fn commit(&self, cx: &Context) -> Result<()>;

    /// Discard the transaction's effects.
    fn rollback(&self, cx: &Context) -> Result<()>;
}

/// A named backend collection of records.
pub trait Collection: Send + Sync {
    /// The collection's name.
    fn name(&self) -> &str;

    /// Insert a record, returning the backend-assigned identifier.
    fn insert(&self, cx: &Context, record: Record) -> Result<Value>;

    /// Open a query handle seeded with the given filter terms.
    fn find(&self, cx: &Context, terms: &[Cond]) -> Result<Box<dyn QueryHandle>>;
}

/// Accumulated query state awaiting exactly one backend execution.
///
/// The chain setters mutate accumulated state without touching the wire;
/// the terminal methods execute. Backends surface their own errors
/// unchanged through the terminal results.
pub trait QueryHandle: Send {
    /// Append filter terms to the accumulated conjunction.
    fn and(&mut self, terms: &[Cond]);

    /// Cap the number of returned records.
    fn limit(&mut self, n: u64);

    /// Skip the first `n` matching records.
    fn offset(&mut self, n: u64);

    /// Replace the accumulated sort terms.
    fn order_by(&mut self, order: &[Order]);

    /// Project results down to the listed columns.
    fn select_columns(&mut self, columns: &[String]);

    /// Group results by the listed columns.
    fn group_by(&mut self, columns: &[String]);

    /// Fetch the first matching record, if any.
    fn one(&mut self, cx: &Context) -> Result<Option<Record>>;

    /// Fetch all matching records.
    fn all(&mut self, cx: &Context) -> Result<Vec<Record>>;

    /// Pull the next matching record; `None` once exhausted.
    fn next(&mut self, cx: &Context) -> Result<Option<Record>>;

    /// Update all matching records with the given column values.
    fn update(&mut self, cx: &Context, values: Record) -> Result<()>;

    /// Delete all matching records.
    fn delete(&mut self, cx: &Context) -> Result<()>;

    /// Count matching records.
    fn count(&mut self, cx: &Context) -> Result<u64>;

    /// Release any resources held by the executed query.
    fn close(&mut self) -> Result<()>;
}
