//! In-memory backend adapter for mapstore.
//!
//! `mapstore-memory` implements the backend contract from `mapstore-core`
//! against process memory. It exists for tests, examples, and prototyping:
//! collections are created lazily, identifiers are assigned from a
//! per-collection counter, and transactions get snapshot isolation: state
//! is cloned on begin and swapped back on commit, so a rollback is simply
//! dropping the snapshot.
//!
//! # Thread Safety
//!
//! All state sits behind a mutex; a transaction's snapshot has its own.
//! Concurrent transactions are last-commit-wins, which is enough for the
//! serial usage the session layer requires.
//!
//! # Instrumentation
//!
//! Every backend operation increments a counter on [`OpCounters`], so tests
//! can assert exactly which calls reached the backend.

use mapstore_core::{
    Backend, BackendErrorKind, CmpOp, Collection, Cond, Context, Error, Order, OrderDirection,
    QueryHandle, Record, Result, Transaction, Value,
};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};

static NULL_VALUE: Value = Value::Null;

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Default)]
struct CollectionState {
    rows: Vec<Record>,
    next_id: i64,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    collections: HashMap<String, CollectionState>,
}

type SharedState = Arc<Mutex<MemoryState>>;
type ClosedFlag = Arc<Mutex<bool>>;

fn lock(state: &SharedState) -> std::sync::MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Writes through a finalized transaction are refused; reads of the dead
/// snapshot stay harmless and allowed.
fn ensure_open(closed: Option<&ClosedFlag>) -> Result<()> {
    if let Some(flag) = closed {
        if *flag.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(Error::backend(
                BackendErrorKind::Closed,
                "transaction already finalized",
            ));
        }
    }
    Ok(())
}

// ============================================================================
// Operation counters
// ============================================================================

/// Counts of backend calls, for test assertions.
#[derive(Debug, Default)]
pub struct OpCounters {
    collection_resolutions: AtomicU64,
    inserts: AtomicU64,
    queries: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl OpCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Collection handles resolved via `Backend` or `Transaction`.
    pub fn collection_resolutions(&self) -> u64 {
        self.collection_resolutions.load(AtomicOrdering::Relaxed)
    }

    /// Records inserted.
    pub fn inserts(&self) -> u64 {
        self.inserts.load(AtomicOrdering::Relaxed)
    }

    /// Read queries executed (fetches and counts).
    pub fn queries(&self) -> u64 {
        self.queries.load(AtomicOrdering::Relaxed)
    }

    /// Update-by-query executions.
    pub fn updates(&self) -> u64 {
        self.updates.load(AtomicOrdering::Relaxed)
    }

    /// Delete-by-query executions.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(AtomicOrdering::Relaxed)
    }

    /// Transactions begun.
    pub fn begins(&self) -> u64 {
        self.begins.load(AtomicOrdering::Relaxed)
    }

    /// Transactions committed.
    pub fn commits(&self) -> u64 {
        self.commits.load(AtomicOrdering::Relaxed)
    }

    /// Transactions rolled back.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(AtomicOrdering::Relaxed)
    }

    /// All data operations combined (inserts, queries, updates, deletes).
    pub fn total_operations(&self) -> u64 {
        self.inserts() + self.queries() + self.updates() + self.deletes()
    }
}

// ============================================================================
// Backend
// ============================================================================

/// An in-memory backend.
///
/// Collections spring into existence on first use. Inserted records get an
/// integer identifier from a per-collection counter written under the
/// configured id column (default `"id"`) unless the record already carries
/// a nonzero value there.
pub struct MemoryBackend {
    state: SharedState,
    id_column: String,
    counters: Arc<OpCounters>,
}

impl MemoryBackend {
    /// Create an empty backend with `"id"` as the identifier column.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            id_column: "id".to_string(),
            counters: Arc::new(OpCounters::default()),
        }
    }

    /// Use a different identifier column for assigned keys.
    #[must_use]
    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    /// The backend's operation counters.
    pub fn counters(&self) -> Arc<OpCounters> {
        Arc::clone(&self.counters)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn collection(&self, _cx: &Context, name: &str) -> Result<Arc<dyn Collection>> {
        OpCounters::bump(&self.counters.collection_resolutions);
        Ok(Arc::new(MemoryCollection {
            name: name.to_string(),
            state: Arc::clone(&self.state),
            id_column: self.id_column.clone(),
            counters: Arc::clone(&self.counters),
            closed: None,
        }))
    }

    fn begin(&self, _cx: &Context) -> Result<Arc<dyn Transaction>> {
        OpCounters::bump(&self.counters.begins);
        let snapshot = lock(&self.state).clone();
        tracing::debug!("opened snapshot transaction");
        Ok(Arc::new(MemoryTransaction {
            live: Arc::new(Mutex::new(snapshot)),
            parent: Arc::clone(&self.state),
            id_column: self.id_column.clone(),
            counters: Arc::clone(&self.counters),
            finalized: Arc::new(Mutex::new(false)),
        }))
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// A snapshot transaction over a [`MemoryBackend`].
pub struct MemoryTransaction {
    live: SharedState,
    parent: SharedState,
    id_column: String,
    counters: Arc<OpCounters>,
    finalized: ClosedFlag,
}

impl MemoryTransaction {
    fn finalize(&self) -> Result<()> {
        let mut finalized = self.finalized.lock().unwrap_or_else(PoisonError::into_inner);
        if *finalized {
            return Err(Error::backend(
                BackendErrorKind::Closed,
                "transaction already finalized",
            ));
        }
        *finalized = true;
        Ok(())
    }
}

impl Transaction for MemoryTransaction {
    fn collection(&self, _cx: &Context, name: &str) -> Result<Arc<dyn Collection>> {
        OpCounters::bump(&self.counters.collection_resolutions);
        Ok(Arc::new(MemoryCollection {
            name: name.to_string(),
            state: Arc::clone(&self.live),
            id_column: self.id_column.clone(),
            counters: Arc::clone(&self.counters),
            closed: Some(Arc::clone(&self.finalized)),
        }))
    }

    fn commit(&self, _cx: &Context) -> Result<()> {
        self.finalize()?;
        *lock(&self.parent) = lock(&self.live).clone();
        OpCounters::bump(&self.counters.commits);
        tracing::debug!("committed snapshot transaction");
        Ok(())
    }

    fn rollback(&self, _cx: &Context) -> Result<()> {
        self.finalize()?;
        OpCounters::bump(&self.counters.rollbacks);
        tracing::debug!("rolled back snapshot transaction");
        Ok(())
    }
}

// ============================================================================
// Collection
// ============================================================================

struct MemoryCollection {
    name: String,
    state: SharedState,
    id_column: String,
    counters: Arc<OpCounters>,
    /// Present for transaction-scoped collections.
    closed: Option<ClosedFlag>,
}

impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert(&self, _cx: &Context, mut record: Record) -> Result<Value> {
        ensure_open(self.closed.as_ref())?;
        OpCounters::bump(&self.counters.inserts);
        let mut state = lock(&self.state);
        let collection = state.collections.entry(self.name.clone()).or_default();

        let id = match record.get(&self.id_column) {
            Some(value) if !value.is_zero() => value.clone(),
            _ => {
                collection.next_id += 1;
                let id = Value::Int(collection.next_id);
                record.set(self.id_column.clone(), id.clone());
                id
            }
        };
        collection.rows.push(record);
        Ok(id)
    }

    fn find(&self, _cx: &Context, terms: &[Cond]) -> Result<Box<dyn QueryHandle>> {
        Ok(Box::new(MemoryQuery {
            state: Arc::clone(&self.state),
            collection: self.name.clone(),
            terms: terms.to_vec(),
            limit: None,
            offset: None,
            order: Vec::new(),
            columns: None,
            group: None,
            fetched: None,
            counters: Arc::clone(&self.counters),
            closed: self.closed.clone(),
        }))
    }
}

// ============================================================================
// Query handle
// ============================================================================

struct MemoryQuery {
    state: SharedState,
    collection: String,
    terms: Vec<Cond>,
    limit: Option<u64>,
    offset: Option<u64>,
    order: Vec<Order>,
    columns: Option<Vec<String>>,
    group: Option<Vec<String>>,
    fetched: Option<VecDeque<Record>>,
    counters: Arc<OpCounters>,
    closed: Option<ClosedFlag>,
}

impl MemoryQuery {
    fn matches(&self, record: &Record) -> bool {
        self.terms.iter().all(|term| cond_matches(term, record))
    }

    /// Run the query once and cache the result rows.
    fn materialize(&mut self) {
        if self.fetched.is_some() {
            return;
        }
        OpCounters::bump(&self.counters.queries);

        let state = lock(&self.state);
        let mut rows: Vec<Record> = state
            .collections
            .get(&self.collection)
            .map(|c| {
                c.rows
                    .iter()
                    .filter(|record| self.matches(record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(state);

        if let Some(group) = &self.group {
            let mut seen: Vec<Vec<Value>> = Vec::new();
            rows.retain(|record| {
                let key: Vec<Value> = group
                    .iter()
                    .map(|column| record.get(column).cloned().unwrap_or(Value::Null))
                    .collect();
                if seen.contains(&key) {
                    false
                } else {
                    seen.push(key);
                    true
                }
            });
        }

        if !self.order.is_empty() {
            rows.sort_by(|a, b| {
                for term in &self.order {
                    let left = a.get(&term.column).unwrap_or(&NULL_VALUE);
                    let right = b.get(&term.column).unwrap_or(&NULL_VALUE);
                    let mut ordering = value_cmp(left, right).unwrap_or(Ordering::Equal);
                    if term.direction == OrderDirection::Desc {
                        ordering = ordering.reverse();
                    }
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        if let Some(offset) = self.offset {
            let offset = usize::try_from(offset).unwrap_or(usize::MAX);
            if offset < rows.len() {
                rows.drain(..offset);
            } else {
                rows.clear();
            }
        }
        if let Some(limit) = self.limit {
            rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        }
        if let Some(columns) = &self.columns {
            for record in &mut rows {
                record.project(columns);
            }
        }

        self.fetched = Some(rows.into());
    }
}

impl QueryHandle for MemoryQuery {
    fn and(&mut self, terms: &[Cond]) {
        self.terms.extend_from_slice(terms);
    }

    fn limit(&mut self, n: u64) {
        self.limit = Some(n);
    }

    fn offset(&mut self, n: u64) {
        self.offset = Some(n);
    }

    fn order_by(&mut self, order: &[Order]) {
        self.order = order.to_vec();
    }

    fn select_columns(&mut self, columns: &[String]) {
        self.columns = Some(columns.to_vec());
    }

    fn group_by(&mut self, columns: &[String]) {
        self.group = Some(columns.to_vec());
    }

    fn one(&mut self, _cx: &Context) -> Result<Option<Record>> {
        self.materialize();
        Ok(self.fetched.as_ref().and_then(|rows| rows.front().cloned()))
    }

    fn all(&mut self, _cx: &Context) -> Result<Vec<Record>> {
        self.materialize();
        Ok(self
            .fetched
            .as_ref()
            .map(|rows| rows.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn next(&mut self, _cx: &Context) -> Result<Option<Record>> {
        self.materialize();
        Ok(self.fetched.as_mut().and_then(VecDeque::pop_front))
    }

    fn update(&mut self, _cx: &Context, values: Record) -> Result<()> {
        ensure_open(self.closed.as_ref())?;
        OpCounters::bump(&self.counters.updates);
        let mut state = lock(&self.state);
        if let Some(collection) = state.collections.get_mut(&self.collection) {
            for record in &mut collection.rows {
                if self.terms.iter().all(|term| cond_matches(term, record)) {
                    record.merge(&values);
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, _cx: &Context) -> Result<()> {
        ensure_open(self.closed.as_ref())?;
        OpCounters::bump(&self.counters.deletes);
        let mut state = lock(&self.state);
        if let Some(collection) = state.collections.get_mut(&self.collection) {
            collection
                .rows
                .retain(|record| !self.terms.iter().all(|term| cond_matches(term, record)));
        }
        Ok(())
    }

    fn count(&mut self, _cx: &Context) -> Result<u64> {
        OpCounters::bump(&self.counters.queries);
        let state = lock(&self.state);
        let count = state
            .collections
            .get(&self.collection)
            .map(|c| c.rows.iter().filter(|record| self.matches(record)).count())
            .unwrap_or_default();
        Ok(count as u64)
    }

    fn close(&mut self) -> Result<()> {
        self.fetched = None;
        Ok(())
    }
}

// ============================================================================
// Filtering
// ============================================================================

fn value_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Bytes(x), Value::Bytes(y)) => Some(x.cmp(y)),
        (Value::Json(x), Value::Json(y)) => (x == y).then_some(Ordering::Equal),
        _ => None,
    }
}

fn cond_matches(cond: &Cond, record: &Record) -> bool {
    let actual = record.get(&cond.column).unwrap_or(&NULL_VALUE);
    let ordering = value_cmp(actual, &cond.value);
    match cond.op {
        CmpOp::Eq => matches!(ordering, Some(Ordering::Equal)),
        CmpOp::Ne => !matches!(ordering, Some(Ordering::Equal)),
        CmpOp::Lt => matches!(ordering, Some(Ordering::Less)),
        CmpOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => matches!(ordering, Some(Ordering::Greater)),
        CmpOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
    }
}
