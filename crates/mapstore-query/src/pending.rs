//! The deferred query builder and result cursor.

use mapstore_core::{Collection, Cond, Context, Error, Model, Order, QueryHandle, Record, Result};
use std::fmt;
use std::sync::Arc;

/// Accumulated query state.
#[derive(Debug, Clone, Default)]
struct QueryArgs {
    filter: Option<Vec<Cond>>,
    limit: Option<u64>,
    offset: Option<u64>,
    order: Option<Vec<Order>>,
    columns: Option<Vec<String>>,
    group: Option<Vec<String>>,
}

/// A deferred query bound to one collection and one session context.
///
/// Builder methods accumulate state without executing anything. The first
/// terminal call translates the accumulated state into exactly one backend
/// query and caches the resulting cursor; repeated [`PendingQuery::next`]
/// calls keep pulling from it. A terminal call made before any filter was
/// set fails with [`Error::InvalidQuery`]: an unconstrained query must be
/// requested explicitly with an empty filter, never implied.
pub struct PendingQuery {
    collection: Arc<dyn Collection>,
    cx: Context,
    args: QueryArgs,
    cursor: Option<Box<dyn QueryHandle>>,
    last_err: Option<Error>,
    exhausted: bool,
}

impl PendingQuery {
    /// Create a query against `collection`, seeded with `terms`.
    ///
    /// Zero terms leave the filter unset; terminal calls will fail until
    /// [`PendingQuery::filter`] is called (possibly with an empty term list
    /// to match everything).
    pub fn new(collection: Arc<dyn Collection>, cx: Context, terms: &[Cond]) -> Self {
        let filter = if terms.is_empty() {
            None
        } else {
            Some(terms.to_vec())
        };
        Self {
            collection,
            cx,
            args: QueryArgs {
                filter,
                ..QueryArgs::default()
            },
            cursor: None,
            last_err: None,
            exhausted: false,
        }
    }

    // ------------------------------------------------------------------
    // Builder methods
    // ------------------------------------------------------------------

    /// Set the filter terms, replacing any previously set terms.
    ///
    /// An empty slice is an explicit "match all".
    pub fn filter(mut self, terms: &[Cond]) -> Self {
        self.args.filter = Some(terms.to_vec());
        self
    }

    /// Append terms to the filter conjunction, setting it if unset.
    pub fn and(mut self, terms: &[Cond]) -> Self {
        match &mut self.args.filter {
            Some(existing) => existing.extend_from_slice(terms),
            None => self.args.filter = Some(terms.to_vec()),
        }
        self
    }

    /// Cap the number of returned records.
    pub fn limit(mut self, n: u64) -> Self {
        self.args.limit = Some(n);
        self
    }

    /// Skip the first `n` matching records.
    pub fn offset(mut self, n: u64) -> Self {
        self.args.offset = Some(n);
        self
    }

    /// Replace the sort terms.
    pub fn order_by(mut self, order: &[Order]) -> Self {
        self.args.order = Some(order.to_vec());
        self
    }

    /// Project results down to the listed columns.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Group results by the listed columns.
    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.group = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    // ------------------------------------------------------------------
    // Terminal methods
    // ------------------------------------------------------------------

    /// Fetch the first matching entity, if any.
    pub fn one<M: Model>(&mut self) -> Result<Option<M>> {
        let cx = self.cx.clone();
        match self.cursor()?.one(&cx)? {
            Some(record) => Ok(Some(M::from_record(&record)?)),
            None => Ok(None),
        }
    }

    /// Fetch all matching entities.
    pub fn all<M: Model>(&mut self) -> Result<Vec<M>> {
        let cx = self.cx.clone();
        let records = self.cursor()?.all(&cx)?;
        records.iter().map(M::from_record).collect()
    }

    /// Count matching records.
    pub fn count(&mut self) -> Result<u64> {
        let cx = self.cx.clone();
        self.cursor()?.count(&cx)
    }

    /// Update all matching records with the given column values.
    pub fn update(&mut self, values: Record) -> Result<()> {
        let cx = self.cx.clone();
        self.cursor()?.update(&cx, values)
    }

    /// Delete all matching records.
    ///
    /// Goes straight to the backend; entity lifecycle hooks are not
    /// involved in query-level deletes.
    pub fn delete(&mut self) -> Result<()> {
        let cx = self.cx.clone();
        self.cursor()?.delete(&cx)
    }

    /// Pull the next matching entity.
    ///
    /// Returns `Ok(None)` once the result set is exhausted and on every
    /// call after that. A backend error ends the iteration: it is returned
    /// once and stays retrievable through [`PendingQuery::err`] while
    /// subsequent calls yield `Ok(None)`. Iteration restarts only by
    /// constructing a new query.
    pub fn next<M: Model>(&mut self) -> Result<Option<M>> {
        if self.exhausted {
            return Ok(None);
        }
        let cx = self.cx.clone();
        let step = match self.cursor() {
            Ok(cursor) => cursor.next(&cx),
            Err(err) => Err(err),
        };
        match step {
            Ok(Some(record)) => match M::from_record(&record) {
                Ok(item) => Ok(Some(item)),
                Err(err) => self.fail(err),
            },
            Ok(None) => {
                self.exhausted = true;
                Ok(None)
            }
            Err(err) => self.fail(err),
        }
    }

    /// The error that ended iteration, if any.
    pub fn err(&self) -> Option<&Error> {
        self.last_err.as_ref()
    }

    /// Release the executed backend cursor.
    ///
    /// Fails with [`Error::InvalidQuery`] when no terminal call has
    /// executed yet.
    pub fn close(&mut self) -> Result<()> {
        match self.cursor.take() {
            Some(mut cursor) => cursor.close(),
            None => Err(Error::InvalidQuery),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Build the backend cursor on first use, reuse it afterwards.
    fn cursor(&mut self) -> Result<&mut dyn QueryHandle> {
        if self.cursor.is_none() {
            let terms = self.args.filter.as_ref().ok_or(Error::InvalidQuery)?;
            tracing::debug!(
                collection = self.collection.name(),
                terms = terms.len(),
                "executing deferred query"
            );
            let mut handle = self.collection.find(&self.cx, terms)?;
            if let Some(n) = self.args.limit {
                handle.limit(n);
            }
            if let Some(n) = self.args.offset {
                handle.offset(n);
            }
            if let Some(order) = &self.args.order {
                handle.order_by(order);
            }
            if let Some(columns) = &self.args.columns {
                handle.select_columns(columns);
            }
            if let Some(group) = &self.args.group {
                handle.group_by(group);
            }
            self.cursor = Some(handle);
        }
        self.cursor.as_deref_mut().ok_or(Error::InvalidQuery)
    }

    fn fail<T>(&mut self, err: Error) -> Result<Option<T>> {
        self.exhausted = true;
        self.last_err = Some(err.clone());
        Err(err)
    }
}

impl fmt::Debug for PendingQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingQuery")
            .field("collection", &self.collection.name())
            .field("args", &self.args)
            .field("executed", &self.cursor.is_some())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapstore_core::{FieldInfo, FieldType, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Item {
        id: i64,
    }

    impl Model for Item {
        fn collection_name(&self) -> &str {
            "items"
        }

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: &[FieldInfo] =
                &[FieldInfo::new("id", "id", FieldType::Int).primary_key(true)];
            FIELDS
        }

        fn to_record(&self) -> Record {
            let mut record = Record::new();
            record.set("id", self.id);
            record
        }

        fn from_record(record: &Record) -> Result<Self> {
            Ok(Self {
                id: record.get("id").and_then(Value::as_i64).unwrap_or_default(),
            })
        }

        fn set(&mut self, column: &str, value: Value) {
            if column == "id" {
                self.id = value.as_i64().unwrap_or_default();
            }
        }
    }

    #[derive(Debug, Default)]
    struct StubLog {
        finds: u64,
        limit: Option<u64>,
        offset: Option<u64>,
        order_columns: Vec<String>,
        selected: Vec<String>,
    }

    struct StubCollection {
        rows: Vec<Record>,
        fail_after: Option<usize>,
        log: Arc<Mutex<StubLog>>,
    }

    impl StubCollection {
        fn with_ids(ids: &[i64]) -> Self {
            let rows = ids
                .iter()
                .map(|id| {
                    let mut record = Record::new();
                    record.set("id", *id);
                    record
                })
                .collect();
            Self {
                rows,
                fail_after: None,
                log: Arc::new(Mutex::new(StubLog::default())),
            }
        }
    }

    impl Collection for StubCollection {
        fn name(&self) -> &str {
            "items"
        }

        fn insert(&self, _cx: &Context, _record: Record) -> Result<Value> {
            Ok(Value::Int(1))
        }

        fn find(&self, _cx: &Context, _terms: &[Cond]) -> Result<Box<dyn QueryHandle>> {
            self.log.lock().unwrap().finds += 1;
            Ok(Box::new(StubQuery {
                rows: self.rows.clone().into(),
                fail_after: self.fail_after,
                pulled: 0,
                log: Arc::clone(&self.log),
            }))
        }
    }

    struct StubQuery {
        rows: VecDeque<Record>,
        fail_after: Option<usize>,
        pulled: usize,
        log: Arc<Mutex<StubLog>>,
    }

    impl QueryHandle for StubQuery {
        fn and(&mut self, _terms: &[Cond]) {}

        fn limit(&mut self, n: u64) {
            self.log.lock().unwrap().limit = Some(n);
        }

        fn offset(&mut self, n: u64) {
            self.log.lock().unwrap().offset = Some(n);
        }

        fn order_by(&mut self, order: &[Order]) {
            self.log.lock().unwrap().order_columns =
                order.iter().map(|o| o.column.clone()).collect();
        }

        fn select_columns(&mut self, columns: &[String]) {
            self.log.lock().unwrap().selected = columns.to_vec();
        }

        fn group_by(&mut self, _columns: &[String]) {}

        fn one(&mut self, _cx: &Context) -> Result<Option<Record>> {
            Ok(self.rows.front().cloned())
        }

        fn all(&mut self, _cx: &Context) -> Result<Vec<Record>> {
            Ok(self.rows.iter().cloned().collect())
        }

        fn next(&mut self, _cx: &Context) -> Result<Option<Record>> {
            if let Some(after) = self.fail_after {
                if self.pulled >= after {
                    return Err(Error::backend(
                        mapstore_core::BackendErrorKind::Other,
                        "cursor torn down",
                    ));
                }
            }
            self.pulled += 1;
            Ok(self.rows.pop_front())
        }

        fn update(&mut self, _cx: &Context, _values: Record) -> Result<()> {
            Ok(())
        }

        fn delete(&mut self, _cx: &Context) -> Result<()> {
            Ok(())
        }

        fn count(&mut self, _cx: &Context) -> Result<u64> {
            Ok(self.rows.len() as u64)
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn query(collection: StubCollection, terms: &[Cond]) -> PendingQuery {
        PendingQuery::new(Arc::new(collection), Context::none(), terms)
    }

    #[test]
    fn test_terminal_without_filter_is_invalid() {
        let mut q = query(StubCollection::with_ids(&[1, 2]), &[]);
        assert_eq!(q.count().unwrap_err(), Error::InvalidQuery);
        assert_eq!(q.all::<Item>().unwrap_err(), Error::InvalidQuery);
        assert_eq!(q.one::<Item>().unwrap_err(), Error::InvalidQuery);
    }

    #[test]
    fn test_explicit_empty_filter_matches_all() {
        let mut q = query(StubCollection::with_ids(&[1, 2]), &[]).filter(&[]);
        assert_eq!(q.count().unwrap(), 2);
    }

    #[test]
    fn test_seed_terms_set_the_filter() {
        let mut q = query(StubCollection::with_ids(&[1]), &[Cond::eq("id", 1_i64)]);
        assert_eq!(q.count().unwrap(), 1);
    }

    #[test]
    fn test_builder_state_reaches_backend_handle() {
        let collection = StubCollection::with_ids(&[1, 2, 3]);
        let log = Arc::clone(&collection.log);
        let mut q = query(collection, &[])
            .filter(&[])
            .limit(2)
            .offset(1)
            .order_by(&[Order::desc("id")])
            .select(["id"]);
        let _ = q.all::<Item>().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.limit, Some(2));
        assert_eq!(log.offset, Some(1));
        assert_eq!(log.order_columns, vec!["id".to_string()]);
        assert_eq!(log.selected, vec!["id".to_string()]);
    }

    #[test]
    fn test_single_backend_execution_across_terminals() {
        let collection = StubCollection::with_ids(&[1, 2]);
        let log = Arc::clone(&collection.log);
        let mut q = query(collection, &[]).filter(&[]);
        assert!(q.next::<Item>().unwrap().is_some());
        assert!(q.next::<Item>().unwrap().is_some());
        assert!(q.next::<Item>().unwrap().is_none());
        assert_eq!(log.lock().unwrap().finds, 1);
    }

    #[test]
    fn test_next_is_exhaustible_and_stays_exhausted() {
        let mut q = query(StubCollection::with_ids(&[7]), &[]).filter(&[]);
        assert_eq!(q.next::<Item>().unwrap().map(|i| i.id), Some(7));
        assert!(q.next::<Item>().unwrap().is_none());
        assert!(q.next::<Item>().unwrap().is_none());
        assert!(q.err().is_none());
    }

    #[test]
    fn test_next_surfaces_backend_error_once_then_retains_it() {
        let mut collection = StubCollection::with_ids(&[1, 2, 3]);
        collection.fail_after = Some(1);
        let mut q = query(collection, &[]).filter(&[]);

        assert!(q.next::<Item>().is_ok());
        let err = q.next::<Item>().unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
        // Subsequent pulls signal exhaustion; the error stays retrievable.
        assert!(q.next::<Item>().unwrap().is_none());
        assert_eq!(q.err(), Some(&err));
    }

    #[test]
    fn test_close_before_execution_is_invalid() {
        let mut q = query(StubCollection::with_ids(&[1]), &[]).filter(&[]);
        assert_eq!(q.close().unwrap_err(), Error::InvalidQuery);
        assert_eq!(q.count().unwrap(), 1);
        assert!(q.close().is_ok());
    }
}
