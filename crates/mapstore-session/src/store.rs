//! Per-collection CRUD orchestration.

use crate::Session;
use crate::events::ModelEvents;
use mapstore_core::schema;
use mapstore_core::{Collection, Cond, Error, Model, Result, Value};
use mapstore_query::PendingQuery;
use std::sync::Arc;

/// The per-collection, per-session CRUD orchestrator.
///
/// A store pairs one backend collection with the session it was resolved
/// under. Stores are cheap to construct; two stores are distinct whenever
/// their sessions differ, even for the same collection name. Apart from the
/// primary-key writeback on a successful create, no store method mutates
/// its argument.
#[derive(Clone)]
pub struct Store {
    collection: Arc<dyn Collection>,
    session: Session,
}

impl Store {
    pub(crate) fn new(collection: Arc<dyn Collection>, session: Session) -> Self {
        Self {
            collection,
            session,
        }
    }

    /// The collection name this store writes to.
    pub fn name(&self) -> &str {
        self.collection.name()
    }

    /// The session this store operates under.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Create or update an entity, bracketed by its lifecycle hooks.
    ///
    /// The primary-key value decides the path: the type's zero value (or
    /// null) selects create, anything else selects update; exactly one of
    /// the two runs per call.
    ///
    /// Create: `validate` → `before_create` → backend insert → primary-key
    /// writeback → `after_create`. Update: `validate` → `before_update` →
    /// backend update-by-key → `after_update`. A failing `validate` or
    /// `before_*` hook aborts with no backend call; a failing `after_*`
    /// hook surfaces its error although the backend effect is already
    /// committed.
    #[tracing::instrument(level = "debug", skip_all, fields(collection = self.collection.name()))]
    pub fn save<M: Model + ModelEvents>(&self, item: &mut M) -> Result<()> {
        let (id, pk_field, model_schema) = schema::primary_key_of(item)?;

        item.validate()?;

        let cx = self.session.context().clone();

        if pk_field.is_zero_value(&id) {
            item.before_create(&self.session)?;

            let record = model_schema.insert_record(item);
            let new_id = self.collection.insert(&cx, record)?;
            tracing::debug!(id = ?new_id, "created record");
            // Backends without generated keys report null; leave the
            // entity's key untouched in that case.
            if !new_id.is_null() {
                item.set(pk_field.column_name, new_id);
            }

            item.after_create(&self.session)
        } else {
            item.before_update(&self.session)?;

            let mut query = self
                .collection
                .find(&cx, &[Cond::eq(pk_field.column_name, id)])?;
            query.update(&cx, model_schema.update_record(item))?;
            tracing::debug!("updated record");

            item.after_update(&self.session)
        }
    }

    /// Insert an entity unconditionally, returning the backend identifier.
    ///
    /// Runs the create-side hooks (`validate`, `before_create`,
    /// `after_create`) but performs no primary-key comparison and no
    /// writeback; use [`Store::save`] for the full create-or-update
    /// algorithm.
    #[tracing::instrument(level = "debug", skip_all, fields(collection = self.collection.name()))]
    pub fn insert<M: Model + ModelEvents>(&self, item: &mut M) -> Result<Value> {
        let model_schema = schema::schema_of::<M>()?;

        item.validate()?;
        item.before_create(&self.session)?;

        let cx = self.session.context().clone();
        let id = self.collection.insert(&cx, model_schema.insert_record(item))?;

        item.after_create(&self.session)?;
        Ok(id)
    }

    /// Delete an entity by primary-key equality, bracketed by its hooks.
    ///
    /// An entity whose primary key is the zero value fails with
    /// [`Error::ZeroItemId`] before any hook or backend call, guarding
    /// against turning a forgotten key into an unconstrained delete.
    #[tracing::instrument(level = "debug", skip_all, fields(collection = self.collection.name()))]
    pub fn delete<M: Model + ModelEvents>(&self, item: &mut M) -> Result<()> {
        let (id, pk_field, _model_schema) = schema::primary_key_of(item)?;

        if pk_field.is_zero_value(&id) {
            return Err(Error::ZeroItemId);
        }

        item.before_delete(&self.session)?;

        let cx = self.session.context().clone();
        let mut query = self
            .collection
            .find(&cx, &[Cond::eq(pk_field.column_name, id)])?;
        query.delete(&cx)?;
        tracing::debug!(id = ?item.get(pk_field.column_name), "deleted record");

        item.after_delete(&self.session)
    }

    /// Build a deferred query against this store's collection.
    ///
    /// The query is seeded with `terms`; passing none leaves the filter
    /// unset, so a terminal call still requires an explicit
    /// `filter` (possibly empty) before it will run.
    pub fn find(&self, terms: &[Cond]) -> PendingQuery {
        PendingQuery::new(
            Arc::clone(&self.collection),
            self.session.context().clone(),
            terms,
        )
    }

    /// Rebind this store to another session, typically one scoped to a
    /// transaction.
    ///
    /// Returns a new store resolved against the target session's backend
    /// handle. Neither this store nor either session's cache is touched.
    pub fn rebind(&self, session: &Session) -> Result<Store> {
        let collection = session.resolve_collection(self.collection.name())?;
        Ok(Store::new(collection, session.clone()))
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("collection", &self.collection.name())
            .field("transactional", &self.session.in_transaction())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapstore_core::{FieldInfo, FieldType, Record};
    use mapstore_memory::MemoryBackend;
    use std::sync::atomic::{AtomicU64, Ordering};

    // Hook invocation counters, shared with the test body.
    #[derive(Default)]
    struct HookLog {
        validate: AtomicU64,
        before_create: AtomicU64,
        after_create: AtomicU64,
        before_update: AtomicU64,
        after_update: AtomicU64,
        before_delete: AtomicU64,
        after_delete: AtomicU64,
    }

    impl HookLog {
        fn total(&self) -> u64 {
            self.validate.load(Ordering::Relaxed)
                + self.before_create.load(Ordering::Relaxed)
                + self.after_create.load(Ordering::Relaxed)
                + self.before_update.load(Ordering::Relaxed)
                + self.after_update.load(Ordering::Relaxed)
                + self.before_delete.load(Ordering::Relaxed)
                + self.after_delete.load(Ordering::Relaxed)
        }
    }

    struct Gadget {
        id: i64,
        label: String,
        log: Arc<HookLog>,
        fail_before_create: bool,
        fail_after_create: bool,
    }

    impl Gadget {
        fn new(label: &str, log: Arc<HookLog>) -> Self {
            Self {
                id: 0,
                label: label.to_string(),
                log,
                fail_before_create: false,
                fail_after_create: false,
            }
        }
    }

    impl Model for Gadget {
        fn collection_name(&self) -> &str {
            "gadgets"
        }

        fn fields() -> &'static [FieldInfo] {
            static FIELDS: &[FieldInfo] = &[
                FieldInfo::new("id", "id", FieldType::Int)
                    .primary_key(true)
                    .omit_when_zero(true),
                FieldInfo::new("label", "label", FieldType::Text),
            ];
            FIELDS
        }

        fn to_record(&self) -> Record {
            let mut record = Record::with_capacity(2);
            record.set("id", self.id);
            record.set("label", self.label.clone());
            record
        }

        fn from_record(record: &Record) -> Result<Self> {
            Ok(Self {
                id: record.get("id").and_then(Value::as_i64).unwrap_or_default(),
                label: record
                    .get("label")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                log: Arc::new(HookLog::default()),
                fail_before_create: false,
                fail_after_create: false,
            })
        }

        fn set(&mut self, column: &str, value: Value) {
            match column {
                "id" => self.id = value.as_i64().unwrap_or_default(),
                "label" => {
                    if let Value::Text(label) = value {
                        self.label = label;
                    }
                }
                _ => {}
            }
        }
    }

    impl ModelEvents for Gadget {
        fn validate(&self) -> Result<()> {
            self.log.validate.fetch_add(1, Ordering::Relaxed);
            if self.label.is_empty() {
                return Err(Error::validation("label must not be empty"));
            }
            Ok(())
        }

        fn before_create(&mut self, _session: &Session) -> Result<()> {
            self.log.before_create.fetch_add(1, Ordering::Relaxed);
            if self.fail_before_create {
                return Err(Error::custom("before_create refused"));
            }
            Ok(())
        }

        fn after_create(&mut self, _session: &Session) -> Result<()> {
            self.log.after_create.fetch_add(1, Ordering::Relaxed);
            if self.fail_after_create {
                return Err(Error::custom("after_create failed"));
            }
            Ok(())
        }

        fn before_update(&mut self, _session: &Session) -> Result<()> {
            self.log.before_update.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn after_update(&mut self, _session: &Session) -> Result<()> {
            self.log.after_update.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn before_delete(&mut self, _session: &Session) -> Result<()> {
            self.log.before_delete.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn after_delete(&mut self, _session: &Session) -> Result<()> {
            self.log.after_delete.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn setup() -> (Session, Arc<MemoryBackend>, Arc<HookLog>) {
        let backend = Arc::new(MemoryBackend::new());
        (
            Session::new(backend.clone()),
            backend,
            Arc::new(HookLog::default()),
        )
    }

    #[test]
    fn test_save_creates_then_updates() {
        let (session, backend, log) = setup();
        let mut gadget = Gadget::new("dial", log.clone());

        session.save(&mut gadget).unwrap();
        assert!(gadget.id > 0);
        assert_eq!(log.before_create.load(Ordering::Relaxed), 1);
        assert_eq!(log.after_create.load(Ordering::Relaxed), 1);
        assert_eq!(log.before_update.load(Ordering::Relaxed), 0);

        gadget.label = "knob".into();
        session.save(&mut gadget).unwrap();
        assert_eq!(log.before_create.load(Ordering::Relaxed), 1);
        assert_eq!(log.after_update.load(Ordering::Relaxed), 1);
        assert_eq!(backend.counters().inserts(), 1);
        assert_eq!(backend.counters().updates(), 1);
    }

    #[test]
    fn test_validation_failure_aborts_before_side_effects() {
        let (session, backend, log) = setup();
        let mut gadget = Gadget::new("", log.clone());

        let err = session.save(&mut gadget).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(backend.counters().inserts(), 0);
        assert_eq!(log.before_create.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_before_create_failure_prevents_backend_call() {
        let (session, backend, log) = setup();
        let mut gadget = Gadget::new("dial", log.clone());
        gadget.fail_before_create = true;

        let err = session.save(&mut gadget).unwrap_err();
        assert_eq!(err, Error::custom("before_create refused"));
        assert_eq!(backend.counters().inserts(), 0);
        assert_eq!(gadget.id, 0);
    }

    #[test]
    fn test_after_create_failure_surfaces_after_commit_of_insert() {
        let (session, backend, log) = setup();
        let mut gadget = Gadget::new("dial", log.clone());
        gadget.fail_after_create = true;

        let err = session.save(&mut gadget).unwrap_err();
        assert_eq!(err, Error::custom("after_create failed"));
        // The insert happened and the id was written back regardless.
        assert_eq!(backend.counters().inserts(), 1);
        assert!(gadget.id > 0);
    }

    #[test]
    fn test_delete_zero_id_touches_nothing() {
        let (session, backend, log) = setup();
        let mut gadget = Gadget::new("dial", log.clone());

        let err = session.delete(&mut gadget).unwrap_err();
        assert_eq!(err, Error::ZeroItemId);
        assert_eq!(backend.counters().total_operations(), 0);
        assert_eq!(log.total(), 0);
    }

    #[test]
    fn test_delete_runs_hooks_around_backend_delete() {
        let (session, backend, log) = setup();
        let mut gadget = Gadget::new("dial", log.clone());
        session.save(&mut gadget).unwrap();

        session.delete(&mut gadget).unwrap();
        assert_eq!(log.before_delete.load(Ordering::Relaxed), 1);
        assert_eq!(log.after_delete.load(Ordering::Relaxed), 1);
        assert_eq!(backend.counters().deletes(), 1);

        let count = session
            .store("gadgets")
            .unwrap()
            .find(&[Cond::eq("id", gadget.id)])
            .count()
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_insert_skips_key_writeback() {
        let (session, _backend, log) = setup();
        let mut gadget = Gadget::new("dial", log.clone());

        let id = session
            .store("gadgets")
            .unwrap()
            .insert(&mut gadget)
            .unwrap();
        assert!(matches!(id, Value::Int(n) if n > 0));
        assert_eq!(gadget.id, 0);
        assert_eq!(log.after_create.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_rebind_reaches_the_other_sessions_backend() {
        let (session, backend, log) = setup();
        let store = session.store("gadgets").unwrap();

        let mut gadget = Gadget::new("dial", log.clone());
        session
            .run_in_transaction(|tx| store.rebind(tx)?.save(&mut gadget))
            .unwrap();

        assert_eq!(backend.counters().commits(), 1);
        let found = session
            .store("gadgets")
            .unwrap()
            .find(&[Cond::eq("id", gadget.id)])
            .count()
            .unwrap();
        assert_eq!(found, 1);
        // Rebinding never populated either session's cache with new names.
        assert!(!store.session().in_transaction());
    }
}
