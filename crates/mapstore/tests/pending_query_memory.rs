//! Deferred query semantics against the in-memory backend: the explicit
//! filter guard, builder state, cursor iteration, and query-level writes
//! that bypass entity hooks.

use mapstore::prelude::*;
use mapstore_memory::MemoryBackend;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

static DELETE_HOOKS_FIRED: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
struct Product {
    id: i64,
    name: String,
    price: i64,
}

impl Product {
    fn new(name: &str, price: i64) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            price,
        }
    }
}

impl Model for Product {
    fn collection_name(&self) -> &str {
        "products"
    }

    fn fields() -> &'static [FieldInfo] {
        static FIELDS: &[FieldInfo] = &[
            FieldInfo::new("id", "id", FieldType::Int)
                .primary_key(true)
                .omit_when_zero(true),
            FieldInfo::new("name", "name", FieldType::Text),
            FieldInfo::new("price", "price", FieldType::Int),
        ];
        FIELDS
    }

    fn to_record(&self) -> Record {
        let mut record = Record::with_capacity(3);
        record.set("id", self.id);
        record.set("name", self.name.clone());
        record.set("price", self.price);
        record
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: record.get("id").and_then(Value::as_i64).unwrap_or_default(),
            name: record
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            price: record
                .get("price")
                .and_then(Value::as_i64)
                .unwrap_or_default(),
        })
    }

    fn set(&mut self, column: &str, value: Value) {
        match column {
            "id" => self.id = value.as_i64().unwrap_or_default(),
            "name" => {
                if let Value::Text(name) = value {
                    self.name = name;
                }
            }
            "price" => self.price = value.as_i64().unwrap_or_default(),
            _ => {}
        }
    }
}

impl ModelEvents for Product {
    fn before_delete(&mut self, _session: &Session) -> Result<()> {
        DELETE_HOOKS_FIRED.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
    }

    fn after_delete(&mut self, _session: &Session) -> Result<()> {
        DELETE_HOOKS_FIRED.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
    }
}

fn seeded_session() -> (Session, Store) {
    let session = Session::new(Arc::new(MemoryBackend::new()));
    let store = session.store("products").expect("products store");
    for (name, price) in [("anvil", 120), ("feather", 3), ("hammer", 45)] {
        session
            .save(&mut Product::new(name, price))
            .expect("seed product");
    }
    (session, store)
}

#[test]
fn memory_terminals_demand_an_explicit_filter() {
    let (_session, store) = seeded_session();

    assert_eq!(store.find(&[]).count().expect_err("guard"), Error::InvalidQuery);
    assert_eq!(
        store.find(&[]).all::<Product>().expect_err("guard"),
        Error::InvalidQuery
    );
    assert_eq!(
        store.find(&[]).one::<Product>().expect_err("guard"),
        Error::InvalidQuery
    );

    // An explicit empty filter is the opt-in for "match all".
    assert_eq!(store.find(&[]).filter(&[]).count().expect("count"), 3);
}

#[test]
fn memory_seed_terms_constrain_the_query() {
    let (_session, store) = seeded_session();

    let cheap: Vec<Product> = store
        .find(&[Cond::lt("price", 50_i64)])
        .order_by(&[Order::asc("price")])
        .all()
        .expect("query");
    let names: Vec<&str> = cheap.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["feather", "hammer"]);
}

#[test]
fn memory_builder_state_shapes_the_result() {
    let (_session, store) = seeded_session();

    let page: Vec<Product> = store
        .find(&[])
        .filter(&[])
        .order_by(&[Order::desc("price")])
        .offset(1)
        .limit(1)
        .all()
        .expect("query");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].name, "hammer");
}

#[test]
fn memory_projection_drops_unselected_columns() {
    let (_session, store) = seeded_session();

    let mut query = store
        .find(&[Cond::eq("name", "anvil")])
        .select(["id", "name"]);
    let product: Product = query.one().expect("query").expect("row");
    assert!(product.id > 0);
    assert_eq!(product.name, "anvil");
    // The projected-away column decodes as its default.
    assert_eq!(product.price, 0);
}

#[test]
fn memory_next_pulls_until_exhaustion() {
    let (_session, store) = seeded_session();

    let mut query = store.find(&[]).filter(&[]).order_by(&[Order::asc("price")]);
    let mut names = Vec::new();
    while let Some(product) = query.next::<Product>().expect("next") {
        names.push(product.name);
    }
    assert_eq!(names, vec!["feather", "hammer", "anvil"]);

    // Exhausted for good: further pulls keep signalling "no more rows".
    assert!(query.next::<Product>().expect("after end").is_none());
    assert!(query.err().is_none());
    assert!(query.close().is_ok());
}

#[test]
fn memory_query_delete_bypasses_entity_hooks() {
    let (session, store) = seeded_session();
    let before = DELETE_HOOKS_FIRED.load(AtomicOrdering::Relaxed);

    store
        .find(&[Cond::eq("name", "anvil")])
        .delete()
        .expect("query delete");

    assert_eq!(store.find(&[]).filter(&[]).count().expect("count"), 2);
    assert_eq!(DELETE_HOOKS_FIRED.load(AtomicOrdering::Relaxed), before);

    // Store-level delete still runs the hooks.
    let mut hammer: Product = store
        .find(&[Cond::eq("name", "hammer")])
        .one()
        .expect("query")
        .expect("row");
    session.delete(&mut hammer).expect("store delete");
    assert_eq!(
        DELETE_HOOKS_FIRED.load(AtomicOrdering::Relaxed),
        before + 2
    );
}

#[test]
fn memory_query_update_rewrites_matching_rows() {
    let (_session, store) = seeded_session();

    let mut values = Record::new();
    values.set("price", 99_i64);
    store
        .find(&[Cond::eq("name", "feather")])
        .update(values)
        .expect("query update");

    let feather: Product = store
        .find(&[Cond::eq("name", "feather")])
        .one()
        .expect("query")
        .expect("row");
    assert_eq!(feather.price, 99);
}
