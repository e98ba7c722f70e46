//! Mapstore - a data mapper for collection-oriented storage backends.
//!
//! Mapstore binds plain domain entities to records in a generic,
//! collection-oriented backend, providing:
//!
//! - Typed entities with explicit per-type field descriptors
//! - Lifecycle hooks (validate, before/after create/update/delete)
//! - Sessions with memoized per-collection stores
//! - Transaction-scoped sessions and store rebinding
//! - A deferred query builder that stays backend-agnostic until one
//!   terminal call
//!
//! # Quick Start
//!
//! ```ignore
//! use mapstore::prelude::*;
//! use mapstore_memory::MemoryBackend;
//! use std::sync::Arc;
//!
//! struct Account {
//!     id: i64,
//!     name: String,
//! }
//!
//! impl Model for Account {
//!     fn collection_name(&self) -> &str {
//!         "accounts"
//!     }
//!     // fields(), to_record(), from_record(), set() ...
//! #   fn fields() -> &'static [FieldInfo] { unimplemented!() }
//! #   fn to_record(&self) -> Record { unimplemented!() }
//! #   fn from_record(_: &Record) -> Result<Self> { unimplemented!() }
//! #   fn set(&mut self, _: &str, _: Value) {}
//! }
//!
//! impl ModelEvents for Account {}
//!
//! fn example() -> Result<()> {
//!     let session = Session::new(Arc::new(MemoryBackend::new()));
//!
//!     // Zero primary key: the create path runs and the assigned id is
//!     // written back into the entity.
//!     let mut account = Account { id: 0, name: "Pressly".into() };
//!     session.save(&mut account)?;
//!
//!     // Nonzero primary key: the update path runs instead.
//!     account.name = "Pressly Inc".into();
//!     session.save(&mut account)?;
//!
//!     // Deferred query: nothing executes until a terminal call.
//!     let found: Option<Account> = session
//!         .store("accounts")?
//!         .find(&[Cond::eq("id", account.id)])
//!         .one()?;
//!
//!     session.delete(&mut account)?;
//!     let _ = found;
//!     Ok(())
//! }
//! ```
//!
//! # Transactions
//!
//! ```ignore
//! session.run_in_transaction(|tx| {
//!     tx.save(&mut first)?;
//!     tx.save(&mut second)
//! })?;
//! ```
//!
//! A closure returning an error rolls the transaction back and the error
//! propagates unchanged; a rollback failure is chained onto it, never
//! substituted for it.

// Re-export all public types from sub-crates
pub use mapstore_core::{
    // Backend contract
    Backend,
    BackendError,
    BackendErrorKind,
    CmpOp,
    Collection,
    Cond,
    Context,
    // Core types
    Error,
    FieldInfo,
    FieldType,
    Model,
    ModelSchema,
    Order,
    OrderDirection,
    QueryHandle,
    Record,
    Result,
    Transaction,
    Value,
    primary_key_of,
    schema_of,
};

pub use mapstore_query::PendingQuery;

pub use mapstore_session::{ModelEvents, Session, Store};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use mapstore::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // Backend contract
        Backend,
        // Filtering and ordering
        CmpOp,
        Collection,
        Cond,
        Context,
        // Core traits and types (Model is the trait)
        Error,
        FieldInfo,
        FieldType,
        Model,
        ModelEvents,
        Order,
        OrderDirection,
        // Query building
        PendingQuery,
        QueryHandle,
        Record,
        Result,
        // Session layer
        Session,
        Store,
        Transaction,
        Value,
    };
}
