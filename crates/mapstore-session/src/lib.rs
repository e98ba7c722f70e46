//! Session and store layer for mapstore.
//!
//! `mapstore-session` is the **unit-of-work layer**. A [`Session`] owns a
//! backend handle (a plain connection or an active transaction) and hands
//! out per-collection [`Store`]s that run the hook-and-persist algorithm.
//!
//! # Role In The Architecture
//!
//! - **Store cache**: collection handles are resolved once per name and
//!   memoized for the session's lifetime.
//! - **Transaction propagation**: [`Session::run_in_transaction`] spawns a
//!   transaction-scoped session with its own empty cache; stores rebind
//!   into it without touching the original session.
//! - **Lifecycle hooks**: [`ModelEvents`] callbacks bracket every create,
//!   update, and delete, uniformly receiving the active session.
//!
//! # Design Philosophy
//!
//! - **Explicit over implicit**: no hidden flush, no savepoints; a nested
//!   `run_in_transaction` joins the enclosing transaction.
//! - **Errors stay primary**: a rollback failure is chained onto the error
//!   that caused the unwind, never substituted for it.
//! - **Synchronous and reentrant**: all blocking happens inside backend
//!   calls; the session only guards its own cache.
//!
//! # Example
//!
//! ```ignore
//! let session = Session::new(backend);
//!
//! // Create: zero primary key selects the insert path and the
//! // backend-assigned id is written back into the entity.
//! let mut account = Account { id: 0, name: "Pressly".into() };
//! session.save(&mut account)?;
//!
//! // Update: nonzero primary key selects the update path.
//! account.name = "Pressly Inc".into();
//! session.save(&mut account)?;
//!
//! // All-or-nothing work happens in a transaction-scoped session.
//! session.run_in_transaction(|tx| {
//!     tx.save(&mut Account { id: 0, name: "Second".into() })?;
//!     tx.save(&mut Account { id: 0, name: "Third".into() })
//! })?;
//! ```

pub mod events;
pub mod store;

pub use events::ModelEvents;
pub use store::Store;

use mapstore_core::{Backend, Collection, Context, Error, Model, Result, Transaction};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

// ============================================================================
// Session
// ============================================================================

/// The backend handle a session operates through.
#[derive(Clone)]
enum Handle {
    /// Plain connection: backend auto-commit semantics apply.
    Plain(Arc<dyn Backend>),
    /// Active transaction, shared with every session cloned from it.
    Tx(Arc<TxState>),
}

/// Shared state of one open transaction.
struct TxState {
    tx: Arc<dyn Transaction>,
    /// Set once commit or rollback has run; finalizing twice reports
    /// `MissingTransaction` because no transaction is active anymore.
    finalized: Mutex<bool>,
}

struct SessionInner {
    handle: Handle,
    cx: Context,
    collections: Mutex<HashMap<String, Arc<dyn Collection>>>,
}

/// A unit of work: owns a backend handle and memoizes per-collection
/// stores.
///
/// Sessions are cheap to clone (shared internals). A session is either
/// **plain**, where commit/rollback fail with
/// [`Error::MissingTransaction`], or **transactional**, in which case
/// commit/rollback are each meaningful exactly once. A transactional
/// session must be used serially; the backend transaction is the single
/// point of mutual exclusion.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session over a plain backend connection.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::build(Handle::Plain(backend), Context::none())
    }

    /// Bind a session to an already-open backend transaction.
    ///
    /// The session behaves like one created by
    /// [`Session::run_in_transaction`], except the commit/rollback
    /// lifecycle belongs to whoever opened the transaction.
    pub fn bind_transaction(tx: Arc<dyn Transaction>) -> Self {
        Self::build(
            Handle::Tx(Arc::new(TxState {
                tx,
                finalized: Mutex::new(false),
            })),
            Context::none(),
        )
    }

    fn build(handle: Handle, cx: Context) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                handle,
                cx,
                collections: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Derive a session carrying `cx`, forwarded to every backend call.
    ///
    /// The derived session shares the backend handle (including any open
    /// transaction) but starts with an empty store cache.
    #[must_use]
    pub fn with_context(&self, cx: Context) -> Session {
        Self::build(self.inner.handle.clone(), cx)
    }

    /// The opaque context forwarded to backend calls.
    pub fn context(&self) -> &Context {
        &self.inner.cx
    }

    /// Whether this session is transaction-scoped.
    pub fn in_transaction(&self) -> bool {
        matches!(self.inner.handle, Handle::Tx(_))
    }

    /// Resolve a collection handle directly from the backend, bypassing
    /// the session cache. Used by store rebinding.
    pub(crate) fn resolve_collection(&self, name: &str) -> Result<Arc<dyn Collection>> {
        match &self.inner.handle {
            Handle::Plain(backend) => backend.collection(&self.inner.cx, name),
            Handle::Tx(state) => state.tx.collection(&self.inner.cx, name),
        }
    }

    /// Get the store for a collection name, memoizing the resolved
    /// collection handle.
    pub fn store(&self, name: &str) -> Result<Store> {
        if name.is_empty() {
            return Err(Error::UnknownCollection);
        }

        {
            let cache = self
                .inner
                .collections
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(collection) = cache.get(name) {
                return Ok(Store::new(Arc::clone(collection), self.clone()));
            }
        }

        // Resolution may hit the backend; keep it outside the lock.
        let collection = self.resolve_collection(name)?;

        let mut cache = self
            .inner
            .collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let collection = Arc::clone(cache.entry(name.to_string()).or_insert(collection));
        Ok(Store::new(collection, self.clone()))
    }

    /// Get the store for an entity's declared collection.
    pub fn store_for<M: Model>(&self, item: &M) -> Result<Store> {
        self.store(item.collection_name())
    }

    /// Save an entity through its declared collection's store.
    pub fn save<M: Model + ModelEvents>(&self, item: &mut M) -> Result<()> {
        self.store_for(item)?.save(item)
    }

    /// Delete an entity through its declared collection's store.
    pub fn delete<M: Model + ModelEvents>(&self, item: &mut M) -> Result<()> {
        self.store_for(item)?.delete(item)
    }

    /// Run `f` inside a transaction.
    ///
    /// On a plain session: begins a backend transaction, invokes `f` with a
    /// transaction-scoped session (fresh store cache, inherited context),
    /// commits when `f` returns `Ok`, rolls back when it returns `Err` and
    /// propagates the original error, chaining the rollback failure via
    /// [`Error::Rollback`] when rolling back itself fails.
    ///
    /// On an already-transactional session: `f` runs against this session,
    /// joining the open transaction. No savepoints are created and the
    /// transaction owner keeps control of commit/rollback.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn run_in_transaction<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Session) -> Result<()>,
    {
        let Handle::Plain(backend) = &self.inner.handle else {
            tracing::debug!("joining enclosing transaction");
            return f(self);
        };

        let tx = backend.begin(&self.inner.cx)?;
        let scoped = Self::build(
            Handle::Tx(Arc::new(TxState {
                tx,
                finalized: Mutex::new(false),
            })),
            self.inner.cx.clone(),
        );

        match f(&scoped) {
            Ok(()) => {
                tracing::debug!("committing transaction");
                scoped.commit()
            }
            Err(err) => {
                tracing::debug!(error = %err, "rolling back transaction");
                match scoped.rollback() {
                    Ok(()) => Err(err),
                    Err(rollback_err) => Err(Error::Rollback {
                        original: Box::new(err),
                        rollback: Box::new(rollback_err),
                    }),
                }
            }
        }
    }

    /// Commit the session's transaction.
    ///
    /// Fails with [`Error::MissingTransaction`] on a plain session or when
    /// the transaction was already finalized.
    pub fn commit(&self) -> Result<()> {
        self.finalize(|state, cx| state.tx.commit(cx))
    }

    /// Roll back the session's transaction.
    ///
    /// Fails with [`Error::MissingTransaction`] on a plain session or when
    /// the transaction was already finalized.
    pub fn rollback(&self) -> Result<()> {
        self.finalize(|state, cx| state.tx.rollback(cx))
    }

    fn finalize<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&TxState, &Context) -> Result<()>,
    {
        let Handle::Tx(state) = &self.inner.handle else {
            return Err(Error::MissingTransaction);
        };
        let mut finalized = state
            .finalized
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *finalized {
            return Err(Error::MissingTransaction);
        }
        *finalized = true;
        op(state, &self.inner.cx)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cached = self
            .inner
            .collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("Session")
            .field("transactional", &self.in_transaction())
            .field("cached_collections", &cached)
            .finish()
    }
}
