//! Lifecycle hooks for persisted entities.

use crate::Session;
use mapstore_core::{Model, Result};

/// Optional lifecycle callbacks around store operations.
///
/// Every method is a no-op by default, so entities override only the hooks
/// they care about. All hooks receive the active session and may issue
/// further operations through it; inside a transaction-scoped session the
/// hook's writes join the same transaction.
///
/// Ordering and failure semantics, per store operation:
///
/// - `validate` runs first on save and aborts before any side effect.
/// - `before_*` hooks abort the operation with no backend call made.
/// - `after_*` hooks run once the backend call has succeeded; their error
///   is surfaced to the caller, but the backend effect is already in place
///   and is not undone by the store. Callers needing atomicity wrap the
///   operation in [`Session::run_in_transaction`].
///
/// # Example
///
/// ```ignore
/// impl ModelEvents for Account {
///     fn validate(&self) -> Result<()> {
///         if self.name.is_empty() {
///             return Err(Error::validation("account name must not be empty"));
///         }
///         Ok(())
///     }
///
///     fn after_create(&mut self, session: &Session) -> Result<()> {
///         session.save(&mut AuditEntry::created(self))
///     }
/// }
/// ```
pub trait ModelEvents: Model {
    /// Validate the entity before any save side effect.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Called before the entity is inserted.
    #[allow(unused_variables)]
    fn before_create(&mut self, session: &Session) -> Result<()> {
        Ok(())
    }

    /// Called after the entity has been inserted and its primary key
    /// assigned.
    #[allow(unused_variables)]
    fn after_create(&mut self, session: &Session) -> Result<()> {
        Ok(())
    }

    /// Called before the entity's row is updated.
    #[allow(unused_variables)]
    fn before_update(&mut self, session: &Session) -> Result<()> {
        Ok(())
    }

    /// Called after the entity's row has been updated.
    #[allow(unused_variables)]
    fn after_update(&mut self, session: &Session) -> Result<()> {
        Ok(())
    }

    /// Called before the entity's row is deleted.
    #[allow(unused_variables)]
    fn before_delete(&mut self, session: &Session) -> Result<()> {
        Ok(())
    }

    /// Called after the entity's row has been deleted.
    #[allow(unused_variables)]
    fn after_delete(&mut self, session: &Session) -> Result<()> {
        Ok(())
    }
}
