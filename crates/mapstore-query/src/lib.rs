//! Deferred queries for mapstore.
//!
//! `mapstore-query` holds query shape (filter terms, limit, offset, sort,
//! projection, grouping) away from the backend until one terminal call
//! translates the whole accumulated state into a single backend execution.
//!
//! # Role In The Architecture
//!
//! - Built by `Store::find`, bound to one collection and one session context
//! - Backend-agnostic until a terminal method runs
//! - Caches the executed backend cursor so pull-based iteration with
//!   [`PendingQuery::next`] keeps reading the same result set

pub mod pending;

pub use pending::PendingQuery;
