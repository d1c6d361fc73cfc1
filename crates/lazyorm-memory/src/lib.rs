//! In-memory backing store for lazyorm.
//!
//! `MemoryStore` keeps one ordered map per table and enforces what a
//! relational store would: unique primary keys, NOT NULL, column types,
//! restrictive foreign keys and optimistic version checks. Flush batches are
//! applied atomically.

mod store;

pub use store::MemoryStore;
