// src/memory/mod.rs
//! In-process memory store
//!
//! Records are `(value, metadata)` pairs kept in insertion order. Search
//! ranks them with a token-overlap score (see [`scoring`]).
//!
//! - **Native**: `parking_lot::RwLock`, lowercase value and token set
//!   computed once per record at save time; concurrent searches share
//!   the read lock
//! - **Fallback**: `std::sync::Mutex<Vec<_>>`, everything derived per search
//!
//! Both rank identically.

pub mod scoring;
pub mod store;

pub use store::{AcceleratedMemoryStorage, MemoryRecord, Metadata};
