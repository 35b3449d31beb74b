// src/serialization/mod.rs
//! Message serialization
//!
//! ```text
//! Message ──encode──▶ {"id":..,"sender":..,"recipient":..,"content":..,"timestamp":..}
//!         ◀─decode───
//! ```
//!
//! The native codec goes through derived serde impls; the fallback builds
//! and inspects `serde_json::Value` trees by hand. Output text is
//! byte-identical between the two.

pub mod codec;

pub use codec::{Message, MessageCodec};
