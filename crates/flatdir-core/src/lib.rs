//! flatdir Core: Embedded Flat-File User Directory
//!
//! A small user directory where RAM is the working surface and a single
//! flat file is the durable copy.
//!
//! # Architecture
//!
//! - **Read path**: Serve directly from the RAM hash table
//! - **Write path**: Mutate RAM under a write lock, bump the change generation
//! - **Flush path**: Serialize the whole set, replace the file via temp + rename
//!
//! # No Host Dependencies
//!
//! This crate knows nothing about identity hosts, sessions or transactions.
//! The host-facing unit-of-work and session cache live in `flatdir-provider`.

pub mod codec;
pub mod config;
pub mod durability;
pub mod error;
pub mod query;
pub mod record;
pub mod store;
pub mod tracker;

// Re-export key types for convenience
pub use config::{Config, DuplicatePolicy, EmailLookup, KeyChangePolicy};
pub use error::{DirError, DirResult};
pub use record::UserRecord;
pub use store::RecordStore;
pub use tracker::ChangeTracker;
