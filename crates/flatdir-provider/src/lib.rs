//! flatdir provider for identity hosts
//!
//! Exposes a `flatdir_core::RecordStore` to an identity-management host as
//! a federated user source, with per-operation views and deferred commits.
//!
//! # Architecture
//!
//! The host drives everything through one `FileUserProvider` per operation:
//! - Lookups go through a `SessionCache`, so one user maps to one `UserView`
//! - A view stages writes on its `UnitOfWork` and enlists it on first write
//! - The host's `TransactionManager` commits enlisted units when the
//!   operation ends; commit applies the staged record and flushes the store
//! - Host ids take the form `f:<component-id>:<key>`; only `<key>` reaches
//!   the store

pub mod cache;
pub mod credential;
pub mod factory;
pub mod host;
pub mod provider;
pub mod storage_id;
pub mod tx;
pub mod view;

pub use cache::SessionCache;
pub use factory::{ProviderFactory, PROVIDER_ID};
pub use host::{AttributeStore, HostOperation, MemoryAttributes, TransactionManager};
pub use provider::{FileUserProvider, ProviderConfig};
pub use storage_id::StorageId;
pub use tx::{FlushFailurePolicy, Transaction, TxState, UnitOfWork};
pub use view::{UserView, FAVOURITE_LINE};
