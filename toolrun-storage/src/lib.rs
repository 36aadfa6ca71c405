//! Durable record of every run's context
//!
//! The [`ContextStore`] persists one [`ExecutionContext`] document per run
//! id behind a [`ContextBackend`]. The backend is chosen once, at
//! construction, from [`ContextStoreConfig`](toolrun_config::ContextStoreConfig).
//!
//! Two backends ship with the crate:
//! - [`MemoryContextBackend`]: process-local, optional TTL
//! - [`SqliteContextBackend`]: durable, via `sqlx` (feature `sqlite`)

pub mod backend;
pub mod backends;
pub mod context;
pub mod error;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::ContextBackend;
pub use backends::memory::MemoryContextBackend;
#[cfg(feature = "sqlite")]
pub use backends::sqlite::SqliteContextBackend;
pub use context::{ContextFilter, ContextUpdate, ExecutionContext};
pub use error::{ContextStoreError, ContextStoreResult};
pub use store::ContextStore;
