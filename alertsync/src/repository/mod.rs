//! Persistence for alerts, acknowledgment history and silences
//!
//! Three backends implement the same traits:
//!
//! - [`MemoryStore`]: process-local maps, used in tests and single-node setups
//! - `TursoStore` (feature `turso`): embedded libsql file with one writer
//! - `PgStore` (feature `database`): PostgreSQL through a sqlx pool
//!
//! All of them enforce the optimistic-concurrency contract described in
//! [`traits`].

mod error;
mod memory;
pub mod traits;

#[cfg(feature = "database")]
mod postgres;
#[cfg(feature = "turso")]
mod turso;

pub use error::{EntityRef, RepositoryError, RepositoryErrorKind, RepositoryOperation};
pub use memory::MemoryStore;
pub use traits::{
    AckEventRepository, AlertRepository, Repositories, RepositoryResult, SilenceRepository,
};

#[cfg(feature = "database")]
pub use postgres::PgStore;
#[cfg(feature = "turso")]
pub use turso::TursoStore;
