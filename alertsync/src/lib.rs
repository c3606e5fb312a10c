//! # alertsync
//!
//! Alert routing core: turns monitoring reports into alerts, fans them out
//! to chat and paging destinations, and keeps acknowledgments in sync
//! between those destinations.
//!
//! ## Features
//!
//! - **Ingestion**: fingerprint dedup window, resend interval, resolution fan-out
//! - **Silences**: time-boxed suppression by alert ID, fingerprint, instance or labels
//! - **Ack sync**: one destination's ack becomes authoritative, propagated to
//!   the others without echoing back to its origin
//! - **Resilience**: retry with capped exponential backoff, circuit breaker
//!   per destination, reconnect supervisor for long-lived connections
//! - **Storage**: in-memory, embedded libsql (`turso` feature) and
//!   PostgreSQL (`database` feature), all with optimistic locking
//!
//! ## Example
//!
//! ```rust,no_run
//! use alertsync::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let ctx = ServiceContext::from_config(config).await?;
//!     let shutdown = CancellationToken::new();
//!     let sweeper = SilenceService::new(ctx.clone()).spawn_sweeper(shutdown.clone());
//!
//!     let report = AlertReport {
//!         fingerprint: "fp-1".to_string(),
//!         name: "HighCPU".to_string(),
//!         instance: "srv-1".to_string(),
//!         severity: Severity::Critical,
//!         fired_at: ctx.now(),
//!         ..Default::default()
//!     };
//!     let ingestion = AlertIngestor::new(ctx.clone()).ingest(&report, &shutdown).await?;
//!     println!("{}", ingestion.outcome);
//!
//!     shutdown.cancel();
//!     let _ = sweeper.await;
//!     shutdown_tracing();
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod ids;
pub mod matching;
pub mod notifier;
pub mod observability;
pub mod repository;
pub mod resilience;
pub mod service;

pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{Config, StorageBackend};
    pub use crate::context::{ServiceContext, ServiceContextBuilder};
    pub use crate::domain::{
        AckEvent, Actor, Alert, AlertReport, AlertState, Severity, SilenceMark,
        SilenceSelectors, SilenceStatus, Source,
    };
    pub use crate::error::{Error, ErrorClass, Result};
    pub use crate::ids::{AckEventId, AlertId, SilenceId};
    pub use crate::notifier::{
        Acknowledger, Destinations, FanOutReport, Notifier, NotifierError, NotifierErrorKind,
        ResilientNotifier,
    };
    pub use crate::observability::{init_tracing, shutdown_tracing};
    pub use crate::repository::{
        AckEventRepository, AlertRepository, MemoryStore, Repositories, RepositoryError,
        SilenceRepository,
    };
    pub use crate::resilience::{CircuitBreaker, ReconnectSupervisor, RetryPolicy};
    pub use crate::service::{
        AckAction, AckOutcome, AckRequest, AckSynchronizer, AlertIngestor, AlertRef,
        IngestOutcome, Ingestion, NewSilence, SilenceService,
    };

    #[cfg(feature = "database")]
    pub use crate::repository::PgStore;

    #[cfg(feature = "turso")]
    pub use crate::repository::TursoStore;
}
