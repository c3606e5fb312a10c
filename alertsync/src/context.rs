//! Service context
//!
//! Everything a component needs (configuration, clock, repositories,
//! destinations) is built once at startup and handed to each service
//! constructor. There are no process-wide singletons.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StorageBackend};
use crate::error::{Error, Result};
use crate::notifier::Destinations;
use crate::repository::{
    AckEventRepository, AlertRepository, MemoryStore, Repositories, SilenceRepository,
};

/// Shared dependencies, cheap to clone
#[derive(Clone)]
pub struct ServiceContext {
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    repositories: Repositories,
    destinations: Destinations,
}

impl ServiceContext {
    pub fn builder() -> ServiceContextBuilder {
        ServiceContextBuilder::new()
    }

    /// Validate `config`, open the configured store and build every destination
    pub async fn from_config(config: Config) -> Result<Self> {
        Self::builder().config(config).build().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repositories
    }

    pub fn alerts(&self) -> &dyn AlertRepository {
        self.repositories.alerts.as_ref()
    }

    pub fn ack_events(&self) -> &dyn AckEventRepository {
        self.repositories.ack_events.as_ref()
    }

    pub fn silences(&self) -> &dyn SilenceRepository {
        self.repositories.silences.as_ref()
    }

    pub fn destinations(&self) -> &Destinations {
        &self.destinations
    }
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("service", &self.config.service.name)
            .field("storage", &self.config.storage.backend)
            .field("destinations", &self.destinations)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ServiceContext`]
///
/// Anything not set explicitly is derived from the configuration:
/// repositories from `storage`, destinations from `destinations`, and the
/// system clock.
#[derive(Default)]
pub struct ServiceContextBuilder {
    config: Option<Config>,
    clock: Option<Arc<dyn Clock>>,
    repositories: Option<Repositories>,
    destinations: Option<Destinations>,
}

impl ServiceContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn repositories(mut self, repositories: Repositories) -> Self {
        self.repositories = Some(repositories);
        self
    }

    pub fn destinations(mut self, destinations: Destinations) -> Self {
        self.destinations = Some(destinations);
        self
    }

    /// Validate the configuration and open whatever was not provided
    pub async fn build(self) -> Result<ServiceContext> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let repositories = match self.repositories {
            Some(repositories) => repositories,
            None => open_repositories(&config).await?,
        };
        let destinations = match self.destinations {
            Some(destinations) => destinations,
            None => Destinations::from_config(&config)?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        tracing::info!(
            service = %config.service.name,
            storage = ?config.storage.backend,
            destinations = ?destinations.names(),
            "Service context ready"
        );

        Ok(ServiceContext {
            config: Arc::new(config),
            clock,
            repositories,
            destinations,
        })
    }
}

/// Open the repository backend selected by `storage.backend`
pub async fn open_repositories(config: &Config) -> Result<Repositories> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(Repositories::from_store(Arc::new(MemoryStore::new()))),
        StorageBackend::Turso => open_turso(config).await,
        StorageBackend::Postgres => open_postgres(config).await,
    }
}

#[cfg(feature = "turso")]
async fn open_turso(config: &Config) -> Result<Repositories> {
    let turso = config
        .storage
        .turso
        .as_ref()
        .ok_or_else(|| Error::Validation("storage.turso section is missing".to_string()))?;
    let store = crate::repository::TursoStore::open(turso).await?;
    Ok(Repositories::from_store(Arc::new(store)))
}

#[cfg(not(feature = "turso"))]
async fn open_turso(_config: &Config) -> Result<Repositories> {
    Err(Error::Validation(
        "storage backend 'turso' requires the 'turso' feature".to_string(),
    ))
}

#[cfg(feature = "database")]
async fn open_postgres(config: &Config) -> Result<Repositories> {
    let database = config
        .storage
        .database
        .as_ref()
        .ok_or_else(|| Error::Validation("storage.database section is missing".to_string()))?;
    let store = crate::repository::PgStore::connect(database).await?;
    Ok(Repositories::from_store(Arc::new(store)))
}

#[cfg(not(feature = "database"))]
async fn open_postgres(_config: &Config) -> Result<Repositories> {
    Err(Error::Validation(
        "storage backend 'postgres' requires the 'database' feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_default_config_builds_memory_context() {
        let ctx = ServiceContext::from_config(Config::default()).await.unwrap();
        assert!(ctx.destinations().is_empty());
        assert_eq!(ctx.config().storage.backend, StorageBackend::Memory);
    }

    #[tokio::test]
    async fn test_builder_uses_injected_clock() {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        let ctx = ServiceContext::builder()
            .clock(Arc::new(ManualClock::new(start)))
            .build()
            .await
            .unwrap();
        assert_eq!(ctx.now(), start);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = Config::default();
        config.alerting.resend_interval_secs = config.alerting.deduplication_window_secs;
        let err = ServiceContext::from_config(config).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[cfg(not(feature = "turso"))]
    #[tokio::test]
    async fn test_backend_without_feature_is_a_validation_error() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::Turso;
        config.storage.turso = Some(crate::config::TursoConfig {
            path: "alertsync.db".into(),
            busy_timeout_ms: 5000,
            max_retries: 0,
            retry_delay_secs: 0,
        });
        assert!(matches!(
            open_repositories(&config).await,
            Err(Error::Validation(_))
        ));
    }
}
