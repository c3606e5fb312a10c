//! Ordered destination set and concurrent fan-out

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;

use super::{
    Notifier, NotifierError, NotifierResult, PagerDutyNotifier, ResilientNotifier, SlackNotifier,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::resilience::{CircuitBreakerSettings, RetryPolicy};

/// Outcome of one destination call during a fan-out
#[derive(Debug)]
pub struct Delivery<T> {
    pub destination: String,
    pub result: NotifierResult<T>,
}

/// Per-destination results of a broadcast
///
/// Partial failure is a normal outcome; callers log it and move on.
#[derive(Debug, Default)]
pub struct FanOutReport {
    pub delivered: Vec<String>,
    pub failed: Vec<NotifierError>,
}

impl FanOutReport {
    pub fn record<T>(&mut self, delivery: &Delivery<T>) {
        match &delivery.result {
            Ok(_) => self.delivered.push(delivery.destination.clone()),
            Err(e) => self.failed.push(e.clone()),
        }
    }

    /// Nothing failed (an empty broadcast is complete)
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Enabled destinations in configuration order
#[derive(Clone, Default)]
pub struct Destinations {
    entries: Vec<Arc<ResilientNotifier>>,
}

impl Destinations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a destination, replacing any existing one with the same name
    pub fn push(&mut self, notifier: Arc<ResilientNotifier>) {
        self.entries.retain(|n| n.name() != notifier.name());
        self.entries.push(notifier);
    }

    #[must_use]
    pub fn with(mut self, notifier: Arc<ResilientNotifier>) -> Self {
        self.push(notifier);
        self
    }

    /// Wrap a raw adapter with the configured breaker and retry policy
    #[must_use]
    pub fn with_adapter(self, adapter: Arc<dyn Notifier>, config: &Config) -> Self {
        self.with(Arc::new(ResilientNotifier::new(
            adapter,
            CircuitBreakerSettings::from(&config.circuit_breaker),
            RetryPolicy::from(&config.retry),
        )))
    }

    /// Build every destination listed in `config.destinations`
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut destinations = Self::new();
        for name in &config.destinations {
            let adapter: Arc<dyn Notifier> = match name.as_str() {
                "slack" => {
                    let slack = config.slack.as_ref().ok_or_else(|| {
                        Error::Validation("slack is enabled but not configured".to_string())
                    })?;
                    Arc::new(SlackNotifier::new(slack)?)
                }
                "pagerduty" => {
                    let pagerduty = config.pagerduty.as_ref().ok_or_else(|| {
                        Error::Validation("pagerduty is enabled but not configured".to_string())
                    })?;
                    Arc::new(PagerDutyNotifier::new(pagerduty)?)
                }
                other => {
                    return Err(Error::Validation(format!("unknown destination '{}'", other)))
                }
            };
            tracing::info!(destination = %name, "Destination enabled");
            destinations = destinations.with_adapter(adapter, config);
        }
        Ok(destinations)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ResilientNotifier>> {
        self.entries.iter().find(|n| n.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResilientNotifier>> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|n| n.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ack-capable destinations other than `origin`
    pub fn ack_targets(&self, origin: &str) -> Vec<Arc<ResilientNotifier>> {
        self.entries
            .iter()
            .filter(|n| n.supports_ack() && n.name() != origin)
            .cloned()
            .collect()
    }

    /// Run `op` against every target concurrently
    ///
    /// Completion order is unspecified; results come back in target order.
    pub async fn broadcast<T, F, Fut>(targets: Vec<Arc<ResilientNotifier>>, op: F) -> Vec<Delivery<T>>
    where
        F: Fn(Arc<ResilientNotifier>) -> Fut,
        Fut: Future<Output = NotifierResult<T>>,
    {
        join_all(targets.into_iter().map(|notifier| {
            let destination = notifier.name().to_string();
            let call = op(notifier);
            async move {
                Delivery {
                    destination,
                    result: call.await,
                }
            }
        }))
        .await
    }
}

impl std::fmt::Debug for Destinations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
