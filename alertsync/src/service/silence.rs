//! Silence lifecycle and expiry sweeping

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::ServiceContext;
use crate::domain::{Actor, Alert, SilenceMark, SilenceSelectors, Source};
use crate::error::{Error, Result};
use crate::ids::SilenceId;

/// Parameters for a new silence
#[derive(Debug, Clone)]
pub struct NewSilence {
    pub selectors: SilenceSelectors,
    /// Defaults to now
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: DateTime<Utc>,
    pub actor: Actor,
    pub reason: String,
    pub source: Source,
}

#[derive(Debug, Clone)]
pub struct SilenceService {
    ctx: ServiceContext,
}

impl SilenceService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Store a new silence
    ///
    /// Needs at least one selector and an end after the start.
    pub async fn create(&self, request: NewSilence) -> Result<SilenceMark> {
        if request.selectors.is_empty() {
            return Err(Error::Validation(
                "a silence needs at least one selector".to_string(),
            ));
        }
        let now = self.ctx.now();
        let start_at = request.start_at.unwrap_or(now);
        if request.end_at <= start_at {
            return Err(Error::Validation(format!(
                "silence must end after it starts ({} <= {})",
                request.end_at, start_at
            )));
        }

        let silence = SilenceMark::new(
            request.selectors,
            start_at,
            request.end_at,
            &request.actor,
            request.reason,
            request.source,
            now,
        );
        self.ctx.silences().save(&silence).await?;

        tracing::info!(
            silence_id = %silence.id,
            created_by = %silence.created_by,
            source = %silence.source,
            end_at = %silence.end_at,
            "Silence created"
        );
        Ok(silence)
    }

    /// Move the end of a silence
    pub async fn extend(&self, id: &SilenceId, end_at: DateTime<Utc>) -> Result<SilenceMark> {
        let stored = self
            .modify(id, |silence| {
                if end_at <= silence.start_at {
                    return Err(Error::Validation(format!(
                        "silence must end after it starts ({} <= {})",
                        end_at, silence.start_at
                    )));
                }
                silence.extend_until(end_at);
                Ok(())
            })
            .await?;
        tracing::info!(silence_id = %id, end_at = %stored.end_at, "Silence extended");
        Ok(stored)
    }

    /// End a silence now
    pub async fn cancel(&self, id: &SilenceId) -> Result<SilenceMark> {
        let now = self.ctx.now();
        let stored = self
            .modify(id, |silence| {
                silence.cancel(now);
                Ok(())
            })
            .await?;
        tracing::info!(silence_id = %id, "Silence cancelled");
        Ok(stored)
    }

    pub async fn get(&self, id: &SilenceId) -> Result<SilenceMark> {
        self.ctx
            .silences()
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::SilenceNotFound(id.to_string()))
    }

    pub async fn list_active(&self) -> Result<Vec<SilenceMark>> {
        Ok(self.ctx.silences().find_active(self.ctx.now()).await?)
    }

    /// Active silences suppressing `alert`
    pub async fn matching(&self, alert: &Alert) -> Result<Vec<SilenceMark>> {
        Ok(self
            .ctx
            .silences()
            .find_matching_alert(alert, self.ctx.now())
            .await?)
    }

    pub async fn is_silenced(&self, alert: &Alert) -> Result<bool> {
        Ok(!self.matching(alert).await?.is_empty())
    }

    /// Drop every silence whose window has closed
    pub async fn delete_expired(&self) -> Result<u64> {
        let deleted = self.ctx.silences().delete_expired(self.ctx.now()).await?;
        if deleted > 0 {
            tracing::info!(deleted, "Expired silences removed");
        }
        Ok(deleted)
    }

    /// Sweep expired silences every `alerting.silence_sweep_interval`
    ///
    /// The first sweep runs immediately. Sweep failures are logged and the
    /// loop keeps going until `cancel` fires.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let service = self.clone();
        let period = self.ctx.config().alerting.silence_sweep_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(period_secs = period.as_secs(), "Silence sweeper started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = service.delete_expired().await {
                            tracing::warn!(error = %e, "Silence sweep failed");
                        }
                    }
                }
            }

            tracing::info!("Silence sweeper stopped");
        })
    }

    /// Load, change and write back with one reload on a version conflict
    async fn modify<F>(&self, id: &SilenceId, mut change: F) -> Result<SilenceMark>
    where
        F: FnMut(&mut SilenceMark) -> Result<()>,
    {
        let mut reloaded = false;
        loop {
            let mut silence = self.get(id).await?;
            change(&mut silence)?;
            match self.ctx.silences().update(&silence).await {
                Ok(stored) => return Ok(stored),
                Err(e) if e.is_concurrent_update() && !reloaded => {
                    tracing::debug!(silence_id = %id, "Version conflict, reloading silence");
                    reloaded = true;
                }
                Err(e) if e.is_not_found() => return Err(Error::SilenceNotFound(id.to_string())),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SilenceStatus;
    use crate::service::fixtures::{harness, report, t0};
    use chrono::Duration;

    fn by_instance(instance: &str, end_at: DateTime<Utc>) -> NewSilence {
        NewSilence {
            selectors: SilenceSelectors {
                instance: Some(instance.to_string()),
                ..Default::default()
            },
            start_at: None,
            end_at,
            actor: Actor::new("U1", "ops@example.com", "Ops"),
            reason: "kernel upgrade".to_string(),
            source: Source::Slack,
        }
    }

    #[tokio::test]
    async fn test_create_validates_window_and_selectors() {
        let h = harness().await;
        let service = SilenceService::new(h.ctx.clone());

        let empty = by_instance("", t0() + Duration::hours(1));
        assert!(matches!(service.create(empty).await, Err(Error::Validation(_))));

        let backwards = by_instance("srv-1", t0() - Duration::minutes(1));
        assert!(matches!(service.create(backwards).await, Err(Error::Validation(_))));

        let silence = service
            .create(by_instance("srv-1", t0() + Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(silence.start_at, t0());
        assert_eq!(silence.created_by, "Ops");
        assert_eq!(service.list_active().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_is_silenced_follows_the_window() {
        let h = harness().await;
        let service = SilenceService::new(h.ctx.clone());
        let alert = Alert::from_report(&report("fp-w", t0()), t0());

        let silence = service
            .create(by_instance("srv-1", t0() + Duration::minutes(30)))
            .await
            .unwrap();
        assert!(service.is_silenced(&alert).await.unwrap());

        h.clock.advance(Duration::minutes(31));
        assert!(!service.is_silenced(&alert).await.unwrap());

        let extended = service
            .extend(&silence.id, t0() + Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(extended.version, silence.version + 1);
        assert!(service.is_silenced(&alert).await.unwrap());

        let cancelled = service.cancel(&silence.id).await.unwrap();
        assert_eq!(cancelled.status(h.ctx.now()), SilenceStatus::Expired);
        assert!(!service.is_silenced(&alert).await.unwrap());
    }

    #[tokio::test]
    async fn test_extend_rejects_end_before_start() {
        let h = harness().await;
        let service = SilenceService::new(h.ctx.clone());
        let silence = service
            .create(by_instance("srv-1", t0() + Duration::hours(1)))
            .await
            .unwrap();

        let err = service
            .extend(&silence.id, t0() - Duration::hours(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(service.get(&silence.id).await.unwrap().end_at, silence.end_at);
    }

    #[tokio::test]
    async fn test_unknown_silence_is_not_found() {
        let h = harness().await;
        let service = SilenceService::new(h.ctx.clone());
        let err = service.cancel(&SilenceId::generate()).await.unwrap_err();
        assert!(matches!(err, Error::SilenceNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_expired_keeps_live_silences() {
        let h = harness().await;
        let service = SilenceService::new(h.ctx.clone());
        service
            .create(by_instance("srv-1", t0() + Duration::minutes(5)))
            .await
            .unwrap();
        let live = service
            .create(by_instance("srv-2", t0() + Duration::hours(5)))
            .await
            .unwrap();

        h.clock.advance(Duration::minutes(10));
        assert_eq!(service.delete_expired().await.unwrap(), 1);
        assert!(service.get(&live.id).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_until_cancelled() {
        let h = harness().await;
        let service = SilenceService::new(h.ctx.clone());
        let expired = service
            .create(by_instance("srv-1", t0() + Duration::minutes(5)))
            .await
            .unwrap();
        h.clock.advance(Duration::minutes(10));

        let cancel = CancellationToken::new();
        let handle = service.spawn_sweeper(cancel.clone());
        // First tick fires immediately
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(matches!(
            service.get(&expired.id).await,
            Err(Error::SilenceNotFound(_))
        ));

        cancel.cancel();
        handle.await.unwrap();
    }
}
