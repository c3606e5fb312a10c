//! Time-boxed suppression rules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::ack::{Actor, Source};
use crate::ids::{AlertId, SilenceId};

/// Where a silence sits relative to its time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceStatus {
    /// `now < start_at`
    Pending,
    /// `start_at <= now < end_at`
    Active,
    /// `now >= end_at`
    Expired,
}

impl fmt::Display for SilenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Expired => "expired",
        })
    }
}

/// Target selectors of a silence
///
/// Empty strings are treated the same as absent selectors.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SilenceSelectors {
    #[serde(default)]
    pub alert_id: Option<AlertId>,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
    /// Subset match against alert labels
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl SilenceSelectors {
    fn normalized(self) -> Self {
        Self {
            alert_id: self.alert_id.filter(|id| !id.as_str().is_empty()),
            instance: self.instance.filter(|s| !s.is_empty()),
            fingerprint: self.fingerprint.filter(|s| !s.is_empty()),
            labels: self.labels,
        }
    }

    /// No usable selector is set
    pub fn is_empty(&self) -> bool {
        self.alert_id.as_ref().map_or(true, |id| id.as_str().is_empty())
            && self.instance.as_deref().map_or(true, str::is_empty)
            && self.fingerprint.as_deref().map_or(true, str::is_empty)
            && self.labels.is_empty()
    }
}

/// A time-boxed suppression rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceMark {
    pub id: SilenceId,
    pub alert_id: Option<AlertId>,
    pub instance: Option<String>,
    pub fingerprint: Option<String>,
    pub labels: HashMap<String, String>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub created_by: String,
    pub created_by_email: String,
    pub reason: String,
    pub source: Source,
    pub created_at: DateTime<Utc>,
    /// Incremented by the repository on every persisted update
    pub version: u64,
}

impl SilenceMark {
    pub fn new(
        selectors: SilenceSelectors,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        actor: &Actor,
        reason: impl Into<String>,
        source: Source,
        now: DateTime<Utc>,
    ) -> Self {
        let selectors = selectors.normalized();
        Self {
            id: SilenceId::generate(),
            alert_id: selectors.alert_id,
            instance: selectors.instance,
            fingerprint: selectors.fingerprint,
            labels: selectors.labels,
            start_at,
            end_at,
            created_by: actor.display_name().unwrap_or_default().to_string(),
            created_by_email: actor.email.clone(),
            reason: reason.into(),
            source,
            created_at: now,
            version: 1,
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> SilenceStatus {
        if now < self.start_at {
            SilenceStatus::Pending
        } else if now < self.end_at {
            SilenceStatus::Active
        } else {
            SilenceStatus::Expired
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status(now) == SilenceStatus::Active
    }

    /// Non-empty alert ID selector
    pub fn alert_id_selector(&self) -> Option<&str> {
        self.alert_id
            .as_ref()
            .map(AlertId::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Non-empty fingerprint selector
    pub fn fingerprint_selector(&self) -> Option<&str> {
        self.fingerprint.as_deref().filter(|s| !s.is_empty())
    }

    /// Non-empty instance selector
    pub fn instance_selector(&self) -> Option<&str> {
        self.instance.as_deref().filter(|s| !s.is_empty())
    }

    /// Only labels are set, so matching needs a label scan
    pub fn is_label_only(&self) -> bool {
        self.alert_id_selector().is_none()
            && self.fingerprint_selector().is_none()
            && self.instance_selector().is_none()
            && !self.labels.is_empty()
    }

    /// Move the end of the window
    pub fn extend_until(&mut self, end_at: DateTime<Utc>) {
        self.end_at = end_at;
    }

    /// End the silence immediately
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.end_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(min)
    }

    fn silence(selectors: SilenceSelectors) -> SilenceMark {
        SilenceMark::new(
            selectors,
            t(10),
            t(20),
            &Actor::new("U1", "ops@example.com", "Ops"),
            "maintenance",
            Source::Api,
            t(0),
        )
    }

    #[test]
    fn test_status_boundaries() {
        let s = silence(SilenceSelectors {
            instance: Some("db-1".into()),
            ..Default::default()
        });
        assert_eq!(s.status(t(9)), SilenceStatus::Pending);
        assert_eq!(s.status(t(10)), SilenceStatus::Active);
        assert_eq!(s.status(t(19)), SilenceStatus::Active);
        assert_eq!(s.status(t(20)), SilenceStatus::Expired);
    }

    #[test]
    fn test_empty_selectors_are_normalized_away() {
        let s = silence(SilenceSelectors {
            instance: Some(String::new()),
            fingerprint: Some(String::new()),
            labels: HashMap::from([("env".into(), "prod".into())]),
            ..Default::default()
        });
        assert!(s.instance.is_none());
        assert!(s.fingerprint.is_none());
        assert!(s.is_label_only());
    }

    #[test]
    fn test_cancel_and_extend() {
        let mut s = silence(SilenceSelectors {
            fingerprint: Some("fp".into()),
            ..Default::default()
        });
        s.extend_until(t(30));
        assert!(s.is_active(t(25)));
        s.cancel(t(12));
        assert_eq!(s.status(t(12)), SilenceStatus::Expired);
    }

    #[test]
    fn test_provenance_from_actor() {
        let s = silence(SilenceSelectors::default());
        assert_eq!(s.created_by, "Ops");
        assert_eq!(s.created_by_email, "ops@example.com");
        assert_eq!(s.source, Source::Api);
    }
}
