//! Acknowledgment audit records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::alert::UnknownVariant;
use crate::ids::{AckEventId, AlertId};

/// Where an acknowledgment or silence originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Slack interactive message
    Slack,
    /// PagerDuty incident webhook
    PagerDuty,
    /// Direct API call
    Api,
}

impl Source {
    /// Destination name used as the key in `Alert::external_references`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::PagerDuty => "pagerduty",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "slack" => Ok(Self::Slack),
            "pagerduty" => Ok(Self::PagerDuty),
            "api" => Ok(Self::Api),
            other => Err(UnknownVariant::new("source", other)),
        }
    }
}

/// The person (or system) behind an action
///
/// Every field may be empty for system-originated acknowledgments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Actor {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
}

impl Actor {
    pub fn new(
        user_id: impl Into<String>,
        email: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            name: name.into(),
        }
    }

    /// Best human-readable label: name, then email, then user ID
    pub fn display_name(&self) -> Option<&str> {
        [&self.name, &self.email, &self.user_id]
            .into_iter()
            .map(String::as_str)
            .find(|s| !s.is_empty())
    }
}

/// Append-only audit record of one acknowledgment action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckEvent {
    pub id: AckEventId,
    /// Must reference an existing alert
    pub alert_id: AlertId,
    pub source: Source,
    pub user_id: String,
    pub user_email: String,
    pub user_name: String,
    pub note: Option<String>,
    /// Silence duration picked in the acknowledging UI; informational only
    pub duration: Option<Duration>,
    pub created_at: DateTime<Utc>,
}

impl AckEvent {
    pub fn new(
        alert_id: AlertId,
        source: Source,
        actor: &Actor,
        note: Option<String>,
        duration: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AckEventId::generate(),
            alert_id,
            source,
            user_id: actor.user_id.clone(),
            user_email: actor.email.clone(),
            user_name: actor.name.clone(),
            note: note.filter(|n| !n.trim().is_empty()),
            duration,
            created_at: now,
        }
    }

    pub fn actor(&self) -> Actor {
        Actor::new(&self.user_id, &self.user_email, &self.user_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_names_match_destination_keys() {
        assert_eq!(Source::PagerDuty.as_str(), "pagerduty");
        assert_eq!("Slack".parse::<Source>().unwrap(), Source::Slack);
        assert_eq!(
            serde_json::to_string(&Source::PagerDuty).unwrap(),
            "\"pagerduty\""
        );
    }

    #[test]
    fn test_actor_display_name_fallbacks() {
        assert_eq!(Actor::new("U1", "a@x.io", "Alice").display_name(), Some("Alice"));
        assert_eq!(Actor::new("U1", "a@x.io", "").display_name(), Some("a@x.io"));
        assert_eq!(Actor::new("U1", "", "").display_name(), Some("U1"));
        assert_eq!(Actor::default().display_name(), None);
    }

    #[test]
    fn test_blank_note_is_dropped() {
        let event = AckEvent::new(
            AlertId::generate(),
            Source::Api,
            &Actor::default(),
            Some("   ".into()),
            None,
            Utc::now(),
        );
        assert!(event.note.is_none());
    }
}
