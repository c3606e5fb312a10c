//! Alert entity and its lifecycle state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::ids::AlertId;

/// Alert severity as reported by the monitoring source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Needs immediate attention
    Critical,
    /// Degraded but not down
    #[default]
    Warning,
    /// Informational only
    Info,
}

impl Severity {
    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "warning" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            other => Err(UnknownVariant::new("severity", other)),
        }
    }
}

/// Lifecycle state of an alert
///
/// Transitions only move forward: `active -> acked -> resolved` or
/// `active -> resolved`. There is no reopen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    /// Firing and not yet acknowledged
    #[default]
    Active,
    /// Someone has taken ownership
    Acked,
    /// Terminal
    Resolved,
}

impl AlertState {
    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acked => "acked",
            Self::Resolved => "resolved",
        }
    }

    /// Active or acked
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "acked" => Ok(Self::Acked),
            "resolved" => Ok(Self::Resolved),
            other => Err(UnknownVariant::new("alert state", other)),
        }
    }
}

/// A stored string did not name a known enum variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    /// What was being parsed
    pub kind: &'static str,
    /// The offending value
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// A lifecycle transition that the state machine does not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid alert transition from {from} to {to}")]
pub struct InvalidTransition {
    /// State the alert was in
    pub from: AlertState,
    /// State that was requested
    pub to: AlertState,
}

/// One report delivered by the inbound alert source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AlertReport {
    /// Correlation key for the underlying condition
    pub fingerprint: String,
    /// Alert rule name
    pub name: String,
    /// Host or instance the condition was observed on
    #[serde(default)]
    pub instance: String,
    /// Service or target the alert is about
    #[serde(default)]
    pub target: String,
    /// One-line summary
    #[serde(default)]
    pub summary: String,
    /// Longer description
    #[serde(default)]
    pub description: String,
    /// Severity
    #[serde(default)]
    pub severity: Severity,
    /// Labels attached by the source
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Annotations attached by the source
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    /// When the source observed the condition
    pub fired_at: DateTime<Utc>,
    /// Whether the source reports the condition as cleared
    #[serde(default)]
    pub resolved: bool,
}

/// One observed condition reported by a monitoring source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    /// Correlation key; not unique across records
    pub fingerprint: String,
    pub name: String,
    pub instance: String,
    pub target: String,
    pub summary: String,
    pub description: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub severity: Severity,
    pub state: AlertState,
    pub fired_at: DateTime<Utc>,
    pub acked_at: Option<DateTime<Utc>>,
    pub acked_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Last time the alert was fanned out to destinations
    pub last_notified_at: Option<DateTime<Utc>>,
    /// Destination name (e.g. "slack") to that destination's message or incident key
    pub external_references: HashMap<String, String>,
    /// Incremented by the repository on every persisted update
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    /// Build a fresh active alert from an inbound report
    pub fn from_report(report: &AlertReport, now: DateTime<Utc>) -> Self {
        Self {
            id: AlertId::generate(),
            fingerprint: report.fingerprint.clone(),
            name: report.name.clone(),
            instance: report.instance.clone(),
            target: report.target.clone(),
            summary: report.summary.clone(),
            description: report.description.clone(),
            labels: report.labels.clone(),
            annotations: report.annotations.clone(),
            severity: report.severity,
            state: AlertState::Active,
            fired_at: report.fired_at,
            acked_at: None,
            acked_by: None,
            resolved_at: None,
            last_notified_at: None,
            external_references: HashMap::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Active or acked
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Mark the alert acknowledged
    ///
    /// Returns `Ok(false)` when the alert was already acked; the original
    /// acknowledgment is kept. Fails if the alert is resolved.
    pub fn acknowledge(
        &mut self,
        by: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<bool, InvalidTransition> {
        match self.state {
            AlertState::Resolved => Err(InvalidTransition {
                from: AlertState::Resolved,
                to: AlertState::Acked,
            }),
            AlertState::Acked => Ok(false),
            AlertState::Active => {
                self.state = AlertState::Acked;
                self.acked_at = Some(at);
                self.acked_by = Some(by.into());
                Ok(true)
            }
        }
    }

    /// Mark the alert resolved
    ///
    /// Legal from every state; resolving twice overwrites `resolved_at`.
    pub fn resolve(&mut self, at: DateTime<Utc>) {
        self.state = AlertState::Resolved;
        self.resolved_at = Some(at);
    }

    /// Overwrite descriptive fields with a newer report of the same condition
    pub fn refresh_from(&mut self, report: &AlertReport) {
        self.fired_at = report.fired_at;
        self.name = report.name.clone();
        self.instance = report.instance.clone();
        self.target = report.target.clone();
        self.summary = report.summary.clone();
        self.description = report.description.clone();
        self.severity = report.severity;
        self.labels = report.labels.clone();
        self.annotations = report.annotations.clone();
    }

    /// Reference held by one destination, if any
    pub fn external_reference(&self, destination: &str) -> Option<&str> {
        self.external_references
            .get(destination)
            .map(String::as_str)
    }

    pub fn set_external_reference(
        &mut self,
        destination: impl Into<String>,
        reference: impl Into<String>,
    ) {
        self.external_references
            .insert(destination.into(), reference.into());
    }
}
