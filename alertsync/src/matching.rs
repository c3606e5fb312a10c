//! Silence matching engine
//!
//! A silence suppresses an alert when it is active and ANY of its selectors
//! is satisfied on its own:
//!
//! 1. alert ID equality
//! 2. fingerprint equality
//! 3. instance equality, plus a label subset check when the silence has labels
//! 4. label subset check, only for silences with no ID/fingerprint/instance
//!
//! Selectors are OR-ed, not AND-ed. A silence with both `alert_id` and
//! `instance` set matches an alert that satisfies either one. Stored
//! silences rely on this, so it must not be tightened to AND semantics.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::domain::{Alert, SilenceMark};
use crate::ids::SilenceId;

/// Whether `silence` suppresses `alert` at `now`
pub fn matches_alert(silence: &SilenceMark, alert: &Alert, now: DateTime<Utc>) -> bool {
    if !silence.is_active(now) {
        return false;
    }

    if silence.alert_id_selector() == Some(alert.id.as_str()) {
        return true;
    }

    if silence.fingerprint_selector() == Some(alert.fingerprint.as_str()) {
        return true;
    }

    if silence.instance_selector() == Some(alert.instance.as_str())
        && (silence.labels.is_empty() || labels_subset(&silence.labels, &alert.labels))
    {
        return true;
    }

    silence.is_label_only() && labels_subset(&silence.labels, &alert.labels)
}

/// Every selector pair is present with an equal value in `labels`
pub fn labels_subset(selector: &HashMap<String, String>, labels: &HashMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(key, value)| labels.get(key) == Some(value))
}

/// Full scan over a candidate set, returning each match once
pub fn find_matching<'a, I>(silences: I, alert: &Alert, now: DateTime<Utc>) -> Vec<SilenceMark>
where
    I: IntoIterator<Item = &'a SilenceMark>,
{
    let mut seen = HashSet::new();
    silences
        .into_iter()
        .filter(|s| matches_alert(s, alert, now))
        .filter(|s| seen.insert(s.id.clone()))
        .cloned()
        .collect()
}

/// Silences with secondary indices by alert ID, fingerprint and instance
///
/// Criteria 1-3 are answered from the indices. Label-only silences are
/// kept in their own set and always evaluated.
#[derive(Debug, Default, Clone)]
pub struct SilenceIndex {
    silences: HashMap<SilenceId, SilenceMark>,
    by_alert_id: HashMap<String, HashSet<SilenceId>>,
    by_fingerprint: HashMap<String, HashSet<SilenceId>>,
    by_instance: HashMap<String, HashSet<SilenceId>>,
    label_only: HashSet<SilenceId>,
}

impl SilenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.silences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.silences.is_empty()
    }

    pub fn get(&self, id: &SilenceId) -> Option<&SilenceMark> {
        self.silences.get(id)
    }

    pub fn contains(&self, id: &SilenceId) -> bool {
        self.silences.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SilenceMark> {
        self.silences.values()
    }

    /// Insert or replace a silence, re-indexing its selectors
    pub fn upsert(&mut self, silence: SilenceMark) -> Option<SilenceMark> {
        let previous = self.remove(&silence.id);
        let id = silence.id.clone();

        if let Some(alert_id) = silence.alert_id_selector() {
            self.by_alert_id
                .entry(alert_id.to_string())
                .or_default()
                .insert(id.clone());
        }
        if let Some(fingerprint) = silence.fingerprint_selector() {
            self.by_fingerprint
                .entry(fingerprint.to_string())
                .or_default()
                .insert(id.clone());
        }
        if let Some(instance) = silence.instance_selector() {
            self.by_instance
                .entry(instance.to_string())
                .or_default()
                .insert(id.clone());
        }
        if silence.is_label_only() {
            self.label_only.insert(id.clone());
        }

        self.silences.insert(id, silence);
        previous
    }

    pub fn remove(&mut self, id: &SilenceId) -> Option<SilenceMark> {
        let silence = self.silences.remove(id)?;

        if let Some(alert_id) = silence.alert_id_selector() {
            unindex(&mut self.by_alert_id, alert_id, id);
        }
        if let Some(fingerprint) = silence.fingerprint_selector() {
            unindex(&mut self.by_fingerprint, fingerprint, id);
        }
        if let Some(instance) = silence.instance_selector() {
            unindex(&mut self.by_instance, instance, id);
        }
        self.label_only.remove(id);

        Some(silence)
    }

    /// Drop every silence whose window has ended, returning how many were removed
    pub fn remove_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<SilenceId> = self
            .silences
            .values()
            .filter(|s| s.end_at <= now)
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            self.remove(id);
        }
        expired.len()
    }

    /// Deduplicated union of active silences matching `alert`
    ///
    /// Results are ordered by silence ID.
    pub fn find_matching(&self, alert: &Alert, now: DateTime<Utc>) -> Vec<SilenceMark> {
        let mut candidates: BTreeSet<&SilenceId> = BTreeSet::new();

        for (index, key) in [
            (&self.by_alert_id, alert.id.as_str()),
            (&self.by_fingerprint, alert.fingerprint.as_str()),
            (&self.by_instance, alert.instance.as_str()),
        ] {
            if key.is_empty() {
                continue;
            }
            if let Some(ids) = index.get(key) {
                candidates.extend(ids.iter());
            }
        }
        candidates.extend(self.label_only.iter());

        candidates
            .into_iter()
            .filter_map(|id| self.silences.get(id))
            .filter(|s| matches_alert(s, alert, now))
            .cloned()
            .collect()
    }
}

fn unindex(index: &mut HashMap<String, HashSet<SilenceId>>, key: &str, id: &SilenceId) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Actor, AlertReport, SilenceSelectors, Source};
    use crate::ids::AlertId;
    use chrono::{Duration, TimeZone};
    use std::str::FromStr;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn alert(instance: &str, fingerprint: &str, label_pairs: &[(&str, &str)]) -> Alert {
        Alert::from_report(
            &AlertReport {
                fingerprint: fingerprint.into(),
                name: "DiskFull".into(),
                instance: instance.into(),
                labels: labels(label_pairs),
                fired_at: now(),
                ..Default::default()
            },
            now(),
        )
    }

    fn silence(selectors: SilenceSelectors) -> SilenceMark {
        SilenceMark::new(
            selectors,
            now() - Duration::minutes(5),
            now() + Duration::hours(1),
            &Actor::default(),
            "test",
            Source::Api,
            now(),
        )
    }

    #[test]
    fn test_inactive_silence_never_matches() {
        let a = alert("db-1", "fp", &[]);
        let mut s = silence(SilenceSelectors {
            fingerprint: Some("fp".into()),
            ..Default::default()
        });
        assert!(matches_alert(&s, &a, now()));
        s.cancel(now());
        assert!(!matches_alert(&s, &a, now()));

        let pending = SilenceMark::new(
            SilenceSelectors {
                fingerprint: Some("fp".into()),
                ..Default::default()
            },
            now() + Duration::minutes(1),
            now() + Duration::hours(1),
            &Actor::default(),
            "later",
            Source::Api,
            now(),
        );
        assert!(!matches_alert(&pending, &a, now()));
    }

    #[test]
    fn test_alert_id_selector() {
        let a = alert("db-1", "fp", &[]);
        let s = silence(SilenceSelectors {
            alert_id: Some(a.id.clone()),
            ..Default::default()
        });
        assert!(matches_alert(&s, &a, now()));
        assert!(!matches_alert(&s, &alert("db-1", "fp", &[]), now()));
    }

    // Selectors are OR-ed: the instance alone is enough even though the
    // fingerprint on the same silence does not match.
    #[test]
    fn test_instance_matches_despite_unrelated_fingerprint() {
        let a = alert("db-1", "abc", &[]);
        let s = silence(SilenceSelectors {
            instance: Some("db-1".into()),
            fingerprint: Some("xyz".into()),
            ..Default::default()
        });
        assert!(matches_alert(&s, &a, now()));
    }

    #[test]
    fn test_alert_id_or_instance_either_matches() {
        let other = alert("db-9", "fp-9", &[]);
        let s = silence(SilenceSelectors {
            alert_id: Some(AlertId::from_str("alert_unrelated").unwrap()),
            instance: Some("db-9".into()),
            ..Default::default()
        });
        assert!(matches_alert(&s, &other, now()));
    }

    #[test]
    fn test_instance_with_labels_requires_subset() {
        let s = silence(SilenceSelectors {
            instance: Some("db-1".into()),
            labels: labels(&[("env", "prod")]),
            ..Default::default()
        });
        assert!(matches_alert(&s, &alert("db-1", "a", &[("env", "prod")]), now()));
        assert!(!matches_alert(&s, &alert("db-1", "b", &[("env", "staging")]), now()));
        assert!(!matches_alert(&s, &alert("db-2", "c", &[("env", "prod")]), now()));
    }

    #[test]
    fn test_label_only_subset_matching() {
        let s = silence(SilenceSelectors {
            labels: labels(&[("env", "prod")]),
            ..Default::default()
        });
        assert!(matches_alert(
            &s,
            &alert("x", "1", &[("env", "prod"), ("team", "x")]),
            now()
        ));
        assert!(!matches_alert(&s, &alert("x", "2", &[("env", "staging")]), now()));
        assert!(!matches_alert(&s, &alert("x", "3", &[]), now()));
    }

    #[test]
    fn test_fingerprint_silence_ignores_labels() {
        let s = silence(SilenceSelectors {
            fingerprint: Some("fp".into()),
            labels: labels(&[("env", "prod")]),
            ..Default::default()
        });
        assert!(matches_alert(&s, &alert("x", "fp", &[("env", "dev")]), now()));
        assert!(!matches_alert(&s, &alert("x", "other", &[("env", "prod")]), now()));
    }

    #[test]
    fn test_empty_silence_matches_nothing() {
        let s = silence(SilenceSelectors::default());
        assert!(!matches_alert(&s, &alert("", "", &[]), now()));
    }

    #[test]
    fn test_index_returns_deduplicated_union() {
        let a = alert("db-1", "fp-1", &[("env", "prod")]);
        let by_both = silence(SilenceSelectors {
            instance: Some("db-1".into()),
            fingerprint: Some("fp-1".into()),
            ..Default::default()
        });
        let by_labels = silence(SilenceSelectors {
            labels: labels(&[("env", "prod")]),
            ..Default::default()
        });
        let unrelated = silence(SilenceSelectors {
            instance: Some("db-2".into()),
            ..Default::default()
        });

        let mut index = SilenceIndex::new();
        index.upsert(by_both.clone());
        index.upsert(by_labels.clone());
        index.upsert(unrelated);

        let found = index.find_matching(&a, now());
        let mut ids: Vec<_> = found.iter().map(|s| s.id.clone()).collect();
        ids.sort();
        let mut expected = vec![by_both.id, by_labels.id];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_index_agrees_with_full_scan() {
        let a = alert("db-1", "fp-1", &[("env", "prod"), ("team", "x")]);
        let silences = vec![
            silence(SilenceSelectors {
                instance: Some("db-1".into()),
                labels: labels(&[("team", "y")]),
                ..Default::default()
            }),
            silence(SilenceSelectors {
                labels: labels(&[("team", "x")]),
                ..Default::default()
            }),
            silence(SilenceSelectors {
                alert_id: Some(a.id.clone()),
                ..Default::default()
            }),
        ];

        let mut index = SilenceIndex::new();
        for s in &silences {
            index.upsert(s.clone());
        }

        let mut indexed: Vec<_> = index
            .find_matching(&a, now())
            .into_iter()
            .map(|s| s.id)
            .collect();
        let mut scanned: Vec<_> = find_matching(&silences, &a, now())
            .into_iter()
            .map(|s| s.id)
            .collect();
        indexed.sort();
        scanned.sort();
        assert_eq!(indexed, scanned);
        assert_eq!(indexed.len(), 2);
    }

    #[test]
    fn test_upsert_reindexes_changed_selectors() {
        let mut s = silence(SilenceSelectors {
            instance: Some("db-1".into()),
            ..Default::default()
        });
        let mut index = SilenceIndex::new();
        index.upsert(s.clone());

        s.instance = Some("db-2".into());
        assert!(index.upsert(s.clone()).is_some());

        assert!(index.find_matching(&alert("db-1", "a", &[]), now()).is_empty());
        assert_eq!(index.find_matching(&alert("db-2", "b", &[]), now()).len(), 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove_expired() {
        let mut index = SilenceIndex::new();
        let mut expired = silence(SilenceSelectors {
            fingerprint: Some("a".into()),
            ..Default::default()
        });
        expired.cancel(now() - Duration::minutes(1));
        index.upsert(expired);
        index.upsert(silence(SilenceSelectors {
            fingerprint: Some("b".into()),
            ..Default::default()
        }));

        assert_eq!(index.remove_expired(now()), 1);
        assert_eq!(index.len(), 1);
    }
}
